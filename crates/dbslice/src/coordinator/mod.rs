//! Copy coordinator: seed copy and reference-closure convergence.
//!
//! Phase 1 copies the requested tables on a bounded worker pool. Phase 2
//! repeatedly drains the frontier's pending references and fetches exactly
//! those rows until no table has pending work left - the fixpoint. Each
//! drained key set is the difference against the copied set at drain time
//! and copied keys never re-enter pending, so the loop is bounded by the
//! reference graph's diameter rather than cycling forever.

use crate::error::Result;
use crate::extract::RowSource;
use crate::frontier::{Frontier, Reference};
use crate::write::{RowSink, TableTx};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Orchestrates the two copy phases over the source, sink and frontier.
pub struct Coordinator {
    source: Arc<dyn RowSource>,
    sink: Arc<dyn RowSink>,
    frontier: Arc<dyn Frontier>,
    max_workers: usize,
}

/// Result of one table unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    /// Table name.
    pub table: String,

    /// Rows handed to the writer by this unit.
    pub rows: u64,

    /// Error message if the unit failed and was rolled back.
    pub error: Option<String>,
}

/// Result of the reference-closure phase.
#[derive(Debug, Clone, Serialize)]
pub struct ClosureStats {
    /// Convergence iterations until the frontier was empty.
    pub passes: usize,

    /// Per-unit outcomes, in execution order.
    pub outcomes: Vec<TableOutcome>,
}

/// Result of a full copy run.
#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    /// "completed" or "completed_with_failures".
    pub status: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Seed tables requested.
    pub tables_total: usize,

    /// Units of work that failed across both phases.
    pub tables_failed: usize,

    /// Total rows handed to the writer.
    pub rows_copied: u64,

    /// Convergence iterations in the closure phase.
    pub reference_passes: usize,

    /// Names of tables with at least one failed unit.
    pub failed_tables: Vec<String>,

    /// Every unit outcome, seed phase first.
    pub outcomes: Vec<TableOutcome>,
}

impl CopyReport {
    /// Convert to a pretty JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Coordinator {
    /// Create a new coordinator.
    pub fn new(
        source: Arc<dyn RowSource>,
        sink: Arc<dyn RowSink>,
        frontier: Arc<dyn Frontier>,
        max_workers: usize,
    ) -> Self {
        Self {
            source,
            sink,
            frontier,
            max_workers: max_workers.max(1),
        }
    }

    /// Run both phases in sequence and build the report.
    pub async fn run(&self, tables: &[String]) -> Result<CopyReport> {
        let started_at = Utc::now();

        let mut outcomes = self.run_seed_copy(tables).await?;
        let closure = self.run_reference_closure().await?;
        outcomes.extend(closure.outcomes);

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let rows_copied = outcomes
            .iter()
            .filter(|o| o.error.is_none())
            .map(|o| o.rows)
            .sum();
        let failed: BTreeSet<String> = outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.table.clone())
            .collect();

        let status = if failed.is_empty() {
            "completed"
        } else {
            "completed_with_failures"
        };

        let report = CopyReport {
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds: duration,
            tables_total: tables.len(),
            tables_failed: failed.len(),
            rows_copied,
            reference_passes: closure.passes,
            failed_tables: failed.into_iter().collect(),
            outcomes,
        };

        info!(
            "Copy {}: {} seed tables, {} rows, {} reference passes in {:.1}s",
            report.status,
            report.tables_total,
            report.rows_copied,
            report.reference_passes,
            report.duration_seconds
        );

        Ok(report)
    }

    /// Phase 1: copy each seed table on the bounded worker pool. Failures
    /// are isolated per table and reported, never propagated to siblings.
    pub async fn run_seed_copy(&self, tables: &[String]) -> Result<Vec<TableOutcome>> {
        info!(
            "Copying {} seed tables with {} workers",
            tables.len(),
            self.max_workers
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(tables.len());

        for table in tables {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let source = self.source.clone();
            let sink = self.sink.clone();
            let frontier = self.frontier.clone();
            let table = table.clone();
            let task_table = table.clone();

            let handle = tokio::spawn(async move {
                let result = copy_table(source, sink, frontier, &task_table).await;
                drop(permit);
                result
            });
            handles.push((table, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (table, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(rows)) => TableOutcome {
                    table,
                    rows,
                    error: None,
                },
                Ok(Err(e)) => TableOutcome {
                    table,
                    rows: 0,
                    error: Some(e.to_string()),
                },
                Err(e) => {
                    error!("{}: copy task panicked - {}", table, e);
                    TableOutcome {
                        table,
                        rows: 0,
                        error: Some(format!("task panicked: {}", e)),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Phase 2: resolve pending references until the frontier reports no
    /// pending work anywhere.
    pub async fn run_reference_closure(&self) -> Result<ClosureStats> {
        let mut passes = 0;
        let mut outcomes = Vec::new();

        while self.frontier.has_pending_work().await? {
            passes += 1;
            info!("Reference pass {}", passes);

            for (table, keys) in self.frontier.drain_pending().await? {
                if keys.is_empty() {
                    continue;
                }
                let result = resolve_references(
                    self.source.clone(),
                    self.sink.clone(),
                    self.frontier.clone(),
                    &table,
                    &keys,
                )
                .await;

                let outcome = match result {
                    Ok(rows) => TableOutcome {
                        table,
                        rows,
                        error: None,
                    },
                    Err(e) => TableOutcome {
                        table,
                        rows: 0,
                        error: Some(e.to_string()),
                    },
                };
                outcomes.push(outcome);
            }
        }

        info!("Reference closure converged after {} passes", passes);
        Ok(ClosureStats { passes, outcomes })
    }
}

/// Phase-1 unit of work: stream one table through the writer inside a
/// single transaction.
async fn copy_table(
    source: Arc<dyn RowSource>,
    sink: Arc<dyn RowSink>,
    frontier: Arc<dyn Frontier>,
    table: &str,
) -> Result<u64> {
    info!("Start table: {}", table);
    let mut tx = sink.begin(table).await?;

    let streamed = stream_table(&source, &frontier, &mut tx, table).await;

    match streamed {
        Ok((rows, references)) => {
            if let Err(e) = tx.commit().await {
                error!("Error when copying table '{}': {}", table, e);
                fail_unit(&frontier, table, None).await;
                return Err(e);
            }
            info!("Commit table: {} ({} rows)", table, rows);
            let references: Vec<Reference> = references.into_iter().collect();
            frontier.mark_pending(&references).await?;
            Ok(rows)
        }
        Err(e) => {
            error!("Error when copying table '{}': {}", table, e);
            fail_unit(&frontier, table, Some(tx)).await;
            Err(e)
        }
    }
}

/// Stream every batch of the table's scan into the transaction. Primary
/// keys go on the shelf before the write; same-table references within the
/// scan are thereby already deduplicated.
async fn stream_table(
    source: &Arc<dyn RowSource>,
    frontier: &Arc<dyn Frontier>,
    tx: &mut Box<dyn TableTx>,
    table: &str,
) -> Result<(u64, HashSet<Reference>)> {
    let mut rx = source.scan(table);
    let mut references = HashSet::new();
    let mut rows_copied = 0u64;

    while let Some(batch) = rx.recv().await {
        let batch = batch?;
        let keys: Vec<String> = batch.iter().map(|r| r.primary_key.clone()).collect();
        for row in &batch {
            for (ref_table, key) in &row.references {
                references.insert((ref_table.clone(), key.clone()));
            }
        }
        frontier.mark_copied(table, &keys).await?;
        tx.persist(&batch, false).await?;
        rows_copied += batch.len() as u64;
    }

    Ok((rows_copied, references))
}

/// Phase-2 unit of work: fetch a drained key set, persist it with
/// duplicate-ignore semantics, and queue any newly discovered references.
async fn resolve_references(
    source: Arc<dyn RowSource>,
    sink: Arc<dyn RowSink>,
    frontier: Arc<dyn Frontier>,
    table: &str,
    keys: &[String],
) -> Result<u64> {
    info!("References for table '{}': {}", table, keys.len());
    let mut tx = sink.begin(table).await?;

    let fetched: Result<(u64, HashSet<Reference>)> = async {
        let rows = source.fetch_by_keys(table, keys).await?;
        let copied: Vec<String> = rows.iter().map(|r| r.primary_key.clone()).collect();

        let mut references = HashSet::new();
        for row in &rows {
            for (ref_table, key) in &row.references {
                references.insert((ref_table.clone(), key.clone()));
            }
        }

        frontier.mark_copied(table, &copied).await?;
        tx.persist(&rows, true).await?;
        Ok((rows.len() as u64, references))
    }
    .await;

    match fetched {
        Ok((rows, references)) => {
            if let Err(e) = tx.commit().await {
                error!("Error when copying references to '{}': {}", table, e);
                fail_unit(&frontier, table, None).await;
                return Err(e);
            }
            let references: Vec<Reference> = references.into_iter().collect();
            frontier.mark_pending(&references).await?;
            Ok(rows)
        }
        Err(e) => {
            error!("Error when copying references to '{}': {}", table, e);
            fail_unit(&frontier, table, Some(tx)).await;
            Err(e)
        }
    }
}

/// Undo a failed unit: drop the table's copied bookkeeping and roll the
/// transaction back. Cleanup failures are logged, not propagated - the
/// unit's original error is what the caller reports.
async fn fail_unit(frontier: &Arc<dyn Frontier>, table: &str, tx: Option<Box<dyn TableTx>>) {
    if let Err(e) = frontier.clear_shelf(table).await {
        warn!("Failed to clear shelf for '{}': {}", table, e);
    }
    if let Some(tx) = tx {
        if let Err(e) = tx.rollback().await {
            warn!("Rollback failed for '{}': {}", table, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SliceError;
    use crate::extract::Row;
    use crate::frontier::MemoryFrontier;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn row(pk: &str, refs: &[(&str, &str)]) -> Row {
        Row {
            primary_key: pk.to_string(),
            tuple: format!("({})", pk),
            references: refs
                .iter()
                .map(|(t, k)| (t.to_string(), k.to_string()))
                .collect(),
        }
    }

    /// Source over an in-memory table map. Only tables listed as seeds are
    /// scannable; everything else behaves like an on-request table.
    struct MockSource {
        rows: HashMap<String, Vec<Row>>,
        scannable: Vec<String>,
        batch: usize,
    }

    #[async_trait]
    impl RowSource for MockSource {
        fn scan(&self, table: &str) -> mpsc::Receiver<Result<Vec<Row>>> {
            let (tx, rx) = mpsc::channel(4);
            let batches: Vec<Vec<Row>> = if self.scannable.iter().any(|t| t.as_str() == table) {
                self.rows
                    .get(table)
                    .map(|rows| rows.chunks(self.batch).map(|c| c.to_vec()).collect())
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            tokio::spawn(async move {
                for batch in batches {
                    if tx.send(Ok(batch)).await.is_err() {
                        return;
                    }
                }
            });
            rx
        }

        async fn fetch_by_keys(&self, table: &str, keys: &[String]) -> Result<Vec<Row>> {
            let wanted: HashSet<&String> = keys.iter().collect();
            Ok(self
                .rows
                .get(table)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| wanted.contains(&r.primary_key))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    /// Sink recording committed rows and every insert attempt per table.
    #[derive(Default)]
    struct MockStore {
        committed: Mutex<HashMap<String, Vec<String>>>,
        attempts: Mutex<HashMap<String, Vec<String>>>,
    }

    impl MockStore {
        fn committed(&self, table: &str) -> Vec<String> {
            let mut keys = self
                .committed
                .lock()
                .unwrap()
                .get(table)
                .cloned()
                .unwrap_or_default();
            keys.sort();
            keys
        }

        fn attempts(&self, table: &str) -> Vec<String> {
            let mut keys = self
                .attempts
                .lock()
                .unwrap()
                .get(table)
                .cloned()
                .unwrap_or_default();
            keys.sort();
            keys
        }
    }

    struct MockSink {
        store: Arc<MockStore>,
        fail_persist: Vec<String>,
    }

    struct MockTx {
        table: String,
        store: Arc<MockStore>,
        buffered: Vec<(String, bool)>,
        fail_persist: bool,
    }

    #[async_trait]
    impl RowSink for MockSink {
        async fn begin(&self, table: &str) -> Result<Box<dyn TableTx>> {
            Ok(Box::new(MockTx {
                table: table.to_string(),
                store: self.store.clone(),
                buffered: Vec::new(),
                fail_persist: self.fail_persist.iter().any(|t| t.as_str() == table),
            }))
        }
    }

    #[async_trait]
    impl TableTx for MockTx {
        async fn persist(&mut self, rows: &[Row], ignore_duplicates: bool) -> Result<()> {
            if self.fail_persist {
                return Err(SliceError::copy(&self.table, "simulated write failure"));
            }
            for row in rows {
                self.buffered
                    .push((row.primary_key.clone(), ignore_duplicates));
            }
            Ok(())
        }

        async fn commit(mut self: Box<Self>) -> Result<()> {
            let buffered = std::mem::take(&mut self.buffered);
            let mut attempts = self.store.attempts.lock().unwrap();
            let mut committed = self.store.committed.lock().unwrap();
            let attempts = attempts.entry(self.table.clone()).or_default();
            let committed = committed.entry(self.table.clone()).or_default();
            for (key, ignore) in buffered {
                attempts.push(key.clone());
                if committed.contains(&key) {
                    // Duplicate key: only tolerated under INSERT IGNORE
                    assert!(ignore, "duplicate insert without ignore_duplicates");
                    continue;
                }
                committed.push(key);
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        coordinator: Coordinator,
        store: Arc<MockStore>,
        frontier: Arc<MemoryFrontier>,
    }

    fn fixture(
        rows: Vec<(&str, Vec<Row>)>,
        scannable: &[&str],
        fail_persist: &[&str],
    ) -> Fixture {
        let store = Arc::new(MockStore::default());
        let frontier = Arc::new(MemoryFrontier::new());
        let source = Arc::new(MockSource {
            rows: rows
                .into_iter()
                .map(|(t, r)| (t.to_string(), r))
                .collect(),
            scannable: scannable.iter().map(|t| t.to_string()).collect(),
            batch: 2,
        });
        let sink = Arc::new(MockSink {
            store: store.clone(),
            fail_persist: fail_persist.iter().map(|t| t.to_string()).collect(),
        });
        let coordinator = Coordinator::new(source, sink, frontier.clone(), 4);
        Fixture {
            coordinator,
            store,
            frontier,
        }
    }

    fn seeds(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_seed_rows_pull_in_referenced_rows() {
        let fx = fixture(
            vec![
                (
                    "orders",
                    vec![row("1", &[("customers", "42")]), row("2", &[])],
                ),
                ("customers", vec![row("42", &[]), row("43", &[])]),
            ],
            &["orders"],
            &[],
        );

        let report = fx
            .coordinator
            .run(&seeds(&["orders", "customers"]))
            .await
            .unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(fx.store.committed("orders"), vec!["1", "2"]);
        // customers is on-request: only the referenced row lands
        assert_eq!(fx.store.committed("customers"), vec!["42"]);
        assert_eq!(report.reference_passes, 1);
        assert_eq!(report.rows_copied, 3);
        assert!(!fx.frontier.has_pending_work().await.unwrap());
    }

    #[tokio::test]
    async fn test_cyclic_references_terminate_exactly_once() {
        // a:1 -> b:1 -> a:1, a seed-scanned
        let fx = fixture(
            vec![
                ("a", vec![row("1", &[("b", "1")])]),
                ("b", vec![row("1", &[("a", "1")])]),
            ],
            &["a"],
            &[],
        );

        let report = fx.coordinator.run(&seeds(&["a", "b"])).await.unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(fx.store.attempts("a"), vec!["1"]);
        assert_eq!(fx.store.attempts("b"), vec!["1"]);
        assert!(!fx.frontier.has_pending_work().await.unwrap());
    }

    #[tokio::test]
    async fn test_self_reference_to_scanned_key_stays_quiet() {
        // Both employees land in phase 1; manager references stay in-table
        let fx = fixture(
            vec![(
                "employees",
                vec![
                    row("1", &[("employees", "2")]),
                    row("2", &[("employees", "2")]),
                ],
            )],
            &["employees"],
            &[],
        );

        let report = fx.coordinator.run(&seeds(&["employees"])).await.unwrap();

        assert_eq!(report.reference_passes, 0);
        assert_eq!(fx.store.attempts("employees"), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_multi_hop_chain_converges_by_depth() {
        let fx = fixture(
            vec![
                ("a", vec![row("1", &[("b", "10")])]),
                ("b", vec![row("10", &[("c", "100")])]),
                ("c", vec![row("100", &[])]),
            ],
            &["a"],
            &[],
        );

        let report = fx.coordinator.run(&seeds(&["a", "b", "c"])).await.unwrap();

        assert_eq!(report.reference_passes, 2);
        assert_eq!(fx.store.committed("b"), vec!["10"]);
        assert_eq!(fx.store.committed("c"), vec!["100"]);
    }

    #[tokio::test]
    async fn test_failed_seed_table_rolls_back_completely() {
        let fx = fixture(
            vec![
                (
                    "orders",
                    vec![row("1", &[("customers", "42")]), row("2", &[])],
                ),
                ("customers", vec![row("42", &[])]),
            ],
            &["orders"],
            &["orders"],
        );

        let report = fx
            .coordinator
            .run(&seeds(&["orders", "customers"]))
            .await
            .unwrap();

        assert_eq!(report.status, "completed_with_failures");
        assert_eq!(report.failed_tables, vec!["orders".to_string()]);
        // Nothing committed, no copied bookkeeping left behind
        assert!(fx.store.committed("orders").is_empty());
        assert_eq!(fx.frontier.copied_count("orders"), 0);
        // References from the failed table were never published
        assert!(fx.store.committed("customers").is_empty());
        assert_eq!(report.reference_passes, 0);
    }

    #[tokio::test]
    async fn test_closure_failure_does_not_block_siblings() {
        let fx = fixture(
            vec![
                (
                    "orders",
                    vec![row("1", &[("customers", "42"), ("products", "7")])],
                ),
                ("customers", vec![row("42", &[])]),
                ("products", vec![row("7", &[])]),
            ],
            &["orders"],
            &["products"],
        );

        let report = fx
            .coordinator
            .run(&seeds(&["orders", "customers", "products"]))
            .await
            .unwrap();

        assert_eq!(report.status, "completed_with_failures");
        assert_eq!(fx.store.committed("customers"), vec!["42"]);
        assert!(fx.store.committed("products").is_empty());
        assert!(report.failed_tables.contains(&"products".to_string()));
        assert!(!fx.frontier.has_pending_work().await.unwrap());
    }

    #[tokio::test]
    async fn test_shared_reference_fetched_once() {
        let fx = fixture(
            vec![
                (
                    "orders",
                    vec![
                        row("1", &[("customers", "42")]),
                        row("2", &[("customers", "42")]),
                        row("3", &[("customers", "42")]),
                    ],
                ),
                ("customers", vec![row("42", &[])]),
            ],
            &["orders"],
            &[],
        );

        let report = fx
            .coordinator
            .run(&seeds(&["orders", "customers"]))
            .await
            .unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(fx.store.attempts("customers"), vec!["42"]);
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let fx = fixture(vec![("t", vec![row("1", &[])])], &["t"], &[]);
        let report = fx.coordinator.run(&seeds(&["t"])).await.unwrap();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\""));
        assert!(json.contains("\"rows_copied\""));
    }
}
