//! In-memory frontier for single-process runs and tests.

use super::{Frontier, Reference};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Shelves {
    copied: HashMap<String, HashSet<String>>,
    pending: HashMap<String, HashSet<String>>,
    pending_tables: HashSet<String>,
}

/// Lock-protected in-memory frontier. Satisfies the same concurrency
/// contract as the external store: every operation is atomic with respect
/// to the others.
#[derive(Default)]
pub struct MemoryFrontier {
    inner: Mutex<Shelves>,
}

impl MemoryFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of copied keys recorded for a table.
    pub fn copied_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.copied.get(table).map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Frontier for MemoryFrontier {
    async fn mark_copied(&self, table: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        inner
            .copied
            .entry(table.to_string())
            .or_default()
            .extend(keys.iter().cloned());
        Ok(())
    }

    async fn mark_pending(&self, references: &[Reference]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for (table, key) in references {
            let already_copied = inner
                .copied
                .get(table)
                .map(|s| s.contains(key))
                .unwrap_or(false);
            if already_copied {
                continue;
            }
            inner
                .pending
                .entry(table.clone())
                .or_default()
                .insert(key.clone());
            inner.pending_tables.insert(table.clone());
        }
        Ok(())
    }

    async fn has_pending_work(&self) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(!inner.pending_tables.is_empty())
    }

    async fn drain_pending(&self) -> Result<Vec<(String, Vec<String>)>> {
        let mut inner = self.inner.lock().unwrap();
        let tables: Vec<String> = inner.pending_tables.drain().collect();

        let mut drained = Vec::with_capacity(tables.len());
        for table in tables {
            let pending = inner.pending.remove(&table).unwrap_or_default();
            let keys: Vec<String> = match inner.copied.get(&table) {
                Some(copied) => pending.difference(copied).cloned().collect(),
                None => pending.into_iter().collect(),
            };
            drained.push((table, keys));
        }
        Ok(drained)
    }

    async fn clear_shelf(&self, table: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.copied.remove(table);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        *inner = Shelves::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn refs(pairs: &[(&str, &str)]) -> Vec<Reference> {
        pairs
            .iter()
            .map(|(t, k)| (t.to_string(), k.to_string()))
            .collect()
    }

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_copied_key_never_enters_pending() {
        let frontier = MemoryFrontier::new();
        frontier
            .mark_copied("customers", &keys(&["42"]))
            .await
            .unwrap();

        frontier
            .mark_pending(&refs(&[("customers", "42"), ("customers", "43")]))
            .await
            .unwrap();

        let drained = frontier.drain_pending().await.unwrap();
        assert_eq!(drained.len(), 1);
        let (table, pending) = &drained[0];
        assert_eq!(table, "customers");
        assert_eq!(pending, &keys(&["43"]));
    }

    #[tokio::test]
    async fn test_self_reference_to_copied_key_is_dropped() {
        let frontier = MemoryFrontier::new();
        frontier
            .mark_copied("employees", &keys(&["1", "2"]))
            .await
            .unwrap();

        // A row's manager_id pointing at an already-copied employee
        frontier
            .mark_pending(&refs(&[("employees", "1")]))
            .await
            .unwrap();

        assert!(!frontier.has_pending_work().await.unwrap());
        assert!(frontier.drain_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_guards_queued_then_copied_race() {
        let frontier = MemoryFrontier::new();
        frontier
            .mark_pending(&refs(&[("orders", "7"), ("orders", "8")]))
            .await
            .unwrap();

        // Key 7 gets copied between being queued and being drained
        frontier.mark_copied("orders", &keys(&["7"])).await.unwrap();

        let drained = frontier.drain_pending().await.unwrap();
        assert_eq!(drained[0].1, keys(&["8"]));
    }

    #[tokio::test]
    async fn test_drain_clears_pending_state() {
        let frontier = MemoryFrontier::new();
        frontier
            .mark_pending(&refs(&[("orders", "1")]))
            .await
            .unwrap();
        assert!(frontier.has_pending_work().await.unwrap());

        let first = frontier.drain_pending().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(!frontier.has_pending_work().await.unwrap());
        assert!(frontier.drain_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_shelf_allows_repending() {
        let frontier = MemoryFrontier::new();
        frontier.mark_copied("orders", &keys(&["1"])).await.unwrap();
        frontier.clear_shelf("orders").await.unwrap();

        // After the shelf was cleared the key may be referenced again
        frontier
            .mark_pending(&refs(&[("orders", "1")]))
            .await
            .unwrap();
        let drained = frontier.drain_pending().await.unwrap();
        assert_eq!(drained[0].1, keys(&["1"]));
    }

    #[tokio::test]
    async fn test_reset_wipes_everything() {
        let frontier = MemoryFrontier::new();
        frontier.mark_copied("a", &keys(&["1"])).await.unwrap();
        frontier.mark_pending(&refs(&[("b", "2")])).await.unwrap();
        frontier.reset().await.unwrap();

        assert_eq!(frontier.copied_count("a"), 0);
        assert!(!frontier.has_pending_work().await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_markers_do_not_lose_keys() {
        let frontier = Arc::new(MemoryFrontier::new());
        let mut handles = Vec::new();

        for worker in 0..8 {
            let frontier = frontier.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    let key = format!("{}-{}", worker, i);
                    frontier.mark_copied("orders", &[key.clone()]).await.unwrap();
                    frontier
                        .mark_pending(&[("customers".to_string(), key)])
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(frontier.copied_count("orders"), 800);
        let drained = frontier.drain_pending().await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1.len(), 800);
    }
}
