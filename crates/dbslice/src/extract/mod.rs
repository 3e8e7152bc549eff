//! Row extraction from the source database.
//!
//! The extractor turns a table's resolved read strategy into a stream of
//! row batches, and serves the direct by-key fetches used during reference
//! closure. Rows leave here fully rendered: primary key, literal value
//! tuple, and the foreign-key references discovered in the row.

pub mod render;

use crate::error::{Result, SliceError};
use crate::schema::{Field, ReadStrategy, SchemaRegistry, Table, TablePlan};
use async_trait::async_trait;
use render::{key_literal, quote_ident, select_list, Scalar};
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::{Row as _, ValueRef as _};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// An extracted record, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Primary-key value in plain string form.
    pub primary_key: String,

    /// Pre-rendered literal value tuple: `(v1,v2,...)`.
    pub tuple: String,

    /// Non-null foreign-key values found in the row, keyed by the
    /// referenced table name.
    pub references: HashMap<String, String>,
}

/// Source of rows for the copy coordinator.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Stream batches of rows for a table according to its read strategy.
    /// Errors are delivered through the channel; the stream ends when the
    /// strategy is exhausted.
    fn scan(&self, table: &str) -> mpsc::Receiver<Result<Vec<Row>>>;

    /// Fetch a specific set of primary keys, chunked internally to bound
    /// query size.
    async fn fetch_by_keys(&self, table: &str, keys: &[String]) -> Result<Vec<Row>>;
}

/// MySQL row source backed by a sqlx connection pool.
pub struct MysqlSource {
    pool: MySqlPool,
    registry: Arc<SchemaRegistry>,
    fetch_chunk: usize,
    key_chunk: usize,
}

impl MysqlSource {
    pub fn new(
        pool: MySqlPool,
        registry: Arc<SchemaRegistry>,
        fetch_chunk: usize,
        key_chunk: usize,
    ) -> Self {
        Self {
            pool,
            registry,
            fetch_chunk: fetch_chunk.max(1),
            key_chunk: key_chunk.max(1),
        }
    }
}

#[async_trait]
impl RowSource for MysqlSource {
    fn scan(&self, table: &str) -> mpsc::Receiver<Result<Vec<Row>>> {
        let (tx, rx) = mpsc::channel(4);
        let pool = self.pool.clone();
        let plan = self.registry.plan(table);
        let chunk = self.fetch_chunk;

        tokio::spawn(async move {
            let plan = match plan {
                Ok(plan) => plan,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let result = match &plan.strategy {
                // Copied only when referenced; a direct scan yields nothing.
                ReadStrategy::OnRequest => Ok(true),
                ReadStrategy::Filtered { predicate } => {
                    let base = format!(
                        "SELECT {} FROM {} WHERE {}",
                        select_list(&plan.table, &plan.mask),
                        quote_ident(&plan.table.name),
                        predicate
                    );
                    send_pages(&pool, &plan, &base, chunk, &tx).await
                }
                ReadStrategy::Joined { .. } => scan_joined(&pool, &plan, chunk, &tx).await,
            };

            if let Err(e) = result {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    async fn fetch_by_keys(&self, table: &str, keys: &[String]) -> Result<Vec<Row>> {
        let plan = self.registry.plan(table)?;
        if plan.table.primary_key.is_empty() {
            return Err(SliceError::schema(format!(
                "table '{}' has no primary key to fetch by",
                table
            )));
        }

        let select = select_list(&plan.table, &plan.mask);
        let mut out = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(self.key_chunk) {
            let sql = format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                select,
                quote_ident(&plan.table.name),
                quote_ident(&plan.table.primary_key),
                in_clause(chunk)
            );
            let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
            for row in &rows {
                out.push(row_to_record(row, &plan)?);
            }
        }

        debug!("Fetched {} of {} keys from {}", out.len(), keys.len(), table);
        Ok(out)
    }
}

/// Page through `base_sql` with offset pagination, sending one batch per
/// page. Returns false when the receiver went away.
async fn send_pages(
    pool: &MySqlPool,
    plan: &TablePlan,
    base_sql: &str,
    chunk: usize,
    tx: &mpsc::Sender<Result<Vec<Row>>>,
) -> Result<bool> {
    let mut offset = 0usize;
    loop {
        let sql = format!("{} LIMIT {}, {}", base_sql, offset, chunk);
        let rows = sqlx::query(&sql).fetch_all(pool).await?;
        let count = rows.len();
        offset += chunk;

        if count > 0 {
            let batch: Result<Vec<Row>> = rows.iter().map(|r| row_to_record(r, plan)).collect();
            if tx.send(Ok(batch?)).await.is_err() {
                return Ok(false);
            }
        }
        if count < chunk {
            return Ok(true);
        }
    }
}

/// Joined scan: page through the parent's selected key set, and for each
/// parent-key chunk sub-paginate the dependent rows restricted to that
/// chunk. Both levels use the same chunk size, bounding the IN clause and
/// memory at once.
async fn scan_joined(
    pool: &MySqlPool,
    plan: &TablePlan,
    chunk: usize,
    tx: &mpsc::Sender<Result<Vec<Row>>>,
) -> Result<bool> {
    let ReadStrategy::Joined {
        parent,
        reference,
        join_column,
        parent_filter,
    } = &plan.strategy
    else {
        return Err(SliceError::schema(format!(
            "table '{}' is not configured as a join",
            plan.table.name
        )));
    };

    let parent_base = parent_keys_sql(parent, join_column, parent_filter.as_deref());
    let select = select_list(&plan.table, &plan.mask);
    let mut parent_offset = 0usize;

    loop {
        let parent_sql = format!("{} LIMIT {}, {}", parent_base, parent_offset, chunk);
        let key_rows = sqlx::query(&parent_sql).fetch_all(pool).await?;
        let count = key_rows.len();
        parent_offset += chunk;

        let keys: Vec<String> = key_rows
            .iter()
            .filter_map(|r| r.try_get::<Option<String>, _>(0).ok().flatten())
            .collect();

        if !keys.is_empty() {
            let base = joined_base_sql(&select, &plan.table.name, reference, &keys);
            if !send_pages(pool, plan, &base, chunk, tx).await? {
                return Ok(false);
            }
        }
        if count < chunk {
            return Ok(true);
        }
    }
}

/// SQL enumerating the parent's selected join keys. CAST keeps the key
/// column uniformly textual regardless of its type.
fn parent_keys_sql(parent: &str, join_column: &str, filter: Option<&str>) -> String {
    let mut sql = format!(
        "SELECT CAST({} AS CHAR) FROM {}",
        quote_ident(join_column),
        quote_ident(parent)
    );
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    sql
}

/// SQL selecting the dependent rows restricted to one parent-key chunk.
fn joined_base_sql(select: &str, table: &str, reference: &str, keys: &[String]) -> String {
    let table_ident = quote_ident(table);
    format!(
        "SELECT {} FROM {} WHERE {}.{} IN ({})",
        select,
        table_ident,
        table_ident,
        quote_ident(reference),
        in_clause(keys)
    )
}

/// Render keys into an IN (...) list body.
fn in_clause(keys: &[String]) -> String {
    keys.iter()
        .map(|k| key_literal(k))
        .collect::<Vec<_>>()
        .join(",")
}

/// Convert one source row into a [`Row`].
fn row_to_record(row: &MySqlRow, plan: &TablePlan) -> Result<Row> {
    let values: Vec<Option<Scalar>> = plan
        .table
        .fields
        .iter()
        .enumerate()
        .map(|(idx, field)| decode_scalar(row, idx, field))
        .collect();
    record_from_values(&plan.table, &values)
}

/// Build a [`Row`] from decoded field values: render every field by its
/// declared type, capture the primary key, and collect non-null
/// foreign-key references. A null foreign key contributes no reference.
fn record_from_values(table: &Table, values: &[Option<Scalar>]) -> Result<Row> {
    let mut rendered = Vec::with_capacity(table.fields.len());
    let mut primary_key = String::new();
    let mut references = HashMap::new();

    for (field, value) in table.fields.iter().zip(values) {
        if field.primary_key {
            if let Some(v) = value {
                primary_key = v.key_string();
            }
        }
        if let Some(fk) = table.references.get(&field.name) {
            if let Some(v) = value {
                references.insert(fk.table.clone(), v.key_string());
            }
        }

        rendered.push(render::render_field(field, value.as_ref())?);
    }

    Ok(Row {
        primary_key,
        tuple: format!("({})", rendered.join(",")),
        references,
    })
}

/// Decode a column by its raw catalog type. Undecodable values (zero dates
/// in particular) come back as None and are handled by the renderer.
fn decode_scalar(row: &MySqlRow, idx: usize, field: &Field) -> Option<Scalar> {
    let is_null = row.try_get_raw(idx).map(|r| r.is_null()).unwrap_or(true);
    if is_null {
        return None;
    }

    match field.data_type.as_str() {
        "tinyint" => row
            .try_get::<i8, _>(idx)
            .ok()
            .map(|v| Scalar::Int(v as i64)),
        "smallint" => row
            .try_get::<i16, _>(idx)
            .ok()
            .map(|v| Scalar::Int(v as i64)),
        "mediumint" | "int" | "integer" => row
            .try_get::<i32, _>(idx)
            .ok()
            .map(|v| Scalar::Int(v as i64)),
        "bigint" => row.try_get::<i64, _>(idx).ok().map(Scalar::Int),
        "float" => row
            .try_get::<f32, _>(idx)
            .ok()
            .map(|v| Scalar::Float(v as f64)),
        "double" | "real" => row.try_get::<f64, _>(idx).ok().map(Scalar::Float),
        "decimal" | "numeric" => row
            .try_get::<rust_decimal::Decimal, _>(idx)
            .ok()
            .map(Scalar::Decimal),
        "date" => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .map(Scalar::Date),
        "time" => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .map(Scalar::Time),
        "datetime" | "timestamp" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .map(Scalar::DateTime),
        _ => row.try_get::<String, _>(idx).ok().map(Scalar::Text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, ForeignKeyRef};

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn orders_table() -> Table {
        let field = |name: &str, data_type: &str, nullable, primary_key| Field {
            name: name.to_string(),
            data_type: data_type.to_string(),
            ty: FieldType::from_data_type(data_type),
            nullable,
            primary_key,
        };
        let mut references = HashMap::new();
        references.insert(
            "customer_id".to_string(),
            ForeignKeyRef {
                table: "customers".to_string(),
                column: "id".to_string(),
            },
        );
        Table {
            name: "orders".to_string(),
            fields: vec![
                field("id", "bigint", false, true),
                field("customer_id", "bigint", true, false),
                field("note", "varchar", true, false),
            ],
            primary_key: "id".to_string(),
            references,
            create_sql: String::new(),
        }
    }

    #[test]
    fn test_record_captures_key_tuple_and_references() {
        let row = record_from_values(
            &orders_table(),
            &[
                Some(Scalar::Int(1)),
                Some(Scalar::Int(42)),
                Some(Scalar::Text("rush".to_string())),
            ],
        )
        .unwrap();

        assert_eq!(row.primary_key, "1");
        assert_eq!(row.tuple, "(1,42,\"rush\")");
        assert_eq!(row.references["customers"], "42");
    }

    #[test]
    fn test_null_foreign_key_contributes_no_reference() {
        let row = record_from_values(
            &orders_table(),
            &[Some(Scalar::Int(2)), None, None],
        )
        .unwrap();

        assert_eq!(row.primary_key, "2");
        assert_eq!(row.tuple, "(2,NULL,NULL)");
        assert!(row.references.is_empty());
    }

    #[test]
    fn test_in_clause_quotes_only_non_numeric_keys() {
        assert_eq!(in_clause(&keys(&["1", "2", "ab-3"])), "1,2,\"ab-3\"");
    }

    #[test]
    fn test_parent_keys_sql_carries_the_parent_filter() {
        assert_eq!(
            parent_keys_sql("orders", "id", None),
            "SELECT CAST(`id` AS CHAR) FROM `orders`"
        );
        assert_eq!(
            parent_keys_sql("orders", "id", Some("`orders`.status = 'open'")),
            "SELECT CAST(`id` AS CHAR) FROM `orders` WHERE `orders`.status = 'open'"
        );
    }

    #[test]
    fn test_joined_base_restricts_to_the_parent_chunk() {
        // order_items must only see rows whose order_id falls in the
        // parent's selected key set, never the full table.
        assert_eq!(
            joined_base_sql("`id`, `order_id`", "order_items", "order_id", &keys(&["7", "9"])),
            "SELECT `id`, `order_id` FROM `order_items` \
             WHERE `order_items`.`order_id` IN (7,9)"
        );
    }
}
