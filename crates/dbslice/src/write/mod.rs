//! Batched, transactional row writing to the destination.
//!
//! Every unit of work gets its own connection with foreign-key checks
//! disabled (insert order across tables cannot respect constraints) and an
//! explicit transaction, so a failed table rolls back to nothing.

use crate::error::Result;
use crate::extract::Row;
use crate::schema::SchemaRegistry;
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Pool};
use std::sync::Arc;
use tracing::debug;

/// Destination for rendered rows.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Open a transaction for one table's unit of work.
    async fn begin(&self, table: &str) -> Result<Box<dyn TableTx>>;
}

/// One table's open transaction.
#[async_trait]
pub trait TableTx: Send {
    /// Append rows. With `ignore_duplicates`, rows whose primary key already
    /// exists are silently skipped instead of failing the batch.
    async fn persist(&mut self, rows: &[Row], ignore_duplicates: bool) -> Result<()>;

    /// Commit everything since `begin`.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard everything since `begin`.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// MySQL sink backed by a mysql_async pool.
pub struct MysqlSink {
    pool: Pool,
    registry: Arc<SchemaRegistry>,
    insert_batch: usize,
}

impl MysqlSink {
    pub fn new(pool: Pool, registry: Arc<SchemaRegistry>, insert_batch: usize) -> Self {
        Self {
            pool,
            registry,
            insert_batch,
        }
    }
}

#[async_trait]
impl RowSink for MysqlSink {
    async fn begin(&self, table: &str) -> Result<Box<dyn TableTx>> {
        let plan = self.registry.plan(table)?;
        let mut conn = self.pool.get_conn().await?;

        conn.query_drop("SET FOREIGN_KEY_CHECKS=0").await?;
        conn.query_drop("START TRANSACTION").await?;

        Ok(Box::new(MysqlTableTx {
            conn,
            table: table.to_string(),
            fields: plan.table.field_names(),
            insert_batch: self.insert_batch,
        }))
    }
}

struct MysqlTableTx {
    conn: Conn,
    table: String,
    fields: Vec<String>,
    insert_batch: usize,
}

#[async_trait]
impl TableTx for MysqlTableTx {
    async fn persist(&mut self, rows: &[Row], ignore_duplicates: bool) -> Result<()> {
        for statement in build_insert_statements(
            &self.table,
            &self.fields,
            rows,
            ignore_duplicates,
            self.insert_batch,
        ) {
            self.conn.query_drop(statement).await?;
        }
        debug!("Queued {} rows for {}", rows.len(), self.table);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.query_drop("COMMIT").await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.conn.query_drop("ROLLBACK").await?;
        Ok(())
    }
}

/// Quote a MySQL identifier.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Render bulk INSERT statements from pre-rendered value tuples, at most
/// `batch` rows per statement.
fn build_insert_statements(
    table: &str,
    fields: &[String],
    rows: &[Row],
    ignore_duplicates: bool,
    batch: usize,
) -> Vec<String> {
    if rows.is_empty() {
        return Vec::new();
    }

    let verb = if ignore_duplicates {
        "INSERT IGNORE INTO"
    } else {
        "INSERT INTO"
    };
    let columns = fields
        .iter()
        .map(|f| quote_ident(f))
        .collect::<Vec<_>>()
        .join(", ");
    let head = format!("{} {} ({}) VALUES", verb, quote_ident(table), columns);

    rows.chunks(batch.max(1))
        .map(|chunk| {
            let tuples = chunk
                .iter()
                .map(|r| r.tuple.as_str())
                .collect::<Vec<_>>()
                .join(",\n");
            format!("{}\n{}", head, tuples)
        })
        .collect()
}
