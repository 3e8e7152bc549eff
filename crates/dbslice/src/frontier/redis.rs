//! Redis-backed frontier.
//!
//! Keys and pending references live in Redis sets, so the frontier survives
//! the process and an interrupted closure phase can be resumed against the
//! same instance. Key scheme: `tables` (all tables touched), `table:<name>`
//! (copied keys), `reftables` (tables with pending work), `ref:<name>`
//! (pending keys).

use super::{Frontier, Reference};
use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

const TABLES_KEY: &str = "tables";
const REF_TABLES_KEY: &str = "reftables";

fn shelf_key(table: &str) -> String {
    format!("table:{}", table)
}

fn ref_key(table: &str) -> String {
    format!("ref:{}", table)
}

/// Frontier stored in Redis sets.
pub struct RedisFrontier {
    conn: ConnectionManager,
}

impl RedisFrontier {
    /// Connect to the Redis instance behind the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Round-trip check used by health probes.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Frontier for RedisFrontier {
    async fn mark_copied(&self, table: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .sadd(TABLES_KEY, table)
            .ignore()
            .sadd(shelf_key(table), keys)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn mark_pending(&self, references: &[Reference]) -> Result<()> {
        let mut conn = self.conn.clone();
        for (table, key) in references {
            // Membership check first: a copied key must never re-enter the
            // pending set. The drain-side set difference covers the window
            // between this check and the SADD.
            let copied: bool = conn.sismember(shelf_key(table), key).await?;
            if copied {
                continue;
            }
            let _: () = redis::pipe()
                .sadd(REF_TABLES_KEY, table.as_str())
                .ignore()
                .sadd(ref_key(table), key.as_str())
                .ignore()
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn has_pending_work(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.scard(REF_TABLES_KEY).await?;
        Ok(count > 0)
    }

    async fn drain_pending(&self) -> Result<Vec<(String, Vec<String>)>> {
        let mut conn = self.conn.clone();
        let tables: Vec<String> = conn.smembers(REF_TABLES_KEY).await?;

        let mut drained = Vec::with_capacity(tables.len());
        for table in tables {
            let keys: Vec<String> = conn
                .sdiff(vec![ref_key(&table), shelf_key(&table)])
                .await?;
            let _: () = conn.del(ref_key(&table)).await?;
            let _: () = conn.srem(REF_TABLES_KEY, &table).await?;
            debug!("Drained {} pending keys for {}", keys.len(), table);
            drained.push((table, keys));
        }
        Ok(drained)
    }

    async fn clear_shelf(&self, table: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(shelf_key(table)).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }
}
