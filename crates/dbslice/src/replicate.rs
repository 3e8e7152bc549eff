//! Destination bootstrap: schema replication and start-clean cleanup.

use crate::error::Result;
use crate::schema::SchemaRegistry;
use mysql_async::prelude::*;
use mysql_async::Pool;
use tracing::{debug, info};

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Replay the source's CREATE TABLE DDL and stored routines on the
/// destination. Existing objects are dropped first; foreign-key checks stay
/// off so creation order does not matter.
pub async fn replicate_schema(registry: &SchemaRegistry, target: &Pool) -> Result<()> {
    let mut conn = target.get_conn().await?;
    conn.query_drop("SET FOREIGN_KEY_CHECKS=0").await?;

    let mut count = 0usize;
    for table in registry.tables() {
        debug!("Creating table {}", table.name);
        conn.query_drop(format!("DROP TABLE IF EXISTS {}", quote_ident(&table.name)))
            .await?;
        conn.query_drop(table.create_sql.as_str()).await?;
        count += 1;
    }

    for routine in registry.routines() {
        debug!("Creating {} {}", routine.kind.to_lowercase(), routine.name);
        conn.query_drop(format!(
            "DROP {} IF EXISTS {}",
            routine.kind,
            quote_ident(&routine.name)
        ))
        .await?;
        conn.query_drop(routine.create_sql.as_str()).await?;
    }

    info!(
        "Replicated {} tables and {} routines to the destination",
        count,
        registry.routines().len()
    );
    Ok(())
}

/// Truncate every known table that exists on the destination. Used by
/// start-clean runs before the copy begins.
pub async fn cleanup_destination(target: &Pool, tables: &[String]) -> Result<()> {
    let mut conn = target.get_conn().await?;
    conn.query_drop("SET FOREIGN_KEY_CHECKS=0").await?;

    for table in tables {
        let exists: Option<i64> = conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
                (table,),
            )
            .await?;
        if exists.unwrap_or(0) > 0 {
            debug!("Truncating table {}", table);
            conn.query_drop(format!("TRUNCATE TABLE {}", quote_ident(table)))
                .await?;
        }
    }

    info!("Cleaned {} destination tables", tables.len());
    Ok(())
}
