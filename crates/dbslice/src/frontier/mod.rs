//! The reference frontier: shared bookkeeping of copied and pending keys.
//!
//! For every table the frontier tracks two key sets: `copied` (confirmed
//! handed to the writer) and `pending` (referenced from another row but not
//! yet copied). The single dedup rule - a key already copied never enters
//! pending - is what makes the closure loop terminate on cyclic reference
//! graphs and keeps every row at-most-once.

mod memory;
mod redis;

pub use self::memory::MemoryFrontier;
pub use self::redis::RedisFrontier;

use crate::error::Result;
use async_trait::async_trait;

/// A (table, primary key) reference discovered in a copied row.
pub type Reference = (String, String);

/// Shared frontier store. All operations must be safe under concurrent
/// callers; the seed-copy workers hit it in parallel.
#[async_trait]
pub trait Frontier: Send + Sync {
    /// Record keys as copied for a table.
    async fn mark_copied(&self, table: &str, keys: &[String]) -> Result<()>;

    /// Queue references as pending, skipping any key already copied for its
    /// table.
    async fn mark_pending(&self, references: &[Reference]) -> Result<()>;

    /// Whether any table has pending references.
    async fn has_pending_work(&self) -> Result<bool>;

    /// Take one convergence iteration's worth of work: for every table with
    /// pending references, the pending set minus the copied set (guarding
    /// against keys copied after they were queued). Clears the drained
    /// pending sets.
    async fn drain_pending(&self) -> Result<Vec<(String, Vec<String>)>>;

    /// Forget everything copied for a table. Used to undo bookkeeping after
    /// a rolled-back unit of work.
    async fn clear_shelf(&self, table: &str) -> Result<()>;

    /// Wipe all frontier state (start-clean runs).
    async fn reset(&self) -> Result<()>;
}
