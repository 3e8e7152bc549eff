//! # dbslice
//!
//! Copies a consistent, referentially-closed subset of a MySQL database
//! from a source instance to a destination instance.
//!
//! A run proceeds in two phases. Phase 1 copies the requested seed tables
//! according to their configured read strategies on a bounded worker pool,
//! recording every copied primary key and every discovered foreign-key
//! reference in a shared frontier. Phase 2 iteratively drains the
//! frontier's pending references and fetches exactly those rows until no
//! table has unresolved references left, so every row reachable from the
//! seed rows exists in the destination exactly once - including across
//! cyclic and self-referencing foreign keys.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbslice::{
//!     Config, Coordinator, MysqlSink, MysqlSource, RedisFrontier, SchemaRegistry, SchemaRules,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dbslice::SliceError> {
//!     let config = Config::load("config.yaml")?;
//!     let rules = SchemaRules::load("schema.yaml")?;
//!
//!     let read = config.connection("production")?;
//!     let write = config.connection("staging")?;
//!
//!     let source_pool = sqlx::mysql::MySqlPoolOptions::new()
//!         .max_connections(8)
//!         .connect(&read.url())
//!         .await?;
//!     let target_pool = mysql_async::Pool::new(write.opts());
//!
//!     let registry = Arc::new(SchemaRegistry::load(&source_pool, &read.database, &rules).await?);
//!     let frontier = Arc::new(RedisFrontier::connect(&config.frontier.url()).await?);
//!
//!     let coordinator = Coordinator::new(
//!         Arc::new(MysqlSource::new(source_pool, registry.clone(), 20_000, 5_000)),
//!         Arc::new(MysqlSink::new(target_pool, registry.clone(), 500)),
//!         frontier,
//!         config.copy.get_max_workers(),
//!     );
//!
//!     let report = coordinator.run(&["orders".to_string()]).await?;
//!     println!("{}", report.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod frontier;
pub mod replicate;
pub mod schema;
pub mod write;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, CopyConfig, FrontierConfig};
pub use coordinator::{ClosureStats, Coordinator, CopyReport, TableOutcome};
pub use error::{Result, SliceError};
pub use extract::{MysqlSource, Row, RowSource};
pub use frontier::{Frontier, MemoryFrontier, RedisFrontier};
pub use replicate::{cleanup_destination, replicate_schema};
pub use schema::{ReadStrategy, SchemaRegistry, SchemaRules, TablePlan};
pub use write::{MysqlSink, RowSink, TableTx};
