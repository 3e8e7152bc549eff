//! dbslice CLI - referentially-closed MySQL subset copies.

use clap::{Parser, Subcommand};
use dbslice::{
    cleanup_destination, replicate_schema, Config, Coordinator, Frontier, MysqlSink, MysqlSource,
    RedisFrontier, SchemaRegistry, SchemaRules, SliceError,
};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "dbslice")]
#[command(about = "Copy a consistent, referentially-closed subset of a MySQL database")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to the schema rules file
    #[arg(short, long, default_value = "schema.yaml")]
    schema: PathBuf,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy seed tables and resolve all references
    Run {
        /// Name of the read connection
        #[arg(short = 'r', long)]
        read: String,

        /// Name of the write connection
        #[arg(short = 'w', long)]
        write: String,

        /// Comma-separated list of seed tables (default: all tables)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Truncate destination tables and reset the frontier before copying
        #[arg(long)]
        start_over: bool,
    },

    /// Resume the reference-closure phase against the persisted frontier
    Resume {
        /// Name of the read connection
        #[arg(short = 'r', long)]
        read: String,

        /// Name of the write connection
        #[arg(short = 'w', long)]
        write: String,
    },

    /// Replay the source schema (tables and routines) on the destination
    ReplicateSchema {
        /// Name of the read connection
        #[arg(short = 'r', long)]
        read: String,

        /// Name of the write connection
        #[arg(short = 'w', long)]
        write: String,
    },

    /// Test source, destination and frontier connectivity
    HealthCheck {
        /// Name of the read connection
        #[arg(short = 'r', long)]
        read: String,

        /// Name of the write connection
        #[arg(short = 'w', long)]
        write: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), SliceError> {
    let cli = Cli::parse();
    init_logging(&cli.verbosity);

    let config = Config::load(&cli.config)?;

    match &cli.command {
        Commands::Run {
            read,
            write,
            tables,
            start_over,
        } => {
            let job = Job::setup(&cli, &config, read, write).await?;
            let seed_tables = job.seed_tables(tables)?;

            if *start_over {
                info!("Starting over: cleaning destination and frontier");
                cleanup_destination(&job.target_pool, &job.registry.table_names()).await?;
                job.frontier.reset().await?;
            }

            let report = job.coordinator(&config).run(&seed_tables).await?;
            if cli.output_json {
                println!("{}", report.to_json()?);
            }
            job.shutdown().await?;
        }

        Commands::Resume { read, write } => {
            let job = Job::setup(&cli, &config, read, write).await?;
            let stats = job.coordinator(&config).run_reference_closure().await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            job.shutdown().await?;
        }

        Commands::ReplicateSchema { read, write } => {
            let job = Job::setup(&cli, &config, read, write).await?;
            replicate_schema(&job.registry, &job.target_pool).await?;
            job.shutdown().await?;
        }

        Commands::HealthCheck { read, write } => {
            health_check(&config, read, write).await?;
        }
    }

    Ok(())
}

/// Shared per-command state: pools, registry and frontier.
struct Job {
    source_pool: MySqlPool,
    target_pool: mysql_async::Pool,
    registry: Arc<SchemaRegistry>,
    frontier: Arc<RedisFrontier>,
}

impl Job {
    async fn setup(
        cli: &Cli,
        config: &Config,
        read: &str,
        write: &str,
    ) -> Result<Self, SliceError> {
        let rules = SchemaRules::load(&cli.schema)?;
        let read_conn = config.connection(read)?;
        let write_conn = config.connection(write)?;

        let source_pool = MySqlPoolOptions::new()
            .max_connections(config.copy.get_max_workers() as u32 + 1)
            .connect(&read_conn.url())
            .await?;
        let target_pool = mysql_async::Pool::new(write_conn.opts());

        let registry =
            Arc::new(SchemaRegistry::load(&source_pool, &read_conn.database, &rules).await?);
        let frontier = Arc::new(RedisFrontier::connect(&config.frontier.url()).await?);

        Ok(Self {
            source_pool,
            target_pool,
            registry,
            frontier,
        })
    }

    /// Validate the requested seed tables; an empty request means all.
    fn seed_tables(&self, requested: &[String]) -> Result<Vec<String>, SliceError> {
        if requested.is_empty() {
            return Ok(self.registry.table_names());
        }
        let unknown: Vec<String> = requested
            .iter()
            .filter(|t| !self.registry.contains(t))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(SliceError::config(format!(
                "unknown tables provided: {}",
                unknown.join(", ")
            )));
        }
        Ok(requested.to_vec())
    }

    fn coordinator(&self, config: &Config) -> Coordinator {
        Coordinator::new(
            Arc::new(MysqlSource::new(
                self.source_pool.clone(),
                self.registry.clone(),
                config.copy.get_fetch_chunk_size(),
                config.copy.get_reference_chunk_size(),
            )),
            Arc::new(MysqlSink::new(
                self.target_pool.clone(),
                self.registry.clone(),
                config.copy.get_insert_batch_size(),
            )),
            self.frontier.clone(),
            config.copy.get_max_workers(),
        )
    }

    async fn shutdown(self) -> Result<(), SliceError> {
        self.target_pool.disconnect().await?;
        Ok(())
    }
}

async fn health_check(config: &Config, read: &str, write: &str) -> Result<(), SliceError> {
    let read_conn = config.connection(read)?;
    let write_conn = config.connection(write)?;

    let source_pool = MySqlPoolOptions::new()
        .max_connections(1)
        .connect(&read_conn.url())
        .await?;
    sqlx::query("SELECT 1").fetch_one(&source_pool).await?;
    info!("Source connection '{}' ok", read);

    let target_pool = mysql_async::Pool::new(write_conn.opts());
    {
        use mysql_async::prelude::*;
        let mut conn = target_pool.get_conn().await?;
        conn.query_drop("SELECT 1").await?;
    }
    target_pool.disconnect().await?;
    info!("Destination connection '{}' ok", write);

    let frontier = RedisFrontier::connect(&config.frontier.url()).await?;
    frontier.ping().await?;
    info!("Frontier connection ok");

    println!("All connections healthy");
    Ok(())
}

fn init_logging(verbosity: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(verbosity));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
