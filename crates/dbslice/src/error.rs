//! Error types for the subset-copy library.

use thiserror::Error;

/// Main error type for subset-copy operations.
#[derive(Error, Debug)]
pub enum SliceError {
    /// Configuration error (invalid YAML, unknown rule, unresolvable join parent, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema introspection failed.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Destination database connection or query error
    #[error("Destination database error: {0}")]
    Target(#[from] mysql_async::Error),

    /// Frontier store error
    #[error("Frontier error: {0}")]
    Frontier(#[from] redis::RedisError),

    /// Copying a table failed
    #[error("Copy failed for table {table}: {message}")]
    Copy { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SliceError {
    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        SliceError::Config(message.into())
    }

    /// Create a Schema error
    pub fn schema(message: impl Into<String>) -> Self {
        SliceError::Schema(message.into())
    }

    /// Create a Copy error
    pub fn copy(table: impl Into<String>, message: impl Into<String>) -> Self {
        SliceError::Copy {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for subset-copy operations.
pub type Result<T> = std::result::Result<T, SliceError>;
