//! Error types for the MDP pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for the ETL pipeline.
///
/// The taxonomy distinguishes transient failures (retryable under a node's
/// retry budget), expected idempotent outcomes (`TableAlreadyExists`,
/// `ViewAlreadyExists`), and fatal failures that abort a node and everything
/// downstream of it.
#[derive(Error, Debug)]
pub enum EtlError {
    /// Source transport failure (network, timeout, missing file). The only
    /// class the orchestrator retries automatically.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// No staged artifact has been uploaded for this dataset kind.
    #[error("Staged artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Warehouse table already exists. Expected outcome of an idempotent
    /// create, mapped to success by the schema manager.
    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    /// Warehouse view already exists. Expected outcome of an idempotent
    /// create, mapped to success by the view builder.
    #[error("View already exists: {0}")]
    ViewAlreadyExists(String),

    /// One or more load chunks failed. Committed chunks are not rolled back.
    #[error("{failed} of {total} load chunks failed for {table}")]
    ChunkLoad {
        table: String,
        failed: usize,
        total: usize,
    },

    /// Rejected or malformed DDL/DML during table creation, materialization,
    /// or view creation.
    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    /// Dataset kind outside the closed catalog set.
    #[error("Unknown dataset kind: {0}")]
    UnknownDataset(String),

    /// Malformed source payload (bad CSV, undecodable body). Not retryable.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Local columnar file encode/decode failure.
    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invariant violation inside the pipeline itself.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EtlError {
    /// Whether the error is transient and eligible for automatic retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, EtlError::SourceUnavailable(_))
    }

    /// Whether the error is an expected idempotent-create outcome.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            EtlError::TableAlreadyExists(_) | EtlError::ViewAlreadyExists(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EtlError::SourceUnavailable("connection refused".into()).is_transient());
        assert!(!EtlError::QueryExecution("syntax error".into()).is_transient());
        assert!(!EtlError::ArtifactNotFound("data/movies.parquet".into()).is_transient());
    }

    #[test]
    fn already_exists_classification() {
        assert!(EtlError::TableAlreadyExists("stg_movies".into()).is_already_exists());
        assert!(EtlError::ViewAlreadyExists("view_movieratings".into()).is_already_exists());
        assert!(!EtlError::Config("bad".into()).is_already_exists());
    }

    #[test]
    fn chunk_load_display() {
        let err = EtlError::ChunkLoad {
            table: "stg_ratings".into(),
            failed: 1,
            total: 3,
        };
        assert_eq!(err.to_string(), "1 of 3 load chunks failed for stg_ratings");
    }
}
