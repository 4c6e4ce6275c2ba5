use std::path::PathBuf;

/// Failures of a single trial run. None of them are retried; the invoker
/// reports the run as failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid invocation event: {0}")]
    InvalidEvent(String),

    #[error("secret `{id}` is unavailable: {reason}")]
    Secret { id: String, reason: String },

    #[error("failed to connect to warehouse at {host}")]
    Connection {
        host: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("extraction query failed")]
    Extraction(#[source] sqlx::Error),

    #[error("duplicate compound key `{0}` in batch")]
    DuplicateKey(String),

    #[error("invalid destination table name `{0}`")]
    InvalidTable(String),

    #[error("writing to {table} failed")]
    Write {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to create destination schema")]
    Schema(#[source] sqlx::Error),

    #[error("csv error in {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("io error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type JobResult<T> = Result<T, JobError>;
