use crate::hive::HiveError;

/// Error raised by [`Storage`](crate::storage::Storage) and
/// [`Wal`](crate::wal::Wal) implementations.
///
/// Storage errors are transient from the perspective of the write loop: the
/// partition writer records the failure time, requests a retry backoff from the
/// host and resumes the state machine at the failing state on the next
/// `write()`.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// Error returned from std::io.
    #[error("std::io::Error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A write-ahead log file contained an entry that could not be decoded.
    #[error("Write-ahead log {path} is corrupt: {reason}")]
    CorruptWal { path: String, reason: String },

    /// A path handed to the storage backend was not usable.
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
}

/// Unhandled error surfaced by a [`PartitionWriter`](crate::writer::PartitionWriter).
///
/// Only the `Storage` variant is retriable; everything else breaks the
/// exactly-once contract and must terminate the task.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// Storage or write-ahead log interaction failed.
    #[error("Storage interaction failed: {source}")]
    Storage {
        #[from]
        source: StorageError,
    },

    /// A record could not be projected onto the current schema.
    #[error("Schema projection failed: {0}")]
    SchemaProjection(String),

    /// The state machine was driven from a state that does not permit the
    /// requested operation.
    #[error("Illegal worker state: {0}")]
    IllegalWorkerState(String),

    /// The schema catalog rejected a table or partition registration.
    #[error("Hive metastore interaction failed: {source}")]
    HiveMetastore {
        #[from]
        source: HiveError,
    },

    /// A configuration option could not be parsed or validated.
    #[error("Invalid sink configuration: {0}")]
    Config(String),

    /// Aggregate of the errors collected while closing the writer.
    #[error("Error closing partition writer: {0}")]
    Close(String),
}

impl SinkError {
    /// Whether the write loop may retry after a backoff instead of failing the
    /// task.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SinkError::Storage { .. })
    }
}
