//! Per-partition sink worker landing Kafka record streams into an HDFS-like
//! filesystem.
//!
//! One [`writer::PartitionWriter`] exists per (topic, partition). It buffers
//! records handed over by the host, routes them into per-partition temp files,
//! and promotes those temp files to immutable committed files whose names
//! encode the covered offset range. A per-partition write-ahead log makes the
//! promotion exactly-once: the intended renames are recorded between
//! begin/end markers before they happen, and replayed idempotently on
//! recovery.

use std::fmt;

pub mod errors;
pub mod format;
pub mod hive;
pub mod partitioner;
pub mod paths;
pub mod records;
mod rotation;
pub mod schemas;
pub mod settings;
pub mod storage;
pub mod util;
pub mod wal;
pub mod writer;

pub use crate::errors::{SinkError, StorageError};
pub use crate::records::SinkRecord;
pub use crate::settings::SinkOptions;
pub use crate::writer::PartitionWriter;

/// Type alias for Kafka partition
pub type DataTypePartition = i32;
/// Type alias for Kafka message offset
pub type DataTypeOffset = i64;

/// Identifies one source partition of a topic.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: DataTypePartition,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: DataTypePartition) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Host-side task controls the partition writer drives.
///
/// The host owns upstream consumption; the writer only asserts backpressure
/// (pause/resume), seeks after recovery, and requests retry backoff after
/// transient failures.
pub trait SinkTaskContext {
    /// Pauses upstream consumption for the partition.
    fn pause(&self, tp: &TopicPartition);

    /// Resumes upstream consumption for the partition.
    fn resume(&self, tp: &TopicPartition);

    /// Instructs the host to seek the partition to `offset`.
    fn offset(&self, tp: &TopicPartition, offset: DataTypeOffset);

    /// Requests that the host retry after at least `millis`.
    fn timeout(&self, millis: i64);
}
