use serde_json::Value;

use crate::schemas::Schema;
use crate::{DataTypeOffset, DataTypePartition};

/// A single record delivered by the host for one (topic, partition).
///
/// The payload is carried as a [`serde_json::Value`]; the optional value schema
/// drives schema-change detection and projection in the partition writer.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkRecord {
    /// Source topic the record was consumed from.
    pub topic: String,
    /// Source partition the record was consumed from.
    pub kafka_partition: DataTypePartition,
    /// Offset of the record within its source partition.
    pub kafka_offset: DataTypeOffset,
    /// Record timestamp in epoch millis, when the broker provided one.
    pub timestamp: Option<i64>,
    /// Optional record key.
    pub key: Option<String>,
    /// The record payload.
    pub value: Value,
    /// Schema of the payload, if the upstream converter attached one.
    pub value_schema: Option<Schema>,
}

impl SinkRecord {
    /// Creates a schemaless record with no timestamp.
    pub fn new(
        topic: impl Into<String>,
        partition: DataTypePartition,
        offset: DataTypeOffset,
        value: Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            kafka_partition: partition,
            kafka_offset: offset,
            timestamp: None,
            key: None,
            value,
            value_schema: None,
        }
    }

    /// Attaches a record timestamp in epoch millis.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attaches a value schema.
    pub fn with_value_schema(mut self, schema: Schema) -> Self {
        self.value_schema = Some(schema);
        self
    }

    /// Attaches a record key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}
