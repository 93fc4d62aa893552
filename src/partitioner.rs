//! Partitioning schemes mapping records to encoded partition keys and
//! partition keys to output directories.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::records::SinkRecord;

/// Derives a record timestamp for time-based partitioning and rotation.
pub trait TimestampExtractor {
    /// Timestamp of the record in epoch millis, if one can be derived.
    fn extract(&self, record: &SinkRecord) -> Option<i64>;

    /// Whether this extractor tracks the wall clock rather than record data.
    /// Wall-clock extractors make rotation timing independent of the records.
    fn is_wallclock(&self) -> bool {
        false
    }
}

/// Extractor tracking the process wall clock. Shared as a process-wide
/// constant; it carries no state.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallclockTimestampExtractor;

/// The process-wide wall-clock extractor instance.
pub static WALLCLOCK: WallclockTimestampExtractor = WallclockTimestampExtractor;

impl TimestampExtractor for WallclockTimestampExtractor {
    fn extract(&self, _record: &SinkRecord) -> Option<i64> {
        Some(Utc::now().timestamp_millis())
    }

    fn is_wallclock(&self) -> bool {
        true
    }
}

/// Extractor reading the broker-provided record timestamp.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordTimestampExtractor;

impl TimestampExtractor for RecordTimestampExtractor {
    fn extract(&self, record: &SinkRecord) -> Option<i64> {
        record.timestamp
    }
}

/// Maps records to encoded partition keys and derives the directory layout
/// committed files land in.
pub trait Partitioner {
    /// Derives the encoded partition key grouping this record.
    fn encode_partition(&self, record: &SinkRecord) -> String;

    /// Derives the output directory for an encoded partition.
    fn generate_partitioned_path(&self, topic: &str, encoded_partition: &str) -> String;

    /// Names of the fields this partitioner partitions by, in order.
    fn partition_fields(&self) -> Vec<String>;

    /// The timestamp extractor backing time-based partitioning, when this
    /// partitioner has one. Absence means rotation timing falls back to the
    /// wall clock.
    fn timestamp_extractor(&self) -> Option<&dyn TimestampExtractor> {
        None
    }
}

/// Groups records by their source kafka partition: `partition=<p>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPartitioner;

impl DefaultPartitioner {
    pub fn new() -> Self {
        Self
    }
}

impl Partitioner for DefaultPartitioner {
    fn encode_partition(&self, record: &SinkRecord) -> String {
        format!("partition={}", record.kafka_partition)
    }

    fn generate_partitioned_path(&self, topic: &str, encoded_partition: &str) -> String {
        format!("{}/{}", topic, encoded_partition)
    }

    fn partition_fields(&self) -> Vec<String> {
        vec!["partition".to_string()]
    }
}

/// Groups records by the value of one payload field: `<field>=<value>`.
#[derive(Clone, Debug)]
pub struct FieldPartitioner {
    field: String,
}

impl FieldPartitioner {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    fn field_value(&self, record: &SinkRecord) -> String {
        match record.value.get(&self.field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "null".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

impl Partitioner for FieldPartitioner {
    fn encode_partition(&self, record: &SinkRecord) -> String {
        format!("{}={}", self.field, self.field_value(record))
    }

    fn generate_partitioned_path(&self, topic: &str, encoded_partition: &str) -> String {
        format!("{}/{}", topic, encoded_partition)
    }

    fn partition_fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }
}

/// Groups records into time buckets derived from the extracted timestamp,
/// formatted in the configured timezone.
pub struct TimeBasedPartitioner {
    path_format: String,
    timezone: Tz,
    extractor: Box<dyn TimestampExtractor>,
}

impl TimeBasedPartitioner {
    /// Creates a partitioner bucketing by `path_format`, a chrono format
    /// string such as `year=%Y/month=%m/day=%d`.
    pub fn new(
        path_format: impl Into<String>,
        timezone: Tz,
        extractor: Box<dyn TimestampExtractor>,
    ) -> Self {
        Self {
            path_format: path_format.into(),
            timezone,
            extractor,
        }
    }

    /// Daily buckets: `year=%Y/month=%m/day=%d`.
    pub fn daily(timezone: Tz, extractor: Box<dyn TimestampExtractor>) -> Self {
        Self::new("year=%Y/month=%m/day=%d", timezone, extractor)
    }

    /// Hourly buckets: `year=%Y/month=%m/day=%d/hour=%H`.
    pub fn hourly(timezone: Tz, extractor: Box<dyn TimestampExtractor>) -> Self {
        Self::new("year=%Y/month=%m/day=%d/hour=%H", timezone, extractor)
    }
}

impl Partitioner for TimeBasedPartitioner {
    fn encode_partition(&self, record: &SinkRecord) -> String {
        let millis = self
            .extractor
            .extract(record)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        match self.timezone.timestamp_millis_opt(millis) {
            chrono::LocalResult::Single(ts) => ts.format(&self.path_format).to_string(),
            _ => format!("partition={}", record.kafka_partition),
        }
    }

    fn generate_partitioned_path(&self, topic: &str, encoded_partition: &str) -> String {
        format!("{}/{}", topic, encoded_partition)
    }

    fn partition_fields(&self) -> Vec<String> {
        self.path_format
            .split('/')
            .filter_map(|segment| segment.split('=').next())
            .map(|name| name.to_string())
            .collect()
    }

    fn timestamp_extractor(&self) -> Option<&dyn TimestampExtractor> {
        Some(self.extractor.as_ref())
    }
}

/// Decorator namespacing the encoded partition by the record's schema name,
/// so that records with different schemas land in distinct directories.
pub struct SchemaAwarePartitioner {
    inner: Box<dyn Partitioner>,
}

impl SchemaAwarePartitioner {
    pub fn new(inner: Box<dyn Partitioner>) -> Self {
        Self { inner }
    }
}

impl Partitioner for SchemaAwarePartitioner {
    fn encode_partition(&self, record: &SinkRecord) -> String {
        let encoded = self.inner.encode_partition(record);
        match &record.value_schema {
            Some(schema) => format!("schema={}/{}", schema.name, encoded),
            None => encoded,
        }
    }

    fn generate_partitioned_path(&self, topic: &str, encoded_partition: &str) -> String {
        self.inner.generate_partitioned_path(topic, encoded_partition)
    }

    fn partition_fields(&self) -> Vec<String> {
        self.inner.partition_fields()
    }

    fn timestamp_extractor(&self) -> Option<&dyn TimestampExtractor> {
        self.inner.timestamp_extractor()
    }
}
