use std::collections::HashMap;

use crate::errors::SinkError;

/// Configuration key for the base output directory.
pub const TOPICS_DIR_CONFIG: &str = "topics.dir";
/// Configuration key for the base write-ahead log directory.
pub const LOGS_DIR_CONFIG: &str = "logs.dir";
/// Configuration key for the size rotation threshold.
pub const FLUSH_SIZE_CONFIG: &str = "flush.size";
/// Configuration key for the record-time rotation interval (0 disables).
pub const ROTATE_INTERVAL_MS_CONFIG: &str = "rotate.interval.ms";
/// Configuration key for the wall-clock scheduled rotation interval (0 disables).
pub const ROTATE_SCHEDULE_INTERVAL_MS_CONFIG: &str = "rotate.schedule.interval.ms";
/// Configuration key for the IANA timezone aligning scheduled rotations.
pub const PARTITIONER_TIMEZONE_CONFIG: &str = "partitioner.timezone";
/// Configuration key for the retry backoff requested after a transient failure.
pub const RETRY_BACKOFF_MS_CONFIG: &str = "retry.backoff.ms";
/// Configuration key for the zero padding applied to offsets in file names.
pub const FILENAME_OFFSET_ZERO_PAD_WIDTH_CONFIG: &str = "filename.offset.zero.pad.width";
/// Configuration key toggling schema catalog registration.
pub const HIVE_INTEGRATION_CONFIG: &str = "hive.integration";
/// Configuration key selecting the schema compatibility policy.
pub const SCHEMA_COMPATIBILITY_CONFIG: &str = "schema.compatibility";
/// Configuration key enabling schema-name-keyed partitioning and per-record
/// schema-change detection.
pub const MULTI_SCHEMA_SUPPORT_CONFIG: &str = "multi.schema.support";

/// Options for configuring a [`PartitionWriter`](crate::writer::PartitionWriter).
///
/// All values are captured immutably at writer construction.
#[derive(Clone, Debug)]
pub struct SinkOptions {
    /// Base output directory under the storage url.
    pub topics_dir: String,
    /// Base write-ahead log directory under the storage url.
    pub logs_dir: String,
    /// Number of buffered-and-written records that forces a rotation.
    pub flush_size: i32,
    /// Record-time rotation interval in millis; 0 disables periodic rotation.
    pub rotate_interval_ms: i64,
    /// Wall-clock rotation interval in millis, aligned to the start of the day
    /// in `partitioner_timezone`; 0 disables scheduled rotation.
    pub rotate_schedule_interval_ms: i64,
    /// IANA timezone used to align scheduled rotations within a calendar day.
    pub partitioner_timezone: String,
    /// Backoff requested from the host after a transient failure, in millis.
    pub retry_backoff_ms: i64,
    /// Zero padding applied to the offsets encoded in committed file names.
    pub filename_offset_zero_pad_width: usize,
    /// Whether committed layout changes are registered with the schema catalog.
    pub hive_integration: bool,
    /// Schema compatibility policy name: NONE, BACKWARD, FORWARD or FULL.
    pub schema_compatibility: String,
    /// Whether several schemas may be written side by side, keyed by schema
    /// name in the encoded partition.
    pub multi_schema_support: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        SinkOptions {
            topics_dir: "topics".to_string(),
            logs_dir: "logs".to_string(),
            flush_size: 1000,
            rotate_interval_ms: 0,
            rotate_schedule_interval_ms: 0,
            partitioner_timezone: "UTC".to_string(),
            retry_backoff_ms: 5000,
            filename_offset_zero_pad_width: 10,
            hive_integration: false,
            schema_compatibility: "NONE".to_string(),
            multi_schema_support: false,
        }
    }
}

impl SinkOptions {
    /// Parses a [`SinkOptions`] from a string key-value map using the dotted
    /// configuration keys. Unknown keys are ignored; unparsable values are a
    /// configuration error.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self, SinkError> {
        let mut options = SinkOptions::default();

        if let Some(v) = config.get(TOPICS_DIR_CONFIG) {
            options.topics_dir = v.clone();
        }
        if let Some(v) = config.get(LOGS_DIR_CONFIG) {
            options.logs_dir = v.clone();
        }
        if let Some(v) = config.get(FLUSH_SIZE_CONFIG) {
            options.flush_size = parse(FLUSH_SIZE_CONFIG, v)?;
        }
        if let Some(v) = config.get(ROTATE_INTERVAL_MS_CONFIG) {
            options.rotate_interval_ms = parse(ROTATE_INTERVAL_MS_CONFIG, v)?;
        }
        if let Some(v) = config.get(ROTATE_SCHEDULE_INTERVAL_MS_CONFIG) {
            options.rotate_schedule_interval_ms = parse(ROTATE_SCHEDULE_INTERVAL_MS_CONFIG, v)?;
        }
        if let Some(v) = config.get(PARTITIONER_TIMEZONE_CONFIG) {
            options.partitioner_timezone = v.clone();
        }
        if let Some(v) = config.get(RETRY_BACKOFF_MS_CONFIG) {
            options.retry_backoff_ms = parse(RETRY_BACKOFF_MS_CONFIG, v)?;
        }
        if let Some(v) = config.get(FILENAME_OFFSET_ZERO_PAD_WIDTH_CONFIG) {
            options.filename_offset_zero_pad_width =
                parse(FILENAME_OFFSET_ZERO_PAD_WIDTH_CONFIG, v)?;
        }
        if let Some(v) = config.get(HIVE_INTEGRATION_CONFIG) {
            options.hive_integration = parse(HIVE_INTEGRATION_CONFIG, v)?;
        }
        if let Some(v) = config.get(SCHEMA_COMPATIBILITY_CONFIG) {
            options.schema_compatibility = v.clone();
        }
        if let Some(v) = config.get(MULTI_SCHEMA_SUPPORT_CONFIG) {
            options.multi_schema_support = parse(MULTI_SCHEMA_SUPPORT_CONFIG, v)?;
        }

        Ok(options)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SinkError> {
    value
        .parse::<T>()
        .map_err(|_| SinkError::Config(format!("invalid value '{}' for {}", value, key)))
}
