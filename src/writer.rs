//! The per-partition writer: recovery, buffering, rotation and exactly-once
//! promotion of temp files into committed files.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;

use chrono_tz::Tz;
use log::{debug, error, info};
use strum_macros::Display;

use crate::errors::{SinkError, StorageError};
use crate::format::{RecordWriter, RecordWriterProvider};
use crate::hive::HiveService;
use crate::partitioner::{Partitioner, SchemaAwarePartitioner};
use crate::paths;
use crate::records::SinkRecord;
use crate::rotation::RotationEvaluator;
use crate::schemas::{Schema, SchemaCompatibility, SchemaTracker};
use crate::settings::SinkOptions;
use crate::storage::Storage;
use crate::util::Clock;
use crate::wal::{Wal, BEGIN_MARKER, END_MARKER};
use crate::{DataTypeOffset, SinkTaskContext, TopicPartition};

/// States of the writer, in execution order. Recovery runs the prefix before
/// `WRITE_STARTED` exactly once; the write loop cycles through the suffix,
/// jumping from `FILE_COMMITTED` back to `WRITE_PARTITION_PAUSED`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
enum WriterState {
    RecoveryStarted,
    RecoveryPartitionPaused,
    WalApplied,
    WalTruncated,
    OffsetReset,
    WriteStarted,
    WritePartitionPaused,
    ShouldRotate,
    TempFileClosed,
    WalAppended,
    FileCommitted,
}

/// Writes the records of one (topic, partition) into an HDFS-like filesystem.
///
/// Records enter through [`buffer`](PartitionWriter::buffer); the host then
/// repeatedly invokes [`write`](PartitionWriter::write), which drains as much
/// of the buffer as possible. Each drained record is routed by the partitioner
/// into a per-partition temp file; when a rotation condition fires, all open
/// temp files are closed, their intended committed names are recorded in the
/// write-ahead log between begin/end markers, and the temps are promoted. On
/// restart, the WAL is replayed so an interrupted promotion completes before
/// any new record is written.
pub struct PartitionWriter {
    tp: TopicPartition,
    storage: Arc<dyn Storage>,
    wal: Box<dyn Wal>,
    writer_provider: Arc<dyn RecordWriterProvider>,
    partitioner: Box<dyn Partitioner>,
    context: Arc<dyn SinkTaskContext>,
    schema_tracker: Box<dyn SchemaTracker>,
    hive_service: Option<Arc<dyn HiveService>>,
    clock: Arc<dyn Clock>,
    compatibility: SchemaCompatibility,

    url: String,
    topics_dir: String,
    extension: String,
    timeout_ms: i64,
    zero_pad_width: usize,
    hive_integration: bool,
    multi_schema_support: bool,
    is_wallclock_based: bool,

    state: WriterState,
    recovered: bool,
    buffer: VecDeque<SinkRecord>,
    writers: BTreeMap<String, Box<dyn RecordWriter>>,
    temp_files: BTreeMap<String, String>,
    start_offsets: BTreeMap<String, DataTypeOffset>,
    end_offsets: BTreeMap<String, DataTypeOffset>,
    appended: HashSet<String>,
    hive_partitions: HashSet<String>,
    rotation: RotationEvaluator,
    offset: DataTypeOffset,
    record_counter: i32,
    failure_time: i64,
}

impl PartitionWriter {
    /// Creates a writer for one topic partition. Configuration is captured
    /// immutably; the writer enters recovery on its first
    /// [`write`](PartitionWriter::write).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tp: TopicPartition,
        storage: Arc<dyn Storage>,
        writer_provider: Arc<dyn RecordWriterProvider>,
        partitioner: Box<dyn Partitioner>,
        options: &SinkOptions,
        context: Arc<dyn SinkTaskContext>,
        schema_tracker: Box<dyn SchemaTracker>,
        hive_service: Option<Arc<dyn HiveService>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SinkError> {
        let compatibility = SchemaCompatibility::from_name(&options.schema_compatibility)?;

        let timezone = if options.rotate_schedule_interval_ms > 0 {
            Some(Tz::from_str(&options.partitioner_timezone).map_err(|_| {
                SinkError::Config(format!(
                    "invalid partitioner.timezone '{}'",
                    options.partitioner_timezone
                ))
            })?)
        } else {
            None
        };

        if options.hive_integration && hive_service.is_none() {
            return Err(SinkError::Config(
                "hive.integration is enabled but no hive service was provided".to_string(),
            ));
        }

        let wal = storage.wal(&options.logs_dir, &tp)?;

        let partitioner = if options.multi_schema_support {
            Box::new(SchemaAwarePartitioner::new(partitioner)) as Box<dyn Partitioner>
        } else {
            partitioner
        };
        // A partitioner without a timestamp extractor rotates on wall-clock time.
        let is_wallclock_based = partitioner
            .timestamp_extractor()
            .map(|e| e.is_wallclock())
            .unwrap_or(true);

        let url = storage.url().to_string();
        let extension = writer_provider.extension().to_string();
        let rotation = RotationEvaluator::new(
            options.flush_size,
            options.rotate_interval_ms,
            options.rotate_schedule_interval_ms,
            timezone,
        );

        let mut writer = Self {
            tp,
            storage,
            wal,
            writer_provider,
            partitioner,
            context,
            schema_tracker,
            hive_service,
            clock,
            compatibility,
            url,
            topics_dir: options.topics_dir.clone(),
            extension,
            timeout_ms: options.retry_backoff_ms,
            zero_pad_width: options.filename_offset_zero_pad_width,
            hive_integration: options.hive_integration,
            multi_schema_support: options.multi_schema_support,
            is_wallclock_based,
            state: WriterState::RecoveryStarted,
            recovered: false,
            buffer: VecDeque::new(),
            writers: BTreeMap::new(),
            temp_files: BTreeMap::new(),
            start_offsets: BTreeMap::new(),
            end_offsets: BTreeMap::new(),
            appended: HashSet::new(),
            hive_partitions: HashSet::new(),
            rotation,
            offset: -1,
            record_counter: 0,
            failure_time: -1,
        };
        writer.update_rotation_timers(None);
        Ok(writer)
    }

    /// Enqueues a record at the tail of the buffer.
    pub fn buffer(&mut self, record: SinkRecord) {
        self.buffer.push_back(record);
    }

    /// Last committed offset + 1 for this partition, or -1 before anything
    /// was committed or recovered.
    pub fn offset(&self) -> DataTypeOffset {
        self.offset
    }

    /// Number of records currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drains as much of the buffer as possible, rotating and committing files
    /// along the way.
    ///
    /// Transient storage failures are absorbed: the failure time is recorded,
    /// a retry backoff is requested from the host, and re-entry before the
    /// backoff elapses is a no-op; the state machine then resumes at the
    /// failing state. Schema projection, illegal state and catalog errors are
    /// fatal and returned.
    pub fn write(&mut self) -> Result<(), SinkError> {
        let now = self.clock.millis();
        let mut current_record: Option<SinkRecord> = None;

        if self.failure_time > 0 && now - self.failure_time < self.timeout_ms {
            return Ok(());
        }
        if self.state < WriterState::WriteStarted {
            if !self.recover() {
                return Ok(());
            }
            self.update_rotation_timers(None);
        }

        while !self.buffer.is_empty() {
            match self.write_step(&mut current_record, now) {
                Ok(()) => {}
                Err(e) if e.is_retriable() => {
                    error!("Exception on topic partition {}: {}", self.tp, e);
                    self.failure_time = self.clock.millis();
                    self.set_retry_timeout();
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if self.buffer.is_empty() {
            // Commit files after waiting out a time-based rotation with fewer
            // than flush.size records available.
            if self.record_counter > 0 && self.should_rotate(current_record.as_ref(), now) {
                info!(
                    "Committing files after waiting for rotation with fewer than flush.size records available for {}",
                    self.tp
                );
                self.update_rotation_timers(current_record.as_ref());
                match self.close_append_commit() {
                    Ok(()) => {}
                    Err(e) if e.is_retriable() => {
                        error!("Exception on topic partition {}: {}", self.tp, e);
                        self.failure_time = self.clock.millis();
                        self.set_retry_timeout();
                    }
                    Err(e) => return Err(e),
                }
            }
            self.resume();
            self.state = WriterState::WriteStarted;
        }

        Ok(())
    }

    /// Runs the recovery prefix of the state machine: apply the WAL, truncate
    /// it, scan committed files for the highest offset, seek the host there
    /// and resume consumption. Returns false after a failure, in which case
    /// the next `write()` re-enters recovery at the failing state.
    pub fn recover(&mut self) -> bool {
        match self.try_recover() {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Recovery failed for topic partition {} at state {}: {}",
                    self.tp, self.state, e
                );
                self.failure_time = self.clock.millis();
                self.set_retry_timeout();
                false
            }
        }
    }

    /// Discards in-progress temp files and closes the write-ahead log. Does
    /// not commit partial work; committed state is preserved.
    pub fn close(&mut self) -> Result<(), SinkError> {
        debug!("Closing partition writer {}", self.tp);
        let partitions: Vec<String> = self.temp_files.keys().cloned().collect();
        for encoded in partitions {
            if self.writers.contains_key(&encoded) {
                debug!(
                    "Discarding in progress temp file {:?} for {} {}",
                    self.temp_files.get(&encoded),
                    self.tp,
                    encoded
                );
                if let Err(e) = self.discard_temp_file(&encoded) {
                    error!(
                        "Error discarding temp file {:?} for {} {} when closing partition writer: {}",
                        self.temp_files.get(&encoded),
                        self.tp,
                        encoded,
                        e
                    );
                }
            }
        }
        self.writers.clear();

        let mut close_errors = Vec::new();
        if let Err(e) = self.wal.close() {
            error!("Error closing {}: {}", self.wal.log_file(), e);
            close_errors.push(e.to_string());
        }
        self.start_offsets.clear();
        self.end_offsets.clear();

        if close_errors.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Close(close_errors.join("\n")))
        }
    }

    fn try_recover(&mut self) -> Result<(), SinkError> {
        loop {
            match self.state {
                WriterState::RecoveryStarted => {
                    info!("Started recovery for topic partition {}", self.tp);
                    self.pause();
                    self.state = WriterState::RecoveryPartitionPaused;
                }
                WriterState::RecoveryPartitionPaused => {
                    self.apply_wal()?;
                    self.state = WriterState::WalApplied;
                }
                WriterState::WalApplied => {
                    self.truncate_wal()?;
                    self.state = WriterState::WalTruncated;
                }
                WriterState::WalTruncated => {
                    self.reset_offsets()?;
                    self.state = WriterState::OffsetReset;
                }
                WriterState::OffsetReset => {
                    self.resume();
                    self.state = WriterState::WriteStarted;
                    info!("Finished recovery for topic partition {}", self.tp);
                    return Ok(());
                }
                state => {
                    error!(
                        "{} is not a valid state to perform recovery for topic partition {}",
                        state, self.tp
                    );
                    return Ok(());
                }
            }
        }
    }

    /// One pass through the write states, yielding after a record is written,
    /// after a schema transition with nothing to rotate, or after a completed
    /// rotation.
    fn write_step(
        &mut self,
        current_record: &mut Option<SinkRecord>,
        now: i64,
    ) -> Result<(), SinkError> {
        loop {
            match self.state {
                WriterState::WriteStarted => {
                    self.pause();
                    self.state = WriterState::WritePartitionPaused;
                }
                WriterState::WritePartitionPaused => {
                    let record = match self.buffer.front() {
                        Some(record) => record.clone(),
                        None => return Ok(()),
                    };
                    *current_record = Some(record.clone());

                    let value_schema = record.value_schema.clone();
                    let current_schema = value_schema
                        .as_ref()
                        .and_then(|s| {
                            self.schema_tracker
                                .get_or_load_current_schema(&s.name, self.offset)
                        });

                    if let Some(schema) = self.schema_transition(&value_schema, &current_schema, &record) {
                        self.schema_tracker.update(schema.clone());
                        if self.hive_integration {
                            if let Some(hive) = &self.hive_service {
                                hive.create_hive_table(&schema)?;
                                hive.alter_hive_schema(&schema)?;
                            }
                        }
                        if self.record_counter > 0 {
                            self.state = WriterState::ShouldRotate;
                        } else {
                            return Ok(());
                        }
                    } else if self.should_rotate(Some(&record), now) {
                        info!(
                            "Starting commit and rotation for topic partition {} with start offsets {:?} and end offsets {:?}",
                            self.tp, self.start_offsets, self.end_offsets
                        );
                        self.state = WriterState::ShouldRotate;
                    } else {
                        let projected =
                            self.compatibility
                                .project(&record, None, current_schema.as_ref())?;
                        self.write_record(&projected)?;
                        self.buffer.pop_front();
                        return Ok(());
                    }
                }
                WriterState::ShouldRotate => {
                    self.update_rotation_timers(current_record.as_ref());
                    self.close_temp_files()?;
                    self.state = WriterState::TempFileClosed;
                }
                WriterState::TempFileClosed => {
                    self.append_to_wal()?;
                    self.state = WriterState::WalAppended;
                }
                WriterState::WalAppended => {
                    self.commit_files()?;
                    self.state = WriterState::FileCommitted;
                }
                WriterState::FileCommitted => {
                    self.state = WriterState::WritePartitionPaused;
                    return Ok(());
                }
                state => {
                    return Err(SinkError::IllegalWorkerState(format!(
                        "{} is not a valid state to write records for topic partition {}",
                        state, self.tp
                    )));
                }
            }
        }
    }

    /// Returns the schema to transition to, when one is required before the
    /// record can be written.
    fn schema_transition(
        &self,
        value_schema: &Option<Schema>,
        current_schema: &Option<Schema>,
        record: &SinkRecord,
    ) -> Option<Schema> {
        let value_schema = value_schema.as_ref()?;
        let is_new = (self.record_counter <= 0 || self.multi_schema_support)
            && current_schema.is_none();
        if is_new
            || self
                .compatibility
                .should_change_schema(record, None, current_schema.as_ref())
        {
            Some(value_schema.clone())
        } else {
            None
        }
    }

    fn close_append_commit(&mut self) -> Result<(), SinkError> {
        self.close_temp_files()?;
        self.append_to_wal()?;
        self.commit_files()
    }

    fn update_rotation_timers(&mut self, current_record: Option<&SinkRecord>) {
        let now = self.clock.millis();
        // Wall-clock based timing is independent of the record argument.
        let rotate_timestamp = if self.is_wallclock_based {
            Some(now)
        } else {
            current_record.and_then(|r| self.extract_timestamp(r))
        };
        self.rotation.refresh(now, rotate_timestamp);
    }

    fn should_rotate(&mut self, current_record: Option<&SinkRecord>, now: i64) -> bool {
        let current_timestamp = if self.is_wallclock_based {
            Some(now)
        } else {
            current_record.and_then(|r| self.extract_timestamp(r))
        };
        self.rotation
            .should_rotate(self.record_counter, current_timestamp, now)
    }

    fn extract_timestamp(&self, record: &SinkRecord) -> Option<i64> {
        self.partitioner
            .timestamp_extractor()
            .and_then(|e| e.extract(record))
    }

    fn apply_wal(&mut self) -> Result<(), SinkError> {
        if !self.recovered {
            self.wal.apply()?;
        }
        Ok(())
    }

    fn truncate_wal(&mut self) -> Result<(), SinkError> {
        if !self.recovered {
            self.wal.truncate()?;
        }
        Ok(())
    }

    fn reset_offsets(&mut self) -> Result<(), SinkError> {
        if !self.recovered {
            self.read_offset()?;
            // Even though the host may track its own committed offsets, only a
            // rolled file proves the data landed; a record accepted into a
            // temp file that was later discarded must be consumed again. Seek
            // whenever a committed offset was found; otherwise leave the
            // starting position to the host's reset policy.
            if self.offset > 0 {
                debug!("Resetting offset for {} to {}", self.tp, self.offset);
                self.context.offset(&self.tp, self.offset);
            } else {
                debug!(
                    "Resetting offset for {} based upon existing consumer offsets or the host's reset policy",
                    self.tp
                );
            }
            self.recovered = true;
        }
        Ok(())
    }

    fn read_offset(&mut self) -> Result<(), StorageError> {
        let topic_dir = paths::topic_directory(&self.url, &self.topics_dir, &self.tp.topic);
        let mut max_offset: Option<DataTypeOffset> = None;
        for file in self.storage.list_files(&topic_dir)? {
            let name = paths::file_name(&file);
            if paths::is_committed_file_for(name, &self.tp) {
                if let Some(end_offset) = paths::extract_offset(name) {
                    max_offset = Some(max_offset.map_or(end_offset, |m| m.max(end_offset)));
                }
            }
        }
        if let Some(max) = max_offset {
            self.offset = max + 1;
        }
        Ok(())
    }

    fn write_record(&mut self, record: &SinkRecord) -> Result<(), SinkError> {
        if self.offset == -1 {
            self.offset = record.kafka_offset;
        }

        let encoded = self.partitioner.encode_partition(record);
        self.ensure_writer(record, &encoded)?;
        let writer = self.writers.get_mut(&encoded).ok_or_else(|| {
            SinkError::IllegalWorkerState(format!("no open writer for partition {}", encoded))
        })?;
        writer.write(record)?;

        self.start_offsets
            .entry(encoded.clone())
            .or_insert(record.kafka_offset);
        self.end_offsets.insert(encoded, record.kafka_offset);
        self.record_counter += 1;
        Ok(())
    }

    fn ensure_writer(&mut self, record: &SinkRecord, encoded: &str) -> Result<(), SinkError> {
        if self.writers.contains_key(encoded) {
            return Ok(());
        }
        let temp_file = self.temp_file(encoded);
        let writer = self.writer_provider.record_writer(&temp_file, record)?;
        self.writers.insert(encoded.to_string(), writer);

        if self.hive_integration && !self.hive_partitions.contains(encoded) {
            if let Some(hive) = &self.hive_service {
                hive.add_hive_partition(record, record.value_schema.as_ref())?;
            }
            self.hive_partitions.insert(encoded.to_string());
        }
        Ok(())
    }

    fn temp_file(&mut self, encoded: &str) -> String {
        if let Some(existing) = self.temp_files.get(encoded) {
            return existing.clone();
        }
        let temp_file = paths::temp_file_name(
            &self.url,
            &self.topics_dir,
            &self.tp.topic,
            encoded,
            &self.extension,
        );
        self.temp_files.insert(encoded.to_string(), temp_file.clone());
        temp_file
    }

    fn close_temp_files(&mut self) -> Result<(), SinkError> {
        let partitions: Vec<String> = self.temp_files.keys().cloned().collect();
        for encoded in partitions {
            self.close_temp_file(&encoded)?;
        }
        Ok(())
    }

    fn close_temp_file(&mut self, encoded: &str) -> Result<(), SinkError> {
        if let Some(writer) = self.writers.get_mut(encoded) {
            writer.close()?;
            self.writers.remove(encoded);
        }
        Ok(())
    }

    fn append_to_wal(&mut self) -> Result<(), SinkError> {
        self.begin_append()?;
        let partitions: Vec<String> = self.temp_files.keys().cloned().collect();
        for encoded in partitions {
            self.append_partition_to_wal(&encoded)?;
        }
        self.end_append()
    }

    fn append_partition_to_wal(&mut self, encoded: &str) -> Result<(), SinkError> {
        let temp_file = match self.temp_files.get(encoded) {
            Some(temp_file) => temp_file.clone(),
            None => return Ok(()),
        };
        if self.appended.contains(&temp_file) {
            return Ok(());
        }
        let start_offset = match self.start_offsets.get(encoded) {
            Some(offset) => *offset,
            None => return Ok(()),
        };
        let end_offset = match self.end_offsets.get(encoded) {
            Some(offset) => *offset,
            None => {
                return Err(SinkError::IllegalWorkerState(format!(
                    "missing end offset for partition {}",
                    encoded
                )))
            }
        };

        let committed_file = self.committed_file_name(encoded, start_offset, end_offset);
        self.wal.append(&temp_file, &committed_file)?;
        self.appended.insert(temp_file);
        Ok(())
    }

    fn begin_append(&mut self) -> Result<(), SinkError> {
        if !self.appended.contains(BEGIN_MARKER) {
            self.wal.append(BEGIN_MARKER, "")?;
            self.appended.insert(BEGIN_MARKER.to_string());
        }
        Ok(())
    }

    fn end_append(&mut self) -> Result<(), SinkError> {
        if !self.appended.contains(END_MARKER) {
            self.wal.append(END_MARKER, "")?;
            self.appended.insert(END_MARKER.to_string());
        }
        Ok(())
    }

    fn commit_files(&mut self) -> Result<(), SinkError> {
        self.appended.clear();
        let partitions: Vec<String> = self.temp_files.keys().cloned().collect();
        for encoded in partitions {
            self.commit_file(&encoded)?;
        }
        // The offset advances only once every rename of the epoch completed; a
        // failure above leaves the WAL intact for replay on restart.
        self.offset += self.record_counter as DataTypeOffset;
        self.record_counter = 0;
        Ok(())
    }

    fn commit_file(&mut self, encoded: &str) -> Result<(), SinkError> {
        let start_offset = match self.start_offsets.get(encoded) {
            Some(offset) => *offset,
            None => return Ok(()),
        };
        let end_offset = match self.end_offsets.get(encoded) {
            Some(offset) => *offset,
            None => {
                return Err(SinkError::IllegalWorkerState(format!(
                    "missing end offset for partition {}",
                    encoded
                )))
            }
        };
        let temp_file = match self.temp_files.get(encoded) {
            Some(temp_file) => temp_file.clone(),
            None => return Ok(()),
        };

        let committed_file = self.committed_file_name(encoded, start_offset, end_offset);
        let directory = self
            .partitioner
            .generate_partitioned_path(&self.tp.topic, encoded);
        let directory_name = paths::directory_name(&self.url, &self.topics_dir, &directory);
        if !self.storage.exists(&directory_name)? {
            self.storage.create(&directory_name)?;
        }
        self.storage.commit(&temp_file, &committed_file)?;

        self.start_offsets.remove(encoded);
        self.end_offsets.remove(encoded);
        self.temp_files.remove(encoded);
        info!("Committed {} for {}", committed_file, self.tp);
        Ok(())
    }

    fn committed_file_name(
        &self,
        encoded: &str,
        start_offset: DataTypeOffset,
        end_offset: DataTypeOffset,
    ) -> String {
        let directory = self
            .partitioner
            .generate_partitioned_path(&self.tp.topic, encoded);
        paths::committed_file_name(
            &self.url,
            &self.topics_dir,
            &directory,
            &self.tp,
            start_offset,
            end_offset,
            &self.extension,
            self.zero_pad_width,
        )
    }

    fn discard_temp_file(&mut self, encoded: &str) -> Result<(), SinkError> {
        self.close_temp_file(encoded)?;
        if let Some(temp_file) = self.temp_files.get(encoded) {
            self.storage.delete(temp_file)?;
        }
        Ok(())
    }

    fn pause(&self) {
        self.context.pause(&self.tp);
    }

    fn resume(&self) {
        self.context.resume(&self.tp);
    }

    fn set_retry_timeout(&self) {
        self.context.timeout(self.timeout_ms);
    }
}
