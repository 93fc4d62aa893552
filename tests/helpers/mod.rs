use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use kafka_hdfs_ingest::errors::StorageError;
use kafka_hdfs_ingest::format::JsonRecordWriterProvider;
use kafka_hdfs_ingest::hive::{HiveError, HiveService};
use kafka_hdfs_ingest::partitioner::{DefaultPartitioner, Partitioner};
use kafka_hdfs_ingest::records::SinkRecord;
use kafka_hdfs_ingest::schemas::{FieldType, InMemorySchemaTracker, Schema, SchemaField};
use kafka_hdfs_ingest::settings::SinkOptions;
use kafka_hdfs_ingest::storage::{LocalStorage, Storage};
use kafka_hdfs_ingest::util::Clock;
use kafka_hdfs_ingest::wal::Wal;
use kafka_hdfs_ingest::writer::PartitionWriter;
use kafka_hdfs_ingest::{DataTypeOffset, SinkTaskContext, TopicPartition};

pub const TOPIC: &str = "clicks";
pub const PARTITION: i32 = 0;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn tp() -> TopicPartition {
    TopicPartition::new(TOPIC, PARTITION)
}

/// Clock driven manually by tests.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            millis: AtomicI64::new(start),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Task context recording every host interaction.
#[derive(Debug, Default)]
pub struct MockContext {
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub seeks: Mutex<Vec<(TopicPartition, DataTypeOffset)>>,
    pub timeouts: Mutex<Vec<i64>>,
}

impl SinkTaskContext for MockContext {
    fn pause(&self, _tp: &TopicPartition) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self, _tp: &TopicPartition) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn offset(&self, tp: &TopicPartition, offset: DataTypeOffset) {
        self.seeks.lock().unwrap().push((tp.clone(), offset));
    }

    fn timeout(&self, millis: i64) {
        self.timeouts.lock().unwrap().push(millis);
    }
}

impl MockContext {
    pub fn seek_offsets(&self) -> Vec<(TopicPartition, DataTypeOffset)> {
        self.seeks.lock().unwrap().clone()
    }

    pub fn timeout_count(&self) -> usize {
        self.timeouts.lock().unwrap().len()
    }
}

/// Storage wrapper injecting commit and listing failures.
pub struct FlakyStorage {
    inner: LocalStorage,
    commit_failures: AtomicUsize,
    list_failures: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(inner: LocalStorage) -> Self {
        Self {
            inner,
            commit_failures: AtomicUsize::new(0),
            list_failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_commits(&self, count: usize) {
        self.commit_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.list_failures.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected(what: &str) -> StorageError {
        StorageError::Io {
            source: std::io::Error::new(std::io::ErrorKind::Other, format!("injected {}", what)),
        }
    }
}

impl Storage for FlakyStorage {
    fn url(&self) -> &str {
        self.inner.url()
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        self.inner.exists(path)
    }

    fn create(&self, path: &str) -> Result<(), StorageError> {
        self.inner.create(path)
    }

    fn commit(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        if Self::take_failure(&self.commit_failures) {
            return Err(Self::injected("commit failure"));
        }
        self.inner.commit(src, dst)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.inner.delete(path)
    }

    fn list_files(&self, path: &str) -> Result<Vec<String>, StorageError> {
        if Self::take_failure(&self.list_failures) {
            return Err(Self::injected("list failure"));
        }
        self.inner.list_files(path)
    }

    fn wal(&self, logs_dir: &str, tp: &TopicPartition) -> Result<Box<dyn Wal>, StorageError> {
        self.inner.wal(logs_dir, tp)
    }
}

/// Hive service recording the order of catalog calls.
#[derive(Debug, Default)]
pub struct RecordingHive {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingHive {
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl HiveService for RecordingHive {
    fn create_hive_table(&self, schema: &Schema) -> Result<(), HiveError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create_table:{}:v{}", schema.name, schema.version));
        Ok(())
    }

    fn alter_hive_schema(&self, schema: &Schema) -> Result<(), HiveError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("alter_schema:{}:v{}", schema.name, schema.version));
        Ok(())
    }

    fn add_hive_partition(
        &self,
        record: &SinkRecord,
        _schema: Option<&Schema>,
    ) -> Result<(), HiveError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("add_partition:offset={}", record.kafka_offset));
        Ok(())
    }
}

/// Fully wired partition writer over a scratch directory.
pub struct TestSink {
    pub dir: Option<tempfile::TempDir>,
    pub root: PathBuf,
    pub storage: Arc<FlakyStorage>,
    pub context: Arc<MockContext>,
    pub clock: Arc<ManualClock>,
    pub writer: PartitionWriter,
}

pub fn new_sink(options: SinkOptions, start_millis: i64) -> TestSink {
    new_sink_full(
        options,
        start_millis,
        None,
        Box::new(DefaultPartitioner::new()),
    )
}

pub fn new_sink_full(
    options: SinkOptions,
    start_millis: i64,
    hive: Option<Arc<dyn HiveService>>,
    partitioner: Box<dyn Partitioner>,
) -> TestSink {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = new_sink_at(dir.path(), options, start_millis, hive, partitioner);
    sink.dir = Some(dir);
    sink
}

pub fn new_sink_at(
    root: &Path,
    options: SinkOptions,
    start_millis: i64,
    hive: Option<Arc<dyn HiveService>>,
    partitioner: Box<dyn Partitioner>,
) -> TestSink {
    init_logger();
    let storage = Arc::new(FlakyStorage::new(LocalStorage::new(root).unwrap()));
    let context = Arc::new(MockContext::default());
    let clock = Arc::new(ManualClock::new(start_millis));

    let writer = PartitionWriter::new(
        tp(),
        storage.clone(),
        Arc::new(JsonRecordWriterProvider::new()),
        partitioner,
        &options,
        context.clone(),
        Box::new(InMemorySchemaTracker::new()),
        hive,
        clock.clone(),
    )
    .unwrap();

    TestSink {
        dir: None,
        root: root.to_path_buf(),
        storage,
        context,
        clock,
        writer,
    }
}

pub fn record(offset: DataTypeOffset, value: Value) -> SinkRecord {
    SinkRecord::new(TOPIC, PARTITION, offset, value)
}

pub fn click_schema(version: i32) -> Schema {
    let mut fields = vec![SchemaField::required("id", FieldType::Int64)];
    if version > 1 {
        fields.push(SchemaField::optional("color", FieldType::String));
    }
    Schema::new("click", version, fields)
}

/// Names of all committed files under the topics directory, sorted. Temp
/// subtrees are excluded.
pub fn committed_file_names(root: &Path) -> Vec<String> {
    let mut names = Vec::new();
    collect_files(&root.join("topics"), &mut names);
    names.sort();
    names
}

fn collect_files(dir: &Path, names: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            if name != "+tmp" {
                collect_files(&path, names);
            }
        } else {
            names.push(name);
        }
    }
}

/// Lines of one committed file found by name anywhere under the topics
/// directory.
pub fn committed_file_lines(root: &Path, file_name: &str) -> Vec<String> {
    let mut found = Vec::new();
    find_file(&root.join("topics"), file_name, &mut found);
    let path = found
        .first()
        .unwrap_or_else(|| panic!("committed file {} not found under {:?}", file_name, root));
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

fn find_file(dir: &Path, file_name: &str, found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            find_file(&path, file_name, found);
        } else if entry.file_name().to_string_lossy() == file_name {
            found.push(path);
        }
    }
}
