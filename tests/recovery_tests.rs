//! Recovery scenarios: WAL replay, offset reset and failure re-entry.

#[allow(dead_code)]
mod helpers;

use std::fs;
use std::path::Path;

use serde_json::json;

use helpers::*;
use kafka_hdfs_ingest::settings::SinkOptions;
use kafka_hdfs_ingest::wal::{FileWal, Wal, BEGIN_MARKER, END_MARKER};

fn write_lines(path: &Path, lines: &[&str]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, lines.join("\n") + "\n").unwrap();
}

#[test]
fn recovery_replays_complete_bracket_and_seeks() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    // An interrupted commit left a temp file and a complete WAL bracket.
    let temp = root.join("topics/clicks/+tmp/partition=0/aaaa_tmp.json");
    write_lines(&temp, &[r#"{"id":100}"#, r#"{"id":101}"#, r#"{"id":102}"#]);
    let committed = root.join("topics/clicks/partition=0/clicks+0+0000000100+0000000102.json");

    let mut wal = FileWal::open(root.join("logs/clicks/0/log")).unwrap();
    wal.append(BEGIN_MARKER, "").unwrap();
    wal.append(temp.to_str().unwrap(), committed.to_str().unwrap())
        .unwrap();
    wal.append(END_MARKER, "").unwrap();
    wal.close().unwrap();

    let mut sink = new_sink_at(
        root,
        SinkOptions::default(),
        10_000,
        None,
        Box::new(kafka_hdfs_ingest::partitioner::DefaultPartitioner::new()),
    );
    sink.writer.write().unwrap();

    // The rename was replayed, the WAL truncated, and the host seeked to the
    // offset after the recovered file.
    assert!(!temp.exists());
    assert!(committed.exists());
    assert_eq!(
        fs::read_to_string(&committed).unwrap().lines().count(),
        3
    );
    assert!(!root.join("logs/clicks/0/log").exists());
    assert!(root.join("logs/clicks/0/log.1").exists());
    assert_eq!(sink.writer.offset(), 103);
    assert_eq!(sink.context.seek_offsets(), vec![(tp(), 103)]);
}

#[test]
fn recovery_ignores_incomplete_bracket() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let temp = root.join("topics/clicks/+tmp/partition=0/bbbb_tmp.json");
    write_lines(&temp, &[r#"{"id":7}"#]);
    let committed = root.join("topics/clicks/partition=0/clicks+0+0000000007+0000000007.json");

    let mut wal = FileWal::open(root.join("logs/clicks/0/log")).unwrap();
    wal.append(BEGIN_MARKER, "").unwrap();
    wal.append(temp.to_str().unwrap(), committed.to_str().unwrap())
        .unwrap();
    // No end marker: the bracket never completed.
    wal.close().unwrap();

    let mut sink = new_sink_at(
        root,
        SinkOptions::default(),
        10_000,
        None,
        Box::new(kafka_hdfs_ingest::partitioner::DefaultPartitioner::new()),
    );
    sink.writer.write().unwrap();

    // Nothing was promoted; the records will be consumed again.
    assert!(temp.exists());
    assert!(!committed.exists());
    assert_eq!(sink.writer.offset(), -1);
    assert!(sink.context.seek_offsets().is_empty());
}

#[test]
fn recovery_resumes_at_highest_committed_offset() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let partition_dir = root.join("topics/clicks/partition=0");
    write_lines(
        &partition_dir.join("clicks+0+0000000100+0000000102.json"),
        &["{}"],
    );
    write_lines(
        &partition_dir.join("clicks+0+0000000103+0000000105.json"),
        &["{}"],
    );
    // Files of other partitions and unrelated names are ignored.
    write_lines(
        &root.join("topics/clicks/partition=1/clicks+1+0000000500+0000000501.json"),
        &["{}"],
    );
    write_lines(&partition_dir.join("README"), &["not a committed file"]);

    let mut sink = new_sink_at(
        root,
        SinkOptions::default(),
        10_000,
        None,
        Box::new(kafka_hdfs_ingest::partitioner::DefaultPartitioner::new()),
    );
    sink.writer.write().unwrap();

    assert_eq!(sink.writer.offset(), 106);
    assert_eq!(sink.context.seek_offsets(), vec![(tp(), 106)]);
}

#[test]
fn recovery_failure_backs_off_and_reenters_at_failing_state() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write_lines(
        &root.join("topics/clicks/partition=0/clicks+0+0000000000+0000000009.json"),
        &["{}"],
    );

    let options = SinkOptions {
        retry_backoff_ms: 1000,
        ..Default::default()
    };
    let mut sink = new_sink_at(
        root,
        options,
        10_000,
        None,
        Box::new(kafka_hdfs_ingest::partitioner::DefaultPartitioner::new()),
    );

    // The committed-file scan fails: recovery stops and requests a backoff.
    sink.storage.fail_next_lists(1);
    sink.writer.write().unwrap();
    assert_eq!(sink.context.timeout_count(), 1);
    assert!(sink.context.seek_offsets().is_empty());
    assert_eq!(sink.writer.offset(), -1);

    // Inside the backoff window nothing happens.
    sink.clock.set(10_500);
    sink.writer.write().unwrap();
    assert_eq!(sink.context.timeout_count(), 1);

    // Afterwards recovery resumes at the offset-reset step and completes.
    sink.clock.set(11_200);
    sink.writer.buffer(record(10, json!({"id": 10})));
    sink.writer.write().unwrap();
    assert_eq!(sink.writer.offset(), 10);
    assert_eq!(sink.context.seek_offsets(), vec![(tp(), 10)]);
}

#[test]
fn writer_resumes_after_recovered_offset() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write_lines(
        &root.join("topics/clicks/partition=0/clicks+0+0000000100+0000000102.json"),
        &["{}"],
    );

    let options = SinkOptions {
        flush_size: 2,
        ..Default::default()
    };
    let mut sink = new_sink_at(
        root,
        options,
        10_000,
        None,
        Box::new(kafka_hdfs_ingest::partitioner::DefaultPartitioner::new()),
    );

    sink.writer.buffer(record(103, json!({"id": 103})));
    sink.writer.buffer(record(104, json!({"id": 104})));
    sink.writer.write().unwrap();

    let files = committed_file_names(root);
    assert!(files.contains(&"clicks+0+0000000103+0000000104.json".to_string()));
    assert_eq!(sink.writer.offset(), 105);
}
