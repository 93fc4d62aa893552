//! Filename and directory conventions for committed files, temp files and the
//! write-ahead log.

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::{DataTypeOffset, TopicPartition};

/// Sub-directory token separating in-flight temp files from committed output.
pub const TEMPFILE_DIRECTORY: &str = "+tmp";

lazy_static! {
    static ref COMMITTED_FILENAME: Regex =
        Regex::new(r"^(.+)\+(\d+)\+(\d+)\+(\d+)(\.[^.]+)?$").unwrap();
}

/// Base directory of a topic: `<url>/<topics_dir>/<topic>`.
pub fn topic_directory(url: &str, topics_dir: &str, topic: &str) -> String {
    format!("{}/{}/{}", url, topics_dir, topic)
}

/// Full path of a partitioned output directory: `<url>/<topics_dir>/<directory>`.
pub fn directory_name(url: &str, topics_dir: &str, directory: &str) -> String {
    format!("{}/{}/{}", url, topics_dir, directory)
}

/// Full path of a committed file.
///
/// The file name encodes the covered offset range as
/// `<topic>+<partition>+<start>+<end><extension>` with offsets zero-padded to
/// `pad_width` digits.
#[allow(clippy::too_many_arguments)]
pub fn committed_file_name(
    url: &str,
    topics_dir: &str,
    directory: &str,
    tp: &TopicPartition,
    start_offset: DataTypeOffset,
    end_offset: DataTypeOffset,
    extension: &str,
    pad_width: usize,
) -> String {
    format!(
        "{}/{}+{}+{:0width$}+{:0width$}{}",
        directory_name(url, topics_dir, directory),
        tp.topic,
        tp.partition,
        start_offset,
        end_offset,
        extension,
        width = pad_width
    )
}

/// Full path of a fresh temp file for one encoded partition, under the
/// topic's `+tmp` subtree.
pub fn temp_file_name(
    url: &str,
    topics_dir: &str,
    topic: &str,
    encoded_partition: &str,
    extension: &str,
) -> String {
    format!(
        "{}/{}/{}/{}_tmp{}",
        topic_directory(url, topics_dir, topic),
        TEMPFILE_DIRECTORY,
        encoded_partition,
        Uuid::new_v4(),
        extension
    )
}

/// Full path of the write-ahead log for one topic partition:
/// `<url>/<logs_dir>/<topic>/<partition>/log`.
pub fn log_file_name(url: &str, logs_dir: &str, tp: &TopicPartition) -> String {
    format!("{}/{}/{}/{}/log", url, logs_dir, tp.topic, tp.partition)
}

/// Extracts the end offset encoded in a committed file name, if the name
/// follows the committed pattern.
pub fn extract_offset(filename: &str) -> Option<DataTypeOffset> {
    COMMITTED_FILENAME
        .captures(filename)
        .and_then(|c| c.get(4))
        .and_then(|m| m.as_str().parse::<DataTypeOffset>().ok())
}

/// Whether `filename` is a committed file emitted for the given topic
/// partition.
pub fn is_committed_file_for(filename: &str, tp: &TopicPartition) -> bool {
    match COMMITTED_FILENAME.captures(filename) {
        Some(captures) => {
            let topic = captures.get(1).map(|m| m.as_str());
            let partition = captures
                .get(2)
                .and_then(|m| m.as_str().parse::<i32>().ok());
            topic == Some(tp.topic.as_str()) && partition == Some(tp.partition)
        }
        None => false,
    }
}

/// Returns the last path component of a storage path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
