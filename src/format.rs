use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::errors::StorageError;
use crate::records::SinkRecord;

/// Sink writing records into one temp file.
pub trait RecordWriter {
    /// Appends one record to the file.
    fn write(&mut self, record: &SinkRecord) -> Result<(), StorageError>;

    /// Flushes and releases the file handle.
    fn close(&mut self) -> Result<(), StorageError>;
}

/// Factory constructing a [`RecordWriter`] for a temp file path.
pub trait RecordWriterProvider {
    /// Dotted file extension of the format, e.g. `.json`.
    fn extension(&self) -> &str;

    /// Opens a writer at `path`. `sample` is the first record routed to the
    /// file, available to formats that derive a file header from it.
    fn record_writer(
        &self,
        path: &str,
        sample: &SinkRecord,
    ) -> Result<Box<dyn RecordWriter>, StorageError>;
}

/// JSON-lines format: one record value per line.
#[derive(Debug, Default)]
pub struct JsonRecordWriterProvider;

impl JsonRecordWriterProvider {
    pub fn new() -> Self {
        Self
    }
}

impl RecordWriterProvider for JsonRecordWriterProvider {
    fn extension(&self) -> &str {
        ".json"
    }

    fn record_writer(
        &self,
        path: &str,
        _sample: &SinkRecord,
    ) -> Result<Box<dyn RecordWriter>, StorageError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        debug!("Opened temp file {}", path);
        Ok(Box::new(JsonRecordWriter {
            writer: BufWriter::new(file),
        }))
    }
}

struct JsonRecordWriter {
    writer: BufWriter<File>,
}

impl RecordWriter for JsonRecordWriter {
    fn write(&mut self, record: &SinkRecord) -> Result<(), StorageError> {
        serde_json::to_writer(&mut self.writer, &record.value).map_err(std::io::Error::from)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        Ok(())
    }
}
