//! Per-partition write-ahead log recording intended temp-file promotions.
//!
//! One rotation epoch appends a begin marker, one entry per temp file mapping
//! it to its committed name, and an end marker. Replay only acts on complete
//! begin..end brackets, so an interrupted rotation is retried from its temp
//! files instead of half-applied.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;

/// Marker opening a WAL bracket.
pub const BEGIN_MARKER: &str = "BEGIN";
/// Marker closing a WAL bracket.
pub const END_MARKER: &str = "END";

/// Write-ahead log consumed by the partition writer.
pub trait Wal {
    /// Appends one entry and makes it durable.
    fn append(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Replays every complete begin..end bracket, promoting recorded temp
    /// files to their committed names. Idempotent: an entry whose temp file is
    /// gone has already been promoted and is skipped.
    fn apply(&mut self) -> Result<(), StorageError>;

    /// Discards the log content, keeping one previous generation aside.
    fn truncate(&mut self) -> Result<(), StorageError>;

    /// Flushes and releases the log handle.
    fn close(&mut self) -> Result<(), StorageError>;

    /// Path of the backing log file.
    fn log_file(&self) -> String;
}

#[derive(Debug, Serialize, Deserialize)]
struct WalEntry {
    key: String,
    value: String,
}

/// [`Wal`] backed by a JSON-lines file on a local filesystem.
#[derive(Debug)]
pub struct FileWal {
    log_file: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileWal {
    /// Opens (or prepares to create) the log at `log_file`. The append handle
    /// is created lazily on first append.
    pub fn open(log_file: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let log_file = log_file.into();
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            log_file,
            writer: None,
        })
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, StorageError> {
        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)?;
            self.writer = Some(BufWriter::new(file));
        }
        // The handle was just created if it was missing.
        self.writer
            .as_mut()
            .ok_or_else(|| StorageError::InvalidPath("write-ahead log handle".to_string()))
    }

    fn read_entries(&self) -> Result<Vec<WalEntry>, StorageError> {
        let mut entries = Vec::new();
        if !self.log_file.exists() {
            return Ok(entries);
        }
        let reader = BufReader::new(File::open(&self.log_file)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: WalEntry =
                serde_json::from_str(&line).map_err(|e| StorageError::CorruptWal {
                    path: self.log_file.display().to_string(),
                    reason: e.to_string(),
                })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn promote(src: &str, dst: &str) -> Result<(), StorageError> {
        if !Path::new(src).exists() {
            // Already promoted by a previous apply of the same bracket.
            debug!("Skipping WAL entry with missing source {}", src);
            return Ok(());
        }
        if let Some(parent) = Path::new(dst).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(src, dst)?;
        info!("Recovered {} to {}", src, dst);
        Ok(())
    }
}

impl Wal for FileWal {
    fn append(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let line = serde_json::to_string(&WalEntry {
            key: key.to_string(),
            value: value.to_string(),
        })
        .map_err(|e| StorageError::CorruptWal {
            path: self.log_file.display().to_string(),
            reason: e.to_string(),
        })?;
        let writer = self.writer()?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn apply(&mut self) -> Result<(), StorageError> {
        let entries = self.read_entries()?;
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut in_bracket = false;

        for entry in entries {
            match entry.key.as_str() {
                BEGIN_MARKER => {
                    if in_bracket && !pending.is_empty() {
                        warn!(
                            "Discarding {} unclosed WAL entries in {}",
                            pending.len(),
                            self.log_file.display()
                        );
                    }
                    pending.clear();
                    in_bracket = true;
                }
                END_MARKER => {
                    if in_bracket {
                        for (src, dst) in pending.drain(..) {
                            Self::promote(&src, &dst)?;
                        }
                    }
                    in_bracket = false;
                }
                _ => {
                    if in_bracket {
                        pending.push((entry.key, entry.value));
                    }
                }
            }
        }

        // Entries after the last END_MARKER belong to an incomplete bracket
        // and are retried from their temp files after truncation.
        Ok(())
    }

    fn truncate(&mut self) -> Result<(), StorageError> {
        self.close()?;
        if self.log_file.exists() {
            let previous = self.log_file.with_extension("1");
            fs::rename(&self.log_file, &previous)?;
            debug!(
                "Truncated WAL {} (previous generation at {})",
                self.log_file.display(),
                previous.display()
            );
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn log_file(&self) -> String {
        self.log_file.display().to_string()
    }
}
