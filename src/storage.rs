use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::errors::StorageError;
use crate::paths;
use crate::wal::{FileWal, Wal};
use crate::TopicPartition;

/// Storage backend the partition writer lands files into.
///
/// The backend exposes only the primitives the writer needs: existence checks,
/// directory creation, atomic promotion of a temp file to its committed name,
/// deletion, a recursive listing used by recovery to find the highest
/// committed offset, and construction of the per-partition write-ahead log.
pub trait Storage {
    /// Root url all paths handed to this backend live under.
    fn url(&self) -> &str;

    /// Whether the path exists.
    fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Creates a directory and any missing parents.
    fn create(&self, path: &str) -> Result<(), StorageError>;

    /// Atomically promotes `src` to `dst`.
    fn commit(&self, src: &str, dst: &str) -> Result<(), StorageError>;

    /// Deletes a file or directory tree.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Recursively lists the files under `path`. Returns an empty list when
    /// the path does not exist.
    fn list_files(&self, path: &str) -> Result<Vec<String>, StorageError>;

    /// Opens the write-ahead log for one topic partition under `logs_dir`.
    fn wal(&self, logs_dir: &str, tp: &TopicPartition) -> Result<Box<dyn Wal>, StorageError>;
}

/// [`Storage`] backed by the local filesystem, rooted at a single directory.
#[derive(Debug)]
pub struct LocalStorage {
    url: String,
}

impl LocalStorage {
    /// Creates a storage backend rooted at `root`. The root directory is
    /// created if it does not exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let url = root
            .to_str()
            .ok_or_else(|| StorageError::InvalidPath(root.display().to_string()))?
            .trim_end_matches('/')
            .to_string();
        Ok(Self { url })
    }

    fn walk(dir: &Path, files: &mut Vec<String>) -> Result<(), StorageError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                Self::walk(&path, files)?;
            } else if let Some(p) = path.to_str() {
                files.push(p.to_string());
            }
        }
        Ok(())
    }
}

impl Storage for LocalStorage {
    fn url(&self) -> &str {
        &self.url
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(Path::new(path).exists())
    }

    fn create(&self, path: &str) -> Result<(), StorageError> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn commit(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        debug!("Committing {} to {}", src, dst);
        fs::rename(src, dst)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let p = Path::new(path);
        if p.is_dir() {
            fs::remove_dir_all(p)?;
        } else if p.exists() {
            fs::remove_file(p)?;
        }
        Ok(())
    }

    fn list_files(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let dir = PathBuf::from(path);
        let mut files = Vec::new();
        if dir.is_dir() {
            Self::walk(&dir, &mut files)?;
        }
        Ok(files)
    }

    fn wal(&self, logs_dir: &str, tp: &TopicPartition) -> Result<Box<dyn Wal>, StorageError> {
        let log_file = paths::log_file_name(&self.url, logs_dir, tp);
        Ok(Box::new(FileWal::open(log_file)?))
    }
}
