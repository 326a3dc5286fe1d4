//! Repository Implementations

use crate::{check_name, EvidenceStore, SessionLogStore, StorageError};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Log file name for a session
pub fn log_file_name(session_id: &str) -> String {
    format!("session_{}.json", session_id)
}

/// Filesystem repository: images and logs in two directories
#[derive(Debug, Clone)]
pub struct FileRepository {
    image_dir: PathBuf,
    log_dir: PathBuf,
}

impl FileRepository {
    /// Create a repository, creating both directories if missing
    pub fn new(image_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let image_dir = image_dir.into();
        let log_dir = log_dir.into();
        fs::create_dir_all(&image_dir).map_err(|e| io_error(&image_dir, e))?;
        fs::create_dir_all(&log_dir).map_err(|e| io_error(&log_dir, e))?;

        info!(
            "Using file repository (images: {}, logs: {})",
            image_dir.display(),
            log_dir.display()
        );
        Ok(Self { image_dir, log_dir })
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of the log file for `session_id`
    pub fn log_path(&self, session_id: &str) -> PathBuf {
        self.log_dir.join(log_file_name(session_id))
    }

    /// Write through a temporary file in the log directory, persisted over the
    /// target, so readers never see a partial log
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), StorageError> {
        let mut tmp = NamedTempFile::new_in(&self.log_dir).map_err(|e| io_error(&self.log_dir, e))?;
        tmp.write_all(contents).map_err(|e| io_error(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| io_error(path, e.error))?;
        Ok(())
    }
}

impl EvidenceStore for FileRepository {
    fn save_image(&self, file_name: &str, jpeg: &[u8]) -> Result<String, StorageError> {
        check_name(file_name)?;
        let path = self.image_dir.join(file_name);
        fs::write(&path, jpeg).map_err(|e| io_error(&path, e))?;
        debug!("Saved evidence image {} ({} bytes)", path.display(), jpeg.len());
        Ok(path.display().to_string())
    }
}

impl SessionLogStore for FileRepository {
    fn write_log(&self, session_id: &str, contents: &[u8]) -> Result<String, StorageError> {
        check_name(session_id)?;
        let path = self.log_path(session_id);
        self.write_atomic(&path, contents)?;
        info!("Wrote session log {} ({} bytes)", path.display(), contents.len());
        Ok(path.display().to_string())
    }

    fn read_log(&self, session_id: &str) -> Result<Vec<u8>, StorageError> {
        check_name(session_id)?;
        let path = self.log_path(session_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

/// In-memory repository for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryRepository {
    images: Mutex<HashMap<String, Vec<u8>>>,
    logs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        info!("Creating in-memory repository");
        Self::default()
    }

    /// Get a stored image by file name
    pub fn image(&self, file_name: &str) -> Option<Vec<u8>> {
        self.images.lock().ok()?.get(file_name).cloned()
    }

    /// Get total image count
    pub fn image_count(&self) -> usize {
        self.images.lock().map(|i| i.len()).unwrap_or(0)
    }

    /// Get total log count
    pub fn log_count(&self) -> usize {
        self.logs.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl EvidenceStore for MemoryRepository {
    fn save_image(&self, file_name: &str, jpeg: &[u8]) -> Result<String, StorageError> {
        check_name(file_name)?;
        let mut images = self
            .images
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        images.insert(file_name.to_string(), jpeg.to_vec());
        Ok(format!("memory://images/{}", file_name))
    }
}

impl SessionLogStore for MemoryRepository {
    fn write_log(&self, session_id: &str, contents: &[u8]) -> Result<String, StorageError> {
        check_name(session_id)?;
        let mut logs = self
            .logs
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        logs.insert(session_id.to_string(), contents.to_vec());
        Ok(format!("memory://logs/{}", log_file_name(session_id)))
    }

    fn read_log(&self, session_id: &str) -> Result<Vec<u8>, StorageError> {
        let logs = self
            .logs
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        logs.get(session_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(session_id.to_string()))
    }
}
