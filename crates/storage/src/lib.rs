//! Storage Layer
//!
//! Persists evidence images and finalized session logs behind the
//! repository pattern, with filesystem and in-memory backends.

mod repository;

pub use repository::{log_file_name, FileRepository, MemoryRepository};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Invalid record name: {0}")]
    InvalidName(String),
    #[error("Lock error: {0}")]
    Lock(String),
}

/// Sink for evidence images
pub trait EvidenceStore: Send + Sync {
    /// Persist a JPEG under `file_name`, returning a reference to the stored image
    fn save_image(&self, file_name: &str, jpeg: &[u8]) -> Result<String, StorageError>;
}

/// Durable per-session event logs
pub trait SessionLogStore: Send + Sync {
    /// Write (or overwrite) the log for `session_id`, returning its location
    fn write_log(&self, session_id: &str, contents: &[u8]) -> Result<String, StorageError>;

    /// Read back the log for `session_id`
    fn read_log(&self, session_id: &str) -> Result<Vec<u8>, StorageError>;
}

/// Reject names that could escape the storage directory
pub(crate) fn check_name(name: &str) -> Result<(), StorageError> {
    let bad = name.is_empty()
        || name.contains(['/', '\\'])
        || name.contains("..")
        || name.chars().any(char::is_control);
    if bad {
        Err(StorageError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}
