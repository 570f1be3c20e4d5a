//! ==============================================================================
//! error.rs - typed errors for the ingestion pipeline
//! ==============================================================================
//!
//! scope:
//!     each error belongs to one frame, one store call or one connection.
//!     the loops that see them log and carry on; only `main` turns anything
//!     into a process exit.
//!
//! ==============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// The payload could not be turned into text. The frame is dropped whole.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload is not valid utf-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing file could not be opened, read or written.
    #[error("record store {} unavailable: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record store {} has unexpected columns: {found}", path.display())]
    SchemaMismatch { path: PathBuf, found: String },

    #[error("record store csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unreadable row: {0}")]
    BadRow(String),
}

impl StoreError {
    pub(crate) fn unavailable(path: &Path, source: std::io::Error) -> Self {
        Self::Unavailable {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Failure while serving a single ingestion connection.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("peer sent nothing within {0:?}")]
    Idle(Duration),

    #[error("peer closed without sending a payload")]
    Empty,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
