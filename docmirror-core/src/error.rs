//! Error types shared across the core crate.
//!
//! Each persistent component owns its error enum; [`SyncError`] is what the
//! walker and document tasks surface to callers.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures reading or writing the revision cache file.
///
/// These never abort a sync: callers log them and carry on with an empty or
/// unsaved cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures reading or writing the per-directory sync session file.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed session file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("session serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid application configuration. Always fatal, raised before any traversal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid auth_type: {0}, must be 'basic' or 'bearer'")]
    InvalidAuthType(String),

    #[error("{fields} required for {auth_type} authentication")]
    MissingCredentials {
        auth_type: &'static str,
        fields: &'static str,
    },

    #[error("remote base_url must not be empty")]
    MissingBaseUrl,
}

/// Errors reported by the remote source and renderer collaborators.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("authentication or permission failure: {0}")]
    Auth(String),

    #[error("remote object not found: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Error surfaced from a tree walk or a single document task.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document task panicked or was aborted: {0}")]
    TaskFailed(String),
}

impl SyncError {
    pub fn write(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
