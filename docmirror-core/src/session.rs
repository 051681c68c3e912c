//! Persisted description of a sync job, stored next to the mirrored files so a
//! bare re-run in the same output directory resumes it.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SessionError;
use crate::filter::FilterSpec;
use crate::persist::write_atomic;

pub const SESSION_FILE_NAME: &str = ".docmirror.sync.json";
pub const SESSION_VERSION: &str = "1.0";
pub const DEFAULT_SYNC_CONCURRENCY: usize = 5;

/// Shape of the remote tree being mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Folder,
    Wiki,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Folder => f.write_str("folder"),
            SourceKind::Wiki => f.write_str("wiki"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "folder" => Ok(SourceKind::Folder),
            "wiki" => Ok(SourceKind::Wiki),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

pub fn session_path(output_dir: impl AsRef<Path>) -> PathBuf {
    output_dir.as_ref().join(SESSION_FILE_NAME)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub version: String,
    pub source_url: String,
    pub source_type: SourceKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    pub concurrency: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncSession {
    pub fn new(source_url: impl Into<String>, source_type: SourceKind) -> Self {
        Self {
            version: SESSION_VERSION.to_owned(),
            source_url: source_url.into(),
            source_type,
            include: Vec::new(),
            exclude: Vec::new(),
            concurrency: DEFAULT_SYNC_CONCURRENCY,
            last_sync: None,
        }
    }

    /// Load the session stored in `output_dir`; `Ok(None)` when there is none.
    pub fn load(output_dir: impl AsRef<Path>) -> Result<Option<Self>, SessionError> {
        let path = session_path(output_dir);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SessionError::Io { path, source }),
        };
        let session =
            serde_json::from_slice(&data).map_err(|source| SessionError::Parse { path, source })?;
        Ok(Some(session))
    }

    /// Merge options over the stored ones. Empty lists and a zero concurrency
    /// keep the previous values.
    pub fn update(&mut self, include: Vec<String>, exclude: Vec<String>, concurrency: usize) {
        if !include.is_empty() {
            self.include = include;
        }
        if !exclude.is_empty() {
            self.exclude = exclude;
        }
        if concurrency > 0 {
            self.concurrency = concurrency;
        }
    }

    pub fn filter_spec(&self) -> FilterSpec {
        FilterSpec::new(self.include.clone(), self.exclude.clone())
    }

    /// Stamp `last_sync` and write the session into `output_dir`.
    pub fn save(&mut self, output_dir: impl AsRef<Path>) -> Result<PathBuf, SessionError> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir).map_err(|source| SessionError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;

        self.last_sync = Some(Utc::now());
        let path = session_path(output_dir);
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(&path, &data).map_err(|source| SessionError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "[SESSION] Saved sync session");
        Ok(path)
    }
}
