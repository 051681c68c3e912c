//! # cache: persistent revision cache for incremental downloads
//!
//! One hidden JSON file per output directory maps a document token to the
//! revision that was last written locally, the output file and when it was
//! fetched. The cache never stores document content.
//!
//! ## Lifecycle
//! - [`RevisionCache::open`] loads the file at session start. A missing file is
//!   an empty cache; an unreadable or malformed file degrades to an empty cache
//!   with a warning instead of blocking the run.
//! - Worker tasks query [`RevisionCache::should_download`] and record results
//!   with [`RevisionCache::update_document`] concurrently; all access goes
//!   through one reader/writer lock.
//! - [`RevisionCache::save`] runs once at the end of the session and only
//!   writes when something changed. The write is a temp-file + rename, so an
//!   interrupted save leaves the previous file intact.
//!
//! ## Schema versions
//! Files are parsed into [`StoredCache`], a union of the current schema and a
//! lenient legacy schema, and [`migrate`] maps either onto the current one. A
//! migrated cache is marked dirty so the next save rewrites it.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contract::DocKind;
use crate::error::CacheError;
use crate::persist::write_atomic;

/// Current on-disk format version.
pub const CACHE_VERSION: &str = "1.0";

/// Name of the cache file inside an output directory.
pub const CACHE_FILE_NAME: &str = ".docmirror.cache.json";

/// What the cache knows about one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "revision_id")]
    pub revision: i64,
    pub title: String,
    /// Output path relative to the mirror root.
    pub file_name: String,
    pub last_download: DateTime<Utc>,
    pub doc_type: DocKind,
}

/// Current schema of the cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub documents: BTreeMap<String, CacheEntry>,
}

impl CacheFile {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: CACHE_VERSION.to_owned(),
            updated_at: now,
            documents: BTreeMap::new(),
        }
    }
}

/// Entry shape accepted from files written by other format versions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyCacheEntry {
    #[serde(default)]
    pub revision_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub last_download: Option<DateTime<Utc>>,
    #[serde(default)]
    pub doc_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyCacheFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub documents: BTreeMap<String, LegacyCacheEntry>,
}

/// A parsed cache file in whichever schema it was written.
#[derive(Debug, Clone)]
pub enum StoredCache {
    Current(CacheFile),
    Legacy(LegacyCacheFile),
}

impl StoredCache {
    /// Dispatch on the `version` field, then parse with the matching schema.
    pub fn parse(data: &[u8]) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct VersionProbe {
            #[serde(default)]
            version: Option<String>,
        }

        let probe: VersionProbe = serde_json::from_slice(data)?;
        match probe.version.as_deref() {
            Some(CACHE_VERSION) => Ok(StoredCache::Current(serde_json::from_slice(data)?)),
            _ => Ok(StoredCache::Legacy(serde_json::from_slice(data)?)),
        }
    }
}

/// Map a stored cache onto the current schema.
///
/// Returns the migrated file and whether anything had to change.
pub fn migrate(stored: StoredCache, now: DateTime<Utc>) -> (CacheFile, bool) {
    match stored {
        StoredCache::Current(file) => (file, false),
        StoredCache::Legacy(legacy) => {
            let documents = legacy
                .documents
                .into_iter()
                .map(|(token, entry)| {
                    let migrated = CacheEntry {
                        revision: entry.revision_id,
                        title: entry.title,
                        file_name: entry.file_name,
                        last_download: entry.last_download.unwrap_or(now),
                        doc_type: DocKind::from_legacy(&entry.doc_type),
                    };
                    (token, migrated)
                })
                .collect();
            let file = CacheFile {
                version: CACHE_VERSION.to_owned(),
                updated_at: legacy.updated_at.unwrap_or(now),
                documents,
            };
            (file, true)
        }
    }
}

/// Why a document does not need to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not in the cache but the output file already exists; the caller should
    /// still register the mapping.
    AlreadyPresent { revision: i64 },
    /// Cached revision matches and the output file is on disk.
    Unmodified { revision: i64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyPresent { revision } => {
                write!(f, "already present, registering mapping (revision {revision})")
            }
            SkipReason::Unmodified { revision } => write!(f, "unmodified (revision {revision})"),
        }
    }
}

/// Outcome of [`RevisionCache::should_download`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadDecision {
    Proceed,
    Skip(SkipReason),
}

impl DownloadDecision {
    pub fn proceed(&self) -> bool {
        matches!(self, DownloadDecision::Proceed)
    }
}

/// Summary returned by [`RevisionCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub documents: usize,
    /// `None` when the cache is empty.
    pub oldest_download: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CacheState {
    file: CacheFile,
    dirty: bool,
}

/// Thread-safe revision cache bound to one output directory.
#[derive(Debug)]
pub struct RevisionCache {
    path: PathBuf,
    state: RwLock<CacheState>,
}

impl RevisionCache {
    /// An empty cache that will persist into `output_dir`. Nothing is read.
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            path: output_dir.as_ref().join(CACHE_FILE_NAME),
            state: RwLock::new(CacheState {
                file: CacheFile::empty(Utc::now()),
                dirty: false,
            }),
        }
    }

    /// Create the cache for `output_dir` and load whatever is on disk.
    ///
    /// Load failures are logged and leave an empty cache.
    pub fn open(output_dir: impl AsRef<Path>) -> Self {
        let cache = Self::new(output_dir);
        if let Err(e) = cache.load() {
            warn!(
                error = %e,
                path = %cache.path.display(),
                "[CACHE] Failed to load cache, starting empty"
            );
        }
        cache
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cache file.
    ///
    /// A missing file is not an error. Malformed content resets the cache to
    /// empty and is not an error either. Other IO failures are returned, the
    /// in-memory state is left untouched.
    pub fn load(&self) -> Result<(), CacheError> {
        let mut state = self.state.write();

        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "[CACHE] No cache file yet");
                return Ok(());
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let now = Utc::now();
        match StoredCache::parse(&data) {
            Ok(stored) => {
                let (file, migrated) = migrate(stored, now);
                if migrated {
                    info!(
                        path = %self.path.display(),
                        "[CACHE] Upgraded cache file to current format"
                    );
                }
                debug!(documents = file.documents.len(), "[CACHE] Loaded cache");
                state.file = file;
                state.dirty = migrated;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.path.display(),
                    "[CACHE] Malformed cache file, discarding"
                );
                state.file = CacheFile::empty(now);
                state.dirty = false;
            }
        }
        Ok(())
    }

    /// Decide whether `identity` at `remote_revision` must be fetched again.
    ///
    /// `local_path` is where the output file would be written.
    pub fn should_download(
        &self,
        identity: &str,
        remote_revision: i64,
        local_path: &Path,
    ) -> DownloadDecision {
        let state = self.state.read();
        let on_disk = local_path.exists();

        match state.file.documents.get(identity) {
            None if on_disk => DownloadDecision::Skip(SkipReason::AlreadyPresent {
                revision: remote_revision,
            }),
            None => DownloadDecision::Proceed,
            Some(entry) if entry.revision != remote_revision => DownloadDecision::Proceed,
            Some(_) if !on_disk => DownloadDecision::Proceed,
            Some(_) => DownloadDecision::Skip(SkipReason::Unmodified {
                revision: remote_revision,
            }),
        }
    }

    /// Insert or replace the entry for `identity`, stamped with the current time.
    pub fn update_document(
        &self,
        identity: &str,
        revision: i64,
        title: &str,
        file_name: &str,
        kind: DocKind,
    ) {
        let mut state = self.state.write();
        let entry = CacheEntry {
            revision,
            title: title.to_owned(),
            file_name: file_name.to_owned(),
            last_download: Utc::now(),
            doc_type: kind,
        };
        state.file.documents.insert(identity.to_owned(), entry);
        state.dirty = true;
    }

    pub fn get(&self, identity: &str) -> Option<CacheEntry> {
        self.state.read().file.documents.get(identity).cloned()
    }

    /// Drop the entry for `identity`. Returns the removed entry, if any.
    pub fn remove_document(&self, identity: &str) -> Option<CacheEntry> {
        let mut state = self.state.write();
        let removed = state.file.documents.remove(identity);
        if removed.is_some() {
            state.dirty = true;
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            documents: state.file.documents.len(),
            oldest_download: state
                .file
                .documents
                .values()
                .map(|e| e.last_download)
                .min(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().file.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Persist the cache if it changed since the last load or save.
    ///
    /// Returns `Ok(false)` when there was nothing to write.
    pub fn save(&self) -> Result<bool, CacheError> {
        let mut state = self.state.write();
        if !state.dirty {
            return Ok(false);
        }

        state.file.updated_at = Utc::now();
        let data = serde_json::to_vec_pretty(&state.file)?;
        write_atomic(&self.path, &data).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })?;

        state.dirty = false;
        info!(
            path = %self.path.display(),
            documents = state.file.documents.len(),
            "[CACHE] Saved cache"
        );
        Ok(true)
    }
}
