//! Mirroring of a single document: fetch, consult the revision cache, render,
//! download assets, write markdown, record the result.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{DownloadDecision, RevisionCache, SkipReason};
use crate::config::OutputConfig;
use crate::contract::{DocKind, RemoteSource, Renderer};
use crate::error::SyncError;

/// Per-run switches shared by every document task.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of documents fetched/rendered/written at once.
    pub concurrency: usize,
    /// Consult the revision cache before fetching.
    pub incremental: bool,
    /// Ignore the cache and re-download everything; the cache is still updated.
    pub force: bool,
    /// Also write the raw remote payload as `<token>.json`.
    pub dump: bool,
    pub output: OutputConfig,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: crate::session::DEFAULT_SYNC_CONCURRENCY,
            incremental: true,
            force: false,
            dump: false,
            output: OutputConfig::default(),
        }
    }
}

/// Everything a document task needs, cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct SyncContext {
    pub source: Arc<dyn RemoteSource>,
    pub renderer: Arc<dyn Renderer>,
    pub cache: Option<Arc<RevisionCache>>,
    pub options: SyncOptions,
    /// Mirror root; cache file names are recorded relative to it.
    pub root: PathBuf,
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("cache", &self.cache.as_ref().map(|c| c.path().to_path_buf()))
            .field("options", &self.options)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Downloaded { path: PathBuf },
    /// Cached revision matched and the file was on disk.
    Unchanged { title: String, reason: SkipReason },
    /// The file existed without a cache entry; only the mapping was recorded.
    Registered { title: String, reason: SkipReason },
}

/// Replace characters that are unsafe in file names and trim the result.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    replaced
        .trim_matches(|c: char| c == ' ' || c == '.')
        .to_owned()
}

/// `<title>.md` or `<token>.md`.
pub fn output_file_name(token: &str, title: &str, title_as_filename: bool) -> String {
    if title_as_filename {
        let sanitized = sanitize_file_name(title);
        if !sanitized.is_empty() {
            return format!("{sanitized}.md");
        }
    }
    format!("{token}.md")
}

fn relative_display(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// Mirror the document `token` into `output_dir`.
pub async fn sync_document(
    ctx: &SyncContext,
    token: &str,
    kind: DocKind,
    output_dir: &Path,
) -> Result<DocumentOutcome, SyncError> {
    let options = &ctx.options;
    let document = ctx.source.fetch_document(token).await?;
    debug!(token = %document.token, revision = document.revision, "[SYNC] Fetched document");

    let file_name = output_file_name(
        &document.token,
        &document.title,
        options.output.title_as_filename,
    );
    let output_path = output_dir.join(&file_name);
    let cache_name = relative_display(&ctx.root, &output_path);

    if let Some(cache) = ctx.cache.as_ref().filter(|_| options.incremental && !options.force) {
        if let DownloadDecision::Skip(reason) =
            cache.should_download(&document.token, document.revision, &output_path)
        {
            info!(title = %document.title, %reason, "[SYNC] Skipping document");
            return Ok(match reason {
                SkipReason::AlreadyPresent { .. } => {
                    cache.update_document(
                        &document.token,
                        document.revision,
                        &document.title,
                        &cache_name,
                        kind,
                    );
                    DocumentOutcome::Registered {
                        title: document.title,
                        reason,
                    }
                }
                SkipReason::Unmodified { .. } => DocumentOutcome::Unchanged {
                    title: document.title,
                    reason,
                },
            });
        }
    }

    let rendered = ctx.renderer.render(&document).await?;
    let mut markdown = rendered.markdown;

    if !options.output.skip_img_download {
        let asset_dir = output_dir.join(&options.output.image_dir);
        for asset in &rendered.assets {
            let local = ctx.renderer.download_asset(asset, &asset_dir).await?;
            let link = relative_display(output_dir, &local);
            markdown = markdown.replacen(asset.as_str(), &link, 1);
        }
    }

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| SyncError::write(output_dir, e))?;

    if options.dump {
        let dump_path = output_dir.join(format!("{}.json", document.token));
        let pretty = serde_json::to_string_pretty(&document.raw)
            .map_err(|e| SyncError::write(&dump_path, std::io::Error::other(e)))?;
        tokio::fs::write(&dump_path, pretty)
            .await
            .map_err(|e| SyncError::write(&dump_path, e))?;
        info!(path = %dump_path.display(), "[SYNC] Dumped raw document payload");
    }

    tokio::fs::write(&output_path, markdown)
        .await
        .map_err(|e| SyncError::write(&output_path, e))?;

    if let Some(cache) = &ctx.cache {
        cache.update_document(
            &document.token,
            document.revision,
            &document.title,
            &cache_name,
            kind,
        );
    }

    info!(
        path = %output_path.display(),
        revision = document.revision,
        "[SYNC] Downloaded document"
    );
    Ok(DocumentOutcome::Downloaded { path: output_path })
}
