/// # docmirror CLI interface
///
/// Command parsing and orchestration for the `docmirror` binary. The sync
/// engine (cache, filter, session, walker) lives in `docmirror-core`; this
/// module loads configuration, builds the Confluence client and wires the
/// pieces together.
///
/// ## Commands
/// - `config`: create or update the application config file.
/// - `download`: mirror one page, a folder (`--batch`) or a wiki space (`--wiki`).
/// - `sync`: mirror a folder or wiki space incrementally, with include/exclude
///   filters, remembering its settings in the output directory.
///
/// For programmatic and integration use, call [`run`] with a constructed [`Cli`].
use crate::confluence::ConfluenceClient;
use crate::load_config::{
    inject_env_secrets, load_config, read_config, resolve_config_path, write_config, CliConfig,
};
use crate::source::{detect_source_kind, SourceRef};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use docmirror_core::cache::RevisionCache;
use docmirror_core::config::AppConfig;
use docmirror_core::contract::DocKind;
use docmirror_core::document::{sync_document, DocumentOutcome, SyncContext, SyncOptions};
use docmirror_core::filter::{parse_patterns, FilterSpec, NameFilter};
use docmirror_core::session::{session_path, SyncSession};
use docmirror_core::walker::{SyncReport, TreeWalker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Concurrency of `download --batch` and `download --wiki`.
pub const DOWNLOAD_CONCURRENCY: usize = 10;

/// CLI for docmirror: mirror Confluence content into local markdown.
#[derive(Parser)]
#[clap(
    name = "docmirror",
    version,
    about = "Mirror Confluence pages, folders and wiki spaces into local markdown"
)]
pub struct Cli {
    /// Path to the YAML config file (defaults to the user config directory)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update the application config
    Config(ConfigArgs),
    /// Download a page, a folder or a wiki space
    Download(DownloadArgs),
    /// Incrementally mirror a folder or wiki space
    Sync(SyncArgs),
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    #[clap(long)]
    pub base_url: Option<String>,
    /// `basic` (email + API token) or `bearer` (access token)
    #[clap(long)]
    pub auth_type: Option<String>,
    #[clap(long)]
    pub email: Option<String>,
    #[clap(long)]
    pub api_token: Option<String>,
    #[clap(long)]
    pub access_token: Option<String>,
    #[clap(long)]
    pub image_dir: Option<String>,
    #[clap(long)]
    pub title_as_filename: Option<bool>,
    #[clap(long)]
    pub skip_img_download: Option<bool>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Page, folder or wiki space URL
    pub url: String,
    #[clap(short, long, default_value = ".")]
    pub output: PathBuf,
    /// Download every page of a folder
    #[clap(long, conflicts_with = "wiki")]
    pub batch: bool,
    /// Download every page of a wiki space
    #[clap(long)]
    pub wiki: bool,
    /// Skip pages whose revision has not changed
    #[clap(long)]
    pub incremental: bool,
    /// Re-download everything and refresh the cache
    #[clap(long)]
    pub force: bool,
    /// Also write the raw API response next to each page
    #[clap(long)]
    pub dump: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Folder or wiki space URL; omitted to resume the session in the output directory
    pub url: Option<String>,
    #[clap(short, long, default_value = ".")]
    pub output: PathBuf,
    /// Comma separated globs; only matching directories are mirrored
    #[clap(long, default_value = "")]
    pub include: String,
    /// Comma separated globs; matching directories are skipped
    #[clap(long, default_value = "")]
    pub exclude: String,
    /// Documents processed in parallel (0 keeps the session value)
    #[clap(short = 'j', long, default_value_t = 0)]
    pub concurrency: usize,
    #[clap(long)]
    pub force: bool,
    /// Ignore the revision cache when deciding what to download
    #[clap(long)]
    pub no_incremental: bool,
    #[clap(long)]
    pub dump: bool,
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Config(args) => handle_config(cli.config, args),
        Commands::Download(args) => handle_download(cli.config, args).await,
        Commands::Sync(args) => handle_sync(cli.config, args).await,
    }
}

/// Copy of `config` safe to print.
fn redacted(config: &AppConfig) -> AppConfig {
    let mut shown = config.clone();
    for secret in [
        &mut shown.remote.api_token,
        &mut shown.remote.access_token,
    ] {
        if !secret.is_empty() {
            *secret = "********".to_owned();
        }
    }
    shown
}

/// Apply the given flags; returns whether anything was set.
fn apply_config_args(config: &mut AppConfig, args: ConfigArgs) -> bool {
    let mut changed = false;
    let mut set = |field: &mut String, value: Option<String>| {
        if let Some(v) = value {
            *field = v;
            changed = true;
        }
    };
    set(&mut config.remote.base_url, args.base_url);
    set(&mut config.remote.auth_type, args.auth_type);
    set(&mut config.remote.email, args.email);
    set(&mut config.remote.api_token, args.api_token);
    set(&mut config.remote.access_token, args.access_token);
    set(&mut config.output.image_dir, args.image_dir);

    if let Some(v) = args.title_as_filename {
        config.output.title_as_filename = v;
        changed = true;
    }
    if let Some(v) = args.skip_img_download {
        config.output.skip_img_download = v;
        changed = true;
    }
    changed
}

fn handle_config(config_path: Option<PathBuf>, args: ConfigArgs) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    println!("Configuration file: {}", path.display());

    let exists = path.exists();
    let mut config = if exists {
        read_config(&path)?
    } else {
        AppConfig::new(String::new())
    };
    let changed = apply_config_args(&mut config, args);

    // Secrets may legitimately live in the environment only.
    let mut effective = config.clone();
    inject_env_secrets(&mut effective);
    effective.remote.validate()?;
    config.remote.auth_type = effective.remote.auth_type;

    if !exists || changed {
        write_config(&path, &config)?;
    }
    let yaml = serde_yaml::to_string(&redacted(&config))?;
    println!("{yaml}");
    Ok(())
}

fn confluence_client(config: &CliConfig) -> Result<Arc<ConfluenceClient>> {
    let client = ConfluenceClient::new(&config.app.remote.base_url, config.credentials.clone())?;
    Ok(Arc::new(client))
}

fn build_context(
    client: Arc<ConfluenceClient>,
    cache: Option<Arc<RevisionCache>>,
    options: SyncOptions,
    root: &Path,
) -> SyncContext {
    SyncContext {
        source: client.clone(),
        renderer: client,
        cache,
        options,
        root: root.to_path_buf(),
    }
}

/// Persist the cache, logging instead of failing.
fn save_cache(cache: &RevisionCache) {
    match cache.save() {
        Ok(true) => info!(path = %cache.path().display(), "[CACHE] Cache updated"),
        Ok(false) => info!("[CACHE] Cache unchanged"),
        Err(e) => warn!(error = %e, "[CACHE] Failed to save cache"),
    }
}

fn print_report(report: &SyncReport) {
    println!(
        "Downloaded {}, unchanged {}, registered {}, skipped {} folder(s) and {} document(s)",
        report.downloaded.len(),
        report.unchanged,
        report.registered,
        report.skipped_folders.len(),
        report.skipped_documents
    );
}

async fn handle_download(config_path: Option<PathBuf>, args: DownloadArgs) -> Result<()> {
    let config = load_config(resolve_config_path(config_path)?)?;
    let source = SourceRef::parse(&args.url)?;
    let client = confluence_client(&config)?;

    let cache = (args.incremental || args.force)
        .then(|| Arc::new(RevisionCache::open(&args.output)));
    if args.force {
        info!("Force mode: every page is downloaded again and the cache refreshed");
    } else if args.incremental {
        info!("Incremental mode: unchanged pages are skipped");
    }

    let options = SyncOptions {
        concurrency: DOWNLOAD_CONCURRENCY,
        incremental: args.incremental,
        force: args.force,
        dump: args.dump,
        output: config.app.output.clone(),
    };
    let ctx = build_context(client, cache.clone(), options, &args.output);
    let walker = || TreeWalker::new(ctx.clone(), NameFilter::new(FilterSpec::default()));

    let result = match (&source, args.batch, args.wiki) {
        (SourceRef::Folder { token }, true, _) => {
            walker().sync_folder(token).await.map(|r| print_report(&r))
        }
        (SourceRef::Wiki { space }, _, true) => {
            walker().sync_wiki(space).await.map(|r| print_report(&r))
        }
        (SourceRef::Document { token }, false, false) => {
            sync_document(&ctx, token, DocKind::Document, &args.output)
                .await
                .map(|outcome| match outcome {
                    DocumentOutcome::Downloaded { path } => {
                        println!("Downloaded {}", path.display())
                    }
                    DocumentOutcome::Unchanged { title, reason }
                    | DocumentOutcome::Registered { title, reason } => {
                        println!("Skipped {title}: {reason}")
                    }
                })
        }
        (SourceRef::Folder { .. }, false, _) => {
            bail!("{} is a folder URL, pass --batch", args.url)
        }
        (SourceRef::Wiki { .. }, _, false) => {
            bail!("{} is a wiki space URL, pass --wiki", args.url)
        }
        _ => bail!("{} is a page URL, drop --batch/--wiki", args.url),
    };

    if let Some(cache) = &cache {
        save_cache(cache);
    }
    result.with_context(|| format!("Download of {} failed", args.url))
}

async fn handle_sync(config_path: Option<PathBuf>, args: SyncArgs) -> Result<()> {
    let config = load_config(resolve_config_path(config_path)?)?;

    let existing = SyncSession::load(&args.output).unwrap_or_else(|e| {
        warn!(error = %e, "[SESSION] Failed to load sync session");
        None
    });

    let url = match (&args.url, &existing) {
        (Some(url), _) => url.clone(),
        (None, Some(session)) if !session.source_url.is_empty() => {
            println!("Resuming saved sync session: {}", session.source_url);
            session.source_url.clone()
        }
        _ => bail!(
            "no URL given and no sync session in {}; pass a folder or wiki space URL",
            args.output.display()
        ),
    };

    let kind = detect_source_kind(&url)?;
    info!(source_type = %kind, url = %url, "[SYNC] Detected source type");

    let mut session = match existing {
        Some(mut session) => {
            session.source_url = url.clone();
            session.source_type = kind;
            session
        }
        None => SyncSession::new(url.clone(), kind),
    };
    session.update(
        parse_patterns(&args.include),
        parse_patterns(&args.exclude),
        args.concurrency,
    );

    // CLI patterns already replaced the stored ones in `update`.
    let spec = session.filter_spec();
    if !spec.is_empty() {
        info!(
            include = ?spec.include,
            exclude = ?spec.exclude,
            "[FILTER] Directory filter enabled"
        );
    }
    let concurrency = if args.concurrency > 0 {
        args.concurrency
    } else {
        session.concurrency
    };
    info!(concurrency, "[SYNC] Concurrency");

    let cache = Arc::new(RevisionCache::open(&args.output));
    let options = SyncOptions {
        concurrency,
        incremental: !args.no_incremental,
        force: args.force,
        dump: args.dump,
        output: config.app.output.clone(),
    };
    let client = confluence_client(&config)?;
    let ctx = build_context(client, Some(cache.clone()), options, &args.output);
    let walker = TreeWalker::new(ctx, NameFilter::new(spec));

    let result = match SourceRef::parse(&url)? {
        SourceRef::Folder { token } => walker.sync_folder(&token).await,
        SourceRef::Wiki { space } => walker.sync_wiki(&space).await,
        SourceRef::Document { .. } => return Err(anyhow!("cannot sync a single page: {url}")),
    };

    save_cache(&cache);

    match result {
        Ok(report) => {
            match session.save(&args.output) {
                Ok(path) => info!(path = %path.display(), "[SESSION] Sync session saved"),
                Err(e) => warn!(
                    error = %e,
                    path = %session_path(&args.output).display(),
                    "[SESSION] Failed to save sync session"
                ),
            }
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!(command = "sync", error = %e, "Synchronisation failed");
            Err(anyhow::Error::new(e).context(format!("Sync of {url} failed")))
        }
    }
}
