//! # walker: bounded-concurrency mirror of a remote tree
//!
//! [`TreeWalker`] descends the remote tree serially, asking the [`NameFilter`]
//! before entering a directory and before dispatching a document. Each admitted
//! document becomes a tokio task running [`sync_document`]; a semaphore sized to
//! the configured concurrency caps how many are in flight, and the walk itself
//! waits for a free slot before launching the next one.
//!
//! Two traversal shapes share the filtering and dispatch logic:
//! - folder: children listed by folder token, sub-folders recursed by token. A
//!   document reporting children gets a directory of its own for them, the
//!   same way a wiki node does;
//! - wiki: children listed by optional parent node token; a node with children
//!   is recursed with its own token as the new parent, and may itself be a
//!   document stored in the current directory.
//!
//! ## Concurrency & Errors
//! - The filter is owned by the walker and only touched from the walk path.
//! - Tasks share the revision cache through its internal lock.
//! - Every dispatched task is joined before a walk returns, including when a
//!   listing call fails part-way. In-flight siblings are never cancelled.
//! - Finished tasks are reaped while dispatching, so the join set only holds
//!   what is still running.
//! - The first error (walk error first, then task errors in completion order)
//!   is returned; the rest are logged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::contract::{DocKind, NodeKind, RemoteNode};
use crate::document::{sanitize_file_name, sync_document, DocumentOutcome, SyncContext};
use crate::error::{RemoteError, SyncError};
use crate::filter::NameFilter;

/// Aggregated outcome of a walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: Vec<PathBuf>,
    pub unchanged: usize,
    pub registered: usize,
    pub skipped_folders: Vec<String>,
    pub skipped_documents: usize,
    pub failed: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: DocumentOutcome) {
        match outcome {
            DocumentOutcome::Downloaded { path } => self.downloaded.push(path),
            DocumentOutcome::Unchanged { .. } => self.unchanged += 1,
            DocumentOutcome::Registered { .. } => self.registered += 1,
        }
    }
}

type TaskOutput = (String, Result<DocumentOutcome, SyncError>);

/// What a folder-shape listing call is made for.
enum Listing {
    Folder(String),
    Document(String),
}

fn dir_key(dir: &Path) -> String {
    dir.to_string_lossy().into_owned()
}

/// Local directory name for a remote container.
fn local_dir_name(node: &RemoteNode) -> String {
    let name = sanitize_file_name(&node.name);
    if name.is_empty() {
        node.token.clone()
    } else {
        name
    }
}

pub struct TreeWalker {
    ctx: SyncContext,
    filter: NameFilter,
    slots: Arc<Semaphore>,
    tasks: JoinSet<TaskOutput>,
    report: SyncReport,
    task_error: Option<SyncError>,
}

impl TreeWalker {
    pub fn new(ctx: SyncContext, filter: NameFilter) -> Self {
        let permits = ctx.options.concurrency.max(1);
        Self {
            ctx,
            filter,
            slots: Arc::new(Semaphore::new(permits)),
            tasks: JoinSet::new(),
            report: SyncReport::default(),
            task_error: None,
        }
    }

    /// Mirror a drive-style folder into the context root.
    pub async fn sync_folder(mut self, folder_token: &str) -> Result<SyncReport, SyncError> {
        info!(
            folder = %folder_token,
            root = %self.ctx.root.display(),
            "[SYNC] Starting folder walk"
        );
        let root = self.ctx.root.clone();
        let walked = self
            .walk_folder(root, Listing::Folder(folder_token.to_owned()))
            .await;
        self.finish(walked).await
    }

    /// Mirror a wiki space into `<root>/<space name>`.
    pub async fn sync_wiki(mut self, space_id: &str) -> Result<SyncReport, SyncError> {
        let space_name = self.ctx.source.wiki_space_name(space_id).await?;
        let space_dir = sanitize_file_name(&space_name);
        if space_dir.is_empty() {
            return Err(RemoteError::InvalidResponse(format!(
                "wiki space {space_id} has no usable name"
            ))
            .into());
        }
        let root = self.ctx.root.join(space_dir);
        info!(space = %space_id, root = %root.display(), "[SYNC] Starting wiki walk");
        let walked = self.walk_wiki(root, space_id.to_owned(), None).await;
        self.finish(walked).await
    }

    fn walk_folder(
        &mut self,
        dir: PathBuf,
        listing: Listing,
    ) -> BoxFuture<'_, Result<(), SyncError>> {
        async move {
            let children = match &listing {
                Listing::Folder(token) => self.ctx.source.list_folder(token).await?,
                Listing::Document(token) => {
                    self.ctx.source.list_document_children(token).await?
                }
            };
            let key = dir_key(&dir);
            debug!(dir = %key, children = children.len(), "[SYNC] Listed folder");

            for child in children {
                match child.kind {
                    NodeKind::Folder => {
                        let name = local_dir_name(&child);
                        if self.admit_folder(&key, &name) {
                            self.walk_folder(dir.join(&name), Listing::Folder(child.token))
                                .await?;
                        }
                    }
                    NodeKind::Document => {
                        if child.has_children {
                            let name = local_dir_name(&child);
                            if !self.admit_folder(&key, &name) {
                                continue;
                            }
                            let nested = Listing::Document(child.token.clone());
                            self.walk_folder(dir.join(&name), nested).await?;
                        }
                        self.dispatch_document(&dir, &key, child.token, DocKind::Document)
                            .await?;
                    }
                    NodeKind::Other(ref other) => {
                        debug!(
                            name = %child.name,
                            kind = %other,
                            "[SYNC] Ignoring unsupported node"
                        );
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn walk_wiki(
        &mut self,
        dir: PathBuf,
        space_id: String,
        parent: Option<String>,
    ) -> BoxFuture<'_, Result<(), SyncError>> {
        async move {
            let nodes = self.ctx.source.list_wiki_nodes(&space_id, parent).await?;
            let key = dir_key(&dir);
            debug!(dir = %key, nodes = nodes.len(), "[SYNC] Listed wiki nodes");

            for node in nodes {
                if node.is_container() {
                    let name = local_dir_name(&node);
                    if !self.admit_folder(&key, &name) {
                        continue;
                    }
                    self.walk_wiki(dir.join(&name), space_id.clone(), Some(node.token.clone()))
                        .await?;
                }
                if node.is_document() {
                    self.dispatch_document(&dir, &key, node.token, DocKind::WikiLeaf)
                        .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn admit_folder(&mut self, parent_key: &str, name: &str) -> bool {
        let decision = self.filter.should_include_node(parent_key, name);
        if decision.is_included() {
            return true;
        }
        let path = crate::filter::join_path(parent_key, name);
        if decision.skipped_by_ancestor() {
            info!(path = %path, "[SYNC] Skipping folder, ancestor excluded");
        } else {
            info!(path = %path, "[SYNC] Skipping folder");
        }
        self.report.skipped_folders.push(path);
        false
    }

    async fn dispatch_document(
        &mut self,
        dir: &Path,
        key: &str,
        token: String,
        kind: DocKind,
    ) -> Result<(), SyncError> {
        if !self.filter.should_download_document(key) {
            debug!(dir = %key, token = %token, "[SYNC] Document filtered out by its folder");
            self.report.skipped_documents += 1;
            return Ok(());
        }

        self.reap_finished();

        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| SyncError::TaskFailed(e.to_string()))?;

        let ctx = self.ctx.clone();
        let dir = dir.to_path_buf();
        self.tasks.spawn(async move {
            let result = sync_document(&ctx, &token, kind, &dir).await;
            drop(permit);
            (token, result)
        });
        Ok(())
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.absorb(joined);
        }
    }

    /// Fold one joined task into the report, keeping the first task error.
    fn absorb(&mut self, joined: Result<TaskOutput, JoinError>) {
        match joined {
            Ok((_, Ok(outcome))) => self.report.record(outcome),
            Ok((token, Err(e))) => {
                error!(token = %token, error = %e, "[SYNC] Document failed");
                self.report.failed += 1;
                self.task_error.get_or_insert(e);
            }
            Err(e) => {
                error!(error = %e, "[SYNC] Document task did not complete");
                self.report.failed += 1;
                self.task_error
                    .get_or_insert(SyncError::TaskFailed(e.to_string()));
            }
        }
    }

    /// Join every outstanding task and fold the results into the report.
    async fn finish(mut self, walked: Result<(), SyncError>) -> Result<SyncReport, SyncError> {
        let walk_error = walked.err();
        if let Some(e) = &walk_error {
            error!(
                error = %e,
                outstanding = self.tasks.len(),
                "[SYNC] Walk failed, waiting for dispatched documents"
            );
        }

        while let Some(joined) = self.tasks.join_next().await {
            self.absorb(joined);
        }

        info!(
            downloaded = self.report.downloaded.len(),
            unchanged = self.report.unchanged,
            registered = self.report.registered,
            skipped_folders = self.report.skipped_folders.len(),
            skipped_documents = self.report.skipped_documents,
            failed = self.report.failed,
            "[SYNC] Walk complete"
        );

        match walk_error.or(self.task_error.take()) {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }
}
