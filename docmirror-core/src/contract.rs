//! # contract: the boundary between the sync engine and the outside world
//!
//! The engine never speaks a wire protocol itself. Listing a remote tree,
//! fetching a document and turning it into markdown are delegated to two traits:
//!
//! - [`RemoteSource`]: lists folder children (flat, by folder token), children
//!   nested under a document of a folder tree, wiki children (by optional parent
//!   node token) and fetches a single document together with its revision.
//! - [`Renderer`]: converts a fetched document into markdown and downloads the
//!   assets it references.
//!
//! ## Mocking & Testing
//! Both traits are annotated for `mockall`, so tests get `MockRemoteSource` and
//! `MockRenderer` (exported under the `test-export-mocks` feature).
//!
//! ## Error Handling
//! Implementors map transport, permission and decoding failures onto
//! [`RemoteError`]. The engine does not retry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Kind of a node in the remote tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    Document,
    /// Anything the engine does not mirror (sheets, whiteboards, ...).
    Other(String),
}

/// A child entry as returned by a listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub token: String,
    pub name: String,
    /// Documents can be containers at the same time, in wikis and in folder trees.
    pub has_children: bool,
    pub kind: NodeKind,
}

impl RemoteNode {
    pub fn is_container(&self) -> bool {
        self.kind == NodeKind::Folder || self.has_children
    }

    pub fn is_document(&self) -> bool {
        self.kind == NodeKind::Document
    }
}

/// How a document was reached; recorded in the cache as `doc_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocKind {
    Document,
    WikiLeaf,
}

impl DocKind {
    /// Lenient mapping used when reading older cache files.
    pub fn from_legacy(raw: &str) -> Self {
        match raw {
            "wiki" | "wiki-leaf" | "wiki_leaf" => DocKind::WikiLeaf,
            _ => DocKind::Document,
        }
    }
}

/// A fetched document: identity, revision and the content handle the renderer consumes.
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    pub token: String,
    pub title: String,
    pub revision: i64,
    /// Source representation of the body (storage format, block JSON, ...).
    pub body: String,
    /// Raw remote payload, written next to the markdown in dump mode.
    pub raw: serde_json::Value,
}

/// Markdown produced by a [`Renderer`] plus the asset references embedded in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedDocument {
    pub markdown: String,
    /// Each reference appears verbatim in `markdown` and is replaced by the
    /// local path once the asset is downloaded.
    pub assets: Vec<String>,
}

/// Lists and fetches nodes of the remote tree.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// All children of a drive-style folder.
    async fn list_folder(&self, folder_token: &str) -> Result<Vec<RemoteNode>, RemoteError>;

    /// Children of a folder-tree document whose node reported `has_children`.
    async fn list_document_children(
        &self,
        document_token: &str,
    ) -> Result<Vec<RemoteNode>, RemoteError>;

    /// Display name of a wiki space; used as the root directory of a wiki mirror.
    async fn wiki_space_name(&self, space_id: &str) -> Result<String, RemoteError>;

    /// Children of a wiki node, or the top-level nodes when `parent_token` is `None`.
    async fn list_wiki_nodes(
        &self,
        space_id: &str,
        parent_token: Option<String>,
    ) -> Result<Vec<RemoteNode>, RemoteError>;

    /// Fetch a document and its current revision.
    async fn fetch_document(&self, token: &str) -> Result<RemoteDocument, RemoteError>;
}

/// Turns fetched documents into markdown.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, document: &RemoteDocument) -> Result<RenderedDocument, RemoteError>;

    /// Download one asset into `dest_dir`, returning the link to put in the markdown.
    async fn download_asset(&self, asset: &str, dest_dir: &Path) -> Result<PathBuf, RemoteError>;
}
