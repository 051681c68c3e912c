#![doc = "docmirror-core: core logic library for docmirror."]

//! This crate holds the sync engine: the revision cache, the include/exclude
//! name filter, the persisted sync session and the bounded-concurrency tree
//! walker. It contains no network code; the remote service is reached through
//! the traits in [`contract`].
//!
//! # Usage
//! Build a [`document::SyncContext`] around a `RemoteSource` and `Renderer`
//! implementation, then hand it to a [`walker::TreeWalker`].

pub mod cache;
pub mod config;
pub mod contract;
pub mod document;
pub mod error;
pub mod filter;
pub mod persist;
pub mod session;
pub mod walker;

pub use cache::RevisionCache;
pub use filter::{FilterSpec, NameFilter};
pub use session::{SourceKind, SyncSession};
pub use walker::{SyncReport, TreeWalker};
