//! Recognises Confluence URLs and maps them to what the sync engine mirrors.

use anyhow::{anyhow, bail, Result};
use docmirror_core::session::SourceKind;
use regex::Regex;

/// A remote object addressed by a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// Whole space, mirrored through its page tree.
    Wiki { space: String },
    Folder { token: String },
    /// A single page.
    Document { token: String },
}

const SPACE_PATTERN: &str = r"^https?://[^/]+(?:/wiki)?/spaces/([^/?#]+)";

impl SourceRef {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let space = Regex::new(SPACE_PATTERN)?;
        let caps = space
            .captures(url)
            .ok_or_else(|| anyhow!("unsupported URL: {url}"))?;
        let key = caps[1].to_owned();
        let rest = url[caps[0].len()..]
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');

        let folder = Regex::new(r"^/folder/(\d+)$")?;
        let page = Regex::new(r"^/pages/(\d+)(?:/.*)?$")?;

        if rest.is_empty() || rest == "/overview" {
            Ok(SourceRef::Wiki { space: key })
        } else if let Some(c) = folder.captures(rest) {
            Ok(SourceRef::Folder {
                token: c[1].to_owned(),
            })
        } else if let Some(c) = page.captures(rest) {
            Ok(SourceRef::Document {
                token: c[1].to_owned(),
            })
        } else {
            bail!("unsupported URL: {url}")
        }
    }
}

/// Source type for `sync`. Single pages cannot be synced.
pub fn detect_source_kind(url: &str) -> Result<SourceKind> {
    match SourceRef::parse(url)? {
        SourceRef::Wiki { .. } => Ok(SourceKind::Wiki),
        SourceRef::Folder { .. } => Ok(SourceKind::Folder),
        SourceRef::Document { .. } => {
            bail!("sync only supports folder or wiki space URLs, got a page URL: {url}")
        }
    }
}
