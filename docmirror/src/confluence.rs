//! Confluence Cloud client implementing the core's [`RemoteSource`] and [`Renderer`].
//!
//! - Wiki shape: root pages of a space, then child pages by parent page id,
//!   paginated with `start`/`limit` for as long as the server sends
//!   `_links.next`. The server may return fewer results than asked for.
//! - Folder shape: direct children of a folder through the v2 API, following
//!   `_links.next`. Pages found there are checked for children of their own, which
//!   are listed through the same v2 endpoint for pages.
//! - Documents are fetched in storage format; the page version number is the
//!   revision.
//!
//! Rendering turns storage-format HTML into minimal markdown. Attached images
//! become `<page id>/<file name>` asset references that the sync engine
//! downloads and rewrites.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docmirror_core::config::Credentials;
use docmirror_core::contract::{
    NodeKind, RemoteDocument, RemoteNode, RemoteSource, RenderedDocument, Renderer,
};
use docmirror_core::document::sanitize_file_name;
use docmirror_core::error::RemoteError;
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

const PAGE_LIMIT: usize = 100;
const CHILDREN_LIMIT: usize = 250;

pub struct ConfluenceClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
    converter: StorageConverter,
}

impl ConfluenceClient {
    /// `base_url` is the site's wiki root, e.g. `https://acme.atlassian.net/wiki`.
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, RemoteError> {
        let converter =
            StorageConverter::new().map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            credentials,
            converter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Scheme and host of the base URL; `_links.next` values are relative to it.
    fn origin(&self) -> &str {
        let after_scheme = self.base_url.find("://").map_or(0, |i| i + 3);
        match self.base_url[after_scheme..].find('/') {
            Some(i) => &self.base_url[..after_scheme + i],
            None => &self.base_url,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Basic { email, api_token } => request.basic_auth(email, Some(api_token)),
            Credentials::Bearer { access_token } => request.bearer_auth(access_token),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, RemoteError> {
        debug!(url = %url, "Confluence GET");
        let resp = self
            .authorize(self.http.get(url))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, url, &body));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("{url}: {e}")))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, url, &body));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::Transport(format!("{url}: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Collect `results` from an offset-paginated endpoint.
    async fn get_paginated(&self, path_and_query: &str) -> Result<Vec<Value>, RemoteError> {
        let mut start = 0;
        let mut items = Vec::new();
        loop {
            let url = self.url(&format!(
                "{path_and_query}&limit={PAGE_LIMIT}&start={start}"
            ));
            let page = self.get_json(&url).await?;
            let results = results_of(&page);
            let received = results.len();
            items.extend(results);
            // The server caps `limit` as it sees fit; only a missing `next` ends the listing.
            if received == 0 || page.pointer("/_links/next").is_none() {
                break;
            }
            start += received;
        }
        Ok(items)
    }

    /// Direct children from a v2 `direct-children` endpoint, following `_links.next`.
    async fn list_direct_children(&self, path: &str) -> Result<Vec<RemoteNode>, RemoteError> {
        let mut url = self.url(&format!("{path}?limit={CHILDREN_LIMIT}"));
        let mut nodes = Vec::new();
        loop {
            let page = self.get_json(&url).await?;
            nodes.extend(results_of(&page).iter().filter_map(folder_child));
            match str_field(&page, "/_links/next") {
                Some(next) if next.starts_with("http") => url = next.to_owned(),
                Some(next) => url = format!("{}{}", self.origin(), next),
                None => break,
            }
        }
        for node in nodes.iter_mut().filter(|n| n.is_document()) {
            node.has_children = self.page_has_children(&node.token).await?;
        }
        Ok(nodes)
    }

    async fn page_has_children(&self, page_id: &str) -> Result<bool, RemoteError> {
        let page = self
            .get_json(&self.url(&format!(
                "/api/v2/pages/{page_id}/direct-children?limit=1"
            )))
            .await?;
        Ok(!results_of(&page).is_empty())
    }
}

fn status_error(status: StatusCode, url: &str, body: &str) -> RemoteError {
    let snippet: String = body.chars().take(200).collect();
    let detail = format!("{status} from {url}: {snippet}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth(detail),
        StatusCode::NOT_FOUND => RemoteError::NotFound(detail),
        _ => RemoteError::Transport(detail),
    }
}

fn results_of(page: &Value) -> Vec<Value> {
    page.get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn str_field<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Child of a v2 folder or page listing. `has_children` is filled in by the caller.
pub fn folder_child(item: &Value) -> Option<RemoteNode> {
    let token = str_field(item, "/id")?.to_owned();
    let kind = match str_field(item, "/type").unwrap_or_default() {
        "folder" => NodeKind::Folder,
        "page" => NodeKind::Document,
        other => NodeKind::Other(other.to_owned()),
    };
    Some(RemoteNode {
        token,
        name: str_field(item, "/title").unwrap_or_default().to_owned(),
        has_children: false,
        kind,
    })
}

/// Page from a v1 listing expanded with `children.page`.
pub fn wiki_page(item: &Value) -> Option<RemoteNode> {
    let token = str_field(item, "/id")?.to_owned();
    let child_pages = item
        .pointer("/children/page/size")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Some(RemoteNode {
        token,
        name: str_field(item, "/title").unwrap_or_default().to_owned(),
        has_children: child_pages > 0,
        kind: NodeKind::Document,
    })
}

/// Page fetched with `body.storage,version`.
pub fn page_document(raw: Value) -> Result<RemoteDocument, RemoteError> {
    let token = str_field(&raw, "/id")
        .ok_or_else(|| RemoteError::InvalidResponse("page without id".to_owned()))?
        .to_owned();
    let revision = raw
        .pointer("/version/number")
        .and_then(Value::as_i64)
        .ok_or_else(|| RemoteError::InvalidResponse(format!("page {token} without version")))?;
    Ok(RemoteDocument {
        title: str_field(&raw, "/title").unwrap_or("untitled").to_owned(),
        body: str_field(&raw, "/body/storage/value")
            .unwrap_or_default()
            .to_owned(),
        token,
        revision,
        raw,
    })
}

#[async_trait]
impl RemoteSource for ConfluenceClient {
    async fn list_folder(&self, folder_token: &str) -> Result<Vec<RemoteNode>, RemoteError> {
        let nodes = self
            .list_direct_children(&format!("/api/v2/folders/{folder_token}/direct-children"))
            .await?;
        info!(folder = %folder_token, children = nodes.len(), "Listed Confluence folder");
        Ok(nodes)
    }

    async fn list_document_children(
        &self,
        document_token: &str,
    ) -> Result<Vec<RemoteNode>, RemoteError> {
        let nodes = self
            .list_direct_children(&format!("/api/v2/pages/{document_token}/direct-children"))
            .await?;
        info!(page = %document_token, children = nodes.len(), "Listed Confluence page children");
        Ok(nodes)
    }

    async fn wiki_space_name(&self, space_id: &str) -> Result<String, RemoteError> {
        let space = self.get_json(&self.url(&format!("/rest/api/space/{space_id}"))).await?;
        str_field(&space, "/name")
            .map(str::to_owned)
            .ok_or_else(|| RemoteError::InvalidResponse(format!("space {space_id} without name")))
    }

    async fn list_wiki_nodes(
        &self,
        space_id: &str,
        parent_token: Option<String>,
    ) -> Result<Vec<RemoteNode>, RemoteError> {
        let path = match &parent_token {
            None => format!(
                "/rest/api/space/{space_id}/content/page?depth=root&expand=children.page,version"
            ),
            Some(parent) => {
                format!("/rest/api/content/{parent}/child/page?expand=children.page,version")
            }
        };
        let items = self.get_paginated(&path).await?;
        Ok(items.iter().filter_map(wiki_page).collect())
    }

    async fn fetch_document(&self, token: &str) -> Result<RemoteDocument, RemoteError> {
        let raw = self
            .get_json(&self.url(&format!(
                "/rest/api/content/{token}?expand=body.storage,version"
            )))
            .await?;
        page_document(raw)
    }
}

#[async_trait]
impl Renderer for ConfluenceClient {
    async fn render(&self, document: &RemoteDocument) -> Result<RenderedDocument, RemoteError> {
        let (body, assets) = self.converter.convert(&document.body, &document.token);
        Ok(RenderedDocument {
            markdown: format!("# {}\n\n{}\n", document.title, body),
            assets,
        })
    }

    async fn download_asset(&self, asset: &str, dest_dir: &Path) -> Result<PathBuf, RemoteError> {
        let (page, file) = asset
            .split_once('/')
            .ok_or_else(|| RemoteError::InvalidResponse(format!("bad asset reference {asset}")))?;

        let mut url = reqwest::Url::parse(&self.url("/download/attachments"))
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| {
                RemoteError::InvalidResponse(format!(
                    "base URL {} cannot hold a path",
                    self.base_url
                ))
            })?
            .push(page)
            .push(file);

        let bytes = self.get_bytes(url.as_str()).await?;
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| RemoteError::Transport(format!("{}: {e}", dest_dir.display())))?;
        let local = dest_dir.join(format!("{page}-{}", sanitize_file_name(file)));
        tokio::fs::write(&local, bytes)
            .await
            .map_err(|e| RemoteError::Transport(format!("{}: {e}", local.display())))?;
        debug!(asset = %asset, path = %local.display(), "Downloaded attachment");
        Ok(local)
    }
}

/// Storage-format HTML to markdown, one pass of regex rewrites.
struct StorageConverter {
    image: Regex,
    attachment: Regex,
    external: Regex,
    link: Regex,
    heading_open: Regex,
    heading_close: Regex,
    paragraph: Regex,
    line_break: Regex,
    list_item: Regex,
    list: Regex,
    bold: Regex,
    italic: Regex,
    code: Regex,
    tag: Regex,
    blank_lines: Regex,
}

impl StorageConverter {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            image: Regex::new(r"(?s)<ac:image[^>]*>(.*?)</ac:image>")?,
            attachment: Regex::new(r#"ri:filename="([^"]+)""#)?,
            external: Regex::new(r#"ri:value="([^"]+)""#)?,
            link: Regex::new(r#"(?s)<a\s[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)?,
            heading_open: Regex::new(r"<h([1-6])[^>]*>")?,
            heading_close: Regex::new(r"</h[1-6]>")?,
            paragraph: Regex::new(r"<p(?:\s[^>]*)?>|</p>")?,
            line_break: Regex::new(r"<br\s*/?>")?,
            list_item: Regex::new(r"<li(?:\s[^>]*)?>")?,
            list: Regex::new(r"</?[uo]l(?:\s[^>]*)?>|</li>")?,
            bold: Regex::new(r"</?(?:strong|b)>")?,
            italic: Regex::new(r"</?(?:em|i)>")?,
            code: Regex::new(r"</?code>")?,
            tag: Regex::new(r"<[^>]+>")?,
            blank_lines: Regex::new(r"\n{3,}")?,
        })
    }

    /// Returns the markdown and the asset references embedded in it.
    fn convert(&self, html: &str, page_id: &str) -> (String, Vec<String>) {
        let mut assets = Vec::new();
        let md = self.image.replace_all(html, |caps: &regex::Captures<'_>| {
            let inner = &caps[1];
            if let Some(file) = self.attachment.captures(inner) {
                let reference = format!("{page_id}/{}", &file[1]);
                let markdown = format!("![{}]({reference})", &file[1]);
                assets.push(reference);
                markdown
            } else if let Some(url) = self.external.captures(inner) {
                format!("![]({})", &url[1])
            } else {
                String::new()
            }
        });

        let md = self.link.replace_all(&md, "[$2]($1)");
        let md = self.heading_open.replace_all(&md, |caps: &regex::Captures<'_>| {
            let level = caps[1].parse::<usize>().unwrap_or(1);
            format!("\n{} ", "#".repeat(level))
        });
        let md = self.heading_close.replace_all(&md, "\n");
        let md = self.paragraph.replace_all(&md, "\n\n");
        let md = self.line_break.replace_all(&md, "\n");
        let md = self.list_item.replace_all(&md, "- ");
        let md = self.list.replace_all(&md, "\n");
        let md = self.bold.replace_all(&md, "**");
        let md = self.italic.replace_all(&md, "_");
        let md = self.code.replace_all(&md, "`");
        let md = self.tag.replace_all(&md, "");
        let md = md
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&");
        let md = self.blank_lines.replace_all(&md, "\n\n");
        (md.trim().to_owned(), assets)
    }
}
