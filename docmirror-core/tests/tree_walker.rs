use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docmirror_core::cache::RevisionCache;
use docmirror_core::contract::{
    DocKind, MockRemoteSource, MockRenderer, NodeKind, RemoteDocument, RemoteNode, RemoteSource,
    RenderedDocument, Renderer,
};
use docmirror_core::document::{SyncContext, SyncOptions};
use docmirror_core::error::{RemoteError, SyncError};
use docmirror_core::filter::{FilterSpec, NameFilter};
use docmirror_core::walker::TreeWalker;
use tempfile::tempdir;

fn node(token: &str, name: &str, kind: NodeKind, has_children: bool) -> RemoteNode {
    RemoteNode {
        token: token.to_owned(),
        name: name.to_owned(),
        has_children,
        kind,
    }
}

fn folder(token: &str, name: &str) -> RemoteNode {
    node(token, name, NodeKind::Folder, false)
}

fn document(token: &str) -> RemoteNode {
    node(token, &format!("Title {token}"), NodeKind::Document, false)
}

fn remote_doc(token: &str, revision: i64) -> RemoteDocument {
    RemoteDocument {
        token: token.to_owned(),
        title: format!("Title {token}"),
        revision,
        body: format!("<p>{token}</p>"),
        raw: serde_json::json!({ "id": token }),
    }
}

/// root: [d1, Guides/ [d2]]
fn folder_source() -> MockRemoteSource {
    let mut source = MockRemoteSource::new();
    source.expect_list_folder().returning(|token| match token {
        "root" => Ok(vec![document("d1"), folder("f1", "Guides")]),
        "f1" => Ok(vec![document("d2")]),
        other => Err(RemoteError::NotFound(other.to_owned())),
    });
    source
        .expect_fetch_document()
        .returning(|token| Ok(remote_doc(token, 1)));
    source
}

fn plain_renderer() -> MockRenderer {
    let mut renderer = MockRenderer::new();
    renderer.expect_render().returning(|doc| {
        Ok(RenderedDocument {
            markdown: format!("# {}\n", doc.title),
            assets: Vec::new(),
        })
    });
    renderer
}

fn context(
    source: impl RemoteSource + 'static,
    renderer: impl Renderer + 'static,
    cache: Option<Arc<RevisionCache>>,
    root: &Path,
    concurrency: usize,
) -> SyncContext {
    SyncContext {
        source: Arc::new(source),
        renderer: Arc::new(renderer),
        cache,
        options: SyncOptions {
            concurrency,
            ..SyncOptions::default()
        },
        root: root.to_path_buf(),
    }
}

fn no_filter() -> NameFilter {
    NameFilter::new(FilterSpec::default())
}

#[tokio::test]
async fn test_folder_walk_mirrors_tree_and_fills_cache() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("out");
    let cache = Arc::new(RevisionCache::open(&root));

    let ctx = context(folder_source(), plain_renderer(), Some(cache.clone()), &root, 2);
    let report = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .expect("walk should succeed");

    assert_eq!(report.downloaded.len(), 2);
    assert_eq!(report.failed, 0);
    assert_eq!(
        fs::read_to_string(root.join("d1.md")).unwrap(),
        "# Title d1\n"
    );
    assert!(root.join("Guides").join("d2.md").exists());

    let d2 = cache.get("d2").expect("d2 cached");
    assert_eq!(d2.file_name, "Guides/d2.md");
    assert_eq!(d2.doc_type, DocKind::Document);
}

#[tokio::test]
async fn test_warm_rerun_renders_nothing_and_leaves_cache_clean() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("out");

    let cache = Arc::new(RevisionCache::open(&root));
    let ctx = context(folder_source(), plain_renderer(), Some(cache.clone()), &root, 3);
    TreeWalker::new(ctx, no_filter()).sync_folder("root").await.unwrap();
    assert!(cache.save().unwrap());

    let mut renderer = MockRenderer::new();
    renderer.expect_render().never();
    renderer.expect_download_asset().never();

    let warm = Arc::new(RevisionCache::open(&root));
    let ctx = context(folder_source(), renderer, Some(warm.clone()), &root, 3);
    let report = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .unwrap();

    assert!(report.downloaded.is_empty());
    assert_eq!(report.unchanged, 2);
    assert!(!warm.is_dirty());
    assert!(!warm.save().unwrap());
}

#[tokio::test]
async fn test_existing_file_without_cache_entry_is_registered() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    fs::write(root.join("d1.md"), "local edits").unwrap();

    let mut source = MockRemoteSource::new();
    source
        .expect_list_folder()
        .returning(|_| Ok(vec![document("d1")]));
    source
        .expect_fetch_document()
        .returning(|token| Ok(remote_doc(token, 9)));
    let mut renderer = MockRenderer::new();
    renderer.expect_render().never();

    let cache = Arc::new(RevisionCache::new(&root));
    let ctx = context(source, renderer, Some(cache.clone()), &root, 1);
    let report = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .unwrap();

    assert_eq!(report.registered, 1);
    assert_eq!(fs::read_to_string(root.join("d1.md")).unwrap(), "local edits");
    assert_eq!(cache.get("d1").map(|e| e.revision), Some(9));
}

#[tokio::test]
async fn test_excluded_folder_is_never_listed_or_fetched() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source.expect_list_folder().times(1).returning(|token| {
        assert_eq!(token, "root", "excluded folder must not be listed");
        Ok(vec![document("d1"), folder("f1", "drafts")])
    });
    source.expect_fetch_document().times(1).returning(|token| {
        assert_eq!(token, "d1");
        Ok(remote_doc(token, 1))
    });

    let filter = NameFilter::new(FilterSpec::new(Vec::new(), vec!["draft*".to_owned()]));
    let ctx = context(source, plain_renderer(), None, &root, 2);
    let report = TreeWalker::new(ctx, filter).sync_folder("root").await.unwrap();

    assert_eq!(report.downloaded, vec![root.join("d1.md")]);
    assert_eq!(report.skipped_folders.len(), 1);
    assert!(report.skipped_folders[0].ends_with("/drafts"));
}

#[tokio::test]
async fn test_include_whitelist_skips_root_documents() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source.expect_list_folder().returning(|token| match token {
        "root" => Ok(vec![document("d1"), folder("f1", "Guides"), folder("f2", "Misc")]),
        "f1" => Ok(vec![document("d2")]),
        other => panic!("unexpected listing of {other}"),
    });
    source.expect_fetch_document().times(1).returning(|token| {
        assert_eq!(token, "d2");
        Ok(remote_doc(token, 1))
    });

    let filter = NameFilter::new(FilterSpec::new(vec!["Guide*".to_owned()], Vec::new()));
    let ctx = context(source, plain_renderer(), None, &root, 2);
    let report = TreeWalker::new(ctx, filter).sync_folder("root").await.unwrap();

    assert_eq!(report.skipped_documents, 1);
    assert_eq!(report.downloaded, vec![root.join("Guides").join("d2.md")]);
    assert!(!root.join("d1.md").exists());
}

#[tokio::test]
async fn test_failed_document_does_not_cancel_siblings() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source.expect_list_folder().returning(|_| {
        Ok(vec![
            document("a"),
            document("bad"),
            document("b"),
            document("c"),
        ])
    });
    source.expect_fetch_document().returning(|token| match token {
        "bad" => Err(RemoteError::Transport("connection reset".to_owned())),
        other => Ok(remote_doc(other, 1)),
    });

    let ctx = context(source, plain_renderer(), None, &root, 2);
    let err = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .expect_err("one document failed");

    assert!(matches!(err, SyncError::Remote(RemoteError::Transport(_))));
    for token in ["a", "b", "c"] {
        assert!(root.join(format!("{token}.md")).exists(), "{token} not written");
    }
}

#[tokio::test]
async fn test_listing_failure_still_joins_dispatched_documents() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source.expect_list_folder().returning(|token| match token {
        "root" => Ok(vec![document("d1"), folder("f1", "Broken")]),
        _ => Err(RemoteError::Auth("403 Forbidden".to_owned())),
    });
    source
        .expect_fetch_document()
        .returning(|token| Ok(remote_doc(token, 1)));

    let ctx = context(source, plain_renderer(), None, &root, 4);
    let err = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .expect_err("listing failed");

    assert!(matches!(err, SyncError::Remote(RemoteError::Auth(_))));
    assert!(root.join("d1.md").exists());
}

#[tokio::test]
async fn test_folder_page_with_children_gets_its_own_directory() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source.expect_list_folder().returning(|token| match token {
        "root" => Ok(vec![node("p1", "Runbook", NodeKind::Document, true)]),
        "f9" => Ok(Vec::new()),
        other => Err(RemoteError::NotFound(other.to_owned())),
    });
    source
        .expect_list_document_children()
        .returning(|token| match token {
            "p1" => Ok(vec![
                node("c1", "Rollback", NodeKind::Document, true),
                folder("f9", "Attachments"),
            ]),
            "c1" => Ok(vec![document("g1")]),
            other => Err(RemoteError::NotFound(other.to_owned())),
        });
    source
        .expect_fetch_document()
        .returning(|token| Ok(remote_doc(token, 1)));

    let cache = Arc::new(RevisionCache::new(&root));
    let ctx = context(source, plain_renderer(), Some(cache.clone()), &root, 2);
    let report = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .unwrap();

    assert_eq!(report.downloaded.len(), 3);
    assert!(root.join("p1.md").exists());
    assert!(root.join("Runbook").join("c1.md").exists());
    assert!(root.join("Runbook").join("Rollback").join("g1.md").exists());
    assert_eq!(
        cache.get("g1").map(|e| e.file_name),
        Some("Runbook/Rollback/g1.md".to_owned())
    );
}

#[tokio::test]
async fn test_excluded_folder_page_skips_itself_and_its_children() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source.expect_list_folder().times(1).returning(|_| {
        Ok(vec![
            node("p1", "draft notes", NodeKind::Document, true),
            document("p2"),
        ])
    });
    source.expect_list_document_children().never();
    source.expect_fetch_document().times(1).returning(|token| {
        assert_eq!(token, "p2");
        Ok(remote_doc(token, 1))
    });

    let filter = NameFilter::new(FilterSpec::new(Vec::new(), vec!["draft*".to_owned()]));
    let ctx = context(source, plain_renderer(), None, &root, 1);
    let report = TreeWalker::new(ctx, filter).sync_folder("root").await.unwrap();

    assert_eq!(report.downloaded, vec![root.join("p2.md")]);
    assert_eq!(report.skipped_folders.len(), 1);
}

#[tokio::test]
async fn test_force_redownloads_and_refreshes_cache() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("out");

    let cache = Arc::new(RevisionCache::open(&root));
    let ctx = context(folder_source(), plain_renderer(), Some(cache.clone()), &root, 2);
    TreeWalker::new(ctx, no_filter()).sync_folder("root").await.unwrap();
    assert!(cache.save().unwrap());
    let first_seen = cache.get("d1").expect("d1 cached").last_download;

    let warm = Arc::new(RevisionCache::open(&root));
    let mut ctx = context(folder_source(), plain_renderer(), Some(warm.clone()), &root, 2);
    ctx.options.force = true;
    let report = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .unwrap();

    assert_eq!(report.downloaded.len(), 2);
    assert_eq!(report.unchanged, 0);
    assert!(warm.is_dirty(), "forced downloads refresh the cache");
    let refreshed = warm.get("d1").expect("d1 still cached");
    assert_eq!(refreshed.revision, 1);
    assert!(refreshed.last_download >= first_seen);
}

#[tokio::test]
async fn test_non_incremental_run_ignores_warm_cache() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("out");

    let cache = Arc::new(RevisionCache::open(&root));
    let ctx = context(folder_source(), plain_renderer(), Some(cache.clone()), &root, 2);
    TreeWalker::new(ctx, no_filter()).sync_folder("root").await.unwrap();

    let mut renderer = MockRenderer::new();
    renderer.expect_render().times(2).returning(|doc| {
        Ok(RenderedDocument {
            markdown: format!("# {} again\n", doc.title),
            assets: Vec::new(),
        })
    });
    let mut ctx = context(folder_source(), renderer, Some(cache.clone()), &root, 2);
    ctx.options.incremental = false;
    let report = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .unwrap();

    assert_eq!(report.downloaded.len(), 2);
    assert_eq!(report.unchanged, 0);
    assert_eq!(
        fs::read_to_string(root.join("d1.md")).unwrap(),
        "# Title d1 again\n"
    );
}

#[tokio::test]
async fn test_dump_writes_raw_payload_next_to_markdown() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source
        .expect_list_folder()
        .returning(|_| Ok(vec![document("d1")]));
    source
        .expect_fetch_document()
        .returning(|token| Ok(remote_doc(token, 4)));

    let mut ctx = context(source, plain_renderer(), None, &root, 1);
    ctx.options.dump = true;
    TreeWalker::new(ctx, no_filter()).sync_folder("root").await.unwrap();

    assert!(root.join("d1.md").exists());
    let dumped: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(root.join("d1.json")).unwrap()).unwrap();
    assert_eq!(dumped, serde_json::json!({ "id": "d1" }));
}

#[tokio::test]
async fn test_early_failure_is_reported_after_many_later_documents() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source.expect_list_folder().returning(|_| {
        let mut children = vec![document("bad")];
        children.extend((0..20).map(|i| document(&format!("ok{i}"))));
        Ok(children)
    });
    source.expect_fetch_document().returning(|token| match token {
        "bad" => Err(RemoteError::Auth("401 Unauthorized".to_owned())),
        other => Ok(remote_doc(other, 1)),
    });

    let ctx = context(source, plain_renderer(), None, &root, 1);
    let err = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .expect_err("the first document failed");

    assert!(matches!(err, SyncError::Remote(RemoteError::Auth(_))));
    for i in 0..20 {
        assert!(root.join(format!("ok{i}.md")).exists(), "ok{i} not written");
    }
}

#[tokio::test]
async fn test_wiki_node_can_be_container_and_document() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source
        .expect_wiki_space_name()
        .returning(|_| Ok("Engineering".to_owned()));
    source
        .expect_list_wiki_nodes()
        .returning(|space, parent| {
            assert_eq!(space, "ENG");
            match parent.as_deref() {
                None => Ok(vec![node("p1", "Home", NodeKind::Document, true)]),
                Some("p1") => Ok(vec![node("p2", "Child", NodeKind::Document, false)]),
                Some(other) => Err(RemoteError::NotFound(other.to_owned())),
            }
        });
    source
        .expect_fetch_document()
        .returning(|token| Ok(remote_doc(token, 2)));

    let cache = Arc::new(RevisionCache::new(&root));
    let ctx = context(source, plain_renderer(), Some(cache.clone()), &root, 2);
    let report = TreeWalker::new(ctx, no_filter()).sync_wiki("ENG").await.unwrap();

    let space = root.join("Engineering");
    assert_eq!(report.downloaded.len(), 2);
    assert!(space.join("p1.md").exists());
    assert!(space.join("Home").join("p2.md").exists());
    assert_eq!(
        cache.get("p2").map(|e| (e.file_name, e.doc_type)),
        Some(("Engineering/Home/p2.md".to_owned(), DocKind::WikiLeaf))
    );
}

#[tokio::test]
async fn test_excluded_wiki_container_skips_its_own_page() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source
        .expect_wiki_space_name()
        .returning(|_| Ok("Space".to_owned()));
    source.expect_list_wiki_nodes().times(1).returning(|_, _| {
        Ok(vec![
            node("p1", "draft", NodeKind::Document, true),
            node("p2", "Release", NodeKind::Document, false),
        ])
    });
    source.expect_fetch_document().times(1).returning(|token| {
        assert_eq!(token, "p2");
        Ok(remote_doc(token, 1))
    });

    let filter = NameFilter::new(FilterSpec::new(Vec::new(), vec!["draft".to_owned()]));
    let ctx = context(source, plain_renderer(), None, &root, 1);
    let report = TreeWalker::new(ctx, filter).sync_wiki("S").await.unwrap();

    assert_eq!(report.downloaded, vec![root.join("Space").join("p2.md")]);
}

#[tokio::test]
async fn test_assets_are_downloaded_and_links_rewritten() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    let mut source = MockRemoteSource::new();
    source
        .expect_list_folder()
        .returning(|_| Ok(vec![document("p1")]));
    source
        .expect_fetch_document()
        .returning(|token| Ok(remote_doc(token, 1)));

    let mut renderer = MockRenderer::new();
    renderer.expect_render().returning(|_| {
        Ok(RenderedDocument {
            markdown: "Intro\n\n![diagram](p1/diagram.png)\n".to_owned(),
            assets: vec!["p1/diagram.png".to_owned()],
        })
    });
    renderer
        .expect_download_asset()
        .times(1)
        .returning(|asset: &str, dir: &Path| {
            let name = asset.rsplit('/').next().unwrap_or(asset);
            Ok(dir.join(name))
        });

    let ctx = context(source, renderer, None, &root, 1);
    TreeWalker::new(ctx, no_filter()).sync_folder("root").await.unwrap();

    let markdown = fs::read_to_string(root.join("p1.md")).unwrap();
    assert_eq!(markdown, "Intro\n\n![diagram](static/diagram.png)\n");
}

/// Source whose fetches take a while, recording the peak number in flight.
struct SlowSource {
    docs: usize,
    in_flight: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl RemoteSource for SlowSource {
    async fn list_folder(&self, _folder_token: &str) -> Result<Vec<RemoteNode>, RemoteError> {
        Ok((0..self.docs).map(|i| document(&format!("doc{i}"))).collect())
    }

    async fn list_document_children(
        &self,
        document_token: &str,
    ) -> Result<Vec<RemoteNode>, RemoteError> {
        Err(RemoteError::NotFound(document_token.to_owned()))
    }

    async fn wiki_space_name(&self, space_id: &str) -> Result<String, RemoteError> {
        Err(RemoteError::NotFound(space_id.to_owned()))
    }

    async fn list_wiki_nodes(
        &self,
        space_id: &str,
        _parent_token: Option<String>,
    ) -> Result<Vec<RemoteNode>, RemoteError> {
        Err(RemoteError::NotFound(space_id.to_owned()))
    }

    async fn fetch_document(&self, token: &str) -> Result<RemoteDocument, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(remote_doc(token, 1))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_limit_is_respected() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    let peak = Arc::new(AtomicUsize::new(0));
    let source = SlowSource {
        docs: 12,
        in_flight: AtomicUsize::new(0),
        peak: peak.clone(),
    };

    let ctx = context(source, plain_renderer(), None, &root, 3);
    let report = TreeWalker::new(ctx, no_filter())
        .sync_folder("root")
        .await
        .unwrap();

    assert_eq!(report.downloaded.len(), 12);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded the limit");
    assert!(peak >= 2, "documents were never fetched in parallel");

    let written: Vec<PathBuf> = fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    assert_eq!(written.len(), 12);
}
