use std::fs;
use std::sync::Arc;
use std::thread;

use docmirror_core::cache::{
    DownloadDecision, RevisionCache, SkipReason, CACHE_FILE_NAME, CACHE_VERSION,
};
use docmirror_core::contract::DocKind;
use tempfile::tempdir;

fn touch(path: &std::path::Path) {
    fs::write(path, "# doc\n").expect("write fixture file");
}

#[test]
fn test_decision_table() {
    let dir = tempdir().unwrap();
    let cache = RevisionCache::new(dir.path());
    let doc = dir.path().join("doc.md");

    // Rule 2: unknown and absent.
    assert_eq!(cache.should_download("tok", 3, &doc), DownloadDecision::Proceed);

    // Rule 1: unknown but present on disk.
    touch(&doc);
    assert_eq!(
        cache.should_download("tok", 3, &doc),
        DownloadDecision::Skip(SkipReason::AlreadyPresent { revision: 3 })
    );

    // Rule 5: cached, same revision, file present.
    cache.update_document("tok", 3, "Doc", "doc.md", DocKind::Document);
    assert_eq!(
        cache.should_download("tok", 3, &doc),
        DownloadDecision::Skip(SkipReason::Unmodified { revision: 3 })
    );

    // Rule 4: cached but the file was deleted.
    fs::remove_file(&doc).unwrap();
    assert_eq!(cache.should_download("tok", 3, &doc), DownloadDecision::Proceed);
}

#[test]
fn test_revision_change_forces_download() {
    let dir = tempdir().unwrap();
    let cache = RevisionCache::new(dir.path());
    let doc = dir.path().join("doc.md");
    touch(&doc);
    cache.update_document("tok", 7, "Doc", "doc.md", DocKind::Document);

    for remote in [6, 8, 100] {
        assert!(
            cache.should_download("tok", remote, &doc).proceed(),
            "revision {remote} should trigger a download"
        );
    }
}

#[test]
fn test_missing_file_recovery() {
    let dir = tempdir().unwrap();
    let cache = RevisionCache::new(dir.path());
    let doc = dir.path().join("gone.md");
    cache.update_document("tok", 1, "Gone", "gone.md", DocKind::Document);

    assert!(cache.should_download("tok", 1, &doc).proceed());
}

#[test]
fn test_save_and_reopen() {
    let dir = tempdir().unwrap();
    let cache = RevisionCache::new(dir.path());
    cache.update_document("a", 1, "Alpha", "alpha.md", DocKind::Document);
    cache.update_document("b", 4, "Beta", "space/beta.md", DocKind::WikiLeaf);

    assert!(cache.is_dirty());
    assert!(cache.save().expect("save should succeed"));
    assert!(!cache.is_dirty());

    let reopened = RevisionCache::open(dir.path());
    assert_eq!(reopened.len(), 2);
    assert!(!reopened.is_dirty());
    let beta = reopened.get("b").expect("entry b persisted");
    assert_eq!(beta.revision, 4);
    assert_eq!(beta.file_name, "space/beta.md");
    assert_eq!(beta.doc_type, DocKind::WikiLeaf);

    let raw = fs::read_to_string(dir.path().join(CACHE_FILE_NAME)).unwrap();
    assert!(raw.contains("\"revision_id\": 4"), "unexpected layout: {raw}");
    assert!(raw.contains(&format!("\"version\": \"{CACHE_VERSION}\"")));
}

#[test]
fn test_save_is_noop_when_clean() {
    let dir = tempdir().unwrap();
    let cache = RevisionCache::open(dir.path());

    assert!(!cache.save().expect("save should succeed"));
    assert!(!dir.path().join(CACHE_FILE_NAME).exists());
}

#[test]
fn test_malformed_file_degrades_to_empty() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(CACHE_FILE_NAME), "{ not json").unwrap();

    let cache = RevisionCache::new(dir.path());
    cache.load().expect("malformed content is not an error");

    assert!(cache.is_empty());
    assert!(!cache.is_dirty());
}

#[test]
fn test_legacy_file_is_migrated_and_marked_dirty() {
    let dir = tempdir().unwrap();
    let legacy = r#"{
        "documents": {
            "tok": { "revision_id": 3, "title": "Old", "file_name": "old.md", "doc_type": "wiki" }
        }
    }"#;
    fs::write(dir.path().join(CACHE_FILE_NAME), legacy).unwrap();

    let cache = RevisionCache::open(dir.path());
    assert!(cache.is_dirty());
    let entry = cache.get("tok").expect("legacy entry kept");
    assert_eq!(entry.revision, 3);
    assert_eq!(entry.doc_type, DocKind::WikiLeaf);

    assert!(cache.save().unwrap());
    let reopened = RevisionCache::open(dir.path());
    assert!(!reopened.is_dirty());
    assert_eq!(reopened.get("tok").map(|e| e.title), Some("Old".to_owned()));
}

#[test]
fn test_stale_temp_file_does_not_affect_load() {
    let dir = tempdir().unwrap();
    let cache = RevisionCache::new(dir.path());
    cache.update_document("tok", 2, "Kept", "kept.md", DocKind::Document);
    cache.save().unwrap();

    // Leftover from a save interrupted before its rename.
    fs::write(
        dir.path().join(format!(".{CACHE_FILE_NAME}.deadbeef.tmp")),
        "{\"version\": \"1.0\", \"docu",
    )
    .unwrap();

    let reopened = RevisionCache::open(dir.path());
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.get("tok").map(|e| e.revision), Some(2));
}

#[test]
fn test_remove_and_stats() {
    let dir = tempdir().unwrap();
    let cache = RevisionCache::new(dir.path());
    assert_eq!(cache.stats().documents, 0);
    assert!(cache.stats().oldest_download.is_none());

    cache.update_document("a", 1, "A", "a.md", DocKind::Document);
    cache.update_document("b", 1, "B", "b.md", DocKind::Document);
    let stats = cache.stats();
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.oldest_download, cache.get("a").map(|e| e.last_download));

    assert!(cache.remove_document("a").is_some());
    assert!(cache.remove_document("a").is_none());
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_concurrent_updates_are_all_persisted() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(RevisionCache::new(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..50 {
                    let id = format!("w{worker}-d{i}");
                    let file = format!("{id}.md");
                    cache.update_document(&id, i, &id, &file, DocKind::Document);
                    cache.should_download(&id, i, std::path::Path::new(&file));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    assert!(cache.save().unwrap());
    assert_eq!(RevisionCache::open(dir.path()).len(), 400);
}
