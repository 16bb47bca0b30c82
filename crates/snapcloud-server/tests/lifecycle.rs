//! Lifecycle, lineage and derived-artifact tests.
//!
//! These run against the in-memory catalog and a temporary blob store, so
//! they need no database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snapcloud_server::catalog::{Catalog, MemoryCatalog};
use snapcloud_server::collaborators::{Notice, Notifier};
use snapcloud_server::lifecycle::{Lifecycle, ProjectRef, SavePayload};
use snapcloud_server::models::{Ancestor, NewProject, Project, RemixEdge};
use snapcloud_server::{AppError, AppState};
use snapcloud_storage::{
    ArtifactKind, BlobStore, DocumentParser, ParsedDocument, StorageResult, XmlDocumentParser,
};
use tempfile::TempDir;

/// Delegates to the XML parser and counts invocations.
#[derive(Default)]
struct CountingParser {
    calls: AtomicUsize,
}

impl CountingParser {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DocumentParser for CountingParser {
    fn parse(&self, document: &[u8]) -> StorageResult<ParsedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        XmlDocumentParser.parse(document)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Catalog whose first `find_active` lookups miss, as if another request
/// created the project after they ran.
struct LaggingCatalog {
    inner: Arc<MemoryCatalog>,
    stale_lookups: AtomicUsize,
}

#[async_trait]
impl Catalog for LaggingCatalog {
    async fn find_active(&self, owner: &str, name: &str) -> Result<Option<Project>, AppError> {
        let stale = self
            .stale_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stale {
            return Ok(None);
        }
        self.inner.find_active(owner, name).await
    }

    async fn find_tombstoned(&self, owner: &str, name: &str) -> Result<Vec<Project>, AppError> {
        self.inner.find_tombstoned(owner, name).await
    }

    async fn get(&self, id: i64) -> Result<Option<Project>, AppError> {
        self.inner.get(id).await
    }

    async fn insert(&self, project: &NewProject) -> Result<Project, AppError> {
        self.inner.insert(project).await
    }

    async fn update(&self, project: &Project) -> Result<(), AppError> {
        self.inner.update(project).await
    }

    async fn set_notes(&self, id: i64, notes: &str) -> Result<(), AppError> {
        self.inner.set_notes(id, notes).await
    }

    async fn mark_deleted(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        self.inner.mark_deleted(id, at).await
    }

    async fn remove(&self, id: i64) -> Result<(), AppError> {
        self.inner.remove(id).await
    }

    async fn insert_remix(
        &self,
        original_id: i64,
        remixed_id: i64,
    ) -> Result<RemixEdge, AppError> {
        self.inner.insert_remix(original_id, remixed_id).await
    }

    async fn find_remix(&self, remixed_id: i64) -> Result<Option<RemixEdge>, AppError> {
        self.inner.find_remix(remixed_id).await
    }

    async fn list_remixes(
        &self,
        original_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RemixEdge>, AppError> {
        self.inner.list_remixes(original_id, limit, offset).await
    }

    async fn orphan_remixes(&self, original_id: i64) -> Result<u64, AppError> {
        self.inner.orphan_remixes(original_id).await
    }
}

struct Harness {
    _dir: TempDir,
    catalog: Arc<MemoryCatalog>,
    parser: Arc<CountingParser>,
    notifier: Arc<RecordingNotifier>,
    state: AppState,
}

fn harness() -> Harness {
    let dir = TempDir::new().expect("create temp dir");
    let catalog = Arc::new(MemoryCatalog::new());
    let parser = Arc::new(CountingParser::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::new(
        catalog.clone(),
        catalog.clone(),
        notifier.clone(),
        BlobStore::new(dir.path()),
        parser.clone(),
    );

    Harness {
        _dir: dir,
        catalog,
        parser,
        notifier,
        state,
    }
}

fn document(notes: &str, thumbnail: Option<&str>) -> Vec<u8> {
    let thumbnail = thumbnail
        .map(|t| format!("<thumbnail>{t}</thumbnail>"))
        .unwrap_or_default();
    format!("<project name=\"foo\"><notes>{notes}</notes>{thumbnail}<scenes/></project>")
        .into_bytes()
}

fn payload(content: &str) -> SavePayload {
    SavePayload {
        document: document(content, None),
        assets: format!("<media>{content}</media>").into_bytes(),
        thumbnail: Some(content.as_bytes().to_vec()),
        ..SavePayload::default()
    }
}

fn public_payload(content: &str) -> SavePayload {
    SavePayload {
        is_public: true,
        is_published: true,
        ..payload(content)
    }
}

#[tokio::test]
async fn test_create_twice_is_a_conflict() {
    let h = harness();
    h.state.lifecycle.create("alice", "foo", payload("v1")).await.unwrap();

    let err = h
        .state
        .lifecycle
        .create("alice", "foo", payload("v2"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(h.catalog.project_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_creates_admit_exactly_one() {
    let h = harness();
    let lifecycle = &h.state.lifecycle;

    let (first, second) = tokio::join!(
        lifecycle.create("alice", "foo", payload("a")),
        lifecycle.create("alice", "foo", payload("b")),
    );

    let (winner, content) = match (first, second) {
        (Ok(project), Err(AppError::Conflict(_))) => (project, "a"),
        (Err(AppError::Conflict(_)), Ok(project)) => (project, "b"),
        other => panic!("expected one create and one conflict, got {:?}", other),
    };
    assert_eq!(h.catalog.project_count().await, 1);

    let active = h.catalog.find_active("alice", "foo").await.unwrap().unwrap();
    assert_eq!(active.id, winner.id);
    let stored = h.state.blobs.get(winner.id, ArtifactKind::Thumbnail, 0).await.unwrap();
    assert_eq!(stored, Some(content.as_bytes().to_vec()));
}

#[tokio::test]
async fn test_save_that_loses_create_race_becomes_update() {
    let h = harness();
    let existing = h.state.lifecycle.create("alice", "foo", payload("v1")).await.unwrap();

    // both the save's and the create's lookups miss the existing row, so the
    // insert is what reports the conflict
    let lagging = Arc::new(LaggingCatalog {
        inner: h.catalog.clone(),
        stale_lookups: AtomicUsize::new(2),
    });
    let lifecycle = Lifecycle::new(
        lagging,
        h.state.blobs.clone(),
        h.parser.clone(),
        h.catalog.clone(),
        h.notifier.clone(),
    );

    let outcome = lifecycle.save("alice", "foo", payload("v2")).await.unwrap();
    assert!(!outcome.is_created());
    assert_eq!(outcome.project().id, existing.id);
    assert_eq!(h.catalog.project_count().await, 1);

    let blobs = &h.state.blobs;
    assert_eq!(
        blobs.get(existing.id, ArtifactKind::Thumbnail, 0).await.unwrap(),
        Some(b"v2".to_vec())
    );
    assert_eq!(
        blobs.get(existing.id, ArtifactKind::Thumbnail, -1).await.unwrap(),
        Some(b"v1".to_vec())
    );
}

#[tokio::test]
async fn test_save_creates_then_updates_in_place() {
    let h = harness();
    let first = h.state.lifecycle.save("alice", "foo", payload("v1")).await.unwrap();
    assert!(first.is_created());

    let second = h.state.lifecycle.save("alice", "foo", payload("v2")).await.unwrap();
    assert!(!second.is_created());
    assert_eq!(first.project().id, second.project().id);

    let id = first.project().id;
    let current = h.state.blobs.get(id, ArtifactKind::Assets, 0).await.unwrap();
    let previous = h.state.blobs.get(id, ArtifactKind::Assets, -1).await.unwrap();
    assert_eq!(current, Some(b"<media>v2</media>".to_vec()));
    assert_eq!(previous, Some(b"<media>v1</media>".to_vec()));
}

#[tokio::test]
async fn test_update_requires_active_project() {
    let h = harness();
    let err = h
        .state
        .lifecycle
        .update("alice", "missing", payload("v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_soft_delete_keeps_blobs() {
    let h = harness();
    let project = h.state.lifecycle.create("alice", "foo", payload("v1")).await.unwrap();

    let deleted = h.state.lifecycle.soft_delete("alice", "foo", None).await.unwrap();
    assert!(deleted.deleted.is_some());
    assert!(h.catalog.find_active("alice", "foo").await.unwrap().is_none());
    assert_eq!(h.catalog.find_tombstoned("alice", "foo").await.unwrap().len(), 1);

    let document = h.state.blobs.get(project.id, ArtifactKind::Document, 0).await.unwrap();
    assert!(document.is_some());
}

#[tokio::test]
async fn test_recreate_after_delete_purges_tombstone() {
    let h = harness();
    let old = h.state.lifecycle.create("alice", "foo", payload("old")).await.unwrap();
    h.state.lifecycle.soft_delete("alice", "foo", None).await.unwrap();

    let new = h.state.lifecycle.create("alice", "foo", payload("new")).await.unwrap();
    assert_ne!(old.id, new.id);

    assert!(h.catalog.get(old.id).await.unwrap().is_none());
    assert!(h.catalog.find_tombstoned("alice", "foo").await.unwrap().is_empty());
    assert!(!h.state.blobs.store().project_dir(old.id).exists());

    // Fresh project, no history carried over from the old one.
    let previous = h.state.blobs.get(new.id, ArtifactKind::Document, -1).await.unwrap();
    assert_eq!(previous, None);
}

#[tokio::test]
async fn test_purge_only_removes_tombstones() {
    let h = harness();
    h.state.lifecycle.create("alice", "foo", payload("v1")).await.unwrap();

    let err = h.state.lifecycle.purge("alice", "foo").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(h.catalog.find_active("alice", "foo").await.unwrap().is_some());

    h.state.lifecycle.soft_delete("alice", "foo", None).await.unwrap();
    assert_eq!(h.state.lifecycle.purge("alice", "foo").await.unwrap(), 1);
    assert_eq!(h.catalog.project_count().await, 0);
}

#[tokio::test]
async fn test_remix_survives_purge_of_original() {
    let h = harness();
    let original = h.state.lifecycle.create("bob", "pong", public_payload("pong")).await.unwrap();

    let remix = h
        .state
        .lifecycle
        .create(
            "alice",
            "my pong",
            SavePayload {
                remix_of: Some(ProjectRef {
                    owner: "bob".to_string(),
                    name: "pong".to_string(),
                }),
                ..payload("my pong")
            },
        )
        .await
        .unwrap();

    let (edge, ancestor) = h.state.lineage.find_ancestor(remix.id).await.unwrap().unwrap();
    assert_eq!(edge.original_project_id, Some(original.id));
    assert_eq!(ancestor, Ancestor::Available(original.clone()));

    let descendants = h.state.lineage.list_descendants(original.id, 1, 20).await.unwrap();
    assert_eq!(descendants.len(), 1);

    h.state.lifecycle.soft_delete("bob", "pong", None).await.unwrap();
    h.state.lifecycle.purge("bob", "pong").await.unwrap();

    let (edge, ancestor) = h.state.lineage.find_ancestor(remix.id).await.unwrap().unwrap();
    assert!(edge.is_orphaned());
    assert_eq!(ancestor, Ancestor::Unavailable);
    assert!(h.catalog.find_active("alice", "my pong").await.unwrap().is_some());
}

#[tokio::test]
async fn test_remix_of_unknown_project_is_rejected() {
    let h = harness();
    let err = h
        .state
        .lifecycle
        .create(
            "alice",
            "copy",
            SavePayload {
                remix_of: Some(ProjectRef {
                    owner: "bob".to_string(),
                    name: "nothing".to_string(),
                }),
                ..payload("copy")
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(h.catalog.project_count().await, 0);
}

#[tokio::test]
async fn test_remix_edge_is_kept_across_updates() {
    let h = harness();
    let original = h.state.lifecycle.create("bob", "pong", public_payload("pong")).await.unwrap();
    let remix_of = Some(ProjectRef {
        owner: "bob".to_string(),
        name: "pong".to_string(),
    });

    let remix = h
        .state
        .lifecycle
        .save("alice", "copy", SavePayload { remix_of: remix_of.clone(), ..payload("v1") })
        .await
        .unwrap();
    h.state
        .lifecycle
        .save("alice", "copy", SavePayload { remix_of, ..payload("v2") })
        .await
        .unwrap();

    let edges = h.state.lineage.list_descendants(original.id, 1, 20).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].remixed_project_id, remix.project().id);
}

#[tokio::test]
async fn test_embedded_thumbnail_is_used_when_none_is_given() {
    let h = harness();
    let project = h
        .state
        .lifecycle
        .create(
            "alice",
            "foo",
            SavePayload {
                document: document("hi", Some("data:image/png;base64,AAEC")),
                assets: b"<media/>".to_vec(),
                ..SavePayload::default()
            },
        )
        .await
        .unwrap();

    let thumbnail = h.state.blobs.get(project.id, ArtifactKind::Thumbnail, 0).await.unwrap();
    assert_eq!(thumbnail, Some(vec![0, 1, 2]));
}

#[tokio::test]
async fn test_derived_thumbnail_is_parsed_once() {
    let h = harness();
    let project = h
        .catalog
        .insert(&NewProject::new("alice", "foo", true, false, None, Utc::now()))
        .await
        .unwrap();
    h.state
        .blobs
        .put(
            project.id,
            ArtifactKind::Document,
            document("", Some("data:image/png;base64,AAEC")),
        )
        .await
        .unwrap();

    let first = h.state.derived.thumbnail(project.id).await.unwrap();
    let second = h.state.derived.thumbnail(project.id).await.unwrap();

    assert_eq!(first, Some(vec![0, 1, 2]));
    assert_eq!(first, second);
    assert_eq!(h.parser.calls(), 1);

    let stored = h.state.blobs.get(project.id, ArtifactKind::Thumbnail, 0).await.unwrap();
    assert_eq!(stored, Some(vec![0, 1, 2]));
}

#[tokio::test]
async fn test_missing_thumbnail_is_cached_as_none() {
    let h = harness();
    let project = h
        .catalog
        .insert(&NewProject::new("alice", "foo", true, false, None, Utc::now()))
        .await
        .unwrap();
    h.state
        .blobs
        .put(project.id, ArtifactKind::Document, document("", None))
        .await
        .unwrap();

    assert_eq!(h.state.derived.thumbnail(project.id).await.unwrap(), None);
    assert_eq!(h.state.derived.thumbnail(project.id).await.unwrap(), None);
    assert_eq!(h.parser.calls(), 1);

    let stored = h.state.blobs.get(project.id, ArtifactKind::Thumbnail, 0).await.unwrap();
    assert_eq!(stored, Some(Vec::new()));
}

#[tokio::test]
async fn test_unparseable_document_is_not_cached() {
    let h = harness();
    let project = h
        .catalog
        .insert(&NewProject::new("alice", "foo", true, false, None, Utc::now()))
        .await
        .unwrap();
    h.state
        .blobs
        .put(project.id, ArtifactKind::Document, b"<project><notes>x</scenes></project>".to_vec())
        .await
        .unwrap();

    assert_eq!(h.state.derived.thumbnail(project.id).await.unwrap(), None);
    assert_eq!(
        h.state.blobs.get(project.id, ArtifactKind::Thumbnail, 0).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_unparseable_save_leaves_thumbnail_to_derived_cache() {
    let h = harness();
    h.state.lifecycle.create("alice", "foo", payload("v1")).await.unwrap();

    let broken = SavePayload {
        document: b"<project><notes>x</scenes></project>".to_vec(),
        assets: b"<media/>".to_vec(),
        ..SavePayload::default()
    };
    let project = h.state.lifecycle.update("alice", "foo", broken).await.unwrap();

    // no "none" marker, and the previous save's thumbnail is only in history
    let blobs = &h.state.blobs;
    assert_eq!(blobs.get(project.id, ArtifactKind::Thumbnail, 0).await.unwrap(), None);
    assert_eq!(
        blobs.get(project.id, ArtifactKind::Thumbnail, -1).await.unwrap(),
        Some(b"v1".to_vec())
    );

    assert_eq!(h.state.derived.thumbnail(project.id).await.unwrap(), None);
    assert_eq!(blobs.get(project.id, ArtifactKind::Thumbnail, 0).await.unwrap(), None);
}

#[tokio::test]
async fn test_derived_notes_are_written_back() {
    let h = harness();
    let project = h
        .catalog
        .insert(&NewProject::new("alice", "foo", true, false, None, Utc::now()))
        .await
        .unwrap();
    h.state
        .blobs
        .put(project.id, ArtifactKind::Document, document("Use arrow keys", None))
        .await
        .unwrap();

    let notes = h.state.derived.notes(project.id).await.unwrap();
    assert_eq!(notes.as_deref(), Some("Use arrow keys"));

    let cached = h.catalog.get(project.id).await.unwrap().unwrap();
    assert_eq!(cached.notes.as_deref(), Some("Use arrow keys"));

    assert_eq!(h.state.derived.notes(project.id).await.unwrap(), notes);
    assert_eq!(h.parser.calls(), 1);
}

#[tokio::test]
async fn test_empty_notes_are_cached_as_none() {
    let h = harness();
    let project = h
        .catalog
        .insert(&NewProject::new("alice", "foo", true, false, None, Utc::now()))
        .await
        .unwrap();
    h.state
        .blobs
        .put(project.id, ArtifactKind::Document, b"<project/>".to_vec())
        .await
        .unwrap();

    assert_eq!(h.state.derived.notes(project.id).await.unwrap(), None);
    assert_eq!(h.state.derived.notes(project.id).await.unwrap(), None);
    assert_eq!(h.parser.calls(), 1);
}

#[tokio::test]
async fn test_last_shared_moves_only_when_sharing() {
    let h = harness();
    let created = h.state.lifecycle.create("alice", "foo", payload("v1")).await.unwrap();
    assert_eq!(created.last_shared, None);
    assert_eq!(created.first_published, None);

    let shared = h
        .state
        .lifecycle
        .set_visibility("alice", "foo", true, false, None)
        .await
        .unwrap();
    assert!(shared.last_shared.is_some());

    let again = h
        .state
        .lifecycle
        .set_visibility("alice", "foo", true, false, None)
        .await
        .unwrap();
    assert_eq!(again.last_shared, shared.last_shared);

    let published = h
        .state
        .lifecycle
        .set_visibility("alice", "foo", true, true, None)
        .await
        .unwrap();
    assert!(published.first_published.is_some());
    assert!(published.last_shared >= shared.last_shared);

    h.state
        .lifecycle
        .set_visibility("alice", "foo", true, false, None)
        .await
        .unwrap();
    let republished = h
        .state
        .lifecycle
        .set_visibility("alice", "foo", true, true, None)
        .await
        .unwrap();
    assert_eq!(republished.first_published, published.first_published);
    assert_eq!(republished.last_shared, published.last_shared);
}

#[tokio::test]
async fn test_save_that_shares_sets_last_shared() {
    let h = harness();
    let private = h.state.lifecycle.save("alice", "foo", payload("v1")).await.unwrap();
    assert_eq!(private.project().last_shared, None);

    let shared = h
        .state
        .lifecycle
        .save("alice", "foo", SavePayload { is_public: true, ..payload("v2") })
        .await
        .unwrap();
    assert!(!shared.is_created());
    let last_shared = shared.project().last_shared;
    assert!(last_shared.is_some());

    let stored = h.catalog.get(shared.project().id).await.unwrap().unwrap();
    assert_eq!(stored.last_shared, last_shared);

    // saving while already public is not a new share
    let again = h
        .state
        .lifecycle
        .update("alice", "foo", SavePayload { is_public: true, ..payload("v3") })
        .await
        .unwrap();
    assert_eq!(again.last_shared, last_shared);
}

#[tokio::test]
async fn test_first_save_verifies_account() {
    let h = harness();
    assert!(!h.catalog.is_verified("alice").await);

    h.state.lifecycle.save("alice", "foo", payload("v1")).await.unwrap();
    assert!(h.catalog.is_verified("alice").await);
}

#[tokio::test]
async fn test_moderation_reasons_notify_owner() {
    let h = harness();
    h.state.lifecycle.create("alice", "foo", public_payload("v1")).await.unwrap();

    h.state
        .lifecycle
        .set_visibility("alice", "foo", true, false, Some("broken link"))
        .await
        .unwrap();
    h.state
        .lifecycle
        .soft_delete("alice", "foo", Some("spam"))
        .await
        .unwrap();

    assert_eq!(
        h.notifier.notices(),
        vec![
            Notice::Unpublished {
                owner: "alice".to_string(),
                project: "foo".to_string(),
                reason: "broken link".to_string(),
            },
            Notice::Deleted {
                owner: "alice".to_string(),
                project: "foo".to_string(),
                reason: "spam".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_owner_actions_send_no_notice() {
    let h = harness();
    h.state.lifecycle.create("alice", "foo", public_payload("v1")).await.unwrap();

    h.state
        .lifecycle
        .set_visibility("alice", "foo", false, false, None)
        .await
        .unwrap();
    h.state.lifecycle.soft_delete("alice", "foo", None).await.unwrap();

    assert!(h.notifier.notices().is_empty());
}

#[tokio::test]
async fn test_save_without_assets_is_rejected() {
    let h = harness();
    let err = h
        .state
        .lifecycle
        .save(
            "alice",
            "foo",
            SavePayload {
                assets: Vec::new(),
                ..payload("v1")
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(h.catalog.project_count().await, 0);
}
