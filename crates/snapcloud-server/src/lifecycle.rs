//! Project lifecycle: create, save, soft-delete and purge.
//!
//! A project is Active (no `deleted` timestamp), Tombstoned (`deleted` set,
//! blobs retained) or Purged (row and blobs gone). Creating a project whose
//! name is held by a tombstone purges the tombstone first.
//!
//! Catalog and blob writes are not one transaction. A save updates the
//! catalog row, rotates history and then writes blobs; a crash in between
//! can leave history rotated without new slot-0 content. The next successful
//! save repairs it, and every save re-reads its blobs before reporting
//! success.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use snapcloud_storage::{ArtifactKind, DocumentParser};

use crate::blobs::ProjectBlobs;
use crate::catalog::Catalog;
use crate::collaborators::{AccountVerifier, Notice, Notifier};
use crate::error::AppError;
use crate::lineage::LineageGraph;
use crate::models::{NewProject, Project};

/// Longest accepted project name, in characters.
pub const MAX_NAME_LENGTH: usize = 255;

/// Reference to a project by its natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub owner: String,
    pub name: String,
}

/// Content and settings submitted by a save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavePayload {
    pub document: Vec<u8>,
    pub assets: Vec<u8>,
    /// Explicit thumbnail; derived from the document when absent.
    pub thumbnail: Option<Vec<u8>>,
    /// Explicit notes; derived lazily from the document when absent.
    pub notes: Option<String>,
    pub is_public: bool,
    pub is_published: bool,
    /// The project this one was copied from. Only honored on create.
    pub remix_of: Option<ProjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Created(Project),
    Updated(Project),
}

impl SaveOutcome {
    pub fn project(&self) -> &Project {
        match self {
            SaveOutcome::Created(project) | SaveOutcome::Updated(project) => project,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, SaveOutcome::Created(_))
    }
}

pub struct Lifecycle {
    catalog: Arc<dyn Catalog>,
    blobs: ProjectBlobs,
    parser: Arc<dyn DocumentParser>,
    lineage: LineageGraph,
    accounts: Arc<dyn AccountVerifier>,
    notifier: Arc<dyn Notifier>,
}

impl Lifecycle {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        blobs: ProjectBlobs,
        parser: Arc<dyn DocumentParser>,
        accounts: Arc<dyn AccountVerifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let lineage = LineageGraph::new(Arc::clone(&catalog));
        Self {
            catalog,
            blobs,
            parser,
            lineage,
            accounts,
            notifier,
        }
    }

    /// Creates the project if no active one has this name, otherwise updates
    /// it. A create that loses a race to a concurrent create is retried once
    /// as an update.
    pub async fn save(
        &self,
        owner: &str,
        name: &str,
        payload: SavePayload,
    ) -> Result<SaveOutcome, AppError> {
        if self.catalog.find_active(owner, name).await?.is_some() {
            return self.update(owner, name, payload).await.map(SaveOutcome::Updated);
        }

        match self.create(owner, name, payload.clone()).await {
            Ok(project) => Ok(SaveOutcome::Created(project)),
            Err(AppError::Conflict(message)) => {
                tracing::info!(owner, name, "create lost a race, saving as update: {}", message);
                self.update(owner, name, payload).await.map(SaveOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }

    /// Creates a brand-new active project.
    ///
    /// Fails with `Conflict` if an active project already has this name.
    /// Tombstones holding the name are purged first.
    pub async fn create(
        &self,
        owner: &str,
        name: &str,
        payload: SavePayload,
    ) -> Result<Project, AppError> {
        validate(owner, name, &payload)?;

        if self.catalog.find_active(owner, name).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Project '{}' already exists for user '{}'",
                name, owner
            )));
        }

        let original = match &payload.remix_of {
            Some(source) => Some(
                self.catalog
                    .find_active(&source.owner, &source.name)
                    .await?
                    .ok_or_else(|| {
                        AppError::BadRequest(format!(
                            "Remix source '{}' by '{}' not found",
                            source.name, source.owner
                        ))
                    })?,
            ),
            None => None,
        };

        for tombstone in self.catalog.find_tombstoned(owner, name).await? {
            self.retire(&tombstone).await?;
        }

        let now = Utc::now();
        let new_project = NewProject::new(
            owner,
            name,
            payload.is_public,
            payload.is_published,
            payload.notes.clone(),
            now,
        );
        let project = self.catalog.insert(&new_project).await?;

        self.write_blobs(project.id, payload).await?;

        if let Some(original) = original {
            self.lineage.record_remix(original.id, project.id).await?;
        }

        match self.accounts.mark_verified(owner).await {
            Ok(true) => tracing::info!(owner, "account verified by first project save"),
            Ok(false) => {}
            Err(e) => tracing::error!(owner, error = %e, "failed to mark account verified"),
        }

        tracing::info!(project_id = project.id, owner, name, "created project");
        Ok(project)
    }

    /// Overwrites an active project, keeping its id and lineage.
    pub async fn update(
        &self,
        owner: &str,
        name: &str,
        payload: SavePayload,
    ) -> Result<Project, AppError> {
        validate(owner, name, &payload)?;

        let mut project = self.require_active(owner, name).await?;
        let now = Utc::now();
        project.apply_visibility(payload.is_public, payload.is_published, now);
        project.last_updated = now;
        project.notes = payload.notes.clone();
        self.catalog.update(&project).await?;

        self.blobs.backup(project.id).await?;
        self.write_blobs(project.id, payload).await?;

        tracing::info!(project_id = project.id, owner, name, "updated project");
        Ok(project)
    }

    /// Changes visibility without touching content. Unpublishing with a
    /// reason notifies the owner.
    pub async fn set_visibility(
        &self,
        owner: &str,
        name: &str,
        is_public: bool,
        is_published: bool,
        reason: Option<&str>,
    ) -> Result<Project, AppError> {
        let mut project = self.require_active(owner, name).await?;
        let was_published = project.is_published;

        project.apply_visibility(is_public, is_published, Utc::now());
        self.catalog.update(&project).await?;

        if was_published && !project.is_published {
            if let Some(reason) = reason {
                self.notifier.notify(Notice::Unpublished {
                    owner: owner.to_string(),
                    project: name.to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        tracing::info!(project_id = project.id, is_public, is_published, "changed visibility");
        Ok(project)
    }

    /// Tombstones an active project. Blobs and remix edges are kept.
    pub async fn soft_delete(
        &self,
        owner: &str,
        name: &str,
        reason: Option<&str>,
    ) -> Result<Project, AppError> {
        let mut project = self.require_active(owner, name).await?;
        let now = Utc::now();
        self.catalog.mark_deleted(project.id, now).await?;
        project.deleted = Some(now);

        if let Some(reason) = reason {
            self.notifier.notify(Notice::Deleted {
                owner: owner.to_string(),
                project: name.to_string(),
                reason: reason.to_string(),
            });
        }

        tracing::info!(project_id = project.id, owner, name, "tombstoned project");
        Ok(project)
    }

    /// Permanently retires every tombstone with this name. Returns how many
    /// were purged; active projects are never purged.
    pub async fn purge(&self, owner: &str, name: &str) -> Result<usize, AppError> {
        let tombstones = self.catalog.find_tombstoned(owner, name).await?;
        if tombstones.is_empty() {
            return Err(AppError::NotFound(format!(
                "No deleted project '{}' for user '{}'",
                name, owner
            )));
        }

        for tombstone in &tombstones {
            self.retire(tombstone).await?;
        }
        Ok(tombstones.len())
    }

    /// Tombstoned -> Purged. Blobs go first so a failure leaves a tombstone
    /// that can be retired again.
    async fn retire(&self, tombstone: &Project) -> Result<(), AppError> {
        if tombstone.is_active() {
            return Err(AppError::Internal(format!(
                "Refusing to purge active project {}",
                tombstone.id
            )));
        }

        self.blobs.purge(tombstone.id).await?;
        self.lineage.orphan(tombstone.id).await?;
        self.catalog.remove(tombstone.id).await?;

        tracing::info!(
            project_id = tombstone.id,
            owner = %tombstone.owner,
            name = %tombstone.name,
            "purged project"
        );
        Ok(())
    }

    async fn require_active(&self, owner: &str, name: &str) -> Result<Project, AppError> {
        self.catalog.find_active(owner, name).await?.ok_or_else(|| {
            AppError::NotFound(format!("Project '{}' by '{}' not found", name, owner))
        })
    }

    /// Writes all three artifacts and reads them back.
    ///
    /// A thumbnail that could not be determined is left unset, so the
    /// derived cache works it out on first read.
    async fn write_blobs(&self, project_id: i64, payload: SavePayload) -> Result<(), AppError> {
        let thumbnail = match payload.thumbnail {
            Some(thumbnail) => Some(thumbnail),
            None => self.embedded_thumbnail(project_id, &payload.document).await?,
        };

        let artifacts = [
            (ArtifactKind::Document, Some(payload.document)),
            (ArtifactKind::Assets, Some(payload.assets)),
            (ArtifactKind::Thumbnail, thumbnail),
        ];

        for (kind, bytes) in &artifacts {
            match bytes {
                Some(bytes) => self.blobs.put(project_id, *kind, bytes.clone()).await?,
                None => self.blobs.remove(project_id, *kind).await?,
            }
        }

        let mut stored = Vec::with_capacity(artifacts.len());
        for (kind, _) in &artifacts {
            stored.push(self.blobs.get(project_id, *kind, 0).await?);
        }
        verify_read_back(project_id, &artifacts, &stored)
    }

    /// Thumbnail embedded in the document (empty when it has none), or
    /// `None` when the document does not parse.
    async fn embedded_thumbnail(
        &self,
        project_id: i64,
        document: &[u8],
    ) -> Result<Option<Vec<u8>>, AppError> {
        let parser = Arc::clone(&self.parser);
        let document = document.to_vec();
        match tokio::task::spawn_blocking(move || parser.parse(&document)).await? {
            Ok(parsed) => Ok(Some(parsed.thumbnail.unwrap_or_default())),
            Err(e) => {
                tracing::warn!(project_id, error = %e, "saved document could not be parsed");
                Ok(None)
            }
        }
    }
}

/// Fails with `IncompleteSave` naming every artifact whose stored bytes
/// differ from what was written.
fn verify_read_back(
    project_id: i64,
    written: &[(ArtifactKind, Option<Vec<u8>>)],
    stored: &[Option<Vec<u8>>],
) -> Result<(), AppError> {
    let missing: Vec<&str> = written
        .iter()
        .zip(stored)
        .filter(|((_, expected), actual)| expected != *actual)
        .map(|((kind, _), _)| kind.as_str())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::IncompleteSave {
            project_id,
            missing: missing.join(", "),
        })
    }
}

fn validate(owner: &str, name: &str, payload: &SavePayload) -> Result<(), AppError> {
    if owner.trim().is_empty() {
        return Err(AppError::BadRequest("Owner is required".to_string()));
    }
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("Project name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Project name exceeds {} characters",
            MAX_NAME_LENGTH
        )));
    }
    if payload.document.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::BadRequest("Project document is required".to_string()));
    }
    if payload.assets.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::BadRequest("Project assets are required".to_string()));
    }
    Ok(())
}
