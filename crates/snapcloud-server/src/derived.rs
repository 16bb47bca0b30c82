//! Lazily derived thumbnail and notes with write-back.
//!
//! Both artifacts are a pure function of the current document, so a miss
//! parses the document once and persists the result, including a negative
//! result (an empty thumbnail blob or empty notes string). Two racing misses
//! both write the same value.

use std::sync::Arc;

use snapcloud_storage::{ArtifactKind, DocumentParser, ParsedDocument};

use crate::blobs::ProjectBlobs;
use crate::catalog::Catalog;
use crate::error::AppError;
use crate::models::Project;

#[derive(Clone)]
pub struct DerivedCache {
    catalog: Arc<dyn Catalog>,
    blobs: ProjectBlobs,
    parser: Arc<dyn DocumentParser>,
}

impl DerivedCache {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        blobs: ProjectBlobs,
        parser: Arc<dyn DocumentParser>,
    ) -> Self {
        Self {
            catalog,
            blobs,
            parser,
        }
    }

    /// The current thumbnail, generated from the document on a cache miss.
    pub async fn thumbnail(&self, project_id: i64) -> Result<Option<Vec<u8>>, AppError> {
        if let Some(stored) = self.blobs.get(project_id, ArtifactKind::Thumbnail, 0).await? {
            return Ok(non_empty(stored));
        }

        let Some(parsed) = self.parse_document(project_id).await? else {
            return Ok(None);
        };

        let thumbnail = parsed.thumbnail.unwrap_or_default();
        self.blobs
            .put(project_id, ArtifactKind::Thumbnail, thumbnail.clone())
            .await?;
        tracing::debug!(project_id, size = thumbnail.len(), "cached derived thumbnail");

        Ok(non_empty(thumbnail))
    }

    /// The project's notes, looked up by id.
    pub async fn notes(&self, project_id: i64) -> Result<Option<String>, AppError> {
        let project = self
            .catalog
            .get(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", project_id)))?;
        self.notes_for(&project).await
    }

    /// The project's notes, generated from the document when the catalog
    /// column is still null.
    pub async fn notes_for(&self, project: &Project) -> Result<Option<String>, AppError> {
        if let Some(notes) = &project.notes {
            return Ok(Some(notes.clone()).filter(|n| !n.is_empty()));
        }

        let Some(parsed) = self.parse_document(project.id).await? else {
            return Ok(None);
        };

        let notes = parsed.notes.unwrap_or_default();
        self.catalog.set_notes(project.id, &notes).await?;
        tracing::debug!(project_id = project.id, "cached derived notes");

        Ok(Some(notes).filter(|n| !n.is_empty()))
    }

    /// Parses the current document. A missing or unparseable document means
    /// no derived artifact is available.
    async fn parse_document(&self, project_id: i64) -> Result<Option<ParsedDocument>, AppError> {
        let Some(document) = self.blobs.get(project_id, ArtifactKind::Document, 0).await? else {
            tracing::warn!(project_id, "project document missing, nothing to derive");
            return Ok(None);
        };

        let parser = Arc::clone(&self.parser);
        match tokio::task::spawn_blocking(move || parser.parse(&document)).await? {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                tracing::warn!(project_id, error = %e, "could not parse project document");
                Ok(None)
            }
        }
    }
}

fn non_empty(bytes: Vec<u8>) -> Option<Vec<u8>> {
    Some(bytes).filter(|b| !b.is_empty())
}
