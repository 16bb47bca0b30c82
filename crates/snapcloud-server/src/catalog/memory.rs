//! In-process catalog for tests and single-node development.
//!
//! State lives behind one async mutex, so the existence check and the insert
//! of `insert` happen atomically, matching the partial unique index of the
//! Postgres schema.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{already_remixed, name_taken, Catalog};
use crate::collaborators::AccountVerifier;
use crate::error::AppError;
use crate::models::{NewProject, Project, RemixEdge};

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    projects: BTreeMap<i64, Project>,
    remixes: Vec<RemixEdge>,
    verified: HashSet<String>,
    last_project_id: i64,
    last_remix_id: i64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_verified(&self, username: &str) -> bool {
        self.state.lock().await.verified.contains(username)
    }

    /// Number of rows, active and tombstoned.
    pub async fn project_count(&self) -> usize {
        self.state.lock().await.projects.len()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn find_active(&self, owner: &str, name: &str) -> Result<Option<Project>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .projects
            .values()
            .find(|p| p.is_active() && p.owner == owner && p.name == name)
            .cloned())
    }

    async fn find_tombstoned(&self, owner: &str, name: &str) -> Result<Vec<Project>, AppError> {
        let state = self.state.lock().await;
        let mut projects: Vec<Project> = state
            .projects
            .values()
            .filter(|p| !p.is_active() && p.owner == owner && p.name == name)
            .cloned()
            .collect();
        projects.sort_by_key(|p| (p.deleted, p.id));
        Ok(projects)
    }

    async fn get(&self, id: i64) -> Result<Option<Project>, AppError> {
        Ok(self.state.lock().await.projects.get(&id).cloned())
    }

    async fn insert(&self, project: &NewProject) -> Result<Project, AppError> {
        let mut state = self.state.lock().await;

        let taken = state
            .projects
            .values()
            .any(|p| p.is_active() && p.owner == project.owner && p.name == project.name);
        if taken {
            let message = name_taken(&project.owner, &project.name);
            tracing::warn!("integrity violation: {}", message);
            return Err(AppError::Conflict(message));
        }

        state.last_project_id += 1;
        let row = Project {
            id: state.last_project_id,
            owner: project.owner.clone(),
            name: project.name.clone(),
            is_public: project.is_public,
            is_published: project.is_published,
            notes: project.notes.clone(),
            created: project.created,
            last_updated: project.created,
            last_shared: project.last_shared,
            first_published: project.first_published,
            deleted: None,
        };
        state.projects.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(&self, project: &Project) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let row = state
            .projects
            .get_mut(&project.id)
            .filter(|row| row.is_active())
            .ok_or_else(|| AppError::NotFound(format!("Active project {} not found", project.id)))?;

        row.is_public = project.is_public;
        row.is_published = project.is_published;
        row.notes = project.notes.clone();
        row.last_updated = project.last_updated;
        row.last_shared = project.last_shared;
        if row.first_published.is_none() {
            row.first_published = project.first_published;
        }
        Ok(())
    }

    async fn set_notes(&self, id: i64, notes: &str) -> Result<(), AppError> {
        if let Some(row) = self.state.lock().await.projects.get_mut(&id) {
            row.notes = Some(notes.to_string());
        }
        Ok(())
    }

    async fn mark_deleted(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let row = state
            .projects
            .get_mut(&id)
            .filter(|row| row.is_active())
            .ok_or_else(|| AppError::NotFound(format!("Active project {} not found", id)))?;
        row.deleted = Some(at);
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.projects.remove(&id);
        // Mirrors ON DELETE SET NULL on remixes.original_project_id.
        for edge in state.remixes.iter_mut() {
            if edge.original_project_id == Some(id) {
                edge.original_project_id = None;
            }
        }
        Ok(())
    }

    async fn insert_remix(
        &self,
        original_id: i64,
        remixed_id: i64,
    ) -> Result<RemixEdge, AppError> {
        let mut state = self.state.lock().await;
        if state
            .remixes
            .iter()
            .any(|edge| edge.remixed_project_id == remixed_id)
        {
            return Err(AppError::Conflict(already_remixed(remixed_id)));
        }

        state.last_remix_id += 1;
        let edge = RemixEdge {
            id: state.last_remix_id,
            original_project_id: Some(original_id),
            remixed_project_id: remixed_id,
            created: Utc::now(),
        };
        state.remixes.push(edge.clone());
        Ok(edge)
    }

    async fn find_remix(&self, remixed_id: i64) -> Result<Option<RemixEdge>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .remixes
            .iter()
            .find(|edge| edge.remixed_project_id == remixed_id)
            .cloned())
    }

    async fn list_remixes(
        &self,
        original_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RemixEdge>, AppError> {
        let state = self.state.lock().await;
        let mut edges: Vec<RemixEdge> = state
            .remixes
            .iter()
            .filter(|edge| edge.original_project_id == Some(original_id))
            .cloned()
            .collect();
        edges.sort_by_key(|edge| (edge.created, edge.id));

        Ok(edges
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn orphan_remixes(&self, original_id: i64) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut orphaned = 0;
        for edge in state.remixes.iter_mut() {
            if edge.original_project_id == Some(original_id) {
                edge.original_project_id = None;
                orphaned += 1;
            }
        }
        Ok(orphaned)
    }
}

#[async_trait]
impl AccountVerifier for MemoryCatalog {
    async fn mark_verified(&self, username: &str) -> Result<bool, AppError> {
        Ok(self.state.lock().await.verified.insert(username.to_string()))
    }
}
