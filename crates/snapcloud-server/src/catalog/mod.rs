//! Relational catalog of projects and remix edges.
//!
//! There is a single logical project table: rows with a null `deleted`
//! column are active, rows with a timestamp there are tombstones. The
//! (owner, name) pair is unique among active rows only, and every backend
//! must enforce that itself so racing creates cannot both succeed.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{NewProject, Project, RemixEdge};

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// The active project with this owner and name, if any.
    async fn find_active(&self, owner: &str, name: &str) -> Result<Option<Project>, AppError>;

    /// Tombstoned projects with this owner and name, oldest deletion first.
    async fn find_tombstoned(&self, owner: &str, name: &str) -> Result<Vec<Project>, AppError>;

    /// A project by id regardless of its tombstone state.
    async fn get(&self, id: i64) -> Result<Option<Project>, AppError>;

    /// Inserts an active project. Fails with `Conflict` if the name is taken.
    async fn insert(&self, project: &NewProject) -> Result<Project, AppError>;

    /// Writes visibility, timestamps and notes of an active project.
    async fn update(&self, project: &Project) -> Result<(), AppError>;

    async fn set_notes(&self, id: i64, notes: &str) -> Result<(), AppError>;

    /// Tombstones an active project.
    async fn mark_deleted(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError>;

    /// Removes the row entirely.
    async fn remove(&self, id: i64) -> Result<(), AppError>;

    /// Fails with `Conflict` if `remixed_id` already has an edge.
    async fn insert_remix(&self, original_id: i64, remixed_id: i64)
        -> Result<RemixEdge, AppError>;

    async fn find_remix(&self, remixed_id: i64) -> Result<Option<RemixEdge>, AppError>;

    /// Edges pointing at `original_id`, ordered by creation.
    async fn list_remixes(
        &self,
        original_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RemixEdge>, AppError>;

    /// Nulls the original of every edge pointing at `original_id`.
    async fn orphan_remixes(&self, original_id: i64) -> Result<u64, AppError>;
}

pub(crate) fn name_taken(owner: &str, name: &str) -> String {
    format!("Project '{}' already exists for user '{}'", name, owner)
}

pub(crate) fn already_remixed(remixed_id: i64) -> String {
    format!("Project {} is already recorded as a remix", remixed_id)
}
