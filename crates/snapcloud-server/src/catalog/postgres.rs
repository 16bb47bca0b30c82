//! PostgreSQL catalog backed by `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{already_remixed, name_taken, Catalog};
use crate::collaborators::AccountVerifier;
use crate::error::AppError;
use crate::models::{NewProject, Project, RemixEdge};

/// Catalog stored in the `projects` and `remixes` tables.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn find_active(&self, owner: &str, name: &str) -> Result<Option<Project>, AppError> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, owner, name, is_public, is_published, notes, created,
                   last_updated, last_shared, first_published, deleted
            FROM active_projects
            WHERE owner = $1 AND name = $2
            "#,
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(project)
    }

    async fn find_tombstoned(&self, owner: &str, name: &str) -> Result<Vec<Project>, AppError> {
        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, owner, name, is_public, is_published, notes, created,
                   last_updated, last_shared, first_published, deleted
            FROM tombstoned_projects
            WHERE owner = $1 AND name = $2
            ORDER BY deleted ASC, id ASC
            "#,
        )
        .bind(owner)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(projects)
    }

    async fn get(&self, id: i64) -> Result<Option<Project>, AppError> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, owner, name, is_public, is_published, notes, created,
                   last_updated, last_shared, first_published, deleted
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(project)
    }

    async fn insert(&self, project: &NewProject) -> Result<Project, AppError> {
        sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (owner, name, is_public, is_published, notes,
                                  created, last_updated, last_shared, first_published)
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7, $8)
            RETURNING id, owner, name, is_public, is_published, notes, created,
                      last_updated, last_shared, first_published, deleted
            "#,
        )
        .bind(&project.owner)
        .bind(&project.name)
        .bind(project.is_public)
        .bind(project.is_published)
        .bind(&project.notes)
        .bind(project.created)
        .bind(project.last_shared)
        .bind(project.first_published)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_catalog(e, name_taken(&project.owner, &project.name)))
    }

    async fn update(&self, project: &Project) -> Result<(), AppError> {
        // COALESCE keeps first_published monotonic even against a stale row.
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET is_public = $2,
                is_published = $3,
                notes = $4,
                last_updated = $5,
                last_shared = $6,
                first_published = COALESCE(first_published, $7)
            WHERE id = $1 AND deleted IS NULL
            "#,
        )
        .bind(project.id)
        .bind(project.is_public)
        .bind(project.is_published)
        .bind(&project.notes)
        .bind(project.last_updated)
        .bind(project.last_shared)
        .bind(project.first_published)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Active project {} not found",
                project.id
            )));
        }
        Ok(())
    }

    async fn set_notes(&self, id: i64, notes: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE projects SET notes = $2 WHERE id = $1")
            .bind(id)
            .bind(notes)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_deleted(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        let result =
            sqlx::query("UPDATE projects SET deleted = $2 WHERE id = $1 AND deleted IS NULL")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Active project {} not found", id)));
        }
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_remix(
        &self,
        original_id: i64,
        remixed_id: i64,
    ) -> Result<RemixEdge, AppError> {
        sqlx::query_as::<_, RemixEdge>(
            r#"
            INSERT INTO remixes (original_project_id, remixed_project_id, created)
            VALUES ($1, $2, NOW())
            RETURNING id, original_project_id, remixed_project_id, created
            "#,
        )
        .bind(original_id)
        .bind(remixed_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_catalog(e, already_remixed(remixed_id)))
    }

    async fn find_remix(&self, remixed_id: i64) -> Result<Option<RemixEdge>, AppError> {
        let edge = sqlx::query_as::<_, RemixEdge>(
            r#"
            SELECT id, original_project_id, remixed_project_id, created
            FROM remixes
            WHERE remixed_project_id = $1
            "#,
        )
        .bind(remixed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(edge)
    }

    async fn list_remixes(
        &self,
        original_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RemixEdge>, AppError> {
        let edges = sqlx::query_as::<_, RemixEdge>(
            r#"
            SELECT id, original_project_id, remixed_project_id, created
            FROM remixes
            WHERE original_project_id = $1
            ORDER BY created ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(original_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(edges)
    }

    async fn orphan_remixes(&self, original_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE remixes SET original_project_id = NULL WHERE original_project_id = $1",
        )
        .bind(original_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AccountVerifier for PgCatalog {
    async fn mark_verified(&self, username: &str) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE users SET verified = TRUE WHERE username = $1 AND NOT verified")
                .bind(username)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
