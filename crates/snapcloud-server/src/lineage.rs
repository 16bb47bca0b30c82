//! Remix lineage between projects.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::AppError;
use crate::models::{Ancestor, RemixEdge};

/// Default number of descendants per page.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Clone)]
pub struct LineageGraph {
    catalog: Arc<dyn Catalog>,
}

impl LineageGraph {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Records that `remixed_id` was copied from `original_id`.
    pub async fn record_remix(
        &self,
        original_id: i64,
        remixed_id: i64,
    ) -> Result<RemixEdge, AppError> {
        if original_id == remixed_id {
            return Err(AppError::BadRequest(format!(
                "Project {} cannot be a remix of itself",
                remixed_id
            )));
        }

        let edge = self.catalog.insert_remix(original_id, remixed_id).await?;
        tracing::info!(original_id, remixed_id, "recorded remix");
        Ok(edge)
    }

    /// Looks up where a project was remixed from.
    ///
    /// Returns `None` if the project is not a remix. An edge whose original
    /// was purged resolves to [`Ancestor::Unavailable`].
    pub async fn find_ancestor(
        &self,
        remixed_id: i64,
    ) -> Result<Option<(RemixEdge, Ancestor)>, AppError> {
        let Some(edge) = self.catalog.find_remix(remixed_id).await? else {
            return Ok(None);
        };

        let ancestor = match edge.original_project_id {
            Some(original_id) => match self.catalog.get(original_id).await? {
                Some(original) => Ancestor::Available(original),
                None => Ancestor::Unavailable,
            },
            None => Ancestor::Unavailable,
        };

        Ok(Some((edge, ancestor)))
    }

    /// One page of edges pointing at `original_id`, oldest first. Callers
    /// filter out descendants that are not publicly listed.
    pub async fn list_descendants(
        &self,
        original_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<RemixEdge>, AppError> {
        let (limit, offset) = page_window(page, page_size);
        self.catalog.list_remixes(original_id, limit, offset).await
    }

    /// Detaches every remix of `original_id` from it. Only used when the
    /// original is permanently purged.
    pub async fn orphan(&self, original_id: i64) -> Result<u64, AppError> {
        let orphaned = self.catalog.orphan_remixes(original_id).await?;
        if orphaned > 0 {
            tracing::info!(original_id, orphaned, "orphaned remix edges");
        }
        Ok(orphaned)
    }
}

/// Converts a 1-based page and a page size into `(limit, offset)`.
pub fn page_window(page: i64, page_size: i64) -> (i64, i64) {
    let size = page_size.clamp(1, MAX_PAGE_SIZE);
    let page = page.max(1);
    (size, (page - 1).saturating_mul(size))
}
