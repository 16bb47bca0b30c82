//! Remix edge model for tracking project lineage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Project;

/// A directed edge from an original project to one of its remixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RemixEdge {
    pub id: i64,
    /// Null once the original has been purged.
    pub original_project_id: Option<i64>,
    /// At most one edge exists per remixed project.
    pub remixed_project_id: i64,
    pub created: DateTime<Utc>,
}

/// Answer to "what was this project remixed from".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ancestor {
    /// The original project is still in the catalog (possibly tombstoned).
    Available(Project),
    /// The edge exists but the original can no longer be traced.
    Unavailable,
}

impl RemixEdge {
    pub fn is_orphaned(&self) -> bool {
        self.original_project_id.is_none()
    }
}
