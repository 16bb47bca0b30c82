//! Project catalog record and its visibility timestamp rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A project row in the catalog. Active when `deleted` is null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Server-assigned immutable id, also the blob store key.
    pub id: i64,
    /// Username of the owning account.
    pub owner: String,
    pub name: String,
    /// Anyone with the link may open the project.
    pub is_public: bool,
    /// The project is listed in public galleries.
    pub is_published: bool,
    /// Cached notes derived from the document. Empty means "none".
    pub notes: Option<String>,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Set when the project becomes public or is first published.
    pub last_shared: Option<DateTime<Utc>>,
    /// Set once, on first publication.
    pub first_published: Option<DateTime<Utc>>,
    /// Tombstone marker.
    pub deleted: Option<DateTime<Utc>>,
}

/// Data required to insert a new active project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub owner: String,
    pub name: String,
    pub is_public: bool,
    pub is_published: bool,
    pub notes: Option<String>,
    pub created: DateTime<Utc>,
    pub last_shared: Option<DateTime<Utc>>,
    pub first_published: Option<DateTime<Utc>>,
}

impl NewProject {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        is_public: bool,
        is_published: bool,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            is_public,
            is_published,
            notes,
            created: now,
            last_shared: (is_public || is_published).then_some(now),
            first_published: is_published.then_some(now),
        }
    }
}

impl Project {
    pub fn is_active(&self) -> bool {
        self.deleted.is_none()
    }

    /// Publicly listed and not tombstoned.
    pub fn is_listed(&self) -> bool {
        self.is_active() && self.is_public && self.is_published
    }

    /// Applies new visibility flags.
    ///
    /// `last_shared` moves only when the project turns public or is published
    /// for the first time. `first_published` is written at most once.
    pub fn apply_visibility(&mut self, is_public: bool, is_published: bool, now: DateTime<Utc>) {
        let newly_public = is_public && !self.is_public;
        let first_publication = is_published && self.first_published.is_none();

        if newly_public || first_publication {
            self.last_shared = Some(now);
        }
        if first_publication {
            self.first_published = Some(now);
        }

        self.is_public = is_public;
        self.is_published = is_published;
    }
}
