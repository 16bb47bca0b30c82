//! Seams to services owned by the surrounding application.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;

/// Sets the "verified" flag on an account.
#[async_trait]
pub trait AccountVerifier: Send + Sync {
    /// Returns true if the flag changed.
    async fn mark_verified(&self, username: &str) -> Result<bool, AppError>;
}

/// A moderation notice for a project owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    Unpublished {
        owner: String,
        project: String,
        reason: String,
    },
    Deleted {
        owner: String,
        project: String,
        reason: String,
    },
}

impl Notice {
    pub fn owner(&self) -> &str {
        match self {
            Notice::Unpublished { owner, .. } | Notice::Deleted { owner, .. } => owner,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Notice::Unpublished { project, .. } => {
                format!("Your project \"{}\" has been unpublished", project)
            }
            Notice::Deleted { project, .. } => {
                format!("Your project \"{}\" has been deleted", project)
            }
        }
    }
}

/// Fire-and-forget delivery of notices. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier that only records notices in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        tracing::info!(
            owner = notice.owner(),
            subject = %notice.subject(),
            notice = ?notice,
            "owner notification"
        );
    }
}
