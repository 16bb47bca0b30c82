//! Caller identity supplied by the upstream authentication layer.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;

/// Header carrying the authenticated username.
pub const USER_HEADER: &str = "x-snapcloud-user";

/// Header carrying the caller's role (`moderator` or `admin` grant moderation).
pub const ROLE_HEADER: &str = "x-snapcloud-role";

/// Who is making the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub username: Option<String>,
    pub is_moderator: bool,
}

impl Caller {
    pub fn is_owner(&self, owner: &str) -> bool {
        self.username.as_deref() == Some(owner)
    }

    /// Owner or moderator.
    pub fn can_manage(&self, owner: &str) -> bool {
        self.is_owner(owner) || self.is_moderator
    }

    pub fn require_owner(&self, owner: &str) -> Result<(), AppError> {
        match &self.username {
            None => Err(AppError::Forbidden("Sign in required".to_string())),
            Some(_) if self.is_owner(owner) => Ok(()),
            Some(_) => Err(AppError::Forbidden(format!(
                "Only '{}' can modify this project",
                owner
            ))),
        }
    }

    pub fn require_manager(&self, owner: &str) -> Result<(), AppError> {
        if self.can_manage(owner) {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Only the owner or a moderator can do this".to_string(),
            ))
        }
    }

    pub fn require_moderator(&self) -> Result<(), AppError> {
        if self.is_moderator {
            Ok(())
        } else {
            Err(AppError::Forbidden("Moderator role required".to_string()))
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(String::from)
        };

        let username = header(USER_HEADER);
        let is_moderator = username.is_some()
            && matches!(
                header(ROLE_HEADER).as_deref().map(str::to_ascii_lowercase).as_deref(),
                Some("moderator") | Some("admin")
            );

        Ok(Caller {
            username,
            is_moderator,
        })
    }
}
