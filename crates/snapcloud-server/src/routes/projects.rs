//! Project endpoints.
//!
//! All routes address a project by its natural key, `/{owner}/{name}`.
//! Private projects are reported as not found to anyone but their owner
//! and moderators.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapcloud_storage::{decode_data_url, ArtifactKind, SlotInfo};

use crate::error::AppError;
use crate::lifecycle::{ProjectRef, SavePayload};
use crate::lineage::DEFAULT_PAGE_SIZE;
use crate::models::{Ancestor, Project};
use crate::routes::caller::Caller;
use crate::state::AppState;

/// Creates the projects router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/{owner}/{name}",
            post(save_project).get(get_project).delete(delete_project),
        )
        .route("/{owner}/{name}/visibility", post(set_visibility))
        .route("/{owner}/{name}/purge", post(purge_project))
        .route("/{owner}/{name}/document", get(get_document))
        .route("/{owner}/{name}/assets", get(get_assets))
        .route("/{owner}/{name}/thumbnail", get(get_thumbnail))
        .route("/{owner}/{name}/versions", get(list_versions))
        .route("/{owner}/{name}/remixes", get(list_remixes))
        .route("/{owner}/{name}/ancestor", get(get_ancestor))
        .with_state(state)
}

/// Request body for saving a project.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProjectRequest {
    /// Project XML.
    pub document: String,
    /// Media XML.
    #[serde(default)]
    pub assets: String,
    /// Thumbnail as a `data:image/png;base64,...` URL.
    pub thumbnail: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_published: bool,
    pub remix_of: Option<ProjectRef>,
}

impl SaveProjectRequest {
    fn into_payload(self) -> Result<SavePayload, AppError> {
        let thumbnail = match self.thumbnail.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(url) => Some(decode_data_url(url).ok_or_else(|| {
                AppError::BadRequest("Thumbnail must be a base64 data URL".to_string())
            })?),
        };

        Ok(SavePayload {
            document: self.document.into_bytes(),
            assets: self.assets.into_bytes(),
            thumbnail,
            notes: self.notes,
            is_public: self.is_public,
            is_published: self.is_published,
            remix_of: self.remix_of,
        })
    }
}

/// Response for a successful save.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProjectResponse {
    pub id: i64,
    pub created: bool,
    pub last_updated: String,
}

#[derive(Debug, Deserialize)]
pub struct ReasonQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    pub is_public: bool,
    pub is_published: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaQuery {
    pub delta: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: usize,
}

/// A publicly listed remix.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemixSummary {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub remixed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AncestorResponse {
    pub is_remix: bool,
    /// False when the original has been purged.
    pub available: bool,
    pub original: Option<ProjectRef>,
    pub remixed_at: Option<DateTime<Utc>>,
}

/// POST /api/v1/projects/{owner}/{name}
///
/// Creates or overwrites the caller's project.
async fn save_project(
    State(state): State<AppState>,
    caller: Caller,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<SaveProjectRequest>,
) -> Result<(StatusCode, Json<SaveProjectResponse>), AppError> {
    caller.require_owner(&owner)?;
    let payload = req.into_payload()?;

    let outcome = state.lifecycle.save(&owner, &name, payload).await?;
    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let project = outcome.project();

    Ok((
        status,
        Json(SaveProjectResponse {
            id: project.id,
            created: outcome.is_created(),
            last_updated: project.last_updated.to_rfc3339(),
        }),
    ))
}

/// GET /api/v1/projects/{owner}/{name}
///
/// Project metadata with derived notes filled in.
async fn get_project(
    State(state): State<AppState>,
    caller: Caller,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<Project>, AppError> {
    let mut project = visible_project(&state, &caller, &owner, &name).await?;
    project.notes = state.derived.notes_for(&project).await?;
    Ok(Json(project))
}

/// DELETE /api/v1/projects/{owner}/{name}?reason=...
///
/// Tombstones the project. A moderator's reason is forwarded to the owner.
async fn delete_project(
    State(state): State<AppState>,
    caller: Caller,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<ReasonQuery>,
) -> Result<StatusCode, AppError> {
    caller.require_manager(&owner)?;
    let reason = moderator_reason(&caller, &owner, query.reason.as_deref());

    state.lifecycle.soft_delete(&owner, &name, reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/projects/{owner}/{name}/visibility
async fn set_visibility(
    State(state): State<AppState>,
    caller: Caller,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<VisibilityRequest>,
) -> Result<Json<Project>, AppError> {
    caller.require_manager(&owner)?;
    let reason = moderator_reason(&caller, &owner, req.reason.as_deref());

    let project = state
        .lifecycle
        .set_visibility(&owner, &name, req.is_public, req.is_published, reason)
        .await?;
    Ok(Json(project))
}

/// POST /api/v1/projects/{owner}/{name}/purge
///
/// Permanently removes tombstoned projects with this name.
async fn purge_project(
    State(state): State<AppState>,
    caller: Caller,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<PurgeResponse>, AppError> {
    caller.require_moderator()?;
    let purged = state.lifecycle.purge(&owner, &name).await?;
    Ok(Json(PurgeResponse { purged }))
}

/// GET /api/v1/projects/{owner}/{name}/document?delta=0
async fn get_document(
    state: State<AppState>,
    caller: Caller,
    path: Path<(String, String)>,
    query: Query<DeltaQuery>,
) -> Result<Response, AppError> {
    serve_artifact(state, caller, path, query, ArtifactKind::Document).await
}

/// GET /api/v1/projects/{owner}/{name}/assets?delta=0
async fn get_assets(
    state: State<AppState>,
    caller: Caller,
    path: Path<(String, String)>,
    query: Query<DeltaQuery>,
) -> Result<Response, AppError> {
    serve_artifact(state, caller, path, query, ArtifactKind::Assets).await
}

/// GET /api/v1/projects/{owner}/{name}/thumbnail?delta=0
async fn get_thumbnail(
    state: State<AppState>,
    caller: Caller,
    path: Path<(String, String)>,
    query: Query<DeltaQuery>,
) -> Result<Response, AppError> {
    serve_artifact(state, caller, path, query, ArtifactKind::Thumbnail).await
}

async fn serve_artifact(
    State(state): State<AppState>,
    caller: Caller,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<DeltaQuery>,
    kind: ArtifactKind,
) -> Result<Response, AppError> {
    let project = visible_project(&state, &caller, &owner, &name).await?;
    let delta = query.delta.unwrap_or(0);

    // Older slots are for the owner's undo only.
    if delta != 0 {
        caller.require_manager(&owner)?;
    }

    let bytes = match (kind, delta) {
        (ArtifactKind::Thumbnail, 0) => state.derived.thumbnail(project.id).await?,
        (ArtifactKind::Thumbnail, _) => state
            .blobs
            .get(project.id, kind, delta)
            .await?
            .filter(|b| !b.is_empty()),
        _ => state.blobs.get(project.id, kind, delta).await?,
    };

    let bytes = bytes.ok_or_else(|| {
        AppError::NotFound(format!("No {} stored for '{}' at delta {}", kind, name, delta))
    })?;

    Ok(([(header::CONTENT_TYPE, kind.content_type())], bytes).into_response())
}

/// GET /api/v1/projects/{owner}/{name}/versions
async fn list_versions(
    State(state): State<AppState>,
    caller: Caller,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<Vec<SlotInfo>>, AppError> {
    caller.require_manager(&owner)?;
    let project = visible_project(&state, &caller, &owner, &name).await?;
    Ok(Json(state.blobs.history(project.id).await?))
}

/// GET /api/v1/projects/{owner}/{name}/remixes?page=1&pageSize=20
///
/// Publicly listed remixes of this project, oldest first.
async fn list_remixes(
    State(state): State<AppState>,
    caller: Caller,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<RemixSummary>>, AppError> {
    let project = visible_project(&state, &caller, &owner, &name).await?;

    let edges = state
        .lineage
        .list_descendants(
            project.id,
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;

    let mut remixes = Vec::with_capacity(edges.len());
    for edge in edges {
        let Some(remix) = state.catalog.get(edge.remixed_project_id).await? else {
            continue;
        };
        if remix.is_listed() {
            remixes.push(RemixSummary {
                id: remix.id,
                owner: remix.owner,
                name: remix.name,
                remixed_at: edge.created,
            });
        }
    }

    Ok(Json(remixes))
}

/// GET /api/v1/projects/{owner}/{name}/ancestor
async fn get_ancestor(
    State(state): State<AppState>,
    caller: Caller,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<AncestorResponse>, AppError> {
    let project = visible_project(&state, &caller, &owner, &name).await?;

    let response = match state.lineage.find_ancestor(project.id).await? {
        None => AncestorResponse {
            is_remix: false,
            available: false,
            original: None,
            remixed_at: None,
        },
        Some((edge, Ancestor::Available(original))) => AncestorResponse {
            is_remix: true,
            available: true,
            original: Some(ProjectRef {
                owner: original.owner,
                name: original.name,
            }),
            remixed_at: Some(edge.created),
        },
        Some((edge, Ancestor::Unavailable)) => AncestorResponse {
            is_remix: true,
            available: false,
            original: None,
            remixed_at: Some(edge.created),
        },
    };

    Ok(Json(response))
}

/// The active project, if the caller may see it.
async fn visible_project(
    state: &AppState,
    caller: &Caller,
    owner: &str,
    name: &str,
) -> Result<Project, AppError> {
    match state.catalog.find_active(owner, name).await? {
        Some(project) if project.is_public || caller.can_manage(owner) => Ok(project),
        _ => Err(AppError::NotFound(format!(
            "Project '{}' by '{}' not found",
            name, owner
        ))),
    }
}

/// Reasons are only forwarded when someone other than the owner acts.
fn moderator_reason<'a>(caller: &Caller, owner: &str, reason: Option<&'a str>) -> Option<&'a str> {
    if caller.is_owner(owner) {
        return None;
    }
    reason.map(str::trim).filter(|r| !r.is_empty())
}
