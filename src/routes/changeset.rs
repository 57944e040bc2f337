//! Changeset route handlers
//!
//! Compile, validate, apply and revert declarative changesets.

use crate::changeset::{ChangesetFilter, ChangesetPreview, ChangesetRecord};
use crate::error::{validation_error, ApiResult};
use crate::models::{AbandonChangesetRequest, CompileChangesetRequest, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

const MAX_LIST_LIMIT: usize = 500;

/// Compile and locally validate without persisting
pub async fn preview_changeset(
    State(state): State<SharedState>,
    Json(payload): Json<CompileChangesetRequest>,
) -> ApiResult<Json<SuccessResponse<ChangesetPreview>>> {
    payload
        .validate()
        .map_err(|e| validation_error(e.to_string()))?;

    let (request, _) = payload.into_parts();
    debug!("Previewing changeset '{}' for module {}", request.title, request.module);

    let preview = state.changesets.preview(&request);
    let message = if preview.errors.is_empty() {
        "Changeset compiled."
    } else {
        "Changeset compiled with model errors."
    };

    Ok(Json(SuccessResponse::with_data(message, preview)))
}

/// Compile, validate against the target and persist
pub async fn create_changeset(
    State(state): State<SharedState>,
    Json(payload): Json<CompileChangesetRequest>,
) -> ApiResult<Json<SuccessResponse<ChangesetRecord>>> {
    payload
        .validate()
        .map_err(|e| validation_error(e.to_string()))?;

    let (request, created_by) = payload.into_parts();
    let record = state.changesets.create_draft(&request, created_by).await?;

    info!("Changeset {} created ({})", record.id, record.status);

    Ok(Json(SuccessResponse::with_data(
        format!("Changeset created with status '{}'.", record.status),
        record,
    )))
}

/// Persist a draft without remote validation
pub async fn save_draft(
    State(state): State<SharedState>,
    Json(payload): Json<CompileChangesetRequest>,
) -> ApiResult<Json<SuccessResponse<ChangesetRecord>>> {
    payload
        .validate()
        .map_err(|e| validation_error(e.to_string()))?;

    let (request, created_by) = payload.into_parts();
    let record = state.changesets.save_draft(&request, created_by).await?;

    Ok(Json(SuccessResponse::with_data("Draft saved.", record)))
}

/// List changesets, newest first
pub async fn list_changesets(
    State(state): State<SharedState>,
    Query(mut filter): Query<ChangesetFilter>,
) -> ApiResult<Json<SuccessResponse<Vec<ChangesetRecord>>>> {
    filter.limit = Some(filter.limit.unwrap_or(MAX_LIST_LIMIT).min(MAX_LIST_LIMIT));

    let records = state.changesets.list(&filter).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("{} changeset(s) found.", records.len()),
        records,
    )))
}

/// Get a single changeset
pub async fn get_changeset(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ChangesetRecord>>> {
    let record = state.changesets.get(id).await?;
    Ok(Json(SuccessResponse::with_data("Changeset found.", record)))
}

/// Run remote validation for a stored draft
pub async fn validate_changeset(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ChangesetRecord>>> {
    let record = state.changesets.validate(id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Changeset is now '{}'.", record.status),
        record,
    )))
}

/// Apply a validated changeset
pub async fn apply_changeset(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ChangesetRecord>>> {
    let record = state.changesets.apply(id).await?;
    Ok(Json(SuccessResponse::with_data("Changeset applied.", record)))
}

/// Revert an applied changeset
pub async fn revert_changeset(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ChangesetRecord>>> {
    let record = state.changesets.revert(id).await?;
    Ok(Json(SuccessResponse::with_data("Changeset reverted.", record)))
}

/// Mark a validated changeset as failed
pub async fn abandon_changeset(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AbandonChangesetRequest>,
) -> ApiResult<Json<SuccessResponse<ChangesetRecord>>> {
    payload
        .validate()
        .map_err(|e| validation_error(e.to_string()))?;

    let record = state.changesets.abandon(id, payload.reason).await?;
    Ok(Json(SuccessResponse::with_data("Changeset abandoned.", record)))
}
