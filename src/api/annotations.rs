//! Annotation endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::Operator;
use crate::models::{AnnotationDiff, AnnotationVersion, DiffQuery, SaveAnnotationRequest, VersionQuery};
use crate::AppState;

/// POST /api/designs/{id}/annotations - Save an annotation version.
pub async fn save_annotation(
    State(state): State<AppState>,
    Path(design_id): Path<String>,
    operator: Operator,
    Json(request): Json<SaveAnnotationRequest>,
) -> ApiResult<AnnotationVersion> {
    success(
        state
            .annotations
            .save_annotation(&design_id, request, operator.as_str())
            .await?,
    )
}

/// GET /api/designs/{id}/annotations - Latest annotation, or `?version=n`.
pub async fn get_annotation(
    State(state): State<AppState>,
    Path(design_id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> ApiResult<AnnotationVersion> {
    success(
        state
            .annotations
            .get_latest_annotation(&design_id, query.version)
            .await?,
    )
}

/// GET /api/designs/{id}/annotations/diff?from=a&to=b
pub async fn diff_annotations(
    State(state): State<AppState>,
    Path(design_id): Path<String>,
    Query(query): Query<DiffQuery>,
) -> ApiResult<AnnotationDiff> {
    success(
        state
            .annotations
            .diff_annotations(&design_id, query.from, query.to)
            .await?,
    )
}
