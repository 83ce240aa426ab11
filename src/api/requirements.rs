//! Requirement document endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::Operator;
use crate::models::{CreateRequirementDocRequest, RequirementDoc, RequirementExport};
use crate::AppState;

/// POST /api/designs/{id}/requirement-docs
pub async fn create_requirement_doc(
    State(state): State<AppState>,
    Path(design_id): Path<String>,
    operator: Operator,
    Json(request): Json<CreateRequirementDocRequest>,
) -> ApiResult<RequirementDoc> {
    success(
        state
            .requirements
            .create(&design_id, request, operator.as_str())
            .await?,
    )
}

/// GET /api/designs/{id}/requirement-docs
pub async fn list_requirement_docs(
    State(state): State<AppState>,
    Path(design_id): Path<String>,
) -> ApiResult<Vec<RequirementDoc>> {
    success(state.requirements.list(&design_id).await?)
}

/// GET /api/requirement-docs/{id}
pub async fn get_requirement_doc(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RequirementDoc> {
    success(state.requirements.get(&id).await?)
}

/// POST /api/requirement-docs/{id}/export - Upload as markdown.
pub async fn export_requirement_doc(
    State(state): State<AppState>,
    Path(id): Path<String>,
    operator: Operator,
) -> ApiResult<RequirementExport> {
    success(state.requirements.export(&id, operator.as_str()).await?)
}
