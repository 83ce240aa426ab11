//! Design document endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{success, ApiResult};
use crate::auth::Operator;
use crate::models::{
    CreateDesignRequest, DesignDocument, DesignListQuery, DesignWriteResult, DslSnapshot, Page,
    UpdateDesignRequest,
};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DslQuery {
    #[serde(default)]
    pub revision: Option<i64>,
}

/// GET /api/designs - List design documents.
pub async fn list_designs(
    State(state): State<AppState>,
    Query(query): Query<DesignListQuery>,
) -> ApiResult<Page<DesignDocument>> {
    success(state.designs.list_designs(query).await?)
}

/// POST /api/designs - Ingest a new design.
pub async fn create_design(
    State(state): State<AppState>,
    operator: Operator,
    Json(request): Json<CreateDesignRequest>,
) -> ApiResult<DesignWriteResult> {
    success(
        state
            .designs
            .create_design(request, operator.as_str())
            .await?,
    )
}

/// GET /api/designs/{id} - Get a design document.
pub async fn get_design(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DesignDocument> {
    success(state.designs.get_design(&id).await?)
}

/// PUT /api/designs/{id} - Update metadata and/or DSL.
pub async fn update_design(
    State(state): State<AppState>,
    Path(id): Path<String>,
    operator: Operator,
    Json(request): Json<UpdateDesignRequest>,
) -> ApiResult<DesignWriteResult> {
    success(
        state
            .designs
            .update_design(&id, request, operator.as_str())
            .await?,
    )
}

/// DELETE /api/designs/{id} - Soft-delete a design.
pub async fn delete_design(
    State(state): State<AppState>,
    Path(id): Path<String>,
    operator: Operator,
) -> ApiResult<DesignDocument> {
    success(state.designs.delete_design(&id, operator.as_str()).await?)
}

/// GET /api/designs/{id}/dsl - Current DSL, optionally checked against a revision.
pub async fn get_design_dsl(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DslQuery>,
) -> ApiResult<DslSnapshot> {
    success(state.designs.get_design_dsl(&id, query.revision).await?)
}
