//! Code generation task endpoints, including the worker-facing state updates.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{success, ApiResult};
use crate::auth::Operator;
use crate::models::{
    CodeGenerationTask, CreateTaskRequest, DownloadUrl, Page, TaskError, TaskListQuery,
    TaskLogRecord, TaskResult,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// POST /api/designs/{id}/tasks - Submit a code generation task.
pub async fn create_task(
    State(state): State<AppState>,
    Path(design_id): Path<String>,
    operator: Operator,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<CodeGenerationTask> {
    success(
        state
            .tasks
            .create_task(&design_id, request, operator.as_str())
            .await?,
    )
}

/// GET /api/tasks - List tasks, filterable by `designId` and `status`.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Page<CodeGenerationTask>> {
    success(state.tasks.list_tasks(query).await?)
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CodeGenerationTask> {
    success(state.tasks.get_task(&id).await?)
}

/// GET /api/tasks/{id}/logs - Full audit history.
pub async fn get_task_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<TaskLogRecord>> {
    success(state.tasks.get_task_logs(&id).await?)
}

/// GET /api/tasks/{id}/download-url
pub async fn get_download_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DownloadUrl> {
    success(state.tasks.get_download_url(&id).await?)
}

/// POST /api/tasks/{id}/retry
pub async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    operator: Operator,
) -> ApiResult<CodeGenerationTask> {
    success(state.tasks.retry_task(&id, operator.as_str()).await?)
}

/// POST /api/tasks/{id}/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    operator: Operator,
) -> ApiResult<CodeGenerationTask> {
    success(state.tasks.cancel_task(&id, operator.as_str()).await?)
}

/// POST /api/tasks/{id}/processing - Worker claims the task.
pub async fn mark_processing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CodeGenerationTask> {
    success(state.tasks.mark_processing(&id).await?)
}

/// POST /api/tasks/{id}/progress
pub async fn update_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<CodeGenerationTask> {
    success(
        state
            .tasks
            .update_progress(&id, request.progress, request.message)
            .await?,
    )
}

/// POST /api/tasks/{id}/complete
pub async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(result): Json<TaskResult>,
) -> ApiResult<CodeGenerationTask> {
    success(state.tasks.complete_task(&id, result).await?)
}

/// POST /api/tasks/{id}/fail
pub async fn fail_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(error): Json<TaskError>,
) -> ApiResult<CodeGenerationTask> {
    success(state.tasks.fail_task(&id, error).await?)
}
