//! Code generation job manager.
//!
//! Owns the task state machine. Workers drive tasks forward through `mark_processing`,
//! `update_progress`, `complete_task` and `fail_task`; every step appends to the bounded
//! inline log and to the audit table.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::blob::BlobStore;
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    page_bounds, AnnotationVersion, CodeGenerationTask, CreateTaskRequest, DesignDocument,
    DownloadUrl, LogLevel, LogRing, Page, RequirementDoc, TaskError, TaskListQuery,
    TaskLogEntry, TaskLogRecord, TaskResult, TaskStatus, MAX_IN_FLIGHT_PROGRESS,
};
use crate::queue::{JobOptions, JobQueue};
use crate::services::AnnotationVersionManager;

/// Everything a worker builds an artifact from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub task: CodeGenerationTask,
    pub design: DesignDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirement_doc: Option<RequirementDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationVersion>,
}

const JOB_OPTIONS: JobOptions = JobOptions {
    remove_on_complete: true,
    remove_on_fail: false,
};

pub struct CodegenTaskManager {
    repo: Arc<Repository>,
    queue: Arc<dyn JobQueue>,
    blob: Arc<dyn BlobStore>,
    annotations: Arc<AnnotationVersionManager>,
}

impl CodegenTaskManager {
    pub fn new(
        repo: Arc<Repository>,
        queue: Arc<dyn JobQueue>,
        blob: Arc<dyn BlobStore>,
        annotations: Arc<AnnotationVersionManager>,
    ) -> Self {
        Self {
            repo,
            queue,
            blob,
            annotations,
        }
    }

    /// Validate, persist as `pending`, and enqueue a pointer to the task.
    pub async fn create_task(
        &self,
        design_id: &str,
        request: CreateTaskRequest,
        operator: &str,
    ) -> Result<CodeGenerationTask, AppError> {
        let design = self
            .repo
            .get_design(design_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Design {} not found", design_id)))?;

        let task_type = request
            .task_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Validation("taskType is required".to_string()))?;

        if let Some(doc_id) = &request.requirement_doc_id {
            let doc = self
                .repo
                .get_requirement_doc(doc_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Requirement doc {} not found", doc_id)))?;
            if doc.design_id != design_id {
                return Err(AppError::Validation(format!(
                    "Requirement doc {} does not belong to design {}",
                    doc_id, design_id
                )));
            }
        }

        let annotation_version = self
            .repo
            .latest_annotation(design_id)
            .await?
            .map(|a| a.version);

        let now = Utc::now().to_rfc3339();
        let mut logs = LogRing::default();
        logs.push(TaskLogEntry::new(
            LogLevel::Info,
            format!(
                "Task created for design revision {}{}",
                design.dsl_revision,
                annotation_version
                    .map(|v| format!(", annotation version {}", v))
                    .unwrap_or_default()
            ),
        ));

        let task = CodeGenerationTask {
            id: uuid::Uuid::new_v4().to_string(),
            design_id: design_id.to_string(),
            requirement_doc_id: request.requirement_doc_id,
            task_type,
            options: request.options.unwrap_or_else(|| json!({})),
            dsl_revision: design.dsl_revision,
            annotation_version,
            status: TaskStatus::Pending,
            progress: 0,
            logs,
            result: None,
            error: None,
            created_by: operator.to_string(),
            updated_by: operator.to_string(),
            completed_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.repo.insert_task(&task).await?;
        self.enqueue(&task.id).await?;

        tracing::info!("Created codegen task {} for design {}", task.id, design_id);
        Ok(task)
    }

    pub async fn mark_processing(&self, id: &str) -> Result<CodeGenerationTask, AppError> {
        self.transition(id, "worker", TaskStatus::Processing, false, |_| {
            Ok(Some(TaskLogEntry::new(LogLevel::Info, "Task processing started")))
        })
        .await
    }

    /// Record in-flight progress. Values are clamped to `[0, 99]`; only completion reaches 100.
    pub async fn update_progress(
        &self,
        id: &str,
        percent: i64,
        message: Option<String>,
    ) -> Result<CodeGenerationTask, AppError> {
        self.repo
            .update_task(id, "worker", false, |task| {
                if task.status != TaskStatus::Processing {
                    return Err(AppError::conflict(format!(
                        "Cannot report progress for a {} task",
                        task.status.as_str()
                    )));
                }
                task.progress = percent.clamp(0, MAX_IN_FLIGHT_PROGRESS);
                Ok(Some(TaskLogEntry::new(
                    LogLevel::Info,
                    message.unwrap_or_else(|| format!("Progress {}%", task.progress)),
                )))
            })
            .await
    }

    pub async fn complete_task(
        &self,
        id: &str,
        result: TaskResult,
    ) -> Result<CodeGenerationTask, AppError> {
        let task = self
            .transition(id, "worker", TaskStatus::Completed, false, |task| {
                let entry = TaskLogEntry::new(
                    LogLevel::Info,
                    format!(
                        "Task completed: {} ({} files, {} bytes)",
                        result.artifact_key, result.file_count, result.total_size
                    ),
                );
                task.progress = 100;
                task.result = Some(result);
                task.error = None;
                task.completed_at = Some(Utc::now().to_rfc3339());
                Ok(Some(entry))
            })
            .await?;
        tracing::info!("Codegen task {} completed", id);
        Ok(task)
    }

    pub async fn fail_task(
        &self,
        id: &str,
        error: TaskError,
    ) -> Result<CodeGenerationTask, AppError> {
        let task = self
            .transition(id, "worker", TaskStatus::Failed, false, |task| {
                let entry =
                    TaskLogEntry::new(LogLevel::Error, format!("Task failed: {}", error.message));
                task.result = None;
                task.error = Some(error);
                task.completed_at = Some(Utc::now().to_rfc3339());
                Ok(Some(entry))
            })
            .await?;
        tracing::warn!("Codegen task {} failed", id);
        Ok(task)
    }

    pub async fn cancel_task(
        &self,
        id: &str,
        operator: &str,
    ) -> Result<CodeGenerationTask, AppError> {
        self.transition(id, operator, TaskStatus::Canceled, false, |_| {
            Ok(Some(TaskLogEntry::new(LogLevel::Warn, "Task canceled")))
        })
        .await
    }

    /// Reset a failed or canceled task to `pending`, wiping its history, and enqueue it again.
    pub async fn retry_task(
        &self,
        id: &str,
        operator: &str,
    ) -> Result<CodeGenerationTask, AppError> {
        let task = self
            .transition(id, operator, TaskStatus::Pending, true, |task| {
                task.progress = 0;
                task.result = None;
                task.error = None;
                task.completed_at = None;
                task.logs.clear();
                Ok(None)
            })
            .await?;
        self.enqueue(&task.id).await?;

        tracing::info!("Codegen task {} re-queued", id);
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<CodeGenerationTask, AppError> {
        self.repo
            .get_task(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))
    }

    pub async fn list_tasks(
        &self,
        query: TaskListQuery,
    ) -> Result<Page<CodeGenerationTask>, AppError> {
        let (page, page_size, offset) = page_bounds(query.page, query.page_size);
        let (items, total) = self
            .repo
            .list_tasks(query.design_id.as_deref(), query.status, offset, page_size)
            .await?;
        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    pub async fn get_task_logs(&self, id: &str) -> Result<Vec<TaskLogRecord>, AppError> {
        self.get_task(id).await?;
        self.repo.list_task_logs(id).await
    }

    pub async fn get_download_url(&self, id: &str) -> Result<DownloadUrl, AppError> {
        let task = self.get_task(id).await?;
        let result = match (task.status, task.result) {
            (TaskStatus::Completed, Some(result)) => result,
            (status, _) => {
                return Err(AppError::NotFound(format!(
                    "Task {} has no artifact (status {})",
                    id,
                    status.as_str()
                )))
            }
        };

        Ok(DownloadUrl {
            task_id: task.id,
            url: self.blob.public_url(&result.artifact_key),
            artifact_key: result.artifact_key,
        })
    }

    /// Resolve the design, requirement doc and pinned annotation a task was submitted against.
    pub async fn load_task_context(&self, id: &str) -> Result<TaskContext, AppError> {
        let task = self.get_task(id).await?;

        let design = self
            .repo
            .get_design(&task.design_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Design {} for task {} not found",
                    task.design_id, task.id
                ))
            })?;
        if design.dsl_revision != task.dsl_revision {
            tracing::warn!(
                "Task {} was submitted at revision {}, design {} is now at {}",
                task.id,
                task.dsl_revision,
                design.id,
                design.dsl_revision
            );
        }

        let requirement_doc = match &task.requirement_doc_id {
            Some(doc_id) => Some(self.repo.get_requirement_doc(doc_id).await?.ok_or_else(
                || AppError::NotFound(format!("Requirement doc {} not found", doc_id)),
            )?),
            None => None,
        };

        let annotation = match self
            .annotations
            .get_latest_annotation(&task.design_id, task.annotation_version)
            .await
        {
            Ok(annotation) => Some(annotation),
            Err(AppError::NotFound(_)) if task.annotation_version.is_none() => None,
            Err(e) => return Err(e),
        };

        Ok(TaskContext {
            task,
            design,
            requirement_doc,
            annotation,
        })
    }

    async fn transition<F>(
        &self,
        id: &str,
        operator: &str,
        next: TaskStatus,
        purge_audit: bool,
        apply: F,
    ) -> Result<CodeGenerationTask, AppError>
    where
        F: FnOnce(&mut CodeGenerationTask) -> Result<Option<TaskLogEntry>, AppError>,
    {
        self.repo
            .update_task(id, operator, purge_audit, |task| {
                if !task.status.can_transition_to(next) {
                    return Err(AppError::conflict(format!(
                        "Illegal task transition {} -> {}",
                        task.status.as_str(),
                        next.as_str()
                    )));
                }
                task.status = next;
                apply(task)
            })
            .await
    }

    async fn enqueue(&self, task_id: &str) -> Result<(), AppError> {
        self.queue
            .enqueue(task_id, json!({ "taskId": task_id }), JOB_OPTIONS)
            .await
    }
}
