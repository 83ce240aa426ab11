//! Code generation task records and their audit log.

use chrono::Utc;
use sqlx::{Row, Sqlite, Transaction};

use super::repository::{parse_json_value, to_json};
use super::Repository;
use crate::errors::AppError;
use crate::models::{
    CodeGenerationTask, LogLevel, TaskError, TaskLogEntry, TaskLogRecord, TaskResult, TaskStatus,
};

const TASK_COLUMNS: &str = "id, design_id, requirement_doc_id, task_type, options, dsl_revision, annotation_version, status, progress, logs, result, error, created_by, updated_by, completed_at, created_at, updated_at";

impl Repository {
    /// Persist a new task and mirror its initial log entries into the audit table.
    pub async fn insert_task(&self, task: &CodeGenerationTask) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO codegen_tasks (id, design_id, requirement_doc_id, task_type, options, dsl_revision, annotation_version, status, progress, logs, result, error, created_by, updated_by, completed_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&task.id)
        .bind(&task.design_id)
        .bind(&task.requirement_doc_id)
        .bind(&task.task_type)
        .bind(task.options.to_string())
        .bind(task.dsl_revision)
        .bind(task.annotation_version)
        .bind(task.status.as_str())
        .bind(task.progress)
        .bind(to_json(&task.logs))
        .bind(task.result.as_ref().map(to_json))
        .bind(task.error.as_ref().map(to_json))
        .bind(&task.created_by)
        .bind(&task.updated_by)
        .bind(&task.completed_at)
        .bind(&task.created_at)
        .bind(&task.updated_at)
        .execute(&mut *tx)
        .await?;

        for entry in task.logs.iter() {
            insert_log_row(&mut tx, &task.id, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<CodeGenerationTask>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM codegen_tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(task_from_row))
    }

    /// List tasks newest first, optionally filtered by design and status.
    pub async fn list_tasks(
        &self,
        design_id: Option<&str>,
        status: Option<TaskStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<CodeGenerationTask>, i64), AppError> {
        let status = status.map(|s| s.as_str());
        let filter = "(? IS NULL OR design_id = ?) AND (? IS NULL OR status = ?)";

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM codegen_tasks WHERE {}",
            filter
        ))
        .bind(design_id)
        .bind(design_id)
        .bind(status)
        .bind(status)
        .fetch_one(&self.pool)
        .await?
        .get("total");

        let rows = sqlx::query(&format!(
            "SELECT {} FROM codegen_tasks WHERE {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            TASK_COLUMNS, filter
        ))
        .bind(design_id)
        .bind(design_id)
        .bind(status)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.iter().map(task_from_row).collect(), total))
    }

    /// Apply one state-machine step to a task.
    ///
    /// `mutate` sees the freshly loaded record and may return a log entry describing the step;
    /// the entry lands in the inline ring and in the audit table. When `purge_audit` is set the
    /// task's audit rows are deleted first. The write only succeeds if the record is unchanged
    /// since it was read.
    pub async fn update_task<F>(
        &self,
        id: &str,
        operator: &str,
        purge_audit: bool,
        mutate: F,
    ) -> Result<CodeGenerationTask, AppError>
    where
        F: FnOnce(&mut CodeGenerationTask) -> Result<Option<TaskLogEntry>, AppError>,
    {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM codegen_tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut task = row
            .as_ref()
            .map(task_from_row)
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))?;

        let previous_status = task.status;
        let previous_updated_at = task.updated_at.clone();

        let entry = mutate(&mut task)?;
        if let Some(entry) = &entry {
            task.logs.push(entry.clone());
        }
        task.updated_by = operator.to_string();
        task.updated_at = Utc::now().to_rfc3339();

        if purge_audit {
            sqlx::query("DELETE FROM codegen_task_logs WHERE task_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query(
            "UPDATE codegen_tasks SET status = ?, progress = ?, logs = ?, result = ?, error = ?, completed_at = ?, updated_by = ?, updated_at = ? WHERE id = ? AND status = ? AND updated_at = ?"
        )
        .bind(task.status.as_str())
        .bind(task.progress)
        .bind(to_json(&task.logs))
        .bind(task.result.as_ref().map(to_json))
        .bind(task.error.as_ref().map(to_json))
        .bind(&task.completed_at)
        .bind(&task.updated_by)
        .bind(&task.updated_at)
        .bind(id)
        .bind(previous_status.as_str())
        .bind(&previous_updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict(format!(
                "Task {} was modified concurrently",
                id
            )));
        }

        if let Some(entry) = &entry {
            insert_log_row(&mut tx, id, entry).await?;
        }
        tx.commit().await?;

        Ok(task)
    }

    /// Full audit history for a task, oldest first.
    pub async fn list_task_logs(&self, task_id: &str) -> Result<Vec<TaskLogRecord>, AppError> {
        let rows = sqlx::query(
            "SELECT id, task_id, level, message, created_at FROM codegen_task_logs WHERE task_id = ? ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let level: String = row.get("level");
                TaskLogRecord {
                    id: row.get("id"),
                    task_id: row.get("task_id"),
                    level: LogLevel::from_str(&level),
                    message: row.get("message"),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }
}

async fn insert_log_row(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: &str,
    entry: &TaskLogEntry,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO codegen_task_logs (task_id, level, message, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(task_id)
    .bind(entry.level.as_str())
    .bind(&entry.message)
    .bind(&entry.timestamp)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> CodeGenerationTask {
    let status: String = row.get("status");
    let logs: Option<String> = row.get("logs");
    let result: Option<String> = row.get("result");
    let error: Option<String> = row.get("error");

    CodeGenerationTask {
        id: row.get("id"),
        design_id: row.get("design_id"),
        requirement_doc_id: row.get("requirement_doc_id"),
        task_type: row.get("task_type"),
        options: parse_json_value(row.get("options")),
        dsl_revision: row.get("dsl_revision"),
        annotation_version: row.get("annotation_version"),
        status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Failed),
        progress: row.get("progress"),
        logs: logs
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        result: result.and_then(|s| serde_json::from_str::<TaskResult>(&s).ok()),
        error: error.and_then(|s| serde_json::from_str::<TaskError>(&s).ok()),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::LogRing;
    use serde_json::json;
    use tempfile::TempDir;

    fn task(id: &str, design_id: &str) -> CodeGenerationTask {
        let now = Utc::now().to_rfc3339();
        let mut logs = LogRing::default();
        logs.push(TaskLogEntry::new(LogLevel::Info, "created"));
        CodeGenerationTask {
            id: id.to_string(),
            design_id: design_id.to_string(),
            requirement_doc_id: None,
            task_type: "react".to_string(),
            options: json!({"typescript": true}),
            dsl_revision: 1,
            annotation_version: Some(2),
            status: TaskStatus::Pending,
            progress: 0,
            logs,
            result: None,
            error: None,
            created_by: "alice".to_string(),
            updated_by: "alice".to_string(),
            completed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    async fn repo() -> (Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        (Repository::new(pool), dir)
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let (repo, _dir) = repo().await;
        repo.insert_task(&task("t1", "d1")).await.unwrap();

        let loaded = repo.get_task("t1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.annotation_version, Some(2));
        assert_eq!(loaded.options, json!({"typescript": true}));
        assert_eq!(loaded.logs.len(), 1);
        assert_eq!(repo.list_task_logs("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_appends_ring_and_audit() {
        let (repo, _dir) = repo().await;
        repo.insert_task(&task("t1", "d1")).await.unwrap();

        let updated = repo
            .update_task("t1", "worker", false, |t| {
                t.status = TaskStatus::Processing;
                Ok(Some(TaskLogEntry::new(LogLevel::Info, "started")))
            })
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Processing);
        assert_eq!(updated.updated_by, "worker");

        let logs = repo.list_task_logs("t1").await.unwrap();
        assert_eq!(
            logs.iter().map(|l| l.message.as_str()).collect::<Vec<_>>(),
            vec!["created", "started"]
        );
    }

    #[tokio::test]
    async fn test_rejected_mutation_writes_nothing() {
        let (repo, _dir) = repo().await;
        repo.insert_task(&task("t1", "d1")).await.unwrap();

        let err = repo
            .update_task("t1", "worker", true, |_| {
                Err(AppError::conflict("illegal"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
        assert_eq!(repo.list_task_logs("t1").await.unwrap().len(), 1);

        let missing = repo
            .update_task("nope", "worker", false, |_| {
                Ok(Some(TaskLogEntry::new(LogLevel::Info, "x")))
            })
            .await
            .unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_purge_audit_replaces_history() {
        let (repo, _dir) = repo().await;
        repo.insert_task(&task("t1", "d1")).await.unwrap();

        repo.update_task("t1", "op", true, |t| {
            t.logs.clear();
            Ok(Some(TaskLogEntry::new(LogLevel::Info, "requeued")))
        })
        .await
        .unwrap();

        let logs = repo.list_task_logs("t1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "requeued");
        assert_eq!(repo.get_task("t1").await.unwrap().unwrap().logs.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_without_entry_leaves_no_history() {
        let (repo, _dir) = repo().await;
        repo.insert_task(&task("t1", "d1")).await.unwrap();

        let updated = repo
            .update_task("t1", "op", true, |t| {
                t.logs.clear();
                Ok(None)
            })
            .await
            .unwrap();

        assert!(updated.logs.is_empty());
        assert!(repo.get_task("t1").await.unwrap().unwrap().logs.is_empty());
        assert!(repo.list_task_logs("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (repo, _dir) = repo().await;
        repo.insert_task(&task("t1", "d1")).await.unwrap();
        repo.insert_task(&task("t2", "d1")).await.unwrap();
        repo.insert_task(&task("t3", "d2")).await.unwrap();
        repo.update_task("t2", "op", false, |t| {
            t.status = TaskStatus::Canceled;
            Ok(Some(TaskLogEntry::new(LogLevel::Warn, "canceled")))
        })
        .await
        .unwrap();

        let (_, total) = repo.list_tasks(None, None, 0, 10).await.unwrap();
        assert_eq!(total, 3);
        let (items, total) = repo.list_tasks(Some("d1"), None, 0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert!(items.iter().all(|t| t.design_id == "d1"));
        let (items, total) = repo
            .list_tasks(Some("d1"), Some(TaskStatus::Canceled), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].id, "t2");
    }
}
