//! Annotation version records.

use chrono::Utc;
use sqlx::Row;

use super::repository::{parse_json_array, to_json};
use super::Repository;
use crate::errors::AppError;
use crate::models::{AnnotationNode, AnnotationStatus, AnnotationVersion};

const ANNOTATION_COLUMNS: &str = "design_id, version, root_annotation, expanded_keys, schema_version, status, created_by, updated_by, created_at, updated_at";

impl Repository {
    /// Read one exact version regardless of its status.
    pub async fn get_annotation_version(
        &self,
        design_id: &str,
        version: i64,
    ) -> Result<Option<AnnotationVersion>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM annotation_versions WHERE design_id = ? AND version = ?",
            ANNOTATION_COLUMNS
        ))
        .bind(design_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(annotation_from_row).transpose()
    }

    /// The active version, falling back to the highest version when none is active.
    pub async fn latest_annotation(
        &self,
        design_id: &str,
    ) -> Result<Option<AnnotationVersion>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM annotation_versions WHERE design_id = ? ORDER BY CASE status WHEN 'active' THEN 0 ELSE 1 END, version DESC LIMIT 1",
            ANNOTATION_COLUMNS
        ))
        .bind(design_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(annotation_from_row).transpose()
    }

    pub async fn max_annotation_version(&self, design_id: &str) -> Result<Option<i64>, AppError> {
        let row = sqlx::query(
            "SELECT MAX(version) AS max_version FROM annotation_versions WHERE design_id = ?",
        )
        .bind(design_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("max_version"))
    }

    /// Insert a new active version and archive every sibling in one transaction. Returns the
    /// versions that were archived by this call.
    ///
    /// A racing writer that claimed the same version number loses on the unique index.
    pub async fn insert_annotation_version(
        &self,
        annotation: &AnnotationVersion,
    ) -> Result<Vec<i64>, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO annotation_versions (id, design_id, version, root_annotation, expanded_keys, schema_version, status, created_by, updated_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&annotation.design_id)
        .bind(annotation.version)
        .bind(to_json(&annotation.root_annotation))
        .bind(to_json(&annotation.expanded_keys))
        .bind(&annotation.schema_version)
        .bind(AnnotationStatus::Active.as_str())
        .bind(&annotation.created_by)
        .bind(&annotation.updated_by)
        .bind(&annotation.created_at)
        .bind(&annotation.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &inserted {
            if db_err.is_unique_violation() {
                return Err(AppError::Conflict {
                    message: format!(
                        "Annotation version {} already exists for design {}",
                        annotation.version, annotation.design_id
                    ),
                    current_version: annotation.version,
                });
            }
        }
        inserted?;

        let archived = sqlx::query(
            "UPDATE annotation_versions SET status = ?, updated_at = ? WHERE design_id = ? AND version != ? AND status != ? RETURNING version",
        )
        .bind(AnnotationStatus::Archived.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(&annotation.design_id)
        .bind(annotation.version)
        .bind(AnnotationStatus::Archived.as_str())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(archived.iter().map(|row| row.get("version")).collect())
    }

    /// Amend an existing version in place. Status and creation fields are kept.
    pub async fn overwrite_annotation_version(
        &self,
        annotation: &AnnotationVersion,
    ) -> Result<AnnotationVersion, AppError> {
        let result = sqlx::query(
            "UPDATE annotation_versions SET root_annotation = ?, expanded_keys = ?, schema_version = ?, updated_by = ?, updated_at = ? WHERE design_id = ? AND version = ?"
        )
        .bind(to_json(&annotation.root_annotation))
        .bind(to_json(&annotation.expanded_keys))
        .bind(&annotation.schema_version)
        .bind(&annotation.updated_by)
        .bind(&annotation.updated_at)
        .bind(&annotation.design_id)
        .bind(annotation.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Annotation version {} not found for design {}",
                annotation.version, annotation.design_id
            )));
        }

        self.get_annotation_version(&annotation.design_id, annotation.version)
            .await?
            .ok_or_else(|| AppError::Internal("Annotation vanished after overwrite".to_string()))
    }

    /// Statuses of every stored version, ascending by version.
    pub async fn annotation_statuses(
        &self,
        design_id: &str,
    ) -> Result<Vec<(i64, AnnotationStatus)>, AppError> {
        let rows = sqlx::query(
            "SELECT version, status FROM annotation_versions WHERE design_id = ? ORDER BY version",
        )
        .bind(design_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let status: String = row.get("status");
                (
                    row.get("version"),
                    AnnotationStatus::from_str(&status).unwrap_or(AnnotationStatus::Archived),
                )
            })
            .collect())
    }
}

fn annotation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AnnotationVersion, AppError> {
    let root: String = row.get("root_annotation");
    let root_annotation: AnnotationNode = serde_json::from_str(&root)
        .map_err(|e| AppError::Internal(format!("Corrupt annotation tree: {}", e)))?;
    let status: String = row.get("status");

    Ok(AnnotationVersion {
        design_id: row.get("design_id"),
        version: row.get("version"),
        root_annotation,
        expanded_keys: parse_json_array(row.get("expanded_keys")),
        schema_version: row.get("schema_version"),
        status: AnnotationStatus::from_str(&status).unwrap_or(AnnotationStatus::Archived),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use serde_json::json;
    use tempfile::TempDir;

    fn version(design_id: &str, version: i64, name: &str) -> AnnotationVersion {
        let now = Utc::now().to_rfc3339();
        let root: AnnotationNode =
            serde_json::from_value(json!({"id": "root", "name": name, "isContainer": true}))
                .unwrap();
        AnnotationVersion {
            design_id: design_id.to_string(),
            version,
            root_annotation: root,
            expanded_keys: vec!["root".to_string()],
            schema_version: "1.0".to_string(),
            status: AnnotationStatus::Active,
            created_by: "alice".to_string(),
            updated_by: "alice".to_string(),
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
    async fn test_insert_archives_siblings() {
        let (repo, _dir) = repo().await;
        let first = repo.insert_annotation_version(&version("d", 1, "v1")).await.unwrap();
        assert!(first.is_empty());
        let archived = repo.insert_annotation_version(&version("d", 2, "v2")).await.unwrap();
        assert_eq!(archived, vec![1]);

        assert_eq!(
            repo.annotation_statuses("d").await.unwrap(),
            vec![(1, AnnotationStatus::Archived), (2, AnnotationStatus::Active)]
        );
        assert_eq!(repo.max_annotation_version("d").await.unwrap(), Some(2));
        assert_eq!(repo.max_annotation_version("other").await.unwrap(), None);
        assert_eq!(repo.latest_annotation("d").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_duplicate_version_is_conflict() {
        let (repo, _dir) = repo().await;
        repo.insert_annotation_version(&version("d", 1, "v1")).await.unwrap();

        let err = repo
            .insert_annotation_version(&version("d", 1, "again"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
        let stored = repo.get_annotation_version("d", 1).await.unwrap().unwrap();
        assert_eq!(stored.root_annotation.name.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_overwrite_keeps_status() {
        let (repo, _dir) = repo().await;
        repo.insert_annotation_version(&version("d", 1, "v1")).await.unwrap();
        repo.insert_annotation_version(&version("d", 2, "v2")).await.unwrap();

        let amended = repo
            .overwrite_annotation_version(&version("d", 1, "amended"))
            .await
            .unwrap();
        assert_eq!(amended.status, AnnotationStatus::Archived);
        assert_eq!(amended.root_annotation.name.as_deref(), Some("amended"));

        let missing = repo
            .overwrite_annotation_version(&version("d", 9, "nope"))
            .await
            .unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }
}
