//! Database repository for design documents and requirement documents.
//!
//! Annotation, asset and task operations live in sibling modules as further `impl` blocks.

use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    DesignDocument, DesignStatus, RequirementDoc, UpdateDesignRequest,
};

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
}

/// A new DSL body together with its digest.
#[derive(Debug, Clone)]
pub struct DslWrite {
    pub dsl: Value,
    pub digest: String,
}

const DESIGN_COLUMNS: &str = "id, name, description, dsl_data, dsl_revision, dsl_digest, source_url, component_document_links, status, tags, created_by, updated_by, created_at, updated_at";

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== DESIGN OPERATIONS ====================

    /// Insert a freshly ingested design document.
    pub async fn create_design(&self, doc: &DesignDocument) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO design_documents (id, name, description, dsl_data, dsl_revision, dsl_digest, source_url, component_document_links, status, tags, created_by, updated_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&doc.id)
        .bind(&doc.name)
        .bind(&doc.description)
        .bind(doc.dsl_data.to_string())
        .bind(doc.dsl_revision)
        .bind(&doc.dsl_digest)
        .bind(&doc.source_url)
        .bind(to_json(&doc.component_document_links))
        .bind(doc.status.as_str())
        .bind(to_json(&doc.tags))
        .bind(&doc.created_by)
        .bind(&doc.updated_by)
        .bind(&doc.created_at)
        .bind(&doc.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a design document by ID.
    pub async fn get_design(&self, id: &str) -> Result<Option<DesignDocument>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM design_documents WHERE id = ?",
            DESIGN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(design_from_row))
    }

    /// List design documents, newest first. Deleted documents only appear when asked for.
    pub async fn list_designs(
        &self,
        status: Option<DesignStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<DesignDocument>, i64), AppError> {
        let (filter, value) = match status {
            Some(status) => ("status = ?", status.as_str()),
            None => ("status != ?", DesignStatus::Deleted.as_str()),
        };

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM design_documents WHERE {}",
            filter
        ))
        .bind(value)
        .fetch_one(&self.pool)
        .await?
        .get("total");

        let rows = sqlx::query(&format!(
            "SELECT {} FROM design_documents WHERE {} ORDER BY updated_at DESC, id LIMIT ? OFFSET ?",
            DESIGN_COLUMNS, filter
        ))
        .bind(value)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.iter().map(design_from_row).collect(), total))
    }

    /// Update a design document with optimistic concurrency control on `dsl_revision`.
    ///
    /// The revision advances by exactly one when `dsl` is given; metadata-only updates keep it.
    pub async fn update_design(
        &self,
        id: &str,
        request: &UpdateDesignRequest,
        dsl: Option<DslWrite>,
        operator: &str,
    ) -> Result<DesignDocument, AppError> {
        let existing = self
            .get_design(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Design {} not found", id)))?;

        // Check revision for optimistic concurrency
        if let Some(expected) = request.expected_revision {
            if existing.dsl_revision != expected {
                return Err(AppError::Conflict {
                    message: format!(
                        "Revision mismatch: expected {}, current {}",
                        expected, existing.dsl_revision
                    ),
                    current_version: existing.dsl_revision,
                });
            }
        }

        // Only the fields the request carries are written, so a concurrent update of other
        // fields at the same revision is not overwritten with values read above.
        let (description_given, description) = match &request.description {
            Some(value) => (true, value.as_deref()),
            None => (false, None),
        };
        let revision_step: i64 = if dsl.is_some() { 1 } else { 0 };

        // Conditional UPDATE closes the window between the read above and this write
        let row = sqlx::query(&format!(
            "UPDATE design_documents SET name = COALESCE(?, name), description = CASE WHEN ? THEN ? ELSE description END, tags = COALESCE(?, tags), status = COALESCE(?, status), dsl_data = COALESCE(?, dsl_data), dsl_digest = COALESCE(?, dsl_digest), dsl_revision = dsl_revision + ?, updated_by = ?, updated_at = ? WHERE id = ? AND dsl_revision = ? RETURNING {}",
            DESIGN_COLUMNS
        ))
        .bind(request.name.as_deref())
        .bind(description_given)
        .bind(description)
        .bind(request.tags.as_ref().map(to_json))
        .bind(request.status.map(|s| s.as_str()))
        .bind(dsl.as_ref().map(|write| write.dsl.to_string()))
        .bind(dsl.as_ref().map(|write| write.digest.as_str()))
        .bind(revision_step)
        .bind(operator)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(existing.dsl_revision)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(design_from_row(&row)),
            None => {
                let current = self.get_design(id).await?;
                Err(AppError::Conflict {
                    message: "Concurrent modification detected".to_string(),
                    current_version: current.map(|d| d.dsl_revision).unwrap_or(0),
                })
            }
        }
    }

    // ==================== REQUIREMENT DOC OPERATIONS ====================

    pub async fn create_requirement_doc(&self, doc: &RequirementDoc) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO requirement_docs (id, design_id, title, content, export_key, created_by, updated_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&doc.id)
        .bind(&doc.design_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.export_key)
        .bind(&doc.created_by)
        .bind(&doc.updated_by)
        .bind(&doc.created_at)
        .bind(&doc.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_requirement_doc(&self, id: &str) -> Result<Option<RequirementDoc>, AppError> {
        let row = sqlx::query(
            "SELECT id, design_id, title, content, export_key, created_by, updated_by, created_at, updated_at FROM requirement_docs WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(requirement_doc_from_row))
    }

    pub async fn list_requirement_docs(
        &self,
        design_id: &str,
    ) -> Result<Vec<RequirementDoc>, AppError> {
        let rows = sqlx::query(
            "SELECT id, design_id, title, content, export_key, created_by, updated_by, created_at, updated_at FROM requirement_docs WHERE design_id = ? ORDER BY created_at"
        )
        .bind(design_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(requirement_doc_from_row).collect())
    }

    pub async fn set_requirement_export_key(
        &self,
        id: &str,
        key: &str,
        operator: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE requirement_docs SET export_key = ?, updated_by = ?, updated_at = ? WHERE id = ?",
        )
        .bind(key)
        .bind(operator)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Requirement doc {} not found",
                id
            )));
        }
        Ok(())
    }
}

// Helper functions for row conversion

pub(super) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

pub(super) fn parse_json_value(s: Option<String>) -> Value {
    s.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

pub(super) fn parse_json_array(s: Option<String>) -> Vec<String> {
    s.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn design_from_row(row: &sqlx::sqlite::SqliteRow) -> DesignDocument {
    let status: String = row.get("status");
    DesignDocument {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        dsl_data: parse_json_value(row.get("dsl_data")),
        dsl_revision: row.get("dsl_revision"),
        dsl_digest: row.get("dsl_digest"),
        source_url: row.get("source_url"),
        component_document_links: parse_json_array(row.get("component_document_links")),
        status: DesignStatus::from_str(&status).unwrap_or(DesignStatus::Active),
        tags: parse_json_array(row.get("tags")),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn requirement_doc_from_row(row: &sqlx::sqlite::SqliteRow) -> RequirementDoc {
    RequirementDoc {
        id: row.get("id"),
        design_id: row.get("design_id"),
        title: row.get("title"),
        content: row.get("content"),
        export_key: row.get("export_key"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        (Repository::new(pool), dir)
    }

    fn doc(id: &str) -> DesignDocument {
        let now = Utc::now().to_rfc3339();
        DesignDocument {
            id: id.to_string(),
            name: format!("Design {}", id),
            description: None,
            dsl_data: json!({"nodes": []}),
            dsl_revision: 1,
            dsl_digest: "d1".to_string(),
            source_url: None,
            component_document_links: vec!["https://docs/button".to_string()],
            status: DesignStatus::Active,
            tags: vec!["mobile".to_string()],
            created_by: "alice".to_string(),
            updated_by: "alice".to_string(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_design_round_trip() {
        let (repo, _dir) = repo().await;
        repo.create_design(&doc("a")).await.unwrap();

        let loaded = repo.get_design("a").await.unwrap().unwrap();
        assert_eq!(loaded.dsl_revision, 1);
        assert_eq!(loaded.tags, vec!["mobile"]);
        assert_eq!(loaded.component_document_links, vec!["https://docs/button"]);
        assert_eq!(loaded.dsl_data, json!({"nodes": []}));
        assert!(repo.get_design("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_with_stale_revision_is_rejected() {
        let (repo, _dir) = repo().await;
        repo.create_design(&doc("a")).await.unwrap();

        let write = DslWrite {
            dsl: json!({"nodes": [1]}),
            digest: "d2".to_string(),
        };
        let request = UpdateDesignRequest {
            expected_revision: Some(1),
            ..Default::default()
        };
        let updated = repo
            .update_design("a", &request, Some(write.clone()), "bob")
            .await
            .unwrap();
        assert_eq!(updated.dsl_revision, 2);
        assert_eq!(updated.updated_by, "bob");

        let err = repo
            .update_design("a", &request, Some(write), "bob")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Conflict {
                current_version: 2,
                ..
            }
        ));
        assert_eq!(repo.get_design("a").await.unwrap().unwrap().dsl_revision, 2);
    }

    #[tokio::test]
    async fn test_metadata_update_keeps_revision() {
        let (repo, _dir) = repo().await;
        repo.create_design(&doc("a")).await.unwrap();

        let request = UpdateDesignRequest {
            name: Some("Renamed".to_string()),
            status: Some(DesignStatus::Archived),
            ..Default::default()
        };
        let updated = repo.update_design("a", &request, None, "bob").await.unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.status, DesignStatus::Archived);
        assert_eq!(updated.dsl_revision, 1);
        assert_eq!(updated.dsl_digest, "d1");
    }

    #[tokio::test]
    async fn test_update_writes_only_supplied_fields() {
        let (repo, _dir) = repo().await;
        repo.create_design(&doc("a")).await.unwrap();

        let describe: UpdateDesignRequest =
            serde_json::from_value(json!({"description": "Landing page", "tags": ["web"]}))
                .unwrap();
        repo.update_design("a", &describe, None, "bob").await.unwrap();

        let write = DslWrite {
            dsl: json!({"nodes": [2]}),
            digest: "d2".to_string(),
        };
        let updated = repo
            .update_design("a", &UpdateDesignRequest::default(), Some(write), "carol")
            .await
            .unwrap();
        assert_eq!(updated.dsl_revision, 2);
        assert_eq!(updated.dsl_digest, "d2");
        assert_eq!(updated.description.as_deref(), Some("Landing page"));
        assert_eq!(updated.tags, vec!["web".to_string()]);

        let keep: UpdateDesignRequest = serde_json::from_value(json!({"name": "Home"})).unwrap();
        let renamed = repo.update_design("a", &keep, None, "bob").await.unwrap();
        assert_eq!(renamed.description.as_deref(), Some("Landing page"));

        let clear: UpdateDesignRequest =
            serde_json::from_value(json!({"description": null})).unwrap();
        let cleared = repo.update_design("a", &clear, None, "bob").await.unwrap();
        assert!(cleared.description.is_none());
        assert_eq!(cleared.name, "Home");
        assert_eq!(
            repo.get_design("a").await.unwrap().unwrap().description,
            None
        );
    }

    #[tokio::test]
    async fn test_list_hides_deleted() {
        let (repo, _dir) = repo().await;
        repo.create_design(&doc("a")).await.unwrap();
        repo.create_design(&doc("b")).await.unwrap();
        let mut deleted = doc("c");
        deleted.status = DesignStatus::Deleted;
        repo.create_design(&deleted).await.unwrap();

        let (items, total) = repo.list_designs(None, 0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(items.len(), 2);

        let (items, total) = repo
            .list_designs(Some(DesignStatus::Deleted), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].id, "c");

        let (page, total) = repo.list_designs(None, 1, 1).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
    }
}
