//! Design revision manager.
//!
//! The DSL body of a design is stored once, at its current revision. Every accepted DSL
//! write bumps `dsl_revision` by one and refreshes both cache keys for the design.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::assets::PathAssetPipeline;
use crate::cache::{keys, TieredCache};
use crate::db::{DslWrite, Repository};
use crate::digest::dsl_digest;
use crate::errors::AppError;
use crate::models::{
    page_bounds, CreateDesignRequest, DesignDocument, DesignListQuery, DesignStatus,
    DesignWriteResult, DslSnapshot, Page, UpdateDesignRequest,
};
use crate::source::DesignSource;

pub struct DesignRevisionManager {
    repo: Arc<Repository>,
    cache: Arc<TieredCache>,
    pipeline: Arc<PathAssetPipeline>,
    source: Arc<dyn DesignSource>,
    dsl_ttl: Duration,
}

impl DesignRevisionManager {
    pub fn new(
        repo: Arc<Repository>,
        cache: Arc<TieredCache>,
        pipeline: Arc<PathAssetPipeline>,
        source: Arc<dyn DesignSource>,
        dsl_ttl: Duration,
    ) -> Self {
        Self {
            repo,
            cache,
            pipeline,
            source,
            dsl_ttl,
        }
    }

    /// Ingest a new design at revision 1, from inline DSL or the design source.
    pub async fn create_design(
        &self,
        request: CreateDesignRequest,
        operator: &str,
    ) -> Result<DesignWriteResult, AppError> {
        if request.name.trim().is_empty() {
            return Err(AppError::Validation("Design name is required".to_string()));
        }

        let (raw_dsl, links) = match (request.dsl_data, &request.source_url) {
            (Some(dsl), _) => (dsl, Vec::new()),
            (None, Some(url)) => {
                let payload = self.source.get_dsl_from_url(url).await?;
                (payload.dsl, payload.component_document_links)
            }
            (None, None) => {
                return Err(AppError::Validation(
                    "Either dslData or sourceUrl is required".to_string(),
                ))
            }
        };

        let processed = self.pipeline.process(raw_dsl).await?;
        let now = Utc::now().to_rfc3339();
        let document = DesignDocument {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            description: request.description,
            dsl_digest: dsl_digest(&processed.dsl),
            dsl_data: processed.dsl,
            dsl_revision: 1,
            source_url: request.source_url,
            component_document_links: links,
            status: DesignStatus::Active,
            tags: request.tags.unwrap_or_default(),
            created_by: operator.to_string(),
            updated_by: operator.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        self.repo.create_design(&document).await?;
        self.cache_snapshot(&document).await;

        tracing::info!("Created design {} at revision 1", document.id);
        Ok(DesignWriteResult {
            document,
            stats: Some(processed.stats),
        })
    }

    /// Apply metadata and/or DSL changes, enforcing `expected_revision` when supplied.
    pub async fn update_design(
        &self,
        id: &str,
        request: UpdateDesignRequest,
        operator: &str,
    ) -> Result<DesignWriteResult, AppError> {
        if let Some(name) = &request.name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("Design name cannot be empty".to_string()));
            }
        }

        // Fail fast on a stale revision before paying for the pipeline
        let existing = self.get_design(id).await?;
        if let Some(expected) = request.expected_revision {
            if expected != existing.dsl_revision {
                return Err(AppError::Conflict {
                    message: format!(
                        "Revision mismatch: expected {}, current {}",
                        expected, existing.dsl_revision
                    ),
                    current_version: existing.dsl_revision,
                });
            }
        }

        let (write, stats) = match request.dsl_data.clone() {
            Some(raw) => {
                let processed = self.pipeline.process(raw).await?;
                let write = DslWrite {
                    digest: dsl_digest(&processed.dsl),
                    dsl: processed.dsl,
                };
                (Some(write), Some(processed.stats))
            }
            None => (None, None),
        };
        let dsl_changed = write.is_some();

        let document = self
            .repo
            .update_design(id, &request, write, operator)
            .await?;
        if dsl_changed {
            self.cache_snapshot(&document).await;
            tracing::info!(
                "Design {} advanced to revision {}",
                document.id,
                document.dsl_revision
            );
        }

        Ok(DesignWriteResult { document, stats })
    }

    pub async fn get_design(&self, id: &str) -> Result<DesignDocument, AppError> {
        self.repo
            .get_design(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Design {} not found", id)))
    }

    pub async fn list_designs(
        &self,
        query: DesignListQuery,
    ) -> Result<Page<DesignDocument>, AppError> {
        let (page, page_size, offset) = page_bounds(query.page, query.page_size);
        let (items, total) = self
            .repo
            .list_designs(query.status, offset, page_size)
            .await?;
        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Soft-delete: the document stays readable with status `deleted`.
    pub async fn delete_design(&self, id: &str, operator: &str) -> Result<DesignDocument, AppError> {
        let request = UpdateDesignRequest {
            status: Some(DesignStatus::Deleted),
            ..Default::default()
        };
        let document = self.repo.update_design(id, &request, None, operator).await?;
        tracing::info!("Soft-deleted design {}", id);
        Ok(document)
    }

    /// Cache-aside read of the DSL body.
    ///
    /// Only the current body is stored. Asking for any other revision is reported as not
    /// found unless a still-live cache entry for that revision answers first.
    pub async fn get_design_dsl(
        &self,
        id: &str,
        revision: Option<i64>,
    ) -> Result<DslSnapshot, AppError> {
        let key = match revision {
            Some(revision) => keys::dsl_revision(id, revision),
            None => keys::dsl_latest(id),
        };
        if let Some(snapshot) = self.cache.get_json::<DslSnapshot>(&key).await {
            tracing::debug!("DSL cache hit for {}", key);
            return Ok(snapshot);
        }

        let document = self.get_design(id).await?;
        let snapshot = self.cache_snapshot(&document).await;

        match revision {
            Some(revision) if revision != snapshot.dsl_revision => Err(AppError::NotFound(
                format!(
                    "Design {} has no DSL at revision {} (current revision is {})",
                    id, revision, snapshot.dsl_revision
                ),
            )),
            _ => Ok(snapshot),
        }
    }

    async fn cache_snapshot(&self, document: &DesignDocument) -> DslSnapshot {
        let snapshot = DslSnapshot {
            design_id: document.id.clone(),
            dsl_revision: document.dsl_revision,
            dsl_digest: document.dsl_digest.clone(),
            dsl_data: document.dsl_data.clone(),
        };
        self.cache
            .set_json(&keys::dsl_latest(&document.id), &snapshot, self.dsl_ttl)
            .await;
        self.cache
            .set_json(
                &keys::dsl_revision(&document.id, document.dsl_revision),
                &snapshot,
                self.dsl_ttl,
            )
            .await;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{simple_dsl, Fixture};
    use serde_json::json;

    fn create_request(dsl: serde_json::Value) -> CreateDesignRequest {
        CreateDesignRequest {
            name: "Checkout".to_string(),
            dsl_data: Some(dsl),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_starts_at_revision_one_and_caches() {
        let fx = Fixture::new().await;
        let created = fx
            .designs
            .create_design(create_request(simple_dsl("a")), "alice")
            .await
            .unwrap();
        let doc = created.document;
        assert_eq!(doc.dsl_revision, 1);
        assert_eq!(doc.dsl_digest, dsl_digest(&doc.dsl_data));

        let cached: DslSnapshot = fx.cache.get_json(&keys::dsl_revision(&doc.id, 1)).await.unwrap();
        assert_eq!(cached.dsl_revision, 1);
        let latest: DslSnapshot = fx.cache.get_json(&keys::dsl_latest(&doc.id)).await.unwrap();
        assert_eq!(latest.dsl_digest, doc.dsl_digest);
    }

    #[tokio::test]
    async fn test_create_from_source_keeps_component_links() {
        let fx = Fixture::new().await;
        let request = CreateDesignRequest {
            name: "From source".to_string(),
            source_url: Some("https://design.example/file/1".to_string()),
            ..Default::default()
        };
        let doc = fx.designs.create_design(request, "alice").await.unwrap().document;
        assert_eq!(doc.component_document_links, vec!["https://docs.example/button"]);
        assert_eq!(doc.source_url.as_deref(), Some("https://design.example/file/1"));
    }

    #[tokio::test]
    async fn test_create_requires_some_dsl() {
        let fx = Fixture::new().await;
        let request = CreateDesignRequest {
            name: "Empty".to_string(),
            ..Default::default()
        };
        let err = fx.designs.create_design(request, "alice").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_stale_revision_is_rejected() {
        let fx = Fixture::new().await;
        let id = fx
            .designs
            .create_design(create_request(simple_dsl("a")), "alice")
            .await
            .unwrap()
            .document
            .id;

        let update = || UpdateDesignRequest {
            dsl_data: Some(simple_dsl("b")),
            expected_revision: Some(1),
            ..Default::default()
        };
        let updated = fx.designs.update_design(&id, update(), "bob").await.unwrap();
        assert_eq!(updated.document.dsl_revision, 2);
        assert!(updated.stats.is_some());

        let err = fx.designs.update_design(&id, update(), "bob").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Conflict {
                current_version: 2,
                ..
            }
        ));
        assert_eq!(fx.designs.get_design(&id).await.unwrap().dsl_revision, 2);
    }

    #[tokio::test]
    async fn test_metadata_update_keeps_revision_and_digest() {
        let fx = Fixture::new().await;
        let doc = fx
            .designs
            .create_design(create_request(simple_dsl("a")), "alice")
            .await
            .unwrap()
            .document;

        let request = UpdateDesignRequest {
            tags: Some(vec!["web".to_string()]),
            ..Default::default()
        };
        let updated = fx.designs.update_design(&doc.id, request, "bob").await.unwrap();
        assert_eq!(updated.document.dsl_revision, 1);
        assert_eq!(updated.document.dsl_digest, doc.dsl_digest);
        assert_eq!(updated.document.tags, vec!["web"]);
        assert!(updated.stats.is_none());
    }

    #[tokio::test]
    async fn test_get_dsl_at_other_revision_is_not_found() {
        let fx = Fixture::new().await;
        let doc = fx
            .designs
            .create_design(create_request(simple_dsl("a")), "alice")
            .await
            .unwrap()
            .document;

        let current = fx.designs.get_design_dsl(&doc.id, None).await.unwrap();
        assert_eq!(current.dsl_revision, 1);

        let err = fx.designs.get_design_dsl(&doc.id, Some(7)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = fx.designs.get_design_dsl("missing", None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_dsl_cold_cache_reads_store() {
        let fx = Fixture::new().await;
        let doc = fx
            .designs
            .create_design(create_request(json!({"nodes": [], "styles": {}})), "alice")
            .await
            .unwrap()
            .document;

        // A fresh manager over the same store but an empty cache
        let cold = fx.designs_with_cold_cache();
        let snapshot = cold.get_design_dsl(&doc.id, Some(1)).await.unwrap();
        assert_eq!(snapshot.dsl_digest, doc.dsl_digest);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_default_listing() {
        let fx = Fixture::new().await;
        let doc = fx
            .designs
            .create_design(create_request(simple_dsl("a")), "alice")
            .await
            .unwrap()
            .document;
        fx.designs
            .create_design(create_request(simple_dsl("b")), "alice")
            .await
            .unwrap();

        let deleted = fx.designs.delete_design(&doc.id, "alice").await.unwrap();
        assert_eq!(deleted.status, DesignStatus::Deleted);

        let page = fx.designs.list_designs(DesignListQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.page, 1);
        assert_eq!(fx.designs.get_design(&doc.id).await.unwrap().status, DesignStatus::Deleted);
    }
}
