//! Requirement documents attached to a design.

use std::sync::Arc;

use chrono::Utc;

use crate::blob::{requirement_doc_key, BlobStore};
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{CreateRequirementDocRequest, RequirementDoc, RequirementExport};

pub struct RequirementDocManager {
    repo: Arc<Repository>,
    blob: Arc<dyn BlobStore>,
}

impl RequirementDocManager {
    pub fn new(repo: Arc<Repository>, blob: Arc<dyn BlobStore>) -> Self {
        Self { repo, blob }
    }

    pub async fn create(
        &self,
        design_id: &str,
        request: CreateRequirementDocRequest,
        operator: &str,
    ) -> Result<RequirementDoc, AppError> {
        if request.title.trim().is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }
        if self.repo.get_design(design_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Design {} not found", design_id)));
        }

        let now = Utc::now().to_rfc3339();
        let doc = RequirementDoc {
            id: uuid::Uuid::new_v4().to_string(),
            design_id: design_id.to_string(),
            title: request.title.trim().to_string(),
            content: request.content,
            export_key: None,
            created_by: operator.to_string(),
            updated_by: operator.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        self.repo.create_requirement_doc(&doc).await?;
        Ok(doc)
    }

    pub async fn get(&self, id: &str) -> Result<RequirementDoc, AppError> {
        self.repo
            .get_requirement_doc(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Requirement doc {} not found", id)))
    }

    pub async fn list(&self, design_id: &str) -> Result<Vec<RequirementDoc>, AppError> {
        self.repo.list_requirement_docs(design_id).await
    }

    /// Upload the document as markdown under its fixed key.
    pub async fn export(&self, id: &str, operator: &str) -> Result<RequirementExport, AppError> {
        let doc = self.get(id).await?;
        let key = requirement_doc_key(&doc.id);
        let markdown = format!("# {}\n\n{}\n", doc.title, doc.content);

        let url = self.blob.put(markdown.into_bytes(), &key).await?;
        self.repo
            .set_requirement_export_key(&doc.id, &key, operator)
            .await?;
        tracing::info!("Exported requirement doc {} to {}", doc.id, key);

        Ok(RequirementExport {
            doc_id: doc.id,
            key,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::Fixture;

    fn request(title: &str) -> CreateRequirementDocRequest {
        CreateRequirementDocRequest {
            title: title.to_string(),
            content: "Users can check out with one tap.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let fx = Fixture::new().await;
        let design = fx.design().await;
        let doc = fx
            .requirements
            .create(&design, request("Checkout"), "alice")
            .await
            .unwrap();

        assert_eq!(fx.requirements.get(&doc.id).await.unwrap().title, "Checkout");
        assert_eq!(fx.requirements.list(&design).await.unwrap().len(), 1);
        assert!(fx.requirements.list("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_validates_inputs() {
        let fx = Fixture::new().await;
        let design = fx.design().await;
        assert!(matches!(
            fx.requirements.create(&design, request("  "), "alice").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            fx.requirements.create("missing", request("x"), "alice").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_export_writes_markdown_blob() {
        let fx = Fixture::new().await;
        let design = fx.design().await;
        let doc = fx
            .requirements
            .create(&design, request("Checkout"), "alice")
            .await
            .unwrap();

        let export = fx.requirements.export(&doc.id, "bob").await.unwrap();
        assert_eq!(export.key, format!("design/requirement-docs/{}.md", doc.id));
        assert_eq!(export.url, format!("http://files.test/{}", export.key));

        let body = std::fs::read_to_string(fx.dir.path().join("blobs").join(&export.key)).unwrap();
        assert!(body.starts_with("# Checkout\n"));
        let stored = fx.requirements.get(&doc.id).await.unwrap();
        assert_eq!(stored.export_key.as_deref(), Some(export.key.as_str()));
    }
}
