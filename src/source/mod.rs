//! Design source collaborator: fetches the initial DSL for a new document.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::AppError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignSourcePayload {
    pub dsl: Value,
    #[serde(default)]
    pub component_document_links: Vec<String>,
}

#[async_trait]
pub trait DesignSource: Send + Sync {
    async fn get_dsl_from_url(&self, url: &str) -> Result<DesignSourcePayload, AppError>;
}

/// Fetches `{dsl, componentDocumentLinks}` JSON over HTTP.
pub struct HttpDesignSource {
    client: reqwest::Client,
}

impl HttpDesignSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDesignSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DesignSource for HttpDesignSource {
    async fn get_dsl_from_url(&self, url: &str) -> Result<DesignSourcePayload, AppError> {
        let upstream = |e: reqwest::Error| {
            tracing::warn!("Design source fetch from {} failed: {}", url, e);
            AppError::Upstream(format!("Failed to fetch design from {}: {}", url, e))
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?;

        response.json().await.map_err(upstream)
    }
}
