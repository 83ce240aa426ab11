//! Blob store collaborator: opaque `put(bytes, key) -> url`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::errors::AppError;

/// Key under which a code generation artifact is stored.
pub fn codegen_artifact_key(task_id: &str) -> String {
    format!("design/codegen/{}.zip", task_id)
}

/// Key under which an exported requirement document is stored.
pub fn requirement_doc_key(doc_id: &str) -> String {
    format!("design/requirement-docs/{}.md", doc_id)
}

/// Key under which a rasterized path asset is stored.
pub fn path_asset_key(digest: &str) -> String {
    format!("design/path-assets/{}.png", digest)
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning its public URL. Re-putting a key overwrites it.
    async fn put(&self, bytes: Vec<u8>, key: &str) -> Result<String, AppError>;

    /// Public URL of `key`; a pure function of the key.
    fn public_url(&self, key: &str) -> String;
}

/// Blob store backed by a local directory served under a public base URL.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AppError::Validation(format!("Invalid blob key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bytes: Vec<u8>, key: &str) -> Result<String, AppError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!("Stored blob {} ({} bytes)", key, bytes.len());
        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}
