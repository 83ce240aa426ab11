//! Content-addressed raster asset produced from vector path data.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathAsset {
    /// SHA-256 over the node's ordered `data:fill` pairs
    pub digest: String,
    pub image_url: String,
    pub path_data: String,
    pub fill_style: String,
    pub created_at: String,
    pub updated_at: String,
}
