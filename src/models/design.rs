//! Design document model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Soft lifecycle status; documents are never hard-deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DesignStatus {
    Active,
    Archived,
    Deleted,
}

impl DesignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesignStatus::Active => "active",
            DesignStatus::Archived => "archived",
            DesignStatus::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(DesignStatus::Active),
            "archived" => Some(DesignStatus::Archived),
            "deleted" => Some(DesignStatus::Deleted),
            _ => None,
        }
    }
}

/// A design document with its current DSL body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignDocument {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub dsl_data: Value,
    pub dsl_revision: i64,
    pub dsl_digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub component_document_links: Vec<String>,
    pub status: DesignStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for creating a design document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDesignRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Fetched through the design source when `dsl_data` is absent
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub dsl_data: Option<Value>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Request body for updating a design document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDesignRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// Absent keeps the description, `null` clears it
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<DesignStatus>,
    #[serde(default)]
    pub dsl_data: Option<Value>,
    /// Expected DSL revision for optimistic concurrency control
    #[serde(default)]
    pub expected_revision: Option<i64>,
}

/// Distinguish an explicit `null` from a missing field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Query parameters for listing design documents.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignListQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
    #[serde(default)]
    pub status: Option<DesignStatus>,
}

/// The cached DSL body of one design at one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DslSnapshot {
    pub design_id: String,
    pub dsl_revision: i64,
    pub dsl_digest: String,
    pub dsl_data: Value,
}

/// Read-only counts over a design tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DslStats {
    pub total_nodes: usize,
    pub path_nodes: usize,
    pub converted_nodes: usize,
    pub style_count: usize,
}

/// Response for DSL writes: the document plus pipeline statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignWriteResult {
    pub document: DesignDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DslStats>,
}
