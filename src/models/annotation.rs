//! Component annotation versions authored in the editor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    Active,
    Archived,
}

impl AnnotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationStatus::Active => "active",
            AnnotationStatus::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AnnotationStatus::Active),
            "archived" => Some(AnnotationStatus::Archived),
            _ => None,
        }
    }
}

/// A node of the annotation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_ref: Option<String>,
    #[serde(default)]
    pub is_container: bool,
    #[serde(default)]
    pub children: Vec<AnnotationNode>,
    #[serde(default)]
    pub geometry: Value,
    #[serde(default)]
    pub props: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One stored version of a design's annotation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationVersion {
    pub design_id: String,
    pub version: i64,
    pub root_annotation: AnnotationNode,
    #[serde(default)]
    pub expanded_keys: Vec<String>,
    pub schema_version: String,
    pub status: AnnotationStatus,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
    pub updated_at: String,
}

pub const DEFAULT_ANNOTATION_SCHEMA_VERSION: &str = "1.0";

/// Request body for saving an annotation tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAnnotationRequest {
    pub root_annotation: AnnotationNode,
    #[serde(default)]
    pub expanded_keys: Vec<String>,
    #[serde(default)]
    pub schema_version: Option<String>,
    /// Target version; omitted means "next version"
    #[serde(default)]
    pub version: Option<i64>,
    /// Allows overwriting an existing version in place
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Removed,
    Updated,
}

/// A single node-level change between two annotation versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationChange {
    pub node_id: String,
    pub change_type: ChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<AnnotationNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<AnnotationNode>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDiff {
    pub design_id: String,
    pub from_version: i64,
    pub to_version: i64,
    pub changes: Vec<AnnotationChange>,
    pub summary: DiffSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiffQuery {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionQuery {
    #[serde(default)]
    pub version: Option<i64>,
}
