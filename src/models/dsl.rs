//! Typed design tree (DSL) exchanged with the design source and the editor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fill references with this prefix point into [`DslData::styles`]; anything else is a literal color.
pub const STYLE_REF_PREFIX: &str = "paint_";

/// Fallback color for fill references that do not resolve.
pub const DEFAULT_FILL_COLOR: &str = "#000000";

/// Root of a design tree: top-level nodes plus the shared style table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DslData {
    #[serde(default)]
    pub nodes: Vec<DslNode>,
    #[serde(default)]
    pub styles: BTreeMap<String, StyleDefinition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A node of the design tree. The variant set is closed; traversals match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DslNode {
    #[serde(rename = "PATH")]
    Path(PathNode),
    #[serde(rename = "GROUP")]
    Group(ContainerNode),
    #[serde(rename = "FRAME")]
    Frame(ContainerNode),
    #[serde(rename = "INSTANCE")]
    Instance(ContainerNode),
    #[serde(rename = "LAYER")]
    Layer(LayerNode),
    #[serde(rename = "TEXT")]
    Text(LeafNode),
}

impl DslNode {
    pub fn id(&self) -> &str {
        match self {
            DslNode::Path(n) => &n.id,
            DslNode::Group(n) | DslNode::Frame(n) | DslNode::Instance(n) => &n.id,
            DslNode::Layer(n) => &n.id,
            DslNode::Text(n) => &n.id,
        }
    }
}

/// Layout rectangle relative to the parent node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutStyle {
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub relative_x: f64,
    #[serde(default)]
    pub relative_y: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One `(fill, pathData)` pair of a vector node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathItem {
    #[serde(default)]
    pub fill: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub layout_style: LayoutStyle,
    #[serde(default)]
    pub paths: Vec<PathItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PathNode {
    /// A node qualifies for rasterization once any item carries path data.
    pub fn has_path_data(&self) -> bool {
        self.paths.iter().any(|p| !p.data.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub layout_style: LayoutStyle,
    #[serde(default)]
    pub children: Vec<DslNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Raster layer whose `fill` names an image style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub layout_style: LayoutStyle,
    #[serde(default)]
    pub fill: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub layout_style: LayoutStyle,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const STYLE_KIND_IMAGE: &str = "image";

/// Entry of the global style table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleDefinition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StyleDefinition {
    pub fn image(url: &str) -> Self {
        Self {
            kind: Some(STYLE_KIND_IMAGE.to_string()),
            value: Value::String(url.to_string()),
            extra: Map::new(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind.as_deref() == Some(STYLE_KIND_IMAGE)
    }

    /// The concrete color of a paint style: a string value, or the first string of an array.
    pub fn color(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) => Some(s),
            Value::Array(values) => values.iter().find_map(Value::as_str),
            _ => None,
        }
    }
}

impl DslData {
    /// Resolve a fill reference to a concrete color.
    pub fn resolve_fill(&self, fill: &str) -> String {
        if !fill.starts_with(STYLE_REF_PREFIX) {
            return fill.to_string();
        }
        self.styles
            .get(fill)
            .and_then(StyleDefinition::color)
            .unwrap_or(DEFAULT_FILL_COLOR)
            .to_string()
    }
}
