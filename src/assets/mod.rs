//! Path asset pipeline.
//!
//! Replaces every vector path node of a design tree with a raster layer that references a
//! content-addressed PNG. Lookups go cache, then asset store, then render + upload; a failure
//! on one node leaves that node untouched and never fails the tree.

mod normalize;
mod render;

use normalize::normalize_numbers;
use render::{build_svg, rasterize_svg_to_png, ResolvedPath};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::blob::{path_asset_key, BlobStore};
use crate::cache::{keys, TieredCache};
use crate::db::Repository;
use crate::digest::path_digest;
use crate::errors::AppError;
use crate::models::{
    DslData, DslNode, DslStats, LayerNode, PathAsset, PathItem, PathNode, StyleDefinition,
};

/// Output of a pipeline run.
#[derive(Debug, Clone)]
pub struct ProcessedDsl {
    pub dsl: Value,
    pub stats: DslStats,
}

/// One path node's worth of conversion input.
#[derive(Debug, Clone)]
struct ConversionUnit {
    node_id: String,
    digest: String,
    items: Vec<PathItem>,
    paths: Vec<ResolvedPath>,
    width: f64,
    height: f64,
}

pub struct PathAssetPipeline {
    repo: Arc<Repository>,
    cache: Arc<TieredCache>,
    blob: Arc<dyn BlobStore>,
    asset_ttl: Duration,
    render_scale: f32,
}

impl PathAssetPipeline {
    pub fn new(
        repo: Arc<Repository>,
        cache: Arc<TieredCache>,
        blob: Arc<dyn BlobStore>,
        asset_ttl: Duration,
        render_scale: f32,
    ) -> Self {
        Self {
            repo,
            cache,
            blob,
            asset_ttl,
            render_scale,
        }
    }

    /// Normalize a raw DSL payload and rasterize its path nodes.
    pub async fn process(&self, mut raw: Value) -> Result<ProcessedDsl, AppError> {
        normalize_numbers(&mut raw);
        let mut dsl: DslData = serde_json::from_value(raw)
            .map_err(|e| AppError::Validation(format!("Invalid DSL: {}", e)))?;

        let before = tree_counts(&dsl);
        let units = collect_conversion_units(&dsl);

        let mut resolved: HashMap<String, String> = HashMap::new();
        let mut attempted: HashSet<String> = HashSet::new();
        for unit in &units {
            if !attempted.insert(unit.digest.clone()) {
                continue;
            }
            match self.resolve(unit).await {
                Ok(url) => {
                    resolved.insert(unit.digest.clone(), url);
                }
                Err(e) => {
                    tracing::warn!("Path node {} left unconverted: {}", unit.node_id, e);
                }
            }
        }

        replace_path_nodes(&mut dsl.nodes, &mut dsl.styles, &resolved);

        let after = tree_counts(&dsl);
        let stats = DslStats {
            total_nodes: after.total,
            path_nodes: before.paths,
            converted_nodes: before.paths.saturating_sub(after.paths),
            style_count: after.styles,
        };
        tracing::info!(
            total_nodes = stats.total_nodes,
            path_nodes = stats.path_nodes,
            converted_nodes = stats.converted_nodes,
            style_count = stats.style_count,
            "Processed DSL"
        );

        Ok(ProcessedDsl {
            dsl: serde_json::to_value(&dsl)?,
            stats,
        })
    }

    /// Image URL for a conversion unit: cache, then asset store, then a fresh conversion.
    async fn resolve(&self, unit: &ConversionUnit) -> Result<String, AppError> {
        if let Some(asset) = self
            .cache
            .get_json::<PathAsset>(&keys::path_asset(&unit.digest))
            .await
        {
            return Ok(asset.image_url);
        }

        match self.repo.get_path_asset(&unit.digest).await {
            Ok(Some(asset)) => {
                tracing::debug!("Asset store hit for {}", unit.digest);
                self.write_through(&asset).await;
                return Ok(asset.image_url);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Asset store lookup for {} failed: {}", unit.digest, e),
        }

        let asset = self.convert(unit).await?;
        Ok(asset.image_url)
    }

    async fn convert(&self, unit: &ConversionUnit) -> Result<PathAsset, AppError> {
        let svg = build_svg(&unit.paths, unit.width, unit.height);
        let scale = self.render_scale;
        let png = tokio::task::spawn_blocking(move || rasterize_svg_to_png(&svg, scale))
            .await
            .map_err(|e| AppError::Conversion(format!("Render task failed: {}", e)))?
            .map_err(|e| AppError::Conversion(format!("Render failed: {}", e)))?;

        let image_url = self
            .blob
            .put(png, &path_asset_key(&unit.digest))
            .await
            .map_err(|e| AppError::Conversion(format!("Upload failed: {}", e)))?;

        let now = Utc::now().to_rfc3339();
        let asset = PathAsset {
            digest: unit.digest.clone(),
            image_url,
            path_data: join_items(&unit.items, |item| &item.data),
            fill_style: join_items(&unit.items, |item| &item.fill),
            created_at: now.clone(),
            updated_at: now,
        };

        let stored = match self.repo.upsert_path_asset(&asset).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Persisting asset {} failed: {}", asset.digest, e);
                asset
            }
        };
        tracing::info!("Converted path node {} to {}", unit.node_id, stored.image_url);

        self.write_through(&stored).await;
        Ok(stored)
    }

    async fn write_through(&self, asset: &PathAsset) {
        self.cache
            .set_json(&keys::path_asset(&asset.digest), asset, self.asset_ttl)
            .await;
        self.cache
            .set_json(&keys::path_asset_latest(), asset, self.asset_ttl)
            .await;
    }
}

fn join_items(items: &[PathItem], field: impl Fn(&PathItem) -> &String) -> String {
    items
        .iter()
        .map(|item| field(item).as_str())
        .collect::<Vec<_>>()
        .join("|")
}

fn collect_conversion_units(dsl: &DslData) -> Vec<ConversionUnit> {
    fn walk(nodes: &[DslNode], dsl: &DslData, out: &mut Vec<ConversionUnit>) {
        for node in nodes {
            match node {
                DslNode::Path(path) if path.has_path_data() => out.push(ConversionUnit {
                    node_id: path.id.clone(),
                    digest: path_digest(&path.paths),
                    items: path.paths.clone(),
                    paths: path
                        .paths
                        .iter()
                        .map(|item| ResolvedPath {
                            data: item.data.clone(),
                            color: dsl.resolve_fill(&item.fill),
                        })
                        .collect(),
                    width: path.layout_style.width,
                    height: path.layout_style.height,
                }),
                DslNode::Path(_) => {}
                DslNode::Group(c) | DslNode::Frame(c) | DslNode::Instance(c) => {
                    walk(&c.children, dsl, out)
                }
                DslNode::Layer(_) | DslNode::Text(_) => {}
            }
        }
    }

    let mut out = Vec::new();
    walk(&dsl.nodes, dsl, &mut out);
    out
}

/// Style id under which a converted path's image is registered.
fn image_style_id(digest: &str) -> String {
    format!("paint_img_{}", &digest[..digest.len().min(16)])
}

fn replace_path_nodes(
    nodes: &mut [DslNode],
    styles: &mut BTreeMap<String, StyleDefinition>,
    resolved: &HashMap<String, String>,
) {
    for node in nodes.iter_mut() {
        let replacement = match node {
            DslNode::Path(path) if path.has_path_data() => {
                let digest = path_digest(&path.paths);
                resolved.get(&digest).map(|url| {
                    let style_id = image_style_id(&digest);
                    styles.insert(style_id.clone(), StyleDefinition::image(url));
                    raster_layer(path, style_id)
                })
            }
            DslNode::Group(c) | DslNode::Frame(c) | DslNode::Instance(c) => {
                replace_path_nodes(&mut c.children, styles, resolved);
                None
            }
            DslNode::Path(_) | DslNode::Layer(_) | DslNode::Text(_) => None,
        };
        if let Some(layer) = replacement {
            *node = DslNode::Layer(layer);
        }
    }
}

fn raster_layer(path: &PathNode, style_id: String) -> LayerNode {
    LayerNode {
        id: path.id.clone(),
        name: path.name.clone(),
        layout_style: path.layout_style.clone(),
        fill: style_id,
        extra: Default::default(),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeCounts {
    pub total: usize,
    pub paths: usize,
    pub layers: usize,
    pub styles: usize,
}

/// Read-only walk counting nodes by kind.
pub fn tree_counts(dsl: &DslData) -> TreeCounts {
    fn walk(nodes: &[DslNode], counts: &mut TreeCounts) {
        for node in nodes {
            counts.total += 1;
            match node {
                DslNode::Path(_) => counts.paths += 1,
                DslNode::Layer(_) => counts.layers += 1,
                DslNode::Group(c) | DslNode::Frame(c) | DslNode::Instance(c) => {
                    walk(&c.children, counts)
                }
                DslNode::Text(_) => {}
            }
        }
    }

    let mut counts = TreeCounts {
        styles: dsl.styles.len(),
        ..Default::default()
    };
    walk(&dsl.nodes, &mut counts);
    counts
}
