//! Annotation version manager and tree diff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::cache::{keys, TieredCache};
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    AnnotationChange, AnnotationDiff, AnnotationNode, AnnotationStatus, AnnotationVersion,
    ChangeType, DiffSummary, SaveAnnotationRequest, DEFAULT_ANNOTATION_SCHEMA_VERSION,
};

pub struct AnnotationVersionManager {
    repo: Arc<Repository>,
    cache: Arc<TieredCache>,
    ttl: Duration,
}

impl AnnotationVersionManager {
    pub fn new(repo: Arc<Repository>, cache: Arc<TieredCache>, ttl: Duration) -> Self {
        Self { repo, cache, ttl }
    }

    /// Save an annotation tree as a new version, or amend an existing one when forced.
    pub async fn save_annotation(
        &self,
        design_id: &str,
        request: SaveAnnotationRequest,
        operator: &str,
    ) -> Result<AnnotationVersion, AppError> {
        if self.repo.get_design(design_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Design {} not found", design_id)));
        }

        let highest = self.repo.max_annotation_version(design_id).await?.unwrap_or(0);
        let now = Utc::now().to_rfc3339();
        let schema_version = request
            .schema_version
            .unwrap_or_else(|| DEFAULT_ANNOTATION_SCHEMA_VERSION.to_string());

        if let Some(target) = request.version {
            if target < 1 {
                return Err(AppError::Validation(format!(
                    "Annotation version must be at least 1, got {}",
                    target
                )));
            }

            if let Some(existing) = self.repo.get_annotation_version(design_id, target).await? {
                if !request.force {
                    return Err(AppError::Conflict {
                        message: format!(
                            "Annotation version {} already exists; set force to overwrite",
                            target
                        ),
                        current_version: highest,
                    });
                }
                let amended = self
                    .repo
                    .overwrite_annotation_version(&AnnotationVersion {
                        root_annotation: request.root_annotation,
                        expanded_keys: request.expanded_keys,
                        schema_version,
                        updated_by: operator.to_string(),
                        updated_at: now,
                        ..existing
                    })
                    .await?;
                tracing::info!("Amended annotation version {} of design {}", target, design_id);
                self.cache_version(&amended).await;
                if let Some(latest) = self.repo.latest_annotation(design_id).await? {
                    self.cache_latest(&latest).await;
                }
                return Ok(amended);
            }

            if target <= highest {
                return Err(AppError::Conflict {
                    message: format!(
                        "Annotation version {} is not above the current version {}",
                        target, highest
                    ),
                    current_version: highest,
                });
            }
        }

        let annotation = AnnotationVersion {
            design_id: design_id.to_string(),
            version: request.version.unwrap_or(highest + 1),
            root_annotation: request.root_annotation,
            expanded_keys: request.expanded_keys,
            schema_version,
            status: AnnotationStatus::Active,
            created_by: operator.to_string(),
            updated_by: operator.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        let archived = self.repo.insert_annotation_version(&annotation).await?;
        tracing::info!(
            "Saved annotation version {} of design {}",
            annotation.version,
            design_id
        );

        self.cache_version(&annotation).await;
        self.cache_latest(&annotation).await;

        // Cached copies of the versions just archived still say `active`.
        for version in archived {
            if let Some(previous) = self.repo.get_annotation_version(design_id, version).await? {
                self.cache_version(&previous).await;
            }
        }
        Ok(annotation)
    }

    /// A specific version regardless of status, or the latest when `version` is `None`.
    pub async fn get_latest_annotation(
        &self,
        design_id: &str,
        version: Option<i64>,
    ) -> Result<AnnotationVersion, AppError> {
        let key = match version {
            Some(version) => keys::annotation_version(design_id, version),
            None => keys::annotation_latest(design_id),
        };
        if let Some(cached) = self.cache.get_json::<AnnotationVersion>(&key).await {
            tracing::debug!("Annotation cache hit for {}", key);
            return Ok(cached);
        }

        let stored = match version {
            Some(version) => self.repo.get_annotation_version(design_id, version).await?,
            None => self.repo.latest_annotation(design_id).await?,
        };
        let annotation = stored.ok_or_else(|| match version {
            Some(version) => AppError::NotFound(format!(
                "Annotation version {} not found for design {}",
                version, design_id
            )),
            None => AppError::NotFound(format!("No annotations saved for design {}", design_id)),
        })?;

        self.cache.set_json(&key, &annotation, self.ttl).await;
        Ok(annotation)
    }

    pub async fn diff_annotations(
        &self,
        design_id: &str,
        from_version: i64,
        to_version: i64,
    ) -> Result<AnnotationDiff, AppError> {
        let from = self
            .get_latest_annotation(design_id, Some(from_version))
            .await?;
        let to = self.get_latest_annotation(design_id, Some(to_version)).await?;

        let changes = diff_trees(&from.root_annotation, &to.root_annotation);
        let mut summary = DiffSummary::default();
        for change in &changes {
            match change.change_type {
                ChangeType::Added => summary.added += 1,
                ChangeType::Removed => summary.removed += 1,
                ChangeType::Updated => summary.updated += 1,
            }
        }

        Ok(AnnotationDiff {
            design_id: design_id.to_string(),
            from_version,
            to_version,
            changes,
            summary,
        })
    }

    async fn cache_version(&self, annotation: &AnnotationVersion) {
        self.cache
            .set_json(
                &keys::annotation_version(&annotation.design_id, annotation.version),
                annotation,
                self.ttl,
            )
            .await;
    }

    async fn cache_latest(&self, annotation: &AnnotationVersion) {
        self.cache
            .set_json(
                &keys::annotation_latest(&annotation.design_id),
                annotation,
                self.ttl,
            )
            .await;
    }
}

/// Pre-order `id -> node` index. Ids keep their first-seen position; a later duplicate
/// replaces the stored node.
struct FlatTree<'a> {
    order: Vec<&'a str>,
    nodes: HashMap<&'a str, &'a AnnotationNode>,
}

fn flatten(root: &AnnotationNode) -> FlatTree<'_> {
    let mut flat = FlatTree {
        order: Vec::new(),
        nodes: HashMap::new(),
    };
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if flat.nodes.insert(node.id.as_str(), node).is_none() {
            flat.order.push(node.id.as_str());
        }
        stack.extend(node.children.iter().rev());
    }
    flat
}

/// Node-level changes between two trees.
///
/// Nodes are compared structurally, subtree included, so any change below a node also marks
/// it updated. A node that moved without changing is unchanged; its old and new parents are
/// not.
pub fn diff_trees(from: &AnnotationNode, to: &AnnotationNode) -> Vec<AnnotationChange> {
    let from = flatten(from);
    let to = flatten(to);

    let mut added = Vec::new();
    let mut updated = Vec::new();
    for id in &to.order {
        let after = to.nodes[id];
        match from.nodes.get(id) {
            None => added.push(AnnotationChange {
                node_id: id.to_string(),
                change_type: ChangeType::Added,
                before: None,
                after: Some(after.clone()),
            }),
            Some(before) if *before != after => updated.push(AnnotationChange {
                node_id: id.to_string(),
                change_type: ChangeType::Updated,
                before: Some((*before).clone()),
                after: Some(after.clone()),
            }),
            Some(_) => {}
        }
    }

    let removed = from
        .order
        .iter()
        .filter(|id| !to.nodes.contains_key(*id))
        .map(|id| AnnotationChange {
            node_id: id.to_string(),
            change_type: ChangeType::Removed,
            before: Some(from.nodes[id].clone()),
            after: None,
        });

    added.into_iter().chain(removed).chain(updated).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::Fixture;
    use serde_json::json;

    fn tree(value: serde_json::Value) -> AnnotationNode {
        serde_json::from_value(value).unwrap()
    }

    fn base_tree() -> AnnotationNode {
        tree(json!({
            "id": "root",
            "isContainer": true,
            "children": [
                {"id": "n1", "name": "Header", "componentRef": "Header"},
                {"id": "n2", "name": "Body", "props": {"padding": 8}}
            ]
        }))
    }

    fn request(root: AnnotationNode) -> SaveAnnotationRequest {
        SaveAnnotationRequest {
            root_annotation: root,
            expanded_keys: vec!["root".to_string()],
            schema_version: None,
            version: None,
            force: false,
        }
    }

    fn ids(changes: &[AnnotationChange], kind: ChangeType) -> Vec<String> {
        let mut ids: Vec<String> = changes
            .iter()
            .filter(|c| c.change_type == kind)
            .map(|c| c.node_id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_new_save_archives_previous_version() {
        let fx = Fixture::new().await;
        let design = fx.design().await;

        let v1 = fx
            .annotations
            .save_annotation(&design, request(base_tree()), "alice")
            .await
            .unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.schema_version, DEFAULT_ANNOTATION_SCHEMA_VERSION);

        let v2 = fx
            .annotations
            .save_annotation(&design, request(base_tree()), "alice")
            .await
            .unwrap();
        assert_eq!(v2.version, 2);

        let statuses = fx.repo.annotation_statuses(&design).await.unwrap();
        assert_eq!(
            statuses,
            vec![(1, AnnotationStatus::Archived), (2, AnnotationStatus::Active)]
        );
        let latest = fx.annotations.get_latest_annotation(&design, None).await.unwrap();
        assert_eq!(latest.version, 2);
    }

    #[tokio::test]
    async fn test_archived_version_is_archived_when_cached() {
        let fx = Fixture::new().await;
        let design = fx.design().await;
        fx.annotations
            .save_annotation(&design, request(base_tree()), "alice")
            .await
            .unwrap();

        // Warm the per-version key while v1 is still active
        let v1 = fx
            .annotations
            .get_latest_annotation(&design, Some(1))
            .await
            .unwrap();
        assert_eq!(v1.status, AnnotationStatus::Active);

        fx.annotations
            .save_annotation(&design, request(base_tree()), "alice")
            .await
            .unwrap();

        let cached: AnnotationVersion = fx
            .cache
            .get_json(&keys::annotation_version(&design, 1))
            .await
            .unwrap();
        assert_eq!(cached.status, AnnotationStatus::Archived);
        let v1 = fx
            .annotations
            .get_latest_annotation(&design, Some(1))
            .await
            .unwrap();
        assert_eq!(v1.status, AnnotationStatus::Archived);
        let v2 = fx
            .annotations
            .get_latest_annotation(&design, Some(2))
            .await
            .unwrap();
        assert_eq!(v2.status, AnnotationStatus::Active);
    }

    #[tokio::test]
    async fn test_existing_version_requires_force() {
        let fx = Fixture::new().await;
        let design = fx.design().await;
        fx.annotations
            .save_annotation(&design, request(base_tree()), "alice")
            .await
            .unwrap();

        let mut again = request(tree(json!({"id": "root", "name": "Amended"})));
        again.version = Some(1);
        let err = fx
            .annotations
            .save_annotation(&design, again.clone(), "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        again.force = true;
        let amended = fx
            .annotations
            .save_annotation(&design, again, "bob")
            .await
            .unwrap();
        assert_eq!(amended.version, 1);
        assert_eq!(amended.status, AnnotationStatus::Active);
        assert_eq!(amended.updated_by, "bob");
        assert_eq!(amended.created_by, "alice");

        let latest = fx.annotations.get_latest_annotation(&design, None).await.unwrap();
        assert_eq!(latest.root_annotation.name.as_deref(), Some("Amended"));
    }

    #[tokio::test]
    async fn test_explicit_version_must_increase() {
        let fx = Fixture::new().await;
        let design = fx.design().await;
        for _ in 0..2 {
            fx.annotations
                .save_annotation(&design, request(base_tree()), "alice")
                .await
                .unwrap();
        }

        let mut jump = request(base_tree());
        jump.version = Some(5);
        let saved = fx.annotations.save_annotation(&design, jump, "alice").await.unwrap();
        assert_eq!(saved.version, 5);

        let mut gap = request(base_tree());
        gap.version = Some(3);
        let err = fx.annotations.save_annotation(&design, gap, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Conflict {
                current_version: 5,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_save_for_unknown_design_is_not_found() {
        let fx = Fixture::new().await;
        let err = fx
            .annotations
            .save_annotation("missing", request(base_tree()), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_diff_reports_added_and_updated_nodes() {
        let fx = Fixture::new().await;
        let design = fx.design().await;
        fx.annotations
            .save_annotation(&design, request(base_tree()), "alice")
            .await
            .unwrap();
        let next = tree(json!({
            "id": "root",
            "isContainer": true,
            "children": [
                {"id": "n1", "name": "Top bar", "componentRef": "Header"},
                {"id": "n2", "name": "Body", "props": {"padding": 8}},
                {"id": "n3", "name": "Footer"}
            ]
        }));
        fx.annotations
            .save_annotation(&design, request(next), "alice")
            .await
            .unwrap();

        let diff = fx.annotations.diff_annotations(&design, 1, 2).await.unwrap();
        assert_eq!(ids(&diff.changes, ChangeType::Added), vec!["n3"]);
        assert_eq!(ids(&diff.changes, ChangeType::Updated), vec!["n1", "root"]);
        assert!(ids(&diff.changes, ChangeType::Removed).is_empty());
        assert!(diff.changes.iter().all(|c| c.node_id != "n2"));
        assert_eq!(
            diff.summary,
            DiffSummary {
                added: 1,
                removed: 0,
                updated: 2
            }
        );

        let err = fx.annotations.diff_annotations(&design, 1, 9).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_diff_of_tree_with_itself_is_empty() {
        assert!(diff_trees(&base_tree(), &base_tree()).is_empty());
    }

    #[test]
    fn test_diff_is_symmetric() {
        let a = base_tree();
        let b = tree(json!({
            "id": "root",
            "isContainer": true,
            "children": [
                {"id": "n2", "name": "Body", "props": {"padding": 16}},
                {"id": "n4", "name": "Sidebar"}
            ]
        }));

        let forward = diff_trees(&a, &b);
        let backward = diff_trees(&b, &a);
        assert_eq!(ids(&forward, ChangeType::Added), ids(&backward, ChangeType::Removed));
        assert_eq!(ids(&forward, ChangeType::Removed), ids(&backward, ChangeType::Added));
        assert_eq!(ids(&forward, ChangeType::Updated), vec!["n2", "root"]);
        assert_eq!(ids(&backward, ChangeType::Updated), vec!["n2", "root"]);
    }

    #[test]
    fn test_moved_node_marks_both_parents_updated() {
        let a = tree(json!({
            "id": "root",
            "children": [
                {"id": "g1", "children": [{"id": "leaf", "name": "Icon"}]},
                {"id": "g2"}
            ]
        }));
        let b = tree(json!({
            "id": "root",
            "children": [
                {"id": "g1"},
                {"id": "g2", "children": [{"id": "leaf", "name": "Icon"}]}
            ]
        }));
        let changes = diff_trees(&a, &b);
        assert!(ids(&changes, ChangeType::Added).is_empty());
        assert!(ids(&changes, ChangeType::Removed).is_empty());
        assert_eq!(ids(&changes, ChangeType::Updated), vec!["g1", "g2", "root"]);
    }

    #[test]
    fn test_reordered_children_update_parent() {
        let a = tree(json!({"id": "root", "children": [{"id": "n1"}]}));
        let b = tree(json!({"id": "root", "children": [{"id": "n2"}, {"id": "n1"}]}));

        let changes = diff_trees(&a, &b);
        assert_eq!(ids(&changes, ChangeType::Added), vec!["n2"]);
        assert_eq!(ids(&changes, ChangeType::Updated), vec!["root"]);

        let swapped = tree(json!({"id": "root", "children": [{"id": "n1"}, {"id": "n2"}]}));
        let changes = diff_trees(&b, &swapped);
        assert!(ids(&changes, ChangeType::Added).is_empty());
        assert_eq!(ids(&changes, ChangeType::Updated), vec!["root"]);
        let root = changes.iter().find(|c| c.node_id == "root").unwrap();
        assert_eq!(root.after.as_ref().unwrap().children[0].id, "n1");
    }

    #[test]
    fn test_duplicate_ids_keep_last_seen_node() {
        let a = tree(json!({
            "id": "root",
            "children": [{"id": "dup", "name": "first"}, {"id": "dup", "name": "second"}]
        }));
        let b = tree(json!({"id": "root", "children": [{"id": "dup", "name": "second"}]}));
        let changes = diff_trees(&a, &b);
        assert!(changes.iter().all(|c| c.node_id != "dup"));
        assert_eq!(ids(&changes, ChangeType::Updated), vec!["root"]);
    }
}
