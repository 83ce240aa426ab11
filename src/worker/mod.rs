//! Code generation worker.
//!
//! Consumes `{taskId}` jobs, re-reads the task, and packages the design snapshot into a zip
//! archive stored under `design/codegen/<taskId>.zip`. Any error after the task is claimed is
//! recorded through `fail_task`.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::blob::{codegen_artifact_key, BlobStore};
use crate::errors::AppError;
use crate::models::{AnnotationNode, TaskError, TaskResult, TaskStatus};
use crate::queue::{JobHandler, QueuedJob};
use crate::services::{CodegenTaskManager, TaskContext};

pub struct CodegenWorker {
    tasks: Arc<CodegenTaskManager>,
    blob: Arc<dyn BlobStore>,
}

/// One file of the generated archive.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    pub path: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    task_id: &'a str,
    task_type: &'a str,
    design_id: &'a str,
    design_name: &'a str,
    /// Revision of the DSL body packaged in `dsl.json`
    dsl_revision: i64,
    /// Revision the task was submitted against, when the design has moved on since
    #[serde(skip_serializing_if = "Option::is_none")]
    submitted_dsl_revision: Option<i64>,
    dsl_digest: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotation_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requirement_doc_id: Option<&'a str>,
    options: &'a Value,
    generated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComponentEntry<'a> {
    node_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    component_ref: &'a str,
}

impl CodegenWorker {
    pub fn new(tasks: Arc<CodegenTaskManager>, blob: Arc<dyn BlobStore>) -> Self {
        Self { tasks, blob }
    }

    async fn run(&self, task_id: &str) -> Result<TaskResult, AppError> {
        let context = self.tasks.load_task_context(task_id).await?;
        self.tasks
            .update_progress(task_id, 20, Some("Loaded design snapshot".to_string()))
            .await?;

        let files = build_files(&context)?;
        self.tasks
            .update_progress(task_id, 60, Some(format!("Prepared {} files", files.len())))
            .await?;

        let archive = tokio::task::spawn_blocking({
            let files = files.clone();
            move || zip_files(&files)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Packaging task panicked: {}", e)))??;

        let key = codegen_artifact_key(task_id);
        let total_size = archive.len() as i64;
        self.blob.put(archive, &key).await?;
        self.tasks
            .update_progress(task_id, 90, Some(format!("Uploaded artifact {}", key)))
            .await?;

        Ok(TaskResult {
            artifact_key: key,
            file_count: files.len() as i64,
            total_size,
            metadata: json!({
                "designId": context.design.id,
                "dslRevision": context.design.dsl_revision,
                "submittedDslRevision": context.task.dsl_revision,
                "annotationVersion": context.annotation.as_ref().map(|a| a.version),
                "files": files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
            }),
        })
    }
}

#[async_trait]
impl JobHandler for CodegenWorker {
    async fn execute(&self, job: &QueuedJob) -> Result<(), AppError> {
        let task_id = job
            .payload
            .get("taskId")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest(format!("Job {} has no taskId", job.job_id)))?;

        let task = self.tasks.get_task(task_id).await?;
        if task.status != TaskStatus::Pending {
            // Duplicate delivery of a task that already ran or was withdrawn
            tracing::info!(
                "Skipping job {}: task is {}",
                job.job_id,
                task.status.as_str()
            );
            return Ok(());
        }

        self.tasks.mark_processing(task_id).await?;
        match self.run(task_id).await {
            Ok(result) => {
                self.tasks.complete_task(task_id, result).await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Codegen task {} failed: {}", task_id, e);
                self.tasks
                    .fail_task(task_id, TaskError::new(e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }
}

/// Archive contents for a task context.
pub fn build_files(context: &TaskContext) -> Result<Vec<ArtifactFile>, AppError> {
    let task = &context.task;
    let design = &context.design;
    let generated_at = Utc::now().to_rfc3339();

    let manifest = Manifest {
        task_id: &task.id,
        task_type: &task.task_type,
        design_id: &design.id,
        design_name: &design.name,
        dsl_revision: design.dsl_revision,
        submitted_dsl_revision: (task.dsl_revision != design.dsl_revision)
            .then_some(task.dsl_revision),
        dsl_digest: &design.dsl_digest,
        annotation_version: context.annotation.as_ref().map(|a| a.version),
        requirement_doc_id: task.requirement_doc_id.as_deref(),
        options: &task.options,
        generated_at: generated_at.clone(),
    };

    let revision = match manifest.submitted_dsl_revision {
        Some(submitted) => format!("{} (submitted at {})", design.dsl_revision, submitted),
        None => design.dsl_revision.to_string(),
    };
    let mut readme = format!(
        "# {}\n\nGenerated `{}` code for design `{}`.\n\n- DSL revision: {}\n- Annotation version: {}\n- Generated at: {}\n",
        design.name,
        task.task_type,
        design.id,
        revision,
        manifest
            .annotation_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "none".to_string()),
        generated_at
    );

    let mut components = Vec::new();
    if let Some(annotation) = &context.annotation {
        collect_components(&annotation.root_annotation, &mut components);
    }
    if !components.is_empty() {
        readme.push_str(&format!("- Components: {}\n", components.len()));
    }

    let mut files = vec![
        ArtifactFile {
            path: "README.md".to_string(),
            contents: readme.into_bytes(),
        },
        ArtifactFile {
            path: "manifest.json".to_string(),
            contents: serde_json::to_vec_pretty(&manifest)?,
        },
        ArtifactFile {
            path: "dsl.json".to_string(),
            contents: serde_json::to_vec_pretty(&design.dsl_data)?,
        },
        ArtifactFile {
            path: "annotations.json".to_string(),
            contents: serde_json::to_vec_pretty(
                &context.annotation.as_ref().map(|a| &a.root_annotation),
            )?,
        },
        ArtifactFile {
            path: "components.json".to_string(),
            contents: serde_json::to_vec_pretty(&components)?,
        },
    ];

    if let Some(doc) = &context.requirement_doc {
        files.push(ArtifactFile {
            path: "requirement.md".to_string(),
            contents: format!("# {}\n\n{}\n", doc.title, doc.content).into_bytes(),
        });
    }

    Ok(files)
}

fn collect_components<'a>(node: &'a AnnotationNode, out: &mut Vec<ComponentEntry<'a>>) {
    if let Some(component_ref) = node.component_ref.as_deref() {
        out.push(ComponentEntry {
            node_id: &node.id,
            name: node.name.as_deref(),
            component_ref,
        });
    }
    for child in &node.children {
        collect_components(child, out);
    }
}

fn zip_files(files: &[ArtifactFile]) -> Result<Vec<u8>, AppError> {
    let pack = |e: zip::result::ZipError| AppError::Internal(format!("Zip error: {}", e));

    let mut buffer = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buffer));
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for file in files {
            zip.start_file(file.path.as_str(), options).map_err(pack)?;
            zip.write_all(&file.contents)?;
        }
        zip.finish().map_err(pack)?;
    }
    Ok(buffer)
}
