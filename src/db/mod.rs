//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for documents, annotations, assets and tasks.

mod annotations;
mod assets;
mod repository;
mod tasks;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS design_documents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            dsl_data TEXT NOT NULL,
            dsl_revision INTEGER NOT NULL DEFAULT 1,
            dsl_digest TEXT NOT NULL,
            source_url TEXT,
            component_document_links TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            tags TEXT,
            created_by TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS path_assets (
            digest TEXT PRIMARY KEY,
            image_url TEXT NOT NULL,
            path_data TEXT NOT NULL,
            fill_style TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS annotation_versions (
            id TEXT PRIMARY KEY,
            design_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            root_annotation TEXT NOT NULL,
            expanded_keys TEXT,
            schema_version TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_by TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (design_id, version)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS requirement_docs (
            id TEXT PRIMARY KEY,
            design_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            export_key TEXT,
            created_by TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS codegen_tasks (
            id TEXT PRIMARY KEY,
            design_id TEXT NOT NULL,
            requirement_doc_id TEXT,
            task_type TEXT NOT NULL,
            options TEXT,
            dsl_revision INTEGER NOT NULL,
            annotation_version INTEGER,
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            logs TEXT NOT NULL DEFAULT '[]',
            result TEXT,
            error TEXT,
            created_by TEXT NOT NULL,
            updated_by TEXT NOT NULL,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS codegen_task_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_design_documents_status ON design_documents(status);
        CREATE INDEX IF NOT EXISTS idx_design_documents_updated_at ON design_documents(updated_at);
        CREATE INDEX IF NOT EXISTS idx_annotation_versions_design ON annotation_versions(design_id, status);
        CREATE INDEX IF NOT EXISTS idx_requirement_docs_design ON requirement_docs(design_id);
        CREATE INDEX IF NOT EXISTS idx_codegen_tasks_design ON codegen_tasks(design_id, status);
        CREATE INDEX IF NOT EXISTS idx_codegen_task_logs_task ON codegen_task_logs(task_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
