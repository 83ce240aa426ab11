//! Design-to-code backend
//!
//! Versioned design documents, content-addressed path assets, annotation versions and
//! asynchronous code generation jobs over SQLite and a clustered cache.

mod api;
mod assets;
mod auth;
mod blob;
mod cache;
mod config;
mod db;
mod digest;
mod errors;
mod models;
mod queue;
mod services;
mod source;
mod worker;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use assets::PathAssetPipeline;
use blob::{BlobStore, LocalBlobStore};
use cache::{RedirectPool, RedisConnection, RedisConnector, TieredCache};
use config::Config;
use db::Repository;
use queue::{JobReceiver, LocalQueue};
use services::{
    AnnotationVersionManager, CodegenTaskManager, DesignRevisionManager, RequirementDocManager,
};
use source::{DesignSource, HttpDesignSource};
use worker::CodegenWorker;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub designs: Arc<DesignRevisionManager>,
    pub annotations: Arc<AnnotationVersionManager>,
    pub requirements: Arc<RequirementDocManager>,
    pub tasks: Arc<CodegenTaskManager>,
    pub blob: Arc<dyn BlobStore>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting design-to-code backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Blob root: {:?}", config.blob_root);
    tracing::info!("Bind address: {}", config.bind_addr);

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (DESIGNCODE_API_PSK). Authentication is disabled!");
    }

    let cache = Arc::new(connect_cache(&config).await);
    let (state, receiver) =
        build_state(config.clone(), cache, Arc::new(HttpDesignSource::new())).await?;

    let worker = Arc::new(CodegenWorker::new(state.tasks.clone(), state.blob.clone()));
    queue::spawn_workers(receiver, worker, config.worker_concurrency);
    tracing::info!("Started {} codegen workers", config.worker_concurrency);

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Connect to the primary cache node, or fall back to an in-process cache.
async fn connect_cache(config: &Config) -> TieredCache {
    let Some(url) = &config.redis_url else {
        tracing::info!("No DESIGNCODE_REDIS_URL set, using in-process cache");
        return TieredCache::in_memory();
    };

    match RedisConnection::open(url).await {
        Ok(primary) => {
            tracing::info!("Connected to cache at {}", url);
            TieredCache::new(
                Arc::new(primary),
                Arc::new(RedisConnector),
                RedirectPool::new(config.redirect_pool_size, config.redirect_idle_timeout),
            )
        }
        Err(e) => {
            tracing::warn!("Cache at {} unavailable ({}), using in-process cache", url, e);
            TieredCache::in_memory()
        }
    }
}

/// Wire repository, collaborators and managers. The returned receiver feeds the worker pool.
pub async fn build_state(
    config: Config,
    cache: Arc<TieredCache>,
    source: Arc<dyn DesignSource>,
) -> Result<(AppState, JobReceiver), Box<dyn std::error::Error>> {
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let blob: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(
        config.blob_root.clone(),
        config.blob_public_url.clone(),
    ));

    let pipeline = Arc::new(PathAssetPipeline::new(
        repo.clone(),
        cache.clone(),
        blob.clone(),
        config.asset_cache_ttl,
        config.render_scale,
    ));

    let designs = Arc::new(DesignRevisionManager::new(
        repo.clone(),
        cache.clone(),
        pipeline,
        source,
        config.dsl_cache_ttl,
    ));
    let annotations = Arc::new(AnnotationVersionManager::new(
        repo.clone(),
        cache,
        config.annotation_cache_ttl,
    ));
    let requirements = Arc::new(RequirementDocManager::new(repo.clone(), blob.clone()));

    let (queue, receiver) = LocalQueue::new();
    let tasks = Arc::new(CodegenTaskManager::new(
        repo,
        Arc::new(queue),
        blob.clone(),
        annotations.clone(),
    ));

    let state = AppState {
        designs,
        annotations,
        requirements,
        tasks,
        blob,
        config: Arc::new(config),
    };
    Ok((state, receiver))
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Designs
        .route("/designs", get(api::list_designs).post(api::create_design))
        .route(
            "/designs/{id}",
            get(api::get_design)
                .put(api::update_design)
                .delete(api::delete_design),
        )
        .route("/designs/{id}/dsl", get(api::get_design_dsl))
        // Annotations
        .route(
            "/designs/{id}/annotations",
            get(api::get_annotation).post(api::save_annotation),
        )
        .route("/designs/{id}/annotations/diff", get(api::diff_annotations))
        // Requirement docs
        .route(
            "/designs/{id}/requirement-docs",
            get(api::list_requirement_docs).post(api::create_requirement_doc),
        )
        .route("/requirement-docs/{id}", get(api::get_requirement_doc))
        .route(
            "/requirement-docs/{id}/export",
            post(api::export_requirement_doc),
        )
        // Tasks
        .route("/designs/{id}/tasks", post(api::create_task))
        .route("/tasks", get(api::list_tasks))
        .route("/tasks/{id}", get(api::get_task))
        .route("/tasks/{id}/logs", get(api::get_task_logs))
        .route("/tasks/{id}/download-url", get(api::get_download_url))
        .route("/tasks/{id}/retry", post(api::retry_task))
        .route("/tasks/{id}/cancel", post(api::cancel_task))
        // Worker contract
        .route("/tasks/{id}/processing", post(api::mark_processing))
        .route("/tasks/{id}/progress", post(api::update_progress))
        .route("/tasks/{id}/complete", post(api::complete_task))
        .route("/tasks/{id}/fail", post(api::fail_task))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .nest_service("/files", ServeDir::new(&state.config.blob_root))
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
