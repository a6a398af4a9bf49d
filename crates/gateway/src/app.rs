//! Application wiring: shared state and the router

use crate::handlers;
use crate::middleware::{
    metrics::track_requests,
    rate_limit::{create_rate_limiter, rate_limit_middleware},
};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use docfill_common::{
    config::{AppConfig, RetrievalBackend},
    db::DbPool,
    document::JsonDocumentCodec,
    embeddings::create_embedder,
    errors::Result,
    events::{EventBus, InMemoryEventBus},
    generation::create_generator,
    sources::{InMemorySourceCatalog, SourceCatalog},
    store::create_task_store,
};
use docfill_filler::{
    ContentGenerator, FsTemplateRepository, OrchestratorDeps, OrchestratorSettings, TaskOrchestrator,
};
use docfill_ingestion::{IngestionProcessor, LopdfExtractor};
use docfill_search::{create_backend, FusionEngine};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: TaskOrchestrator,
    pub ingestion: Arc<IngestionProcessor>,
    pub db: Option<Arc<DbPool>>,
}

/// Build every collaborator selected by configuration
pub async fn build_state(config: Arc<AppConfig>) -> Result<AppState> {
    let db = match config.retrieval.backend {
        RetrievalBackend::Postgres => {
            info!("Connecting to database...");
            Some(Arc::new(DbPool::new(&config.database).await?))
        }
        RetrievalBackend::Memory => None,
    };

    let backend = create_backend(&config.retrieval, db.clone()).await?;
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    let store = create_task_store(&config.tasks).await?;
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
    let catalog: Arc<dyn SourceCatalog> = Arc::new(InMemorySourceCatalog::new());

    let templates = FsTemplateRepository::new(&config.storage);
    templates.ensure_dirs().await?;

    let orchestrator = TaskOrchestrator::new(
        OrchestratorDeps {
            store,
            bus,
            templates: Arc::new(templates),
            codec: Arc::new(JsonDocumentCodec),
            engine: Arc::new(FusionEngine::new(
                backend.clone(),
                embedder.clone(),
                &config.retrieval,
            )),
            catalog: catalog.clone(),
            content: ContentGenerator::new(generator.clone()),
        },
        OrchestratorSettings {
            download_prefix: config.storage.download_prefix.clone(),
            top_k: config.retrieval.top_k,
        },
    );

    let ingestion = Arc::new(IngestionProcessor::new(
        Arc::new(LopdfExtractor),
        generator,
        embedder,
        backend,
        catalog,
        config.ingestion.clone(),
    ));

    info!(
        retrieval = ?config.retrieval.backend,
        tasks = ?config.tasks.store,
        generation = %config.generation.provider,
        "Collaborators ready"
    );

    Ok(AppState {
        config,
        orchestrator,
        ingestion,
        db,
    })
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let upload_limit = DefaultBodyLimit::max(state.config.server.max_upload_bytes);

    let template_routes = Router::new()
        .route("/fill", post(handlers::templates::fill_templates))
        .route("/progress/{task_id}", get(handlers::templates::get_progress))
        .route("/download/{filename}", get(handlers::templates::download))
        .route("/list-templates/{folder}", get(handlers::templates::list_templates))
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    let source_routes = Router::new()
        .route("/upload", post(handlers::sources::upload).layer(upload_limit))
        .route("/list", get(handlers::sources::list))
        .route("/", delete(handlers::sources::delete_all))
        .route("/{source_id}", delete(handlers::sources::delete_source));

    let mut api_routes = Router::new()
        .nest("/api/template", template_routes)
        .nest("/api/pdf", source_routes)
        .route("/api/ws/progress/{task_id}", get(handlers::events::progress_socket));

    if state.config.rate_limit.enabled {
        let limiter = create_rate_limiter(&state.config.rate_limit);
        api_routes = api_routes.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    // Compose the app
    Router::new()
        // Health endpoints (no rate limit)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .merge(api_routes)
        .layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}
