//! Upload API server module
//!
//! A small REST API in front of the pipeline: upload a feed, get back the run report.

use crate::Result;
use crate::pipeline::Pipeline;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Largest accepted upload body
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Create the API router
///
/// # Routes
///
/// - `POST /upload` - Run the pipeline over a multipart feed upload
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /api/docs` - Swagger UI (if enabled)
pub fn create_router(state: AppState) -> Router {
    let server = state.pipeline.config().server.clone();

    let router = Router::new()
        .route("/upload", post(routes::upload_feed))
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = if server.swagger_ui {
        router.merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http());

    if server.cors_enabled {
        router.layer(build_cors_layer(&server.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer; an empty list or `"*"` allows any origin
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Serve the API on the configured bind address until `shutdown` is cancelled
///
/// A run in progress when shutdown starts is cancelled through its child token, and its
/// unsealed output is removed.
///
/// # Example
///
/// ```no_run
/// use feedmatch::{Config, Pipeline};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Arc::new(Pipeline::new(Config::from_env()?)?);
/// let shutdown = CancellationToken::new();
/// tokio::spawn(feedmatch::shutdown_on_signal(shutdown.clone()));
///
/// feedmatch::api::start_api_server(pipeline, shutdown).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(pipeline: Arc<Pipeline>, shutdown: CancellationToken) -> Result<()> {
    let bind_address = pipeline.config().server.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(AppState::new(pipeline, shutdown.clone()));
    let listener = TcpListener::bind(bind_address).await?;

    tracing::info!(address = %listener.local_addr()?, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
