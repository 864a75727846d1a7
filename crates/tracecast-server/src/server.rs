//! `TracecastServer`: axum router, shared state and listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracecast_store::InvestigationStore;
use tracing::{error, info};

use crate::broker::SessionRegistry;
use crate::config::{ServerConfig, TransportConfig};
use crate::health::{self, HealthResponse};
use crate::pipeline::Pipeline;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions.
    pub registry: Arc<SessionRegistry>,
    /// Ingestion pipeline.
    pub pipeline: Arc<Pipeline>,
    /// Investigation records and history.
    pub store: Arc<dyn InvestigationStore>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// SSE tuning.
    pub transport: TransportConfig,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The tracecast server.
pub struct TracecastServer {
    config: ServerConfig,
    state: AppState,
}

impl TracecastServer {
    /// Create a server over `store`.
    pub fn new(config: ServerConfig, store: Arc<dyn InvestigationStore>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.broker.clone()));
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&registry), Arc::clone(&store)));
        let state = AppState {
            registry,
            pipeline,
            store,
            shutdown: ShutdownCoordinator::new(),
            transport: config.transport.clone(),
            start_time: Instant::now(),
            metrics: None,
        };
        Self { config, state }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .merge(crate::http::routes())
            .layer(TraceLayer::new_for_http())
            .layer(self.cors_layer())
            .with_state(self.state.clone())
    }

    fn cors_layer(&self) -> CorsLayer {
        if self.config.cors_allows_any() {
            return CorsLayer::permissive();
        }
        let origins: Vec<HeaderValue> = self
            .config
            .cors_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, "listening");
        Ok((addr, handle))
    }

    /// Start the idle-session reaper; it stops on shutdown.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        self.state
            .registry
            .spawn_reaper(self.state.shutdown.token())
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Ingestion pipeline.
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.state.pipeline
    }

    /// Investigation store.
    pub fn store(&self) -> &Arc<dyn InvestigationStore> {
        &self.state.store
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.session_count(),
        state.registry.subscriber_count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
