//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: orders, health, admin, proxy fallback
//! - Wire middleware (request id, tracing, timeout, body limit, rate limit, metrics)
//! - Serve with peer addresses so the limiter can key on client IP
//! - Sweep expired rate-limit windows in the background
//! - Apply hot-reloaded configuration without dropping breaker state

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::config::{CollaboratorMode, GatewayConfig, OrchestrationConfig};
use crate::error::GatewayResult;
use crate::health::HealthProbe;
use crate::http::orders::create_order;
use crate::http::proxy::proxy_handler;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::observability::metrics;
use crate::orchestration::{InMemoryServices, MemoryInventory, OrchestrationEngine};
use crate::pipeline::{HttpTransport, PipelineRegistry, Transport};
use crate::security::{rate_limit_middleware, RateLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PipelineRegistry>,
    pub engine: Arc<OrchestrationEngine>,
    pub limiter: Arc<RateLimiter>,
    pub health: Arc<HealthProbe>,
    pub settings: Arc<ArcSwap<GatewayConfig>>,
    pub started_at: Instant,
}

impl AppState {
    fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = Arc::new(PipelineRegistry::from_config(&config, transport.clone()));
        let engine = Arc::new(OrchestrationEngine::new(registry.clone(), orchestration_settings(&config)));
        Self {
            engine,
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            health: Arc::new(HealthProbe::new(transport)),
            registry,
            settings: Arc::new(ArcSwap::from_pointee(config)),
            started_at: Instant::now(),
        }
    }

    /// Swap in a reloaded configuration. Listener and service set changes need a restart.
    pub fn apply_config(&self, config: GatewayConfig) {
        let current = self.settings.load();
        if current.listener.bind_address != config.listener.bind_address {
            tracing::warn!(
                bind_address = %config.listener.bind_address,
                "Listener change takes effect after restart"
            );
        }

        self.registry.apply(&config);
        self.limiter.update_config(config.rate_limit.clone());
        self.engine.update_config(orchestration_settings(&config));
        self.settings.store(Arc::new(config));
        tracing::info!("Configuration reloaded");
    }
}

/// Workflow settings for the active collaborator mode.
fn orchestration_settings(config: &GatewayConfig) -> OrchestrationConfig {
    let mut orchestration = config.orchestration.clone();
    // The in-process inventory deduplicates stock changes per order.
    if config.collaborators.mode == CollaboratorMode::InMemory {
        orchestration.idempotent_updates = true;
    }
    orchestration
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server whose collaborators are chosen by `collaborators.mode`.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let transport: Arc<dyn Transport> = match config.collaborators.mode {
            CollaboratorMode::Http => Arc::new(HttpTransport::from_config(&config.services)?),
            CollaboratorMode::InMemory => {
                let collaborators = &config.collaborators;
                let store = Arc::new(MemoryInventory::with_retention(&collaborators.catalog, collaborators.retention));
                Arc::new(InMemoryServices::new(store).with_retention(collaborators.retention))
            }
        };
        Ok(Self::with_transport(config, transport))
    }

    /// Create a server over an explicit transport.
    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        let state = AppState::new(config.clone(), transport);
        let router = Self::build_router(&config, state.clone());
        Self { router, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The fully layered router, without connection info.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/api/orders", post(create_order))
            .route("/health", get(health_handler));
        if config.admin.enabled {
            router = router.merge(admin::admin_router());
        }

        router
            .fallback(proxy_handler)
            .with_state(state.clone())
            .layer(middleware::from_fn_with_state(state.limiter.clone(), rate_limit_middleware))
            .layer(middleware::from_fn(track_metrics))
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let limiter = self.state.limiter.clone();
        let sweep_every = Duration::from_secs(self.state.settings.load().rate_limit.sweep_interval_secs.max(1));
        let mut sweeper_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = limiter.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "Expired rate-limit windows removed");
                        }
                    }
                    _ = sweeper_shutdown.recv() => break,
                }
            }
        });

        let state = self.state.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(config) = config_updates.recv() => state.apply_config(config),
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let settings = state.settings.load_full();
    let timeout = Duration::from_millis(settings.health.probe_timeout_ms);
    let report = state.health.check_all(&settings.services, timeout).await;
    Json(report).into_response()
}

/// Low-cardinality route label: the first two path segments.
fn route_label(path: &str) -> String {
    let segments: Vec<&str> = path.trim_start_matches('/').splitn(3, '/').take(2).collect();
    format!("/{}", segments.join("/"))
}

async fn track_metrics(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = route_label(request.uri().path());

    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), &route, start);
    response
}
