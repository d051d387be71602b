use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use torii_core::{IssueFactory, MappingTable, Pipeline, SeverityConfig};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::handlers;
use crate::middleware as app_middleware;
use crate::validator::ValidatorClient;

/// Shared per-process state: the immutable preprocessing pipeline and the
/// outbound engine client. Safe for unbounded concurrent reads.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub validator: ValidatorClient,
    pub issues: IssueFactory,
}

/// Builds the application router, loading the mapping table from disk.
pub fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let mapping = MappingTable::from_path(&cfg.mapping.path)?;
    tracing::info!(path = %cfg.mapping.path, rules = mapping.len(), "mapping table loaded");
    if mapping.is_empty() {
        tracing::warn!("mapping table is empty, every bundle will pass through unannotated");
    }

    let severities = SeverityConfig::from_levels(
        cfg.severity.mapping_issue,
        cfg.severity.parsing_issue,
        cfg.severity.empty_bundle_issue,
    )?;
    let issues = IssueFactory::new(severities);
    let state = AppState {
        pipeline: Arc::new(Pipeline::new(mapping, issues)),
        validator: ValidatorClient::new(&cfg.validator)?,
        issues,
    };
    Ok(router(cfg, state))
}

fn router(cfg: &AppConfig, state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/validate", post(handlers::validate))
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<axum::body::Body>| {
                    use tracing::field::Empty;
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    let request_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %method,
                        http.target = %uri,
                        http.status_code = Empty,
                        request_id = %request_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<axum::body::Body>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes))
        .with_state(state)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        let config = AppConfig::default();
        Self {
            addr: config.addr(),
            config,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.addr = config.addr();
        self.config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<ToriiServer> {
        let app = build_app(&self.config)?;
        Ok(ToriiServer {
            addr: self.addr,
            app,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ToriiServer {
    addr: SocketAddr,
    app: Router,
}

impl ToriiServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
