//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the proxy handler under `{context_path}/proxy`
//! - Wire up middleware (request ID, tracing)
//! - Bind to the listener, plain or TLS
//! - Swap per-request state on config reload
//! - Run the pool reaper and the admin API alongside the proxy
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → SetRequestId → Trace → PropagateRequestId
//!     → proxy_handler
//!         → extract_target (url query parameter)
//!         → UrlValidator (Accept / Reject)
//!         → Forwarder (translate, execute, relay)
//!     → response::finalize (metrics, log)
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin;
use crate::config::validation::validate_config;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::forward::{ForwardSettings, Forwarder, ProxyRequest};
use crate::http::request::{extract_target, request_id, MakeRequestUuid};
use crate::http::response::{self, NO_UPSTREAM};
use crate::net::tls::load_tls_config;
use crate::pool::{ConnectionPool, Connector, PoolKey};
use crate::security::validator::{AllowListValidator, UrlValidator, Verdict};

/// How long in-flight TLS connections may drain after shutdown.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),
}

/// Per-request state, replaced wholesale on config reload.
pub struct ProxyState {
    pub config: ProxyConfig,
    pub forwarder: Forwarder,
    pub validator: Arc<dyn UrlValidator>,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<ProxyState>>,
    pub pool: Arc<ConnectionPool>,
    pub started_at: Instant,
    pub in_flight: Arc<AtomicUsize>,
    validator_override: Option<Arc<dyn UrlValidator>>,
    inbound_tls: bool,
}

impl AppState {
    fn build(
        config: ProxyConfig,
        pool: &Arc<ConnectionPool>,
        validator_override: Option<&Arc<dyn UrlValidator>>,
    ) -> ProxyState {
        let validator: Arc<dyn UrlValidator> = match validator_override {
            Some(validator) => Arc::clone(validator),
            None => Arc::new(AllowListValidator::from_config(&config.target_policy)),
        };
        let forwarder = Forwarder::new(ForwardSettings::from_config(&config), Arc::clone(pool));
        ProxyState {
            config,
            forwarder,
            validator,
        }
    }

    /// Swap in a new configuration. Invalid configurations are ignored.
    ///
    /// The pool and the listener keep the settings they started with.
    pub fn reload(&self, config: ProxyConfig) -> bool {
        if let Err(errors) = validate_config(&config) {
            for error in &errors {
                tracing::error!(error = %error, "Rejected reloaded configuration");
            }
            return false;
        }

        let next = Self::build(config, &self.pool, self.validator_override.as_ref());
        self.inner.store(Arc::new(next));
        tracing::info!("Configuration reloaded");
        true
    }

    /// Number of proxy requests currently waiting on upstream.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// Counts a request as in flight until dropped.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// HTTP server for the forwarding proxy.
pub struct HttpServer {
    config: ProxyConfig,
    state: AppState,
}

impl HttpServer {
    /// Create a server, its connection pool and its upstream TLS client.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let connector = Connector::new()?;
        let pool = Arc::new(ConnectionPool::new(
            config.pool.clone(),
            connector,
            config.upstream.connect_timeout(),
        ));

        let state = AppState {
            inner: Arc::new(ArcSwap::from_pointee(AppState::build(config.clone(), &pool, None))),
            pool,
            started_at: Instant::now(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            validator_override: None,
            inbound_tls: config.listener.tls.is_some(),
        };

        Ok(Self { config, state })
    }

    /// Replace the configured allow-list with a custom target policy.
    pub fn with_validator(mut self, validator: Arc<dyn UrlValidator>) -> Self {
        let current = self.state.inner.load();
        let next = AppState::build(current.config.clone(), &self.state.pool, Some(&validator));
        self.state.inner.store(Arc::new(next));
        self.state.validator_override = Some(validator);
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        let proxy_path = self.config.listener.proxy_path();

        Router::new()
            .route(&proxy_path, any(proxy_handler))
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        tracing::info_span!(
                            "proxy",
                            request_id = %request_id(request),
                            method = %request.method(),
                        )
                    }))
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Configurations received on `config_updates` replace the per-request
    /// state. The pool reaper and the admin API stop on the same signal.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            proxy_path = %self.config.listener.proxy_path(),
            tls = self.config.listener.tls.is_some(),
            "HTTP server starting"
        );

        let reaper = self.state.pool.spawn_reaper(shutdown.resubscribe());

        if self.config.admin.enabled {
            spawn_admin(self.state.clone(), &self.config.admin.bind_address, shutdown.resubscribe()).await?;
        }

        let reload_state = self.state.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => {
                            reload_state.reload(config);
                        }
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        match &self.config.listener.tls {
            None => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        tracing::info!("HTTP server received shutdown signal, draining");
                    })
                    .await?;
            }
            Some(tls) => {
                let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    tracing::info!("HTTPS server received shutdown signal, draining");
                    drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
                });

                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
        }

        let _ = reaper.await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn spawn_admin(
    state: AppState,
    bind_address: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(bind_address).await?;
    let addr = listener.local_addr()?;
    let router = admin::setup_admin_router(state);

    tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Admin API server failed");
        }
    });

    tracing::info!(address = %addr, "Admin API listening");
    Ok(())
}

/// Main proxy handler.
/// Resolves the target, asks the validator, and forwards the request.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let _in_flight = InFlightGuard::enter(&state.in_flight);
    let current = state.inner.load_full();
    let method = request.method().clone();

    let target = match extract_target(request.uri()) {
        Ok(target) => target,
        Err(e) => return response::finalize(Err(e), &method, NO_UPSTREAM, start),
    };
    let upstream = PoolKey::from_url(&target)
        .map(|key| key.to_string())
        .unwrap_or_else(|_| NO_UPSTREAM.to_string());

    tracing::debug!(target = %target, "Proxying request");

    if let Verdict::Reject(reason) = current.validator.validate(&target) {
        return response::finalize(Err(ProxyError::TargetRejected(reason)), &method, &upstream, start);
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = request.into_parts();

    let result = current
        .forwarder
        .forward(ProxyRequest {
            method: parts.method,
            target,
            headers: parts.headers,
            body,
            peer,
            inbound_tls: state.inbound_tls,
        })
        .await;

    response::finalize(result, &method, &upstream, start)
}
