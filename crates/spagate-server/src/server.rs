//! Proxy server: listener, routes and the per-request pipeline
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use spagate_router::{PathResolver, PolicyClass, TenantRegistry};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::forwarder::ProxyForwarder;
use crate::headers::{DecorationMode, HeaderDecorator};
use crate::health::{self, ReadinessProbe, DEFAULT_READY_FILE};
use crate::interceptor::{request_host, run_interceptors, InterceptorChain, RequestInterceptor};

/// Port the proxy listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    pub bind_addr: SocketAddr,
    /// Readiness sentinel path
    pub ready_file: PathBuf,
    /// Bound on connect + response head for each upstream call
    pub upstream_timeout: Duration,
    pub decoration_mode: DecorationMode,
}

impl Default for ProxyServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            ready_file: PathBuf::from(DEFAULT_READY_FILE),
            upstream_timeout: Duration::from_secs(30),
            decoration_mode: DecorationMode::default(),
        }
    }
}

/// Shared, read-only state handed to every handler
pub struct AppState {
    pub registry: Arc<TenantRegistry>,
    pub resolver: PathResolver,
    pub forwarder: ProxyForwarder,
    pub decorator: HeaderDecorator,
    pub readiness: ReadinessProbe,
}

pub struct ProxyServer {
    config: ProxyServerConfig,
    registry: Arc<TenantRegistry>,
    interceptors: InterceptorChain,
}

impl ProxyServer {
    pub fn new(config: ProxyServerConfig, registry: TenantRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            interceptors: InterceptorChain::new(),
        }
    }

    pub fn with_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Build the router: health probes plus a catch-all proxy route
    pub fn build_router(&self) -> Router {
        let state = Arc::new(AppState {
            registry: self.registry.clone(),
            resolver: PathResolver::new(),
            forwarder: ProxyForwarder::new(self.config.upstream_timeout),
            decorator: HeaderDecorator::new(self.config.decoration_mode),
            readiness: ReadinessProbe::new(self.config.ready_file.clone()),
        });

        Router::new()
            .route(
                "/healthz",
                get(health::liveness).fallback(health::method_not_allowed),
            )
            .route(
                "/readyz",
                get(health::readiness).fallback(health::method_not_allowed),
            )
            .fallback(proxy_request)
            .with_state(state)
            .layer(axum::middleware::from_fn_with_state(
                self.interceptors.clone(),
                run_interceptors,
            ))
    }

    /// Start the proxy server and serve until the process exits
    pub async fn start(self) -> Result<(), ServerError> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Start the proxy server, draining connections once `shutdown` resolves
    pub async fn start_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = self.config.bind_addr;

        let listener = TcpListener::bind(local_addr).await.map_err(|e| {
            let port = local_addr.port();
            let address = local_addr.ip().to_string();
            let reason = e.to_string();
            ServerError::BindError {
                address,
                port,
                reason,
            }
        })?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bound_addr = listener.local_addr()?;
        info!(
            "SPA proxy listening on {} ({} tenants, interceptors: {:?})",
            bound_addr,
            self.registry.len(),
            self.interceptors.names()
        );

        let router = self.build_router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("SPA proxy on {} stopped", bound_addr);
        Ok(())
    }
}

/// Tenant lookup and path resolution, then forward, then decorate
async fn proxy_request(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let host = request_host(&request);
    if host.is_some() && state.registry.find(host.as_deref()).is_none() {
        debug!("No tenant for host {:?}, using default origin", host);
    }
    let origin = state.registry.lookup(host.as_deref()).clone();
    let decision = state.resolver.resolve(request.uri().path());

    match state
        .forwarder
        .forward(&origin, &decision.upstream_path, request)
        .await
    {
        Ok(response) => {
            let status = response.status();
            state.decorator.decorate(response, decision.policy, status)
        }
        Err(e) => {
            warn!("Proxy error for host {:?}: {}", host, e);
            let status = e.status();
            state
                .decorator
                .decorate(e.into_response(), PolicyClass::NoStore, status)
        }
    }
}
