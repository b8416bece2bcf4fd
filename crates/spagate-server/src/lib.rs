//! HTTP front end for the SPA proxy
//!
//! Wires tenant resolution and path resolution from `spagate-router` into an
//! axum server that forwards requests to tenant origins, applies the caching
//! policy and answers orchestrator health probes.

pub mod forwarder;
pub mod headers;
pub mod health;
pub mod interceptor;
pub mod server;

pub use forwarder::{ForwardError, ProxyForwarder};
pub use headers::{DecorationMode, HeaderDecorator};
pub use health::ReadinessProbe;
pub use interceptor::{AccessLog, InterceptorChain, RequestContext, RequestInterceptor, ResponseTiming};
pub use server::{ProxyServer, ProxyServerConfig, ServerError};
