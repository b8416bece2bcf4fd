//! Request interceptors
//!
//! Interceptors observe every request without influencing routing. The chain
//! runs all `on_request` hooks in registration order, then the handler, then
//! all `on_response` hooks in reverse order (like nested middleware).

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::HOST;
use http::{HeaderMap, HeaderValue, Method};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Header carrying the handling time, e.g. `12ms`
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// Read-only view of an inbound request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub host: Option<String>,
}

impl RequestContext {
    pub fn from_request<B>(request: &http::Request<B>) -> Self {
        let uri = request.uri();
        Self {
            method: request.method().clone(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers: request.headers().clone(),
            host: request_host(request),
        }
    }

    /// Path plus query string, as received
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// `Host` header, falling back to the URI authority (HTTP/2)
pub fn request_host<B>(request: &http::Request<B>) -> Option<String> {
    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

/// Hooks run around every request
pub trait RequestInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_request(&self, _ctx: &RequestContext) {}

    fn on_response(&self, _ctx: &RequestContext, _response: &mut Response, _elapsed: Duration) {}
}

/// Sets `X-Response-Time` on every response
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTiming;

impl RequestInterceptor for ResponseTiming {
    fn name(&self) -> &'static str {
        "response-timing"
    }

    fn on_response(&self, _ctx: &RequestContext, response: &mut Response, elapsed: Duration) {
        if let Ok(value) = HeaderValue::from_str(&format!("{}ms", elapsed.as_millis())) {
            response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
        }
    }
}

/// Logs one line per request
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

impl RequestInterceptor for AccessLog {
    fn name(&self) -> &'static str {
        "access-log"
    }

    fn on_response(&self, ctx: &RequestContext, response: &mut Response, elapsed: Duration) {
        info!(
            "{} {} {} {} - {}ms",
            ctx.host.as_deref().unwrap_or("-"),
            ctx.method,
            ctx.path_and_query(),
            response.status().as_u16(),
            elapsed.as_millis()
        );
    }
}

/// Ordered, shareable list of interceptors
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: impl RequestInterceptor + 'static) {
        self.interceptors.push(Arc::new(interceptor));
    }

    pub fn with(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.push(interceptor);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

/// axum middleware driving the chain
pub async fn run_interceptors(
    State(chain): State<InterceptorChain>,
    request: Request,
    next: Next,
) -> Response {
    if chain.is_empty() {
        return next.run(request).await;
    }

    let ctx = RequestContext::from_request(&request);
    for interceptor in &chain.interceptors {
        interceptor.on_request(&ctx);
    }

    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = start.elapsed();

    for interceptor in chain.interceptors.iter().rev() {
        interceptor.on_response(&ctx, &mut response, elapsed);
    }

    response
}
