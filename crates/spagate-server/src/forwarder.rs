//! Outbound forwarding to tenant origins
//!
//! Uses the hyper-util pooled client. Each inbound request produces exactly
//! one outbound attempt, bounded by the configured timeout. The same timeout
//! bounds every gap between upstream body frames once streaming starts.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::BoxError;
use http::header::{HeaderName, CONNECTION, HOST};
use http::{HeaderMap, Request, StatusCode, Uri, Version};
use hyper::body::{Frame, Incoming, SizeHint};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::error::Error as _;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};
use tracing::{debug, warn};

/// Headers that only apply to a single connection
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Forwarding errors
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Invalid upstream target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Upstream {target} unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("Upstream {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },
}

/// Raised mid-stream when the upstream body goes quiet
#[derive(Debug, thiserror::Error)]
#[error("Upstream body stalled for {0:?}")]
pub struct BodyStalled(pub Duration);

impl ForwardError {
    /// Status returned to the client
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::InvalidTarget { .. } | ForwardError::Unreachable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ForwardError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = status.canonical_reason().unwrap_or("Upstream Error");

        (status, reason).into_response()
    }
}

/// Forwards requests to an origin with the pooled HTTP/1.1 client
#[derive(Clone)]
pub struct ProxyForwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl ProxyForwarder {
    pub fn new(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self { client, timeout }
    }

    /// Send `request` to `origin + upstream_path`, keeping its query string
    ///
    /// Dropping the returned future aborts the outbound call.
    pub async fn forward(
        &self,
        origin: &Uri,
        upstream_path: &str,
        request: Request<Body>,
    ) -> Result<Response, ForwardError> {
        let target = build_target(origin, upstream_path, request.uri().query())?;
        let target_display = target.to_string();

        let (parts, body) = request.into_parts();
        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method;
        *outbound.uri_mut() = target;
        *outbound.version_mut() = Version::HTTP_11;
        *outbound.headers_mut() = outbound_headers(parts.headers);

        debug!("Forwarding {} {}", outbound.method(), target_display);

        let result = tokio::time::timeout(self.timeout, self.client.request(outbound)).await;
        let response: http::Response<Incoming> = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let reason = match e.source() {
                    Some(source) => format!("{}: {}", e, source),
                    None => e.to_string(),
                };
                return Err(ForwardError::Unreachable {
                    target: target_display,
                    reason,
                });
            }
            Err(_) => {
                return Err(ForwardError::Timeout {
                    target: target_display,
                    after: self.timeout,
                });
            }
        };

        debug!("Upstream {} answered {}", target_display, response.status());

        let (parts, body) = response.into_parts();
        let body = IdleTimeoutBody::new(body, self.timeout);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Body wrapper failing the stream when no frame arrives within `idle`
///
/// The error aborts the client connection instead of leaving it open.
pub struct IdleTimeoutBody<B> {
    inner: B,
    idle: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl<B> IdleTimeoutBody<B> {
    pub fn new(inner: B, idle: Duration) -> Self {
        Self {
            inner,
            idle,
            sleep: Box::pin(tokio::time::sleep(idle)),
        }
    }
}

impl<B> hyper::body::Body for IdleTimeoutBody<B>
where
    B: hyper::body::Body + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(frame) => {
                let deadline = Instant::now() + this.idle;
                this.sleep.as_mut().reset(deadline);
                Poll::Ready(frame.map(|result| result.map_err(Into::into)))
            }
            Poll::Pending => match this.sleep.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    warn!("Upstream body stalled for {:?}, aborting response", this.idle);
                    Poll::Ready(Some(Err(BodyStalled(this.idle).into())))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// `origin` + `upstream_path` (+ `?query`), as plain concatenation
///
/// A path prefix on the origin is kept; its trailing slash is not doubled.
pub fn build_target(origin: &Uri, upstream_path: &str, query: Option<&str>) -> Result<Uri, ForwardError> {
    let invalid = |reason: String| ForwardError::InvalidTarget {
        target: format!("{}{}", origin, upstream_path),
        reason,
    };

    let scheme = origin
        .scheme_str()
        .ok_or_else(|| invalid("origin has no scheme".to_string()))?;
    let authority = origin
        .authority()
        .ok_or_else(|| invalid("origin has no authority".to_string()))?;
    let prefix = origin.path().trim_end_matches('/');

    let mut target = format!("{}://{}{}{}", scheme, authority, prefix, upstream_path);
    if let Some(query) = query {
        target.push('?');
        target.push_str(query);
    }

    target.parse::<Uri>().map_err(|e| invalid(e.to_string()))
}

/// Copy inbound headers minus `Host` and hop-by-hop headers
///
/// The client fills `Host` from the target authority.
fn outbound_headers(mut headers: HeaderMap) -> HeaderMap {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(HOST);

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_build_target() {
        let origin = Uri::from_static("http://backend:8080");
        let target = build_target(&origin, "/static/app.js", None).unwrap();
        assert_eq!(target, "http://backend:8080/static/app.js");
    }

    #[test]
    fn test_build_target_keeps_query_verbatim() {
        let origin = Uri::from_static("http://backend");
        let target = build_target(&origin, "/index.html", Some("a=1&b=%20x&a=2")).unwrap();
        assert_eq!(target.path(), "/index.html");
        assert_eq!(target.query(), Some("a=1&b=%20x&a=2"));
    }

    #[test]
    fn test_build_target_with_origin_prefix() {
        let origin = Uri::from_static("http://backend/tenant-a/");
        let target = build_target(&origin, "/index.html", None).unwrap();
        assert_eq!(target, "http://backend/tenant-a/index.html");
    }

    #[test]
    fn test_build_target_rejects_relative_origin() {
        let origin = Uri::from_static("/relative");
        let result = build_target(&origin, "/index.html", None);
        assert!(matches!(result, Err(ForwardError::InvalidTarget { .. })));
    }

    #[test]
    fn test_build_target_rejects_invalid_path() {
        let origin = Uri::from_static("http://backend");
        let result = build_target(&origin, "/bad path", None);
        assert!(matches!(result, Err(ForwardError::InvalidTarget { .. })));
    }

    #[test]
    fn test_outbound_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("shop.example.com"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert("accept", HeaderValue::from_static("text/html"));
        headers.insert("cookie", HeaderValue::from_static("sid=1"));

        let headers = outbound_headers(headers);

        assert!(headers.get(HOST).is_none());
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-session-hint").is_none());
        assert_eq!(headers["accept"], "text/html");
        assert_eq!(headers["cookie"], "sid=1");
    }

    /// Body that never yields a frame
    struct Stalled;

    impl hyper::body::Body for Stalled {
        type Data = axum::body::Bytes;
        type Error = std::convert::Infallible;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_idle_body_is_aborted() {
        let body = Body::new(IdleTimeoutBody::new(Stalled, Duration::from_millis(50)));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            axum::body::to_bytes(body, usize::MAX),
        )
        .await
        .expect("stalled body must error, not hang");

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_idle_timeout_passes_complete_body() {
        let inner = Body::from("hello origin");
        let body = Body::new(IdleTimeoutBody::new(inner, Duration::from_secs(1)));

        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello origin");
    }

    #[test]
    fn test_error_status() {
        let unreachable = ForwardError::Unreachable {
            target: "http://backend/".to_string(),
            reason: "connection refused".to_string(),
        };
        let timeout = ForwardError::Timeout {
            target: "http://backend/".to_string(),
            after: Duration::from_secs(1),
        };

        assert_eq!(unreachable.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
