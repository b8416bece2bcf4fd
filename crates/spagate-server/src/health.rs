//! Liveness and readiness endpoints
//!
//! Readiness is driven by a sentinel file: the orchestrator (or an entrypoint
//! script) creates it once the instance may receive traffic and removes it to
//! drain. The file is checked on every probe; nothing is cached.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::header::ALLOW;
use http::StatusCode;
use spagate_router::PolicyClass;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::server::AppState;

/// Default sentinel path, relative to the working directory
pub const DEFAULT_READY_FILE: &str = "ready";

/// Checks the readiness sentinel
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    sentinel: PathBuf,
}

impl ReadinessProbe {
    pub fn new(sentinel: impl Into<PathBuf>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    pub fn sentinel(&self) -> &Path {
        &self.sentinel
    }

    /// Whether the sentinel exists and is accessible
    ///
    /// Any I/O error (missing file, permissions) counts as not ready.
    pub async fn is_ready(&self) -> bool {
        match tokio::fs::metadata(&self.sentinel).await {
            Ok(_) => true,
            Err(e) => {
                debug!(
                    "Readiness sentinel {} unavailable: {}",
                    self.sentinel.display(),
                    e
                );
                false
            }
        }
    }
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self::new(DEFAULT_READY_FILE)
    }
}

/// `GET /healthz`
pub async fn liveness(State(state): State<Arc<AppState>>) -> Response {
    let response = (StatusCode::OK, "healthy").into_response();
    state
        .decorator
        .decorate(response, PolicyClass::NoStore, StatusCode::OK)
}

/// Any other method on a probe route
pub async fn method_not_allowed(State(state): State<Arc<AppState>>) -> Response {
    let status = StatusCode::METHOD_NOT_ALLOWED;
    let response = (status, [(ALLOW, "GET,HEAD")], "method not allowed").into_response();
    state
        .decorator
        .decorate(response, PolicyClass::NoStore, status)
}

/// `GET /readyz`
pub async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    let (status, body) = if state.readiness.is_ready().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::NOT_FOUND, "not ready")
    };

    state
        .decorator
        .decorate((status, body).into_response(), PolicyClass::NoStore, status)
}
