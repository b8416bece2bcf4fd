//! Routing decisions for multi-tenant SPA hosting
//!
//! Resolves the backend origin from the HTTP `Host` header and maps the
//! request path onto an upstream path plus a caching policy class.

pub mod path;
pub mod registry;

pub use path::PathResolver;
pub use registry::{RegistryError, TenantEntry, TenantRegistry, TenantTable, DEFAULT_ORIGIN};

/// Caching behavior applied to a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyClass {
    /// Fingerprinted build output, cacheable for a day
    StaticAsset,
    /// The SPA document, always revalidated
    IndexDocument,
    /// Health responses and proxy-generated errors
    NoStore,
}

/// Outcome of path resolution for a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    /// Path to request on the tenant origin (without query string)
    pub upstream_path: String,
    pub policy: PolicyClass,
}

impl RouteDecision {
    pub fn new(upstream_path: impl Into<String>, policy: PolicyClass) -> Self {
        Self {
            upstream_path: upstream_path.into(),
            policy,
        }
    }
}
