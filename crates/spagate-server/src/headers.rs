//! Cache-Control decoration

use http::header::CACHE_CONTROL;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use spagate_router::PolicyClass;
use tracing::trace;

const STATIC_ASSET: HeaderValue = HeaderValue::from_static("public, max-age=86400");
const INDEX_DOCUMENT: HeaderValue = HeaderValue::from_static("public, max-age=0, must-revalidate");
const NO_STORE: HeaderValue = HeaderValue::from_static("no-store");

/// When the asset/document policies are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecorationMode {
    /// Leave upstream 404 responses with their own Cache-Control
    #[default]
    SkipNotFound,
    /// Apply the policy whatever the upstream status
    Always,
}

/// Merges the fixed caching policy into response headers
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderDecorator {
    mode: DecorationMode,
}

impl HeaderDecorator {
    pub fn new(mode: DecorationMode) -> Self {
        Self { mode }
    }

    /// Cache-Control value for a policy class
    pub fn cache_control(policy: PolicyClass) -> HeaderValue {
        match policy {
            PolicyClass::StaticAsset => STATIC_ASSET,
            PolicyClass::IndexDocument => INDEX_DOCUMENT,
            PolicyClass::NoStore => NO_STORE,
        }
    }

    /// Decorate a response. Only `Cache-Control` is ever touched.
    pub fn decorate<B>(
        &self,
        mut response: Response<B>,
        policy: PolicyClass,
        upstream_status: StatusCode,
    ) -> Response<B> {
        self.apply(response.headers_mut(), policy, upstream_status);
        response
    }

    /// Returns whether the header was written
    pub fn apply(&self, headers: &mut HeaderMap, policy: PolicyClass, upstream_status: StatusCode) -> bool {
        if !self.should_apply(policy, upstream_status) {
            trace!("Keeping upstream Cache-Control for {} response", upstream_status);
            return false;
        }

        // insert() drops every previous value of the key
        headers.insert(CACHE_CONTROL, Self::cache_control(policy));
        true
    }

    fn should_apply(&self, policy: PolicyClass, upstream_status: StatusCode) -> bool {
        match (self.mode, policy) {
            (_, PolicyClass::NoStore) => true,
            (DecorationMode::Always, _) => true,
            (DecorationMode::SkipNotFound, _) => upstream_status != StatusCode::NOT_FOUND,
        }
    }
}
