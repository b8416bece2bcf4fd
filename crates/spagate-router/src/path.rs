//! Path resolution for single-page applications
//!
//! Rules are an ordered table evaluated first-match-wins. Static asset rules
//! must come before the document fallback, otherwise `/a/static/x.js` would be
//! served `index.html`.

use crate::{PolicyClass, RouteDecision};
use tracing::trace;

/// The SPA document every client-side route falls back to
pub const INDEX_DOCUMENT: &str = "/index.html";

const STATIC_PREFIXES: [&str; 2] = ["/static/", "/_next/static/"];
const STATIC_SEGMENT: &str = "/static/";
const AUTH_ROUTES: [&str; 2] = ["login", "logout"];

/// A single routing rule
struct Rule {
    name: &'static str,
    matches: fn(&str) -> bool,
    rewrite: fn(&str) -> RouteDecision,
}

const RULES: &[Rule] = &[
    Rule {
        name: "static",
        matches: is_static_path,
        rewrite: passthrough_static,
    },
    Rule {
        name: "legacy-static",
        matches: is_prefixed_static_path,
        rewrite: passthrough_static,
    },
    Rule {
        name: "auth",
        matches: is_auth_route,
        rewrite: index_document,
    },
    Rule {
        name: "single-segment",
        matches: is_single_segment,
        rewrite: passthrough_document,
    },
];

/// Maps request paths to upstream paths and policy classes
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl PathResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a request path. Total: every input yields a decision.
    pub fn resolve(&self, path: &str) -> RouteDecision {
        for rule in RULES {
            if (rule.matches)(path) {
                let decision = (rule.rewrite)(path);
                trace!(
                    "Path {} matched rule '{}' -> {}",
                    path,
                    rule.name,
                    decision.upstream_path
                );
                return decision;
            }
        }

        trace!("Path {} fell back to {}", path, INDEX_DOCUMENT);
        index_document(path)
    }
}

fn is_static_path(path: &str) -> bool {
    STATIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn is_prefixed_static_path(path: &str) -> bool {
    path.contains(STATIC_SEGMENT)
}

fn is_auth_route(path: &str) -> bool {
    single_segment(path).is_some_and(|segment| AUTH_ROUTES.contains(&segment))
}

fn is_single_segment(path: &str) -> bool {
    single_segment(path).is_some()
}

/// The only non-empty segment of `path`, if there is exactly one
fn single_segment(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some(segment), None) => Some(segment),
        _ => None,
    }
}

fn passthrough_static(path: &str) -> RouteDecision {
    RouteDecision::new(path, PolicyClass::StaticAsset)
}

fn passthrough_document(path: &str) -> RouteDecision {
    RouteDecision::new(path, PolicyClass::IndexDocument)
}

fn index_document(_path: &str) -> RouteDecision {
    RouteDecision::new(INDEX_DOCUMENT, PolicyClass::IndexDocument)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(path: &str) -> RouteDecision {
        PathResolver::new().resolve(path)
    }

    #[test]
    fn test_static_prefixes_pass_through() {
        for path in [
            "/static/js/main.abc123.js",
            "/static/",
            "/_next/static/chunks/app.js",
            "/static/css/deep/nested/site.css",
        ] {
            assert_eq!(
                resolve(path),
                RouteDecision::new(path, PolicyClass::StaticAsset),
                "path {}",
                path
            );
        }
    }

    #[test]
    fn test_prefixed_static_passes_through() {
        for path in [
            "/dashboard/static/js/main.js",
            "/a/b/c/static/media/logo.svg",
            "/x/static/y/static/z.js",
            "/en/static/css/site.css",
            "/app/_next/static/chunks/1.js",
        ] {
            assert_eq!(
                resolve(path),
                RouteDecision::new(path, PolicyClass::StaticAsset),
                "path {}",
                path
            );
        }
    }

    #[test]
    fn test_static_checked_before_fallback() {
        // multi-segment, would hit the index fallback if ordering were wrong
        let decision = resolve("/deep/nested/static/app.js");
        assert_eq!(decision.policy, PolicyClass::StaticAsset);
    }

    #[test]
    fn test_auth_routes_serve_index() {
        for path in ["/login", "/logout", "/login/", "//logout"] {
            assert_eq!(
                resolve(path),
                RouteDecision::new(INDEX_DOCUMENT, PolicyClass::IndexDocument),
                "path {}",
                path
            );
        }
    }

    #[test]
    fn test_single_segment_passes_through() {
        assert_eq!(
            resolve("/about"),
            RouteDecision::new("/about", PolicyClass::IndexDocument)
        );
        assert_eq!(
            resolve("/favicon.ico"),
            RouteDecision::new("/favicon.ico", PolicyClass::IndexDocument)
        );
        assert_eq!(
            resolve("/login-help"),
            RouteDecision::new("/login-help", PolicyClass::IndexDocument)
        );
        assert_eq!(
            resolve("/static"),
            RouteDecision::new("/static", PolicyClass::IndexDocument)
        );
    }

    #[test]
    fn test_fallback_to_index() {
        for path in ["/", "", "/a/b/c", "/users/42", "/login/extra", "///"] {
            assert_eq!(
                resolve(path),
                RouteDecision::new(INDEX_DOCUMENT, PolicyClass::IndexDocument),
                "path {}",
                path
            );
        }
    }

    #[test]
    fn test_single_segment_helper() {
        assert_eq!(single_segment("/about"), Some("about"));
        assert_eq!(single_segment("about"), Some("about"));
        assert_eq!(single_segment("/about/"), Some("about"));
        assert_eq!(single_segment("/"), None);
        assert_eq!(single_segment("/a/b"), None);
    }
}
