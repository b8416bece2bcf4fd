//! Tenant registry mapping `Host` headers to backend origins
//!
//! The registry is built once from a [`TenantTable`] and never mutated
//! afterwards, so it can be shared between request handlers without locking.
//!
//! Lookup order:
//! - Exact (case-insensitive) host match
//! - Host with its `:port` suffix removed
//! - The default origin (`http://localhost`)

use http::Uri;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::trace;

/// Origin used when the host is absent or not registered
pub const DEFAULT_ORIGIN: &str = "http://localhost";

/// Tenant registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tenant host must not be empty")]
    EmptyHost,

    #[error("Duplicate tenant host: {0}")]
    DuplicateHost(String),

    #[error("Invalid origin for {host}: {reason}")]
    InvalidOrigin { host: String, reason: String },
}

/// Serialized per-tenant settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Absolute origin URI, e.g. `http://app-frontend:8080`
    pub uri: String,
}

/// Tenant table as it appears in the configuration file
///
/// ```yaml
/// app.example.com:
///   uri: http://app-frontend:8080
/// docs.example.com:
///   uri: http://docs-frontend:8080
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantTable(pub BTreeMap<String, TenantConfig>);

impl TenantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tenant (builder style)
    pub fn with_tenant(mut self, host: impl Into<String>, uri: impl Into<String>) -> Self {
        self.0.insert(host.into(), TenantConfig { uri: uri.into() });
        self
    }
}

/// A validated tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantEntry {
    /// Normalized (lowercase) host
    pub host: String,
    /// Absolute `http` origin
    pub origin: Uri,
}

impl TenantEntry {
    /// Validate a host/origin pair
    pub fn parse(host: &str, uri: &str) -> Result<Self, RegistryError> {
        let host = normalize_host(host);
        if host.is_empty() {
            return Err(RegistryError::EmptyHost);
        }

        let invalid = |reason: String| RegistryError::InvalidOrigin {
            host: host.clone(),
            reason,
        };

        let origin: Uri = uri.trim().parse().map_err(|e| invalid(format!("{}", e)))?;

        match origin.scheme_str() {
            Some("http") => {}
            Some(other) => return Err(invalid(format!("unsupported scheme '{}'", other))),
            None => return Err(invalid("missing scheme".to_string())),
        }
        if origin.authority().is_none() {
            return Err(invalid("missing authority".to_string()));
        }
        if origin.query().is_some() {
            return Err(invalid("query strings are not allowed".to_string()));
        }

        Ok(Self { host, origin })
    }
}

/// Immutable host -> origin lookup table
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    tenants: HashMap<String, TenantEntry>,
    default_origin: Uri,
}

impl TenantRegistry {
    /// Registry without tenants; every lookup yields the default origin
    pub fn empty() -> Self {
        Self {
            tenants: HashMap::new(),
            default_origin: Uri::from_static(DEFAULT_ORIGIN),
        }
    }

    /// Validate a tenant table and build the registry
    pub fn from_table(table: TenantTable) -> Result<Self, RegistryError> {
        let mut registry = Self::empty();

        for (host, config) in table.0 {
            let entry = TenantEntry::parse(&host, &config.uri)?;
            if registry.tenants.contains_key(&entry.host) {
                return Err(RegistryError::DuplicateHost(entry.host));
            }
            trace!("Registering tenant: {} -> {}", entry.host, entry.origin);
            registry.tenants.insert(entry.host.clone(), entry);
        }

        Ok(registry)
    }

    /// Resolve the origin for a `Host` header value
    ///
    /// Never fails: absent, empty and unknown hosts map to the default origin.
    pub fn lookup(&self, host: Option<&str>) -> &Uri {
        self.find(host)
            .map(|entry| &entry.origin)
            .unwrap_or(&self.default_origin)
    }

    /// Find the registered tenant for a host, if any
    pub fn find(&self, host: Option<&str>) -> Option<&TenantEntry> {
        let host = normalize_host(host?);
        if host.is_empty() {
            return None;
        }

        if let Some(entry) = self.tenants.get(&host) {
            return Some(entry);
        }

        let without_port = strip_port(&host);
        if without_port != host {
            trace!("Retrying tenant lookup without port: {}", without_port);
            return self.tenants.get(without_port);
        }

        None
    }

    /// Check if a host has a registered tenant
    pub fn contains(&self, host: &str) -> bool {
        self.find(Some(host)).is_some()
    }

    /// Registered hosts, sorted
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = self.tenants.keys().map(String::as_str).collect();
        hosts.sort_unstable();
        hosts
    }

    pub fn default_origin(&self) -> &Uri {
        &self.default_origin
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().to_ascii_lowercase()
}

/// Remove a trailing `:port` (keeps bracketed IPv6 literals intact)
fn strip_port(host: &str) -> &str {
    match host.rfind(':') {
        Some(idx) if !host[idx..].contains(']') => &host[..idx],
        _ => host,
    }
}
