//! Tenant table loading
//!
//! The tenant table is a YAML (or JSON) file mapping hosts to origins. It is
//! read once at startup; any problem with it is fatal.

use anyhow::{Context, Result};
use spagate_router::{TenantRegistry, TenantTable};
use std::fs;
use std::path::Path;

/// Read and parse the tenant table file
pub fn load_tenant_table(path: &Path) -> Result<TenantTable> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tenant table: {:?}", path))?;

    if contents.trim().is_empty() {
        anyhow::bail!("Tenant table {:?} is empty", path);
    }

    let table: TenantTable = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse tenant table: {:?}", path))?;

    Ok(table)
}

/// Load the tenant table and validate it into a registry
pub fn load_registry(path: &Path) -> Result<TenantRegistry> {
    let table = load_tenant_table(path)?;
    TenantRegistry::from_table(table)
        .with_context(|| format!("Invalid tenant table: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_registry() {
        let file = write_config(
            r#"
shop.example.com:
  uri: http://shop-frontend:8080
blog.example.com:
  uri: http://blog-frontend
"#,
        );

        let registry = load_registry(file.path()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.lookup(Some("shop.example.com")).authority().unwrap(),
            "shop-frontend:8080"
        );
    }

    #[test]
    fn test_load_json_registry() {
        let file = write_config(r#"{"shop.example.com": {"uri": "http://shop-frontend"}}"#);

        let registry = load_registry(file.path()).unwrap();
        assert!(registry.contains("shop.example.com"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = load_registry(&dir.path().join("tenants.yaml"));

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("Failed to read tenant table"), "{}", message);
    }

    #[test]
    fn test_empty_file_is_error() {
        let file = write_config("  \n");
        assert!(load_registry(file.path()).is_err());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let file = write_config("shop.example.com: [not, a, tenant");
        let message = format!("{:#}", load_registry(file.path()).unwrap_err());
        assert!(message.contains("Failed to parse tenant table"), "{}", message);

        let file = write_config("shop.example.com:\n  origin: http://shop\n");
        assert!(load_registry(file.path()).is_err());
    }

    #[test]
    fn test_invalid_origin_is_error() {
        let file = write_config("shop.example.com:\n  uri: shop-frontend:8080\n");
        let message = format!("{:#}", load_registry(file.path()).unwrap_err());
        assert!(message.contains("Invalid tenant table"), "{}", message);
        assert!(message.contains("shop.example.com"), "{}", message);
    }
}
