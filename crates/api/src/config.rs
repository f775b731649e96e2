//! Application configuration loaded from environment variables.

use orchestrator::{CheckoutConfig, UploadPolicy, WriterConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — Postgres URL; the in-memory store is used when unset
/// - `SKU_MAX_ATTEMPTS` — variant SKU suffix attempts, `0` for unbounded (default: `1000`)
/// - `MAX_UPLOAD_BYTES` — per-image upload limit (default: 5 MiB)
/// - `ALLOWED_IMAGE_TYPES` — comma-separated MIME types
/// - `TAX_RATE_BPS` — tax rate in basis points (default: `0`)
/// - `BLOB_BASE_URL` — prefix of uploaded blob URLs (default: `"memory://blobs"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub sku_max_attempts: u32,
    pub max_upload_bytes: usize,
    pub allowed_image_types: Vec<String>,
    pub tax_rate_bps: u32,
    pub blob_base_url: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(lookup("PORT")).unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            sku_max_attempts: parse(lookup("SKU_MAX_ATTEMPTS"))
                .unwrap_or(defaults.sku_max_attempts),
            max_upload_bytes: parse(lookup("MAX_UPLOAD_BYTES"))
                .unwrap_or(defaults.max_upload_bytes),
            allowed_image_types: lookup("ALLOWED_IMAGE_TYPES")
                .map(|types| {
                    types
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.allowed_image_types),
            tax_rate_bps: parse(lookup("TAX_RATE_BPS")).unwrap_or(defaults.tax_rate_bps),
            blob_base_url: lookup("BLOB_BASE_URL").unwrap_or(defaults.blob_base_url),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            sku_max_attempts: WriterConfig::attempts_from_setting(self.sku_max_attempts),
            upload: UploadPolicy {
                allowed_content_types: self.allowed_image_types.clone(),
                max_bytes: self.max_upload_bytes,
            },
        }
    }

    pub fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig {
            tax_rate_bps: self.tax_rate_bps,
        }
    }
}

fn parse<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        let upload = UploadPolicy::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            sku_max_attempts: 1000,
            max_upload_bytes: upload.max_bytes,
            allowed_image_types: upload.allowed_content_types,
            tax_rate_bps: 0,
            blob_base_url: "memory://blobs".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.writer_config(), WriterConfig::default());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_lookup_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8081"),
            ("SKU_MAX_ATTEMPTS", "0"),
            ("ALLOWED_IMAGE_TYPES", "image/png, image/avif,"),
            ("TAX_RATE_BPS", "750"),
            ("DATABASE_URL", "postgres://localhost/shop"),
        ]));

        assert_eq!(config.port, 8081);
        assert_eq!(config.writer_config().sku_max_attempts, None);
        assert_eq!(
            config.allowed_image_types,
            vec!["image/png".to_string(), "image/avif".to_string()]
        );
        assert_eq!(config.checkout_config().tax_rate_bps, 750);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/shop")
        );
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup(&[("PORT", "http"), ("DATABASE_URL", " ")]));
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
    }
}
