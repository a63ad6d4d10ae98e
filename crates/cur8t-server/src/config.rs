//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use cur8t_store::Database;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `cur8t.db` in the platform data directory, or `./cur8t.db`
    /// when no data directory can be determined.
    pub database_path: PathBuf,

    /// Shared secret for billing webhook signatures.
    /// Env: `LEMON_SQUEEZY_WEBHOOK_SECRET`
    /// Default: empty (every webhook is rejected).
    pub webhook_secret: String,

    /// Whether per-action and global rate limits are enforced.
    /// Env: `RATE_LIMITS_ENABLED` (true/false)
    /// Default: `true`
    pub rate_limits_enabled: bool,

    /// Whether `x-forwarded-for` / `x-real-ip` identify the client. Only
    /// enable behind a proxy that overwrites them.
    /// Env: `TRUST_PROXY_HEADERS` (true/false)
    /// Default: `true`
    pub trust_proxy_headers: bool,

    /// Collections per page on the public feed.
    /// Env: `PUBLIC_FEED_PAGE_SIZE`
    /// Default: `20`
    pub feed_page_size: usize,
}

impl std::fmt::Debug for ServerConfig {
    // Keeps the webhook secret out of the startup log.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("webhook_secret_set", &!self.webhook_secret.is_empty())
            .field("rate_limits_enabled", &self.rate_limits_enabled)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("feed_page_size", &self.feed_page_size)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: Database::default_path().unwrap_or_else(|_| PathBuf::from("cur8t.db")),
            webhook_secret: String::new(),
            rate_limits_enabled: true,
            trust_proxy_headers: true,
            feed_page_size: 20,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = get("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(secret) = get("LEMON_SQUEEZY_WEBHOOK_SECRET") {
            config.webhook_secret = secret;
        }
        if config.webhook_secret.is_empty() {
            tracing::warn!(
                "LEMON_SQUEEZY_WEBHOOK_SECRET is not set; billing webhooks will be rejected"
            );
        }

        if let Some(val) = get("RATE_LIMITS_ENABLED") {
            config.rate_limits_enabled = parse_flag(&val);
        }

        if let Some(val) = get("TRUST_PROXY_HEADERS") {
            config.trust_proxy_headers = parse_flag(&val);
        }

        if let Some(val) = get("PUBLIC_FEED_PAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.feed_page_size = n,
                _ => tracing::warn!(value = %val, "Invalid PUBLIC_FEED_PAGE_SIZE, using default"),
            }
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.webhook_secret.is_empty());
        assert!(config.rate_limits_enabled);
        assert_eq!(config.feed_page_size, 20);
        assert!(config.database_path.ends_with("cur8t.db"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/c.db"),
            ("LEMON_SQUEEZY_WEBHOOK_SECRET", "s3cret"),
            ("RATE_LIMITS_ENABLED", "false"),
            ("TRUST_PROXY_HEADERS", "0"),
            ("PUBLIC_FEED_PAGE_SIZE", "50"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, PathBuf::from("/tmp/c.db"));
        assert_eq!(config.webhook_secret, "s3cret");
        assert!(!config.rate_limits_enabled);
        assert!(!config.trust_proxy_headers);
        assert_eq!(config.feed_page_size, 50);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[("HTTP_ADDR", "nope"), ("PUBLIC_FEED_PAGE_SIZE", "0")]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.feed_page_size, 20);
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = load(&[("LEMON_SQUEEZY_WEBHOOK_SECRET", "s3cret")]);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("webhook_secret_set: true"));
    }
}
