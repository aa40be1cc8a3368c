//! Configuration types for sni-gateway
//!
//! This module defines the on-disk configuration structure. Configuration is
//! loaded from a JSON file, filled with defaults for absent fields, and
//! validated at startup and on every reload.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default TTL for synthesized override records (seconds)
pub const DEFAULT_RECORD_TTL: u32 = 3600;

/// Root configuration structure
///
/// Published atomically through [`ConfigStore`](super::ConfigStore); a loaded
/// `Config` is never mutated in place — reloads replace the whole snapshot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Canonical server host name (the name this gateway answers as)
    pub host: String,

    /// Domain overrides: pattern -> literal IP text.
    ///
    /// Patterns are exact FQDNs or wildcards of the form `*.example.com`.
    pub domains: HashMap<String, String>,

    /// SNI relay listen port
    #[serde(default = "default_sni_port")]
    pub sni_port: u16,

    /// Enable the plain DNS server on port 53
    #[serde(default)]
    pub dns_enabled: bool,

    /// Ordered upstream DoH URLs, tried first to last
    #[serde(default)]
    pub upstream_doh: Vec<String>,

    /// Accepted bearer tokens for the DoH endpoint
    #[serde(default)]
    pub auth_tokens: Vec<String>,

    /// Require `Authorization: Bearer` on DoH queries
    #[serde(default)]
    pub enable_auth: bool,

    /// Response cache TTL in seconds; `<= 0` disables caching
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: i64,

    /// Per-IP DoH rate limit (requests per second)
    #[serde(default = "default_rate_limit_per_ip")]
    pub rate_limit_per_ip: u32,

    /// Per-IP DoH burst size
    #[serde(default = "default_rate_limit_burst_ip")]
    pub rate_limit_burst_ip: u32,

    /// Log level: debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Proxies whose forwarding headers are trusted
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Blocked domain patterns (same matcher as overrides)
    #[serde(default)]
    pub blocked_domains: Vec<String>,

    /// Expose the /metrics endpoints
    #[serde(default)]
    pub metrics_enabled: bool,

    /// Web panel settings (the panel itself runs outside this core)
    #[serde(default)]
    pub web_panel_enabled: bool,

    /// Panel login name
    #[serde(default)]
    pub web_panel_username: String,

    /// Panel password as a SHA-256 hex digest
    #[serde(default)]
    pub web_panel_password: String,

    /// Panel listen port
    #[serde(default = "default_web_panel_port")]
    pub web_panel_port: u16,

    /// Enable IP-based user access control
    #[serde(default)]
    pub user_management: bool,
}

fn default_sni_port() -> u16 {
    443
}

fn default_cache_ttl() -> i64 {
    300
}

fn default_rate_limit_per_ip() -> u32 {
    10
}

fn default_rate_limit_burst_ip() -> u32 {
    20
}

fn default_log_level() -> String {
    "info".into()
}

fn default_web_panel_port() -> u16 {
    8088
}

/// Default upstream resolvers used when the config lists none
pub const DEFAULT_UPSTREAMS: [&str; 2] = [
    "https://1.1.1.1/dns-query",
    "https://8.8.8.8/dns-query",
];

impl Config {
    /// Fill in defaults for fields the file left empty.
    ///
    /// Serde defaults cover absent fields; this covers fields that are
    /// present but empty (mirroring how the service has always treated the
    /// file).
    pub fn apply_defaults(&mut self) {
        if self.upstream_doh.is_empty() {
            self.upstream_doh = DEFAULT_UPSTREAMS.iter().map(|s| (*s).to_string()).collect();
        }
        if self.log_level.is_empty() {
            self.log_level = default_log_level();
        }
        if self.sni_port == 0 {
            self.sni_port = default_sni_port();
        }
        if self.web_panel_port == 0 {
            self.web_panel_port = default_web_panel_port();
        }
        if self.rate_limit_per_ip == 0 {
            self.rate_limit_per_ip = default_rate_limit_per_ip();
        }
        if self.rate_limit_burst_ip == 0 {
            self.rate_limit_burst_ip = default_rate_limit_burst_ip();
        }
        if self.cache_ttl == 0 {
            self.cache_ttl = default_cache_ttl();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the host is empty, an
    /// override IP does not parse, or the log level is unknown.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationError("host cannot be empty".into()));
        }

        if self.domains.is_empty() {
            return Err(ConfigError::ValidationError(
                "domains cannot be empty".into(),
            ));
        }

        for (pattern, ip) in &self.domains {
            if pattern.is_empty() {
                return Err(ConfigError::ValidationError(
                    "domain pattern cannot be empty".into(),
                ));
            }
            if ip.parse::<IpAddr>().is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "invalid IP address for domain {pattern}: {ip}"
                )));
            }
        }

        match self.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "invalid log level: {other}"
                )));
            }
        }

        Ok(())
    }

    /// Cache TTL as a `Duration`, or `None` when caching is disabled
    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        if self.cache_ttl > 0 {
            #[allow(clippy::cast_sign_loss)]
            Some(Duration::from_secs(self.cache_ttl as u64))
        } else {
            None
        }
    }

    /// Look up the override IP for a host name.
    ///
    /// Iteration order over the override map is unspecified; when several
    /// patterns match the same host, whichever is visited first wins.
    #[must_use]
    pub fn find_override(&self, host: &str) -> Option<IpAddr> {
        crate::dns::matcher::find_value(&self.domains, host)
            .and_then(|ip| ip.parse::<IpAddr>().ok())
    }

    /// Check whether a host name matches any blocked pattern
    #[must_use]
    pub fn is_blocked(&self, host: &str) -> bool {
        self.blocked_domains
            .iter()
            .any(|pattern| crate::dns::matcher::matches(host, pattern))
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        let mut domains = HashMap::new();
        domains.insert("example.com".to_string(), "127.0.0.1".to_string());

        Self {
            host: "dns.example.com".into(),
            domains,
            sni_port: default_sni_port(),
            dns_enabled: false,
            upstream_doh: DEFAULT_UPSTREAMS.iter().map(|s| (*s).to_string()).collect(),
            auth_tokens: Vec::new(),
            enable_auth: false,
            cache_ttl: default_cache_ttl(),
            rate_limit_per_ip: default_rate_limit_per_ip(),
            rate_limit_burst_ip: default_rate_limit_burst_ip(),
            log_level: default_log_level(),
            trusted_proxies: Vec::new(),
            blocked_domains: Vec::new(),
            metrics_enabled: false,
            web_panel_enabled: false,
            web_panel_username: String::new(),
            web_panel_password: String::new(),
            web_panel_port: default_web_panel_port(),
            user_management: false,
        }
    }
}
