//! Configuration loading and atomic publication
//!
//! The running configuration is published through an [`ArcSwap`]: readers
//! take a snapshot pointer and use it for the whole request, writers replace
//! the snapshot in one atomic store. A failed reload leaves the previous
//! snapshot active.
//!
//! The mutation helpers (`add_domain`, `remove_domain`,
//! `set_panel_credentials`) are the interfaces the external admin panel uses:
//! they rewrite the on-disk file and then reload it through the same
//! validation path as startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let mut config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse JSON: {e} at {path:?}")))?;

    config.apply_defaults();
    config.validate()?;

    info!(
        host = %config.host,
        domains = config.domains.len(),
        upstreams = config.upstream_doh.len(),
        cache_ttl = config.cache_ttl,
        "configuration loaded"
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let mut config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.apply_defaults();
    config.validate()?;
    Ok(config)
}

/// Write a configuration back to disk as pretty-printed JSON
///
/// # Errors
///
/// Returns `ConfigError` if serialization or the write fails.
pub fn save_config(path: impl AsRef<Path>, config: &Config) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::ParseError(format!("failed to serialize config: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// SHA-256 hex digest, used for the panel password field
#[must_use]
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    hex::encode(digest)
}

/// Atomically published configuration with hot reload
///
/// # Thread Safety
///
/// `current()` is lock-free; a returned snapshot stays valid for as long as
/// the caller holds it, even across a concurrent reload.
pub struct ConfigStore {
    /// Current snapshot
    inner: ArcSwap<Config>,
    /// Path the store reloads from and writes mutations to
    path: PathBuf,
    /// Accepted bearer tokens, rebuilt on every reload
    tokens: ArcSwap<HashSet<String>>,
}

impl ConfigStore {
    /// Create a store from an already-loaded configuration
    #[must_use]
    pub fn new(config: Config, path: impl Into<PathBuf>) -> Self {
        let tokens: HashSet<String> = config.auth_tokens.iter().cloned().collect();
        Self {
            inner: ArcSwap::from_pointee(config),
            path: path.into(),
            tokens: ArcSwap::from_pointee(tokens),
        }
    }

    /// Load the file at `path` and build a store around it
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the initial load fails.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = load_config(&path)?;
        Ok(Self::new(config, path))
    }

    /// Get the current configuration snapshot
    #[must_use]
    pub fn current(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Check whether a bearer token is accepted
    #[must_use]
    pub fn token_valid(&self, token: &str) -> bool {
        self.tokens.load().contains(token)
    }

    /// Re-read the backing file and publish the new snapshot.
    ///
    /// On any failure the previous snapshot (and token set) stays active.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` from the load path.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let config = load_config(&self.path)?;
        let tokens: HashSet<String> = config.auth_tokens.iter().cloned().collect();

        self.inner.store(Arc::new(config));
        self.tokens.store(Arc::new(tokens));

        info!("configuration reloaded");
        Ok(())
    }

    /// Replace the first upstream URL (the `DOH_UPSTREAM` env override).
    ///
    /// Applied once at startup, before any front-end starts.
    pub fn override_primary_upstream(&self, url: impl Into<String>) {
        let url = url.into();
        let mut config = (*self.current()).clone();
        if config.upstream_doh.is_empty() {
            config.upstream_doh.push(url.clone());
        } else {
            config.upstream_doh[0] = url.clone();
        }
        self.inner.store(Arc::new(config));
        info!(upstream = %url, "primary upstream overridden from environment");
    }

    /// Add or replace a domain override and persist the change
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the IP does not parse or the rewrite fails.
    pub fn add_domain(&self, pattern: &str, ip: &str) -> Result<(), ConfigError> {
        if ip.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "invalid IP address: {ip}"
            )));
        }

        let mut config = (*self.current()).clone();
        config
            .domains
            .insert(pattern.to_string(), ip.to_string());
        save_config(&self.path, &config)?;
        self.reload()
    }

    /// Remove a domain override and persist the change
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the pattern is unknown or is
    /// the last remaining override, or an I/O error from the rewrite.
    pub fn remove_domain(&self, pattern: &str) -> Result<(), ConfigError> {
        let mut config = (*self.current()).clone();
        if config.domains.remove(pattern).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "unknown domain pattern: {pattern}"
            )));
        }
        if config.domains.is_empty() {
            return Err(ConfigError::ValidationError(
                "cannot remove the last domain override".into(),
            ));
        }
        save_config(&self.path, &config)?;
        self.reload()
    }

    /// Update panel credentials (password stored as SHA-256 hex) and persist
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the rewrite or reload fails.
    pub fn set_panel_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(), ConfigError> {
        let mut config = (*self.current()).clone();
        config.web_panel_username = username.to_string();
        config.web_panel_password = hash_password(password);
        save_config(&self.path, &config)?;
        self.reload()
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .field("host", &self.current().host)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp_config(config: &Config) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let json = serde_json::to_string_pretty(config).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config() {
        let file = write_temp_config(&Config::default_config());
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.host, "dns.example.com");
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config("/nonexistent/path/config.json");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_config_invalid_json() {
        let result = load_config_str("not valid json");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_store_snapshot_is_stable() {
        let file = write_temp_config(&Config::default_config());
        let store = ConfigStore::open(file.path()).unwrap();

        let before = store.current();

        // Rewrite the file with a different host, then reload.
        let mut updated = (*before).clone();
        updated.host = "other.example.com".into();
        save_config(file.path(), &updated).unwrap();
        store.reload().unwrap();

        // The old snapshot is untouched; new readers see the new one.
        assert_eq!(before.host, "dns.example.com");
        assert_eq!(store.current().host, "other.example.com");
    }

    #[test]
    fn test_reload_failure_keeps_previous() {
        let file = write_temp_config(&Config::default_config());
        let store = ConfigStore::open(file.path()).unwrap();

        std::fs::write(file.path(), "{ broken").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.current().host, "dns.example.com");
    }

    #[test]
    fn test_tokens_rebuilt_on_reload() {
        let mut config = Config::default_config();
        config.auth_tokens = vec!["alpha".into()];
        let file = write_temp_config(&config);
        let store = ConfigStore::open(file.path()).unwrap();
        assert!(store.token_valid("alpha"));
        assert!(!store.token_valid("beta"));

        config.auth_tokens = vec!["beta".into()];
        save_config(file.path(), &config).unwrap();
        store.reload().unwrap();
        assert!(!store.token_valid("alpha"));
        assert!(store.token_valid("beta"));
    }

    #[test]
    fn test_add_and_remove_domain() {
        let file = write_temp_config(&Config::default_config());
        let store = ConfigStore::open(file.path()).unwrap();

        store.add_domain("*.new.example", "10.1.2.3").unwrap();
        assert_eq!(
            store.current().domains.get("*.new.example").map(String::as_str),
            Some("10.1.2.3")
        );

        // Persisted: a fresh load sees it too.
        let reloaded = load_config(file.path()).unwrap();
        assert!(reloaded.domains.contains_key("*.new.example"));

        store.remove_domain("*.new.example").unwrap();
        assert!(!store.current().domains.contains_key("*.new.example"));

        assert!(store.remove_domain("*.new.example").is_err());
        assert!(store.add_domain("x.example", "not-an-ip").is_err());
    }

    #[test]
    fn test_set_panel_credentials() {
        let file = write_temp_config(&Config::default_config());
        let store = ConfigStore::open(file.path()).unwrap();

        store.set_panel_credentials("admin", "secret").unwrap();
        let current = store.current();
        assert_eq!(current.web_panel_username, "admin");
        assert_eq!(current.web_panel_password, hash_password("secret"));
        assert_eq!(current.web_panel_password.len(), 64);
    }

    #[test]
    fn test_override_primary_upstream() {
        let file = write_temp_config(&Config::default_config());
        let store = ConfigStore::open(file.path()).unwrap();

        store.override_primary_upstream("https://9.9.9.9/dns-query");
        assert_eq!(
            store.current().upstream_doh[0],
            "https://9.9.9.9/dns-query"
        );
    }
}
