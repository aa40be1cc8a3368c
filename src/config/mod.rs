//! Configuration loading, validation, and atomic publication
//!
//! The gateway reads a single JSON file. [`ConfigStore`] publishes it as an
//! atomically swappable snapshot: every request reads one consistent
//! configuration for its whole lifetime, and reloads never tear.

pub mod store;
pub mod types;

pub use store::{hash_password, load_config, load_config_str, save_config, ConfigStore};
pub use types::{Config, DEFAULT_RECORD_TTL, DEFAULT_UPSTREAMS};
