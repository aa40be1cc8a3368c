//! sni-gateway: multi-protocol DNS gateway with a transparent SNI relay
//!
//! The gateway answers DNS over three transports — cleartext UDP/TCP on
//! port 53, TLS on port 853 (DoT), and HTTP on a loopback port (DoH, fronted
//! by an external TLS terminator) — and simultaneously runs a layer-4 TLS
//! relay on the public TLS port: it peeks at each ClientHello, extracts the
//! Server Name Indication, dials a backend chosen from the name, and splices
//! bytes both ways without ever terminating TLS.
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────────────────────┐
//!   UDP/TCP :53 ──────▶│                            │
//!   DoT :853 ─────────▶│  Resolver                  │──▶ upstream DoH
//!   DoH 127.0.0.1:8080▶│  block ▶ cache ▶ override  │    (ordered failover)
//!                      └────────────────────────────┘
//!
//!   TLS :443 ──▶ SNI peek ──▶ route ──▶ dial ──▶ replay ──▶ splice
//! ```
//!
//! # Modules
//!
//! - [`config`]: JSON configuration with atomic hot reload
//! - [`access`]: IP → user access table with FIFO binding
//! - [`limit`]: global and per-IP token buckets
//! - [`metrics`]: process-wide counters with Prometheus rendering
//! - [`dns`]: the resolution pipeline and its protocol front-ends
//! - [`sni`]: the ClientHello-peeking TCP splicer
//! - [`io`]: buffer pool and bidirectional copy for the splicer
//! - [`tls`]: server certificate loading and cipher policy
//! - [`error`]: configuration and startup error types

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod access;
pub mod config;
pub mod dns;
pub mod error;
pub mod io;
pub mod limit;
pub mod metrics;
pub mod sni;
pub mod tls;

pub use access::{AccessError, AccessTable, UserSnapshot};
pub use config::{Config, ConfigStore};
pub use dns::{
    DnsError, DnsResult, DohServer, DohUpstreams, DotServer, ResponseCache, Resolver,
    TcpDnsServer, UdpDnsServer, UpstreamTransport,
};
pub use error::{ConfigError, StartupError};
pub use limit::{GlobalRateLimiter, IpRateLimiters};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use sni::{ProxyError, SniProxy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
