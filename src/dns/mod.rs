//! DNS engine
//!
//! The query-resolution core shared by every transport, plus the protocol
//! front-ends that feed it.
//!
//! # Architecture
//!
//! ```text
//! UDP :53 ──┐
//! TCP :53 ──┤
//! DoT :853 ─┼──▶ Resolver ──▶ blocklist ▶ cache ▶ overrides ▶ upstream DoH
//! DoH :8080 ┘
//! ```
//!
//! - [`matcher`]: exact/wildcard host pattern matching (overrides + blocklist)
//! - [`cache`]: wire-fingerprint response cache with uniform TTL
//! - [`upstream`]: DoH POST client with ordered failover
//! - [`resolver`]: the block → cache → override → upstream pipeline
//! - [`server`]: the UDP/TCP/DoT/DoH listeners

pub mod cache;
pub mod error;
pub mod matcher;
pub mod resolver;
pub mod server;
pub mod upstream;

pub use cache::ResponseCache;
pub use error::{DnsError, DnsResult};
pub use resolver::Resolver;
pub use server::{DohServer, DotServer, TcpDnsServer, UdpDnsServer};
pub use upstream::{DohUpstreams, HttpsTransport, UpstreamTransport};
