//! Token-bucket rate limiting
//!
//! Two layers, both built on the governor crate's token buckets:
//!
//! - one **global** bucket shared by the DoH and DoT front-ends (fixed
//!   50 req/s, burst 100), capping aggregate encrypted-DNS throughput;
//! - a **per-IP** map of buckets for the DoH path, lazily materialized the
//!   first time an address is seen.
//!
//! `allow()` never blocks: it answers whether a token is available right
//! now. Per-IP buckets capture the configured rate/burst at creation time;
//! a reconfiguration only affects buckets created afterwards.

use std::net::IpAddr;
use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Single token bucket
type Bucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Global rate: requests per second across all encrypted-DNS clients
const GLOBAL_RATE: u32 = 50;

/// Global burst size
const GLOBAL_BURST: u32 = 100;

fn quota(rate: u32, burst: u32) -> Quota {
    let rate = NonZeroU32::new(rate.max(1)).expect("rate is at least 1");
    let burst = NonZeroU32::new(burst.max(1)).expect("burst is at least 1");
    Quota::per_second(rate).allow_burst(burst)
}

/// Process-wide token bucket shared by DoH and DoT
#[derive(Debug)]
pub struct GlobalRateLimiter {
    bucket: Bucket,
}

impl GlobalRateLimiter {
    /// Create the fixed 50 req/s, burst 100 bucket
    #[must_use]
    pub fn new() -> Self {
        Self {
            bucket: RateLimiter::direct(quota(GLOBAL_RATE, GLOBAL_BURST)),
        }
    }

    /// Create a bucket with explicit rate and burst
    #[must_use]
    pub fn with_limits(rate: u32, burst: u32) -> Self {
        Self {
            bucket: RateLimiter::direct(quota(rate, burst)),
        }
    }

    /// Check whether a token is available now; never blocks
    #[must_use]
    pub fn allow(&self) -> bool {
        self.bucket.check().is_ok()
    }
}

impl Default for GlobalRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-IP token buckets for the DoH path
///
/// A bucket is created the first time an address appears, with the rate and
/// burst the caller passes at that moment; a configuration change therefore
/// affects only buckets created afterwards.
///
/// # Memory
///
/// Entries live for the process lifetime. Client cardinality on this
/// deployment is small; a hardened variant would bound the map the way the
/// access table bounds per-user IPs.
#[derive(Default)]
pub struct IpRateLimiters {
    buckets: DashMap<IpAddr, Bucket>,
}

impl IpRateLimiters {
    /// Create an empty per-IP bucket map
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Check the bucket for `ip`, creating it with `rate`/`burst` on first
    /// sight
    #[must_use]
    pub fn allow(&self, ip: IpAddr, rate: u32, burst: u32) -> bool {
        let bucket = self
            .buckets
            .entry(ip)
            .or_insert_with(|| RateLimiter::direct(quota(rate, burst)));
        bucket.check().is_ok()
    }

    /// Number of tracked client addresses
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

impl std::fmt::Debug for IpRateLimiters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpRateLimiters")
            .field("tracked", &self.buckets.len())
            .finish()
    }
}
