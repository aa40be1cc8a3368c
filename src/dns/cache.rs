//! Wire-level response cache
//!
//! The cache maps a fingerprint of the full wire query to the raw response
//! bytes with an absolute expiry. The fingerprint is the query bytes
//! themselves, transaction ID included — hits therefore require
//! bit-identical queries. Entries are immutable after insert; expiry is
//! enforced both on lookup and by a sweeper that runs every minute.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::metrics::GatewayMetrics;

/// Sweep interval for expired entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct CacheEntry {
    response: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Fingerprint → response-bytes cache with uniform TTL
///
/// # Thread Safety
///
/// Backed by a concurrent map with per-entry locking; concurrent inserts of
/// the same fingerprint race benignly (first writer wins, every reader sees
/// a complete entry).
pub struct ResponseCache {
    entries: DashMap<Vec<u8>, CacheEntry>,
    metrics: Arc<GatewayMetrics>,
}

impl ResponseCache {
    /// Create an empty cache that reports hit/miss counts to `metrics`
    #[must_use]
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            entries: DashMap::new(),
            metrics,
        }
    }

    /// Look up a response for exactly these query bytes.
    ///
    /// An expired entry is removed and reported as a miss.
    #[must_use]
    pub fn lookup(&self, query: &[u8]) -> Option<Vec<u8>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(query) {
            if !entry.is_expired(now) {
                self.metrics.inc_cache_hits();
                return Some(entry.response.clone());
            }
        } else {
            self.metrics.inc_cache_misses();
            return None;
        }

        // Expired: drop the entry outside the read guard.
        self.entries.remove(query);
        self.metrics.inc_cache_misses();
        None
    }

    /// Insert a response with the configured TTL.
    ///
    /// A `None` TTL means caching is disabled and the call is a no-op.
    pub fn insert(&self, query: &[u8], response: &[u8], ttl: Option<Duration>) {
        let Some(ttl) = ttl else { return };
        self.entries.insert(
            query.to_vec(),
            CacheEntry {
                response: response.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Remove every expired entry; returns how many were dropped
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "expired cache entries removed");
        }
        removed
    }

    /// Number of live-or-expired entries currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the minute sweeper until shutdown is signalled
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    debug!("cache sweeper stopping");
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
