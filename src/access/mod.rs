//! IP-based user access control
//!
//! The access table binds client IP addresses to registered users. Every
//! encrypted-DNS query performs an O(1) authorization lookup through a
//! reverse IP → user-ID index that is kept exactly consistent with the
//! per-user IP lists.
//!
//! # Architecture
//!
//! ```text
//! authorize(ip)
//!     │
//!     ▼
//! ip_index: DashMap<IpAddr, user_id>      (reverse index)
//!     │
//!     ▼
//! users: DashMap<user_id, User>           (forward store)
//!     │
//!     ▼
//! active ∧ now < expires_at  ──▶  allowed (+usage bump)
//! ```
//!
//! Each user's IP list is a bounded FIFO: binding a new address beyond
//! `max_ips` evicts the oldest binding and removes its reverse mapping in
//! the same critical section, so the index invariant holds after every
//! mutation.
//!
//! The table is mutated by the external admin panel and the registration
//! flow through [`AccessTable::create_user`], [`AccessTable::bind_ip`] and
//! friends; the gateway core only calls [`AccessTable::authorize`] and the
//! hourly [`AccessTable::sweep_expired`].

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};

/// Seconds in a day, for `valid_days` arithmetic
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Access-table errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    /// No user with the given ID
    #[error("user not found")]
    UserNotFound,

    /// User exists but was deactivated
    #[error("user is inactive")]
    UserInactive,

    /// User exists but its validity window has passed
    #[error("user expired")]
    UserExpired,
}

/// A registered user
///
/// The ID doubles as the registration token handed to the user. Usage
/// statistics are relaxed atomics bumped from the authorization read path;
/// they are best-effort by design.
#[derive(Debug)]
pub struct User {
    /// Opaque ID: 16 lowercase hex characters
    pub id: String,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Bound addresses, oldest first
    pub ips: VecDeque<IpAddr>,
    /// FIFO capacity of the IP list
    pub max_ips: usize,
    /// Registration time
    pub created_at: SystemTime,
    /// End of the validity window
    pub expires_at: SystemTime,
    active: AtomicBool,
    usage_count: AtomicU64,
    last_used_unix: AtomicU64,
}

impl User {
    /// Whether the user is currently usable
    #[must_use]
    pub fn is_usable(&self, now: SystemTime) -> bool {
        self.active.load(Ordering::Relaxed) && now < self.expires_at
    }

    /// Active flag
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Total authorized queries attributed to this user
    #[must_use]
    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }

    /// Last authorized query, or `None` if the user never queried
    #[must_use]
    pub fn last_used(&self) -> Option<SystemTime> {
        match self.last_used_unix.load(Ordering::Relaxed) {
            0 => None,
            secs => Some(UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    fn touch(&self, now: SystemTime) {
        self.usage_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(elapsed) = now.duration_since(UNIX_EPOCH) {
            self.last_used_unix.store(elapsed.as_secs(), Ordering::Relaxed);
        }
    }
}

/// Read-only copy of a user's state, for the admin interfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    /// User ID / registration token
    pub id: String,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Bound addresses, oldest first
    pub ips: Vec<IpAddr>,
    /// FIFO capacity
    pub max_ips: usize,
    /// Registration time
    pub created_at: SystemTime,
    /// Expiry instant
    pub expires_at: SystemTime,
    /// Active flag
    pub is_active: bool,
    /// Total authorized queries
    pub usage_count: u64,
    /// Last authorized query
    pub last_used: Option<SystemTime>,
}

/// IP → user binding table with FIFO capacity and expiry
///
/// Whether authorization is *enforced* is the `user_management` config flag,
/// checked by the front-ends against their per-request config snapshot; the
/// table itself only answers whether an address is bound to a usable user.
///
/// # Thread Safety
///
/// Both maps are concurrent; mutations take the forward (user) entry lock
/// first and touch the reverse index while holding it, which keeps the
/// reverse index the exact inverse of the forward IP lists at all times.
pub struct AccessTable {
    users: DashMap<String, User>,
    ip_index: DashMap<IpAddr, String>,
}

impl Default for AccessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            ip_index: DashMap::new(),
        }
    }

    /// Authorize a client address.
    ///
    /// Returns `true` when the address is bound to an active, unexpired
    /// user. Bumps the user's usage statistics on success (best-effort,
    /// relaxed atomics).
    #[must_use]
    pub fn authorize(&self, ip: IpAddr) -> bool {
        let Some(user_id) = self.ip_index.get(&ip).map(|r| r.value().clone()) else {
            return false;
        };

        let Some(user) = self.users.get(&user_id) else {
            return false;
        };

        let now = SystemTime::now();
        if !user.is_usable(now) {
            return false;
        }

        user.touch(now);
        true
    }

    /// Create a new user and return its ID (also the registration token).
    ///
    /// `max_ips` is clamped to at least 1; `valid_days` sets the expiry
    /// relative to now.
    pub fn create_user(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        max_ips: usize,
        valid_days: u64,
    ) -> String {
        let id = generate_user_id();
        let now = SystemTime::now();
        let user = User {
            id: id.clone(),
            name: name.into(),
            description: description.into(),
            ips: VecDeque::new(),
            max_ips: max_ips.max(1),
            created_at: now,
            expires_at: now + Duration::from_secs(valid_days * SECS_PER_DAY),
            active: AtomicBool::new(true),
            usage_count: AtomicU64::new(0),
            last_used_unix: AtomicU64::new(0),
        };

        info!(id = %id, name = %user.name, max_ips = user.max_ips, "user created");
        self.users.insert(id.clone(), user);
        id
    }

    /// Bind an address to a user, evicting the oldest binding when the
    /// list is at capacity.
    ///
    /// Binding an address that is already on the user's list is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AccessError` if the user is missing, inactive, or expired.
    pub fn bind_ip(&self, user_id: &str, ip: IpAddr) -> Result<(), AccessError> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or(AccessError::UserNotFound)?;

        if !user.is_active() {
            return Err(AccessError::UserInactive);
        }
        if SystemTime::now() >= user.expires_at {
            return Err(AccessError::UserExpired);
        }

        if user.ips.contains(&ip) {
            debug!(user_id, %ip, "IP already bound");
            return Ok(());
        }

        // The reverse index is updated under the forward entry lock so the
        // two structures never disagree.
        if user.ips.len() >= user.max_ips {
            if let Some(oldest) = user.ips.pop_front() {
                self.ip_index.remove(&oldest);
                info!(user_id, evicted = %oldest, "oldest IP binding evicted");
            }
        }

        user.ips.push_back(ip);
        self.ip_index.insert(ip, user_id.to_string());
        info!(user_id, %ip, total = user.ips.len(), "IP bound to user");
        Ok(())
    }

    /// Extend a user's validity window by `days`
    ///
    /// # Errors
    ///
    /// Returns `AccessError::UserNotFound` for unknown IDs.
    pub fn extend(&self, user_id: &str, days: u64) -> Result<(), AccessError> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or(AccessError::UserNotFound)?;
        user.expires_at += Duration::from_secs(days * SECS_PER_DAY);
        info!(user_id, expires_at = ?user.expires_at, "user expiration extended");
        Ok(())
    }

    /// Deactivate a user without deleting it
    ///
    /// # Errors
    ///
    /// Returns `AccessError::UserNotFound` for unknown IDs.
    pub fn deactivate(&self, user_id: &str) -> Result<(), AccessError> {
        let user = self.users.get(user_id).ok_or(AccessError::UserNotFound)?;
        user.active.store(false, Ordering::Relaxed);
        info!(user_id, "user deactivated");
        Ok(())
    }

    /// Delete a user, removing every reverse mapping first
    ///
    /// # Errors
    ///
    /// Returns `AccessError::UserNotFound` for unknown IDs.
    pub fn remove(&self, user_id: &str) -> Result<(), AccessError> {
        {
            let mut user = self
                .users
                .get_mut(user_id)
                .ok_or(AccessError::UserNotFound)?;
            for ip in user.ips.drain(..) {
                self.ip_index.remove(&ip);
            }
        }
        self.users.remove(user_id);
        info!(user_id, "user deleted");
        Ok(())
    }

    /// Deactivate every expired-but-still-active user.
    ///
    /// Called hourly by the supervisor; deletion stays an explicit
    /// administrator action.
    pub fn sweep_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut deactivated = 0;
        for user in self.users.iter() {
            if user.is_active() && now >= user.expires_at {
                user.active.store(false, Ordering::Relaxed);
                deactivated += 1;
                info!(id = %user.id, name = %user.name, "user expired and deactivated");
            }
        }
        if deactivated > 0 {
            info!(count = deactivated, "expired users deactivated");
        }
        deactivated
    }

    /// Snapshot a user by ID
    #[must_use]
    pub fn snapshot(&self, user_id: &str) -> Option<UserSnapshot> {
        self.users.get(user_id).map(|user| UserSnapshot {
            id: user.id.clone(),
            name: user.name.clone(),
            description: user.description.clone(),
            ips: user.ips.iter().copied().collect(),
            max_ips: user.max_ips,
            created_at: user.created_at,
            expires_at: user.expires_at,
            is_active: user.is_active(),
            usage_count: user.usage_count(),
            last_used: user.last_used(),
        })
    }

    /// The user ID an address is bound to, if any
    #[must_use]
    pub fn user_for_ip(&self, ip: IpAddr) -> Option<String> {
        self.ip_index.get(&ip).map(|r| r.value().clone())
    }

    /// Number of registered users
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    #[cfg(test)]
    fn force_expire(&self, user_id: &str) {
        let mut user = self.users.get_mut(user_id).unwrap();
        user.expires_at = SystemTime::now() - Duration::from_secs(1);
    }
}

impl std::fmt::Debug for AccessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTable")
            .field("users", &self.users.len())
            .field("bound_ips", &self.ip_index.len())
            .finish()
    }
}

/// Generate an opaque 16-hex-char user ID
fn generate_user_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
