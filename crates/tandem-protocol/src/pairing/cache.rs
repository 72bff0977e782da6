use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::PairingConfig;

/// Source of "now" for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Per-pubkey freshness of fetched device mappings.
///
/// Negative results are cached exactly like positive ones. Entries live for
/// the lifetime of the process.
pub struct DeviceMappingCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    expiries: Mutex<HashMap<String, Instant>>,
}

impl DeviceMappingCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            expiries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache with the configured refresh interval as its TTL.
    pub fn from_config(config: &PairingConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.refresh_interval(), clock)
    }

    /// Whether `pub_key` was refreshed less than `ttl` ago.
    pub fn is_fresh(&self, pub_key: &str) -> bool {
        let now = self.clock.now();
        self.expiries
            .lock()
            .get(pub_key)
            .is_some_and(|expiry| *expiry > now)
    }

    /// Mark `pub_key` as fetched now.
    pub fn refresh(&self, pub_key: &str) {
        let expiry = self.clock.now() + self.ttl;
        self.expiries.lock().insert(pub_key.to_string(), expiry);
    }

    /// Force the next resolve of `pub_key` to hit the directory.
    pub fn invalidate(&self, pub_key: &str) {
        self.expiries.lock().remove(pub_key);
    }
}
