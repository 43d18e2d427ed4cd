use crate::config::RateLimitPolicy;
use crate::domain::pool::PoolDescriptor;
use crate::domain::ports::PoolCacheKey;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source, injectable so expiry can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Process-wide pool descriptor cache with a fixed TTL.
///
/// Entries are hints: callers re-validate liveness before serving one.
pub struct PoolCache {
    entries: RwLock<HashMap<PoolCacheKey, (PoolDescriptor, Instant)>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl PoolCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn get(&self, key: &PoolCacheKey) -> Option<PoolDescriptor> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|(_, stored_at)| now.duration_since(*stored_at) < self.ttl)
            .map(|(descriptor, _)| descriptor.clone())
    }

    /// Stores `descriptor`, sweeping out expired entries on the way.
    pub fn insert(&self, key: PoolCacheKey, descriptor: PoolDescriptor) {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        entries.retain(|_, (_, stored_at)| now.duration_since(*stored_at) < self.ttl);
        entries.insert(key, (descriptor, now));
    }

    pub fn invalidate(&self, key: &PoolCacheKey) {
        self.entries.write().remove(key);
    }

    /// Drops expired entries.
    pub fn purge(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, (_, stored_at)| now.duration_since(*stored_at) < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-window request counters keyed by caller.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, (Instant, u32)>>,
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            policy,
            clock,
        }
    }

    /// Counts one request for `key`; false once the window's budget is spent.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = self.clock.now();
        let window = Duration::from_secs(self.policy.window_secs);
        let mut windows = self.windows.lock();
        windows.retain(|_, (started, _)| now.duration_since(*started) < window);
        let entry = windows.entry(key.to_string()).or_insert((now, 0));
        if entry.1 >= self.policy.max_requests {
            return false;
        }
        entry.1 += 1;
        true
    }

    /// Number of callers with an open window.
    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }
}

/// The shared mutable state of a keeper process, constructed once and passed
/// by reference.
pub struct CacheService {
    pub pools: PoolCache,
    pub limits: RateLimiter,
}

impl CacheService {
    pub fn new(pool_ttl: Duration, limits: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            pools: PoolCache::new(pool_ttl, clock.clone()),
            limits: RateLimiter::new(limits, clock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pool::{PoolKey, ProtocolVersion};
    use crate::domain::primitives::Address;

    fn descriptor() -> PoolDescriptor {
        let key = PoolKey::new(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            3_000,
            60,
            Address::zero(),
        );
        PoolDescriptor::from_key(8453, &key, true)
    }

    fn cache_key() -> PoolCacheKey {
        PoolCacheKey::new(8453, Address::repeat_byte(1), None)
    }

    #[test]
    fn test_pool_cache_expires_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = PoolCache::new(Duration::from_secs(10), clock.clone());
        cache.insert(cache_key(), descriptor());

        clock.advance(Duration::from_secs(9));
        assert_eq!(
            cache.get(&cache_key()).map(|d| d.protocol),
            Some(ProtocolVersion::V4)
        );

        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&cache_key()).is_none());
        assert_eq!(cache.purge(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_pool_cache_is_entity_scoped() {
        let cache = PoolCache::new(Duration::from_secs(10), Arc::new(SystemClock));
        let scoped = PoolCacheKey::new(8453, Address::repeat_byte(1), Some("e-1".into()));
        cache.insert(scoped.clone(), descriptor());
        assert!(cache.get(&scoped).is_some());
        assert!(cache.get(&scoped.unscoped()).is_none());
        cache.invalidate(&scoped);
        assert!(cache.get(&scoped).is_none());
    }

    #[test]
    fn test_rate_limiter_window() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(
            RateLimitPolicy {
                max_requests: 2,
                window_secs: 60,
            },
            clock.clone(),
        );
        assert!(limiter.try_acquire("a"));
        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("a"));
        assert!(limiter.try_acquire("b"));

        clock.advance(Duration::from_secs(60));
        assert!(limiter.try_acquire("a"));
    }

    #[test]
    fn test_expired_entries_are_swept_on_write() {
        let clock = Arc::new(ManualClock::new());
        let cache = PoolCache::new(Duration::from_secs(10), clock.clone());
        for i in 0..5u8 {
            cache.insert(PoolCacheKey::new(8453, Address::repeat_byte(i), None), descriptor());
        }
        clock.advance(Duration::from_secs(10));
        cache.insert(cache_key(), descriptor());
        assert_eq!(cache.len(), 1);

        let limiter = RateLimiter::new(
            RateLimitPolicy {
                max_requests: 1,
                window_secs: 60,
            },
            clock.clone(),
        );
        for payer in ["a", "b", "c"] {
            assert!(limiter.try_acquire(payer));
        }
        assert_eq!(limiter.tracked(), 3);
        clock.advance(Duration::from_secs(60));
        assert!(limiter.try_acquire("d"));
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_concurrent_access_is_safe() {
        let cache = Arc::new(PoolCache::new(Duration::from_secs(60), Arc::new(SystemClock)));
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let key = PoolCacheKey::new(8453, Address::repeat_byte(i), None);
                    cache.insert(key.clone(), descriptor());
                    cache.get(&key).is_some()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cache.len(), 8);
    }
}
