//! Bounded, TTL-expiring verdict cache.
//!
//! Keyed by a fast non-cryptographic hash for text (collisions only waste
//! a cache slot, never a security property) and by SHA-256 for images
//! (where a crafted collision could smuggle a blocked image past the
//! cache under an allowed key — §4.7). Eviction is oldest-inserted-first
//! once the bound is hit; expiry is checked lazily on lookup.

use rustc_hash::FxHasher;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    insertion_order: u64,
}

/// Tunables for [`Cache::with_config`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A bounded, TTL-expiring cache from `u64` keys to `V`.
///
/// Use [`Cache::text_key`] or [`Cache::image_key`] to compute keys with the
/// appropriate hash function for the content type being cached.
pub struct Cache<V> {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<u64, Entry<V>>>,
    next_order: Mutex<u64>,
}

impl<V: Clone> Cache<V> {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(HashMap::with_capacity(capacity)),
            next_order: Mutex::new(0),
        }
    }

    /// Construct from a [`CacheConfig`].
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl)
    }

    /// Fast, non-cryptographic key for text content.
    #[must_use]
    pub fn text_key(text: &str) -> u64 {
        let mut hasher = FxHasher::default();
        text.hash(&mut hasher);
        hasher.finish()
    }

    /// Cryptographic key for image bytes; a weak hash here would let a
    /// crafted second image collide with an already-allowed key.
    #[must_use]
    pub fn image_key(bytes: &[u8]) -> u64 {
        let digest = Sha256::digest(bytes);
        u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is >= 8 bytes"))
    }

    #[must_use]
    pub fn get(&self, key: u64) -> Option<V> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: u64, value: V) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let order = {
            let mut next = self.next_order.lock().expect("cache mutex poisoned");
            let order = *next;
            *next += 1;
            order
        };

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some((&oldest_key, _)) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.insertion_order)
            {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                insertion_order: order,
            },
        );
    }

    /// `get`/`put`/`clear` per §4.7; `put` is the named operation, `insert`
    /// is its pre-existing alias kept for call sites that predate it.
    pub fn put(&self, key: u64, value: V) {
        self.insert(key, value);
    }

    /// Drop every entry, oldest-inserted bookkeeping included.
    pub fn clear(&self) {
        self.entries.lock().expect("cache mutex poisoned").clear();
        *self.next_order.lock().expect("cache mutex poisoned") = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Text cache tunables per §4.7: 5-minute TTL, 1000 entries.
pub const TEXT_CACHE_CAPACITY: usize = 1000;
/// Text cache TTL per §4.7.
pub const TEXT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Image cache tunables per §4.7: 24-hour TTL, 500 entries.
pub const IMAGE_CACHE_CAPACITY: usize = 500;
/// Image cache TTL per §4.7.
pub const IMAGE_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

impl CacheConfig {
    /// Spec-exact tunables for the text verdict cache.
    #[must_use]
    pub fn text_default() -> Self {
        Self {
            capacity: TEXT_CACHE_CAPACITY,
            ttl: TEXT_CACHE_TTL,
        }
    }

    /// Spec-exact tunables for the image verdict cache.
    #[must_use]
    pub fn image_default() -> Self {
        Self {
            capacity: IMAGE_CACHE_CAPACITY,
            ttl: IMAGE_CACHE_TTL,
        }
    }
}

/// Paired text/image verdict caches gating repeat DATDP/CCFC/Exchange judge
/// calls. Leaves of the strategy tree look a key up here before invoking a
/// judge and store the result afterward; a hit skips the judge call
/// entirely.
pub struct JudgeCache<V> {
    /// Keyed by [`Cache::text_key`]; spec-exact 5 min / 1000-entry bound.
    pub text: Cache<V>,
    /// Keyed by [`Cache::image_key`]; spec-exact 24 h / 500-entry bound.
    pub image: Cache<V>,
}

impl<V: Clone> Default for JudgeCache<V> {
    fn default() -> Self {
        Self {
            text: Cache::with_config(CacheConfig::text_default()),
            image: Cache::with_config(CacheConfig::image_default()),
        }
    }
}
