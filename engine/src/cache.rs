//! Content-addressed response cache.
//!
//! Entries are keyed by `(operation, content)` and expire lazily on read once
//! the operation's TTL has elapsed. There is no capacity bound; callers that
//! run long enough to care must call [`ResponseCache::clear`].

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use lib_utils::hashing::content_hash;
use tokio::time::Instant;

use crate::engine_config::CacheConfig;

/// TTL for operations without an explicit mapping.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

const OPERATION_TTLS: [(&str, Duration); 2] = [
    ("sentiment", Duration::from_secs(3600)),
    ("categorization", Duration::from_secs(1800)),
];

/// `"{operation}:{sha256(content)}"`. Only the operation and the content
/// bytes take part, so identical bodies from different senders collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(operation: &str, content: &str) -> Self {
        Self(format!("{}:{}", operation, content_hash(content)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn belongs_to(&self, operation: &str) -> bool {
        self.0
            .strip_prefix(operation)
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    ttls: HashMap<String, Duration>,
    default_ttl: Duration,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new() -> Self {
        let ttls = OPERATION_TTLS
            .iter()
            .map(|(op, ttl)| (op.to_string(), *ttl))
            .collect();
        Self::with_ttls(ttls, DEFAULT_TTL)
    }

    pub fn with_ttls(ttls: HashMap<String, Duration>, default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttls,
            default_ttl,
        }
    }

    /// Static mapping overlaid with the configured TTLs.
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut cache = Self::new();
        cache.default_ttl = Duration::from_secs(config.default_ttl_secs);
        for (op, secs) in &config.ttl_secs {
            cache.ttls.insert(op.clone(), Duration::from_secs(*secs));
        }
        cache
    }

    pub fn ttl(&self, operation: &str) -> Duration {
        self.ttls
            .get(operation)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Cached value for `key` if younger than the TTL of `operation`.
    /// Expired entries are removed.
    pub fn get(&mut self, key: &CacheKey, operation: &str) -> Option<V> {
        let ttl = self.ttl(operation);
        let entry = self.entries.get(key)?;
        if entry.created_at.elapsed() < ttl {
            return Some(entry.value.clone());
        }

        tracing::debug!("Cache entry {} expired", key);
        self.entries.remove(key);
        None
    }

    pub fn put(&mut self, key: CacheKey, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    /// Remove every entry of `operation`, or everything when `None`.
    /// Returns the number of entries removed.
    pub fn clear(&mut self, operation: Option<&str>) -> usize {
        let before = self.entries.len();
        match operation {
            Some(op) => self.entries.retain(|key, _| !key.belongs_to(op)),
            None => self.entries.clear(),
        }
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_after_put() {
        let mut cache = ResponseCache::new();
        let key = CacheKey::new("sentiment", "great service");
        cache.put(key.clone(), "POSITIVE".to_string());

        assert_eq!(cache.get(&key, "sentiment"), Some("POSITIVE".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl() {
        let mut cache = ResponseCache::new();
        let key = CacheKey::new("categorization", "invoice attached");
        cache.put(key.clone(), 1u32);

        tokio::time::advance(Duration::from_secs(1799)).await;
        assert_eq!(cache.get(&key, "categorization"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key, "categorization"), None);
        // Removed lazily by the read
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmapped_operation_uses_default_ttl() {
        let mut cache = ResponseCache::new();
        assert_eq!(cache.ttl("translation"), DEFAULT_TTL);

        let key = CacheKey::new("translation", "hola");
        cache.put(key.clone(), 7u8);
        tokio::time::advance(Duration::from_secs(3599)).await;
        assert_eq!(cache.get(&key, "translation"), Some(7));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key, "translation"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_by_operation() {
        let mut cache = ResponseCache::new();
        cache.put(CacheKey::new("sentiment", "a"), 1);
        cache.put(CacheKey::new("sentiment", "b"), 2);
        cache.put(CacheKey::new("sentiment_v2", "a"), 3);
        cache.put(CacheKey::new("categorization", "a"), 4);

        assert_eq!(cache.clear(Some("sentiment")), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get(&CacheKey::new("categorization", "a"), "categorization"),
            Some(4)
        );

        assert_eq!(cache.clear(None), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_is_content_addressed() {
        let body = "Your order has shipped";
        assert_eq!(
            CacheKey::new("sentiment", body),
            CacheKey::new("sentiment", body)
        );
        assert_ne!(
            CacheKey::new("sentiment", body),
            CacheKey::new("categorization", body)
        );
        assert!(CacheKey::new("sentiment", body)
            .as_str()
            .starts_with("sentiment:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config_overrides_ttls() {
        let config = CacheConfig {
            default_ttl_secs: 10,
            ttl_secs: HashMap::from([("sentiment".to_string(), 5)]),
        };
        let cache: ResponseCache<u8> = ResponseCache::from_config(&config);
        assert_eq!(cache.ttl("sentiment"), Duration::from_secs(5));
        assert_eq!(cache.ttl("categorization"), Duration::from_secs(1800));
        assert_eq!(cache.ttl("other"), Duration::from_secs(10));
    }
}
