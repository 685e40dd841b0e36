//! An in-memory, process-local token cache

use std::{collections::HashMap, fmt, sync::Arc};

use assertion_clock::{DurationSecs, UnixTime};
use parking_lot::RwLock;

use crate::{AccessTokenInfo, ClientId, ClientIdRef, Scope, TenantId, TenantIdRef};

/// Identifies the tokens that may satisfy a request
///
/// Scopes are kept in the order the caller supplied them. The authority is
/// part of the key, so a cache shared between clouds never serves one cloud's
/// token to another.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    authority: String,
    client_id: ClientId,
    tenant: TenantId,
    scopes: Vec<Scope>,
}

impl CacheKey {
    /// Constructs a new cache key for tokens issued by `authority`
    pub fn new(
        authority: &str,
        client_id: &ClientIdRef,
        tenant: &TenantIdRef,
        scopes: &[Scope],
    ) -> Self {
        Self {
            authority: authority.trim_end_matches('/').to_owned(),
            client_id: client_id.to_owned(),
            tenant: tenant.to_owned(),
            scopes: scopes.to_vec(),
        }
    }
}

/// A thread-safe token cache
///
/// Clones share the same storage, so a single cache can back several
/// credentials. Concurrent writes to the same key are resolved in favor of the
/// last writer.
#[derive(Clone)]
pub struct TokenCache {
    entries: Arc<RwLock<HashMap<CacheKey, AccessTokenInfo>>>,
    minimum_validity: DurationSecs,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    /// Constructs a new, empty cache
    pub fn new() -> Self {
        Self {
            entries: Arc::default(),
            minimum_validity: DurationSecs(60),
        }
    }

    /// Sets the minimum validity for any token returned by this cache
    ///
    /// A token that will be valid for no more than `minimum_validity` is
    /// treated as a miss.
    pub fn with_minimum_validity(mut self, minimum_validity: DurationSecs) -> Self {
        self.minimum_validity = minimum_validity;
        self
    }

    /// Gets the minimum validity applied to lookups
    pub fn minimum_validity(&self) -> DurationSecs {
        self.minimum_validity
    }

    /// Looks up a token that is still usable at `now`
    ///
    /// Never blocks on I/O. Entries that have already expired are evicted.
    pub fn lookup(&self, key: &CacheKey, now: UnixTime) -> Option<AccessTokenInfo> {
        let must_be_valid_until = now + self.minimum_validity;

        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => {
                    tracing::trace!("no token in cache");
                    return None;
                }
                Some(token) if token.expires_on() > must_be_valid_until => {
                    tracing::trace!(expires_on = token.expires_on().0, "found token in cache");
                    return Some(token.clone());
                }
                Some(token) if token.expires_on() > now => {
                    tracing::debug!(
                        must_be_valid_until = must_be_valid_until.0,
                        expires_on = token.expires_on().0,
                        "found token in cache but does not meet minimum validity requirement"
                    );
                    return None;
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        if entries
            .get(key)
            .map_or(false, |token| token.expires_on() <= now)
        {
            tracing::trace!("evicting expired token");
            entries.remove(key);
        }

        None
    }

    /// Stores a token, replacing any token already held under the same key
    pub fn store(&self, key: CacheKey, token: AccessTokenInfo) {
        self.entries.write().insert(key, token);
    }

    /// Removes the token held under `key`
    pub fn remove(&self, key: &CacheKey) -> Option<AccessTokenInfo> {
        self.entries.write().remove(key)
    }

    /// Removes every token
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// The number of tokens held, including any not yet evicted after expiry
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no tokens
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("entries", &self.len())
            .field("minimum_validity", &self.minimum_validity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BearerToken;

    fn key(scopes: &[&'static str]) -> CacheKey {
        key_for("https://login.microsoftonline.com/", scopes)
    }

    fn key_for(authority: &str, scopes: &[&'static str]) -> CacheKey {
        let scopes: Vec<Scope> = scopes.iter().map(|&s| Scope::from_static(s)).collect();
        CacheKey::new(
            authority,
            &ClientId::from_static("client"),
            &TenantId::from_static("tenant"),
            &scopes,
        )
    }

    fn token(value: &'static str, expires_on: u64) -> AccessTokenInfo {
        AccessTokenInfo::new(BearerToken::from_static(value), UnixTime(expires_on))
    }

    #[test]
    fn returns_token_valid_beyond_minimum_validity() {
        let cache = TokenCache::new();
        cache.store(key(&["a"]), token("t", 1_000));

        let found = cache.lookup(&key(&["a"]), UnixTime(900)).unwrap();
        assert_eq!(found.token().as_str(), "t");
    }

    #[test]
    fn treats_nearly_expired_token_as_miss_without_evicting() {
        let cache = TokenCache::new();
        cache.store(key(&["a"]), token("t", 1_000));

        assert!(cache.lookup(&key(&["a"]), UnixTime(940)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_expired_token() {
        let cache = TokenCache::new().with_minimum_validity(DurationSecs::ZERO);
        cache.store(key(&["a"]), token("t", 1_000));

        assert!(cache.lookup(&key(&["a"]), UnixTime(999)).is_some());
        assert!(cache.lookup(&key(&["a"]), UnixTime(1_000)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn scope_order_is_part_of_the_key() {
        let cache = TokenCache::new();
        cache.store(key(&["a", "b"]), token("t", 1_000));

        assert!(cache.lookup(&key(&["a", "b"]), UnixTime(0)).is_some());
        assert!(cache.lookup(&key(&["b", "a"]), UnixTime(0)).is_none());
    }

    #[test]
    fn authority_is_part_of_the_key() {
        let cache = TokenCache::new();
        cache.store(
            key_for("https://login.microsoftonline.com/", &["a"]),
            token("public", 1_000),
        );

        assert!(cache
            .lookup(&key_for("https://login.microsoftonline.us/", &["a"]), UnixTime(0))
            .is_none());
        assert!(cache
            .lookup(&key_for("https://login.microsoftonline.com", &["a"]), UnixTime(0))
            .is_some());
    }

    #[test]
    fn last_writer_wins() {
        let cache = TokenCache::new();
        cache.store(key(&["a"]), token("first", 1_000));
        cache.store(key(&["a"]), token("second", 2_000));

        let found = cache.lookup(&key(&["a"]), UnixTime(0)).unwrap();
        assert_eq!(found.token().as_str(), "second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clones_share_storage() {
        let cache = TokenCache::new();
        let shared = cache.clone();
        shared.store(key(&["a"]), token("t", 1_000));

        assert!(cache.lookup(&key(&["a"]), UnixTime(0)).is_some());

        cache.clear();
        assert!(shared.is_empty());
    }

    #[test]
    fn concurrent_writers_leave_a_consistent_entry() {
        let cache = TokenCache::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        cache.store(key(&["a"]), token("t", 1_000 + i * 100 + j));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(&key(&["a"]), UnixTime(0)).is_some());
    }
}
