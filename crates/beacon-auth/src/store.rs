//! Process-wide key store with a lazily derived public-key cache.

use dashmap::DashMap;
use jsonwebtoken::DecodingKey;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::error::{AuthError, KeyRefreshError};
use crate::jwk::{derive_public_key, JwkSet, KeySet};

/// Current key set plus a kid → derived key cache.
///
/// The set and the cache are guarded independently. Readers take an
/// `Arc` snapshot of the set, so a refresh never exposes a half-built set.
/// Cache entries are tagged with the generation they were derived from and
/// ignored once the set has moved on.
#[derive(Default)]
pub struct KeyStore {
    current: RwLock<Arc<KeySet>>,
    derived: DashMap<String, (u64, DecodingKey)>,
    generations: AtomicU64,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.snapshot();
        f.debug_struct("KeyStore")
            .field("generation", &set.generation())
            .field("keys", &set.len())
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Empty store. Every lookup fails until the first [`replace`](Self::replace).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current key set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a new key set and drop every derived key.
    ///
    /// Returns the number of keys now held.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRefreshError::Decode`] and keeps the current set if the
    /// document has no entry with a key id.
    pub fn replace(&self, document: JwkSet) -> Result<usize, KeyRefreshError> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let set = KeySet::new(document, generation);
        if set.is_empty() {
            return Err(KeyRefreshError::Decode(
                "key set has no usable keys".to_string(),
            ));
        }
        let set = Arc::new(set);
        let count = set.len();

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = set;
        self.derived.clear();

        debug!(keys = count, generation, "Key set replaced");
        Ok(count)
    }

    /// Whether the current set has a key for `kid`.
    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.snapshot().get(kid).is_some()
    }

    /// Verification key for `kid`, derived and cached on first use.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownKey`] if the current set has no such key
    /// and [`AuthError::MalformedKey`] if its material does not decode.
    pub fn derive_public_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let set = self.snapshot();

        if let Some(entry) = self.derived.get(kid) {
            let (generation, key) = entry.value();
            if *generation == set.generation() {
                return Ok(key.clone());
            }
        }

        let jwk = set
            .get(kid)
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))?;
        let public = derive_public_key(jwk)?;
        let key = public.decoding_key();

        debug!(kid, bits = public.bits(), "Derived public key");
        self.derived
            .insert(kid.to_string(), (set.generation(), key.clone()));
        Ok(key)
    }

    /// Number of cached derived keys.
    #[must_use]
    pub fn cached_keys(&self) -> usize {
        self.derived.len()
    }
}
