//! Sentence cache: fixed-lifetime entries keyed by a blake3 hash of
//! (backend | normalized gloss text). Defaults: 256 entries, 10 minutes.

use std::time::Duration;

use parking_lot::Mutex;

use crate::expiring::{Expiry, ExpiringLru};

pub type CacheKey = [u8; 32];

pub struct TranslationCache {
    sentences: Mutex<ExpiringLru<CacheKey, String>>,
}

impl TranslationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            sentences: Mutex::new(ExpiringLru::new(capacity, ttl, Expiry::SinceInsert)),
        }
    }

    pub fn compute_key(backend: &str, normalized_glosses: &str) -> CacheKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(backend.as_bytes());
        hasher.update(b"|");
        hasher.update(normalized_glosses.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Cached sentence, if present and younger than the TTL.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        self.sentences.lock().get(key).ok().map(|s| s.clone())
    }

    pub fn insert(&self, key: CacheKey, sentence: String) {
        self.sentences.lock().push(key, sentence);
    }

    pub fn len(&self) -> usize {
        self.sentences.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.lock().is_empty()
    }
}
