use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cache key for a base64 image: SHA-256 hex of the base64 text.
pub fn cache_key(image_b64: &str) -> String {
    hex::encode(Sha256::digest(image_b64.as_bytes()))
}

struct Entry {
    inserted_at: Instant,
    answer: String,
}

/// Model answers keyed by image, with a time-to-live and a fixed capacity.
/// When full, the oldest entry is evicted.
pub struct VerdictCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, Entry>,
}

impl VerdictCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) => now.saturating_duration_since(entry.inserted_at) >= self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.answer.clone())
    }

    pub fn insert(&mut self, key: String, answer: String) {
        self.insert_at(key, answer, Instant::now());
    }

    pub fn insert_at(&mut self, key: String, answer: String, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < ttl);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            Entry {
                inserted_at: now,
                answer,
            },
        );
    }
}
