//! Synthesis result cache
//!
//! Keyed by (text, channel). Entries expire after a fixed TTL and are evicted
//! lazily on lookup; when full, the oldest entry makes room for a new one.

use crate::audio::AudioFormat;
use parlor_common::Channel;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cache key for a (text, channel) pair
pub fn cache_key(text: &str, channel: Channel) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0x1f]);
    hasher.update(channel.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub audio: Arc<[u8]>,
    pub estimated_duration: Duration,
    pub format: AudioFormat,
    /// Backend that produced the audio
    pub backend_id: String,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct SynthesisCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl SynthesisCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Fresh, non-empty entry for (text, channel)
    pub fn get(&mut self, text: &str, channel: Channel) -> Option<CacheEntry> {
        let key = cache_key(text, channel);

        let usable = match self.entries.get(&key) {
            Some(entry) => !entry.audio.is_empty() && entry.created_at.elapsed() <= self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };

        if !usable {
            debug!("Evicting stale cache entry for channel {}", channel);
            self.entries.remove(&key);
            self.misses += 1;
            return None;
        }

        self.hits += 1;
        self.entries.get(&key).cloned()
    }

    /// Store a result; empty audio is never cached
    pub fn insert(&mut self, text: &str, channel: Channel, entry: CacheEntry) {
        if entry.audio.is_empty() {
            return;
        }

        let key = cache_key(text, channel);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.purge_expired();
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(key, entry);
    }

    fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| !entry.audio.is_empty() && entry.created_at.elapsed() <= ttl);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(bytes: &[u8]) -> CacheEntry {
        CacheEntry {
            audio: Arc::from(bytes),
            estimated_duration: Duration::from_millis(400),
            format: AudioFormat::Wav,
            backend_id: "primary".to_string(),
            created_at: Instant::now(),
        }
    }

    #[test]
    fn test_key_depends_on_text_and_channel() {
        let a = cache_key("hello", Channel::System);
        assert_eq!(a, cache_key("hello", Channel::System));
        assert_ne!(a, cache_key("hello", Channel::participant(0)));
        assert_ne!(a, cache_key("hello!", Channel::System));
        assert_eq!(a.len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let mut cache = SynthesisCache::new(Duration::from_secs(3600), 100);
        cache.insert("deal the cards", Channel::System, entry(b"RIFFdata"));

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        assert!(cache.get("deal the cards", Channel::System).is_some());

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        assert!(cache.get("deal the cards", Channel::System).is_none());
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_empty_audio_not_cached() {
        let mut cache = SynthesisCache::new(Duration::from_secs(60), 10);
        cache.insert("silence", Channel::System, entry(b""));
        assert!(cache.get("silence", Channel::System).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let mut cache = SynthesisCache::new(Duration::from_secs(3600), 2);
        cache.insert("one", Channel::System, entry(b"1"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("two", Channel::System, entry(b"2"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("three", Channel::System, entry(b"3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("one", Channel::System).is_none());
        assert!(cache.get("two", Channel::System).is_some());
        assert!(cache.get("three", Channel::System).is_some());
    }

    #[test]
    fn test_replacing_existing_key_does_not_evict() {
        let mut cache = SynthesisCache::new(Duration::from_secs(3600), 1);
        cache.insert("one", Channel::System, entry(b"1"));
        cache.insert("one", Channel::System, entry(b"11"));
        assert_eq!(cache.len(), 1);
        assert_eq!(&*cache.get("one", Channel::System).unwrap().audio, b"11");
    }
}
