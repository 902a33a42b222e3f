/// MAC-indexed advertisement cache with LRU-by-`last_seen` eviction, plus the
/// batching buffer the observer drains on its flush interval.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::AdvertRecord;

/// Maximum distinct MACs tracked at once. The 65th distinct MAC evicts the
/// least-recently-seen entry.
pub const CACHE_CAPACITY: usize = 64;

/// An entry older than this is dropped on the next prune pass rather than
/// forwarded, since its RSSI/data are no longer representative.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

/// Maximum advertisements held in one outgoing batch before an eager flush.
pub const BATCH_CAPACITY: usize = 16;

struct CachedEntry {
    record: AdvertRecord,
    last_seen: Instant,
}

/// Tracks the most recent advertisement per MAC. Not thread-safe on its own —
/// the observer guards it with one lock shared with the pending batch, so a
/// flush always sees a consistent pair of (cache, batch).
pub struct AdvertCache {
    entries: HashMap<u64, CachedEntry>,
}

impl AdvertCache {
    pub fn new() -> Self {
        AdvertCache { entries: HashMap::with_capacity(CACHE_CAPACITY) }
    }

    /// Records a fresh sighting of `record.address`, evicting the
    /// least-recently-seen entry first if the cache is full and this is a
    /// previously-unseen MAC. Returns `true` if this is a new MAC (useful for
    /// logging/metrics), `false` if it's a refresh of an existing one.
    pub fn observe(&mut self, record: AdvertRecord, now: Instant) -> bool {
        let is_new = !self.entries.contains_key(&record.address);
        if is_new && self.entries.len() >= CACHE_CAPACITY {
            self.evict_oldest();
        }
        self.entries.insert(record.address, CachedEntry { record, last_seen: now });
        is_new
    }

    fn evict_oldest(&mut self) {
        if let Some((&oldest_addr, _)) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
        {
            self.entries.remove(&oldest_addr);
        }
    }

    /// Drops every entry last seen more than `STALE_AFTER` before `now`.
    pub fn prune_stale(&mut self, now: Instant) {
        self.entries.retain(|_, entry| now.duration_since(entry.last_seen) < STALE_AFTER);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clones every currently cached record, in unspecified order — the
    /// source a periodic flush copies from before chunking into batches
    /// (§4.4: "copies every valid cache entry into an AdvertBatch").
    pub fn snapshot(&self) -> Vec<AdvertRecord> {
        self.entries.values().map(|entry| entry.record.clone()).collect()
    }

    #[cfg(test)]
    fn contains(&self, address: u64) -> bool {
        self.entries.contains_key(&address)
    }
}

impl Default for AdvertCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A bounded buffer of advertisements awaiting flush as one
/// `BluetoothLERawAdvertisementsResponse`.
pub struct AdvertBatch {
    records: Vec<AdvertRecord>,
}

impl AdvertBatch {
    pub fn new() -> Self {
        AdvertBatch { records: Vec::with_capacity(BATCH_CAPACITY) }
    }

    /// Appends a record. Returns `true` if the batch has now reached
    /// capacity and should be flushed eagerly rather than waiting for the
    /// next timer tick (used by the raw-HCI-style adapter's faster cadence).
    pub fn push(&mut self, record: AdvertRecord) -> bool {
        self.records.push(record);
        self.records.len() >= BATCH_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Takes the buffered records, leaving the batch empty.
    pub fn drain(&mut self) -> Vec<AdvertRecord> {
        std::mem::take(&mut self.records)
    }
}

impl Default for AdvertBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(addr: u64) -> AdvertRecord {
        AdvertRecord { address: addr, rssi: -60, address_type: 0, data: vec![] }
    }

    #[test]
    fn observe_reports_new_vs_refresh() {
        let mut cache = AdvertCache::new();
        let now = Instant::now();
        assert!(cache.observe(record(1), now));
        assert!(!cache.observe(record(1), now));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_evicts_least_recently_seen_at_capacity() {
        let mut cache = AdvertCache::new();
        let base = Instant::now();
        for i in 0..CACHE_CAPACITY as u64 {
            cache.observe(record(i), base + Duration::from_millis(i));
        }
        assert_eq!(cache.len(), CACHE_CAPACITY);

        // MAC 0 was seen first (oldest); inserting a 65th distinct MAC should
        // evict it.
        cache.observe(record(CACHE_CAPACITY as u64), base + Duration::from_millis(1000));
        assert_eq!(cache.len(), CACHE_CAPACITY);
        assert!(!cache.contains(0));
        assert!(cache.contains(CACHE_CAPACITY as u64));
    }

    #[test]
    fn refreshing_an_entry_protects_it_from_eviction() {
        let mut cache = AdvertCache::new();
        let base = Instant::now();
        for i in 0..CACHE_CAPACITY as u64 {
            cache.observe(record(i), base + Duration::from_millis(i));
        }
        // Refresh MAC 0 so it's no longer the oldest.
        cache.observe(record(0), base + Duration::from_millis(2000));
        cache.observe(record(CACHE_CAPACITY as u64), base + Duration::from_millis(2001));
        assert!(cache.contains(0));
        assert!(!cache.contains(1));
    }

    #[test]
    fn prune_stale_drops_old_entries() {
        let mut cache = AdvertCache::new();
        let base = Instant::now();
        cache.observe(record(1), base);
        cache.prune_stale(base + STALE_AFTER + Duration::from_secs(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn snapshot_contains_every_cached_record() {
        let mut cache = AdvertCache::new();
        let now = Instant::now();
        cache.observe(record(1), now);
        cache.observe(record(2), now);
        let mut addrs: Vec<u64> = cache.snapshot().iter().map(|r| r.address).collect();
        addrs.sort();
        assert_eq!(addrs, vec![1, 2]);
    }

    #[test]
    fn prune_stale_keeps_fresh_entries() {
        let mut cache = AdvertCache::new();
        let base = Instant::now();
        cache.observe(record(1), base);
        cache.prune_stale(base + Duration::from_secs(10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn batch_flushes_eagerly_at_capacity() {
        let mut batch = AdvertBatch::new();
        let mut eager = false;
        for i in 0..BATCH_CAPACITY as u64 {
            eager = batch.push(record(i));
        }
        assert!(eager);
        assert_eq!(batch.len(), BATCH_CAPACITY);
    }

    #[test]
    fn batch_drain_empties_it() {
        let mut batch = AdvertBatch::new();
        batch.push(record(1));
        batch.push(record(2));
        let drained = batch.drain();
        assert_eq!(drained.len(), 2);
        assert!(batch.is_empty());
    }
}
