//! Decoded-slice cache and the raw read-buffer pool.
//!
//! The cache is byte-weighted with access-based expiry, and guarantees a
//! slice is loaded at most once even when several threads miss on the same
//! key concurrently. The pool recycles raw read buffers between positioned
//! reads; checkout blocks when every buffer is in use.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};

use crate::tiff::descriptor::PixelBuffer;
use crate::util::Result;

const DEFAULT_MAX_WEIGHT: usize = 300_000_000;
const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    pixels: Arc<PixelBuffer>,
    weight: usize,
    last_access: Instant,
}

struct CacheState {
    map: LruCache<usize, CacheEntry>,
    weight: usize,
}

/// Byte-weighted LRU cache of decoded planes, keyed by slice index.
pub struct SliceCache {
    state: Mutex<CacheState>,
    in_flight: Mutex<HashSet<usize>>,
    in_flight_cv: Condvar,
    max_weight: usize,
    ttl: Duration,
}

impl SliceCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_WEIGHT, DEFAULT_TTL)
    }

    pub fn with_limits(max_weight: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                map: LruCache::unbounded(),
                weight: 0,
            }),
            in_flight: Mutex::new(HashSet::new()),
            in_flight_cv: Condvar::new(),
            max_weight,
            ttl,
        }
    }

    /// Looks up a slice, refreshing its access time. Entries idle past the
    /// expiry window are dropped on contact.
    pub fn get(&self, key: usize) -> Option<Arc<PixelBuffer>> {
        let mut state = self.state.lock();
        let expired = match state.map.get_mut(&key) {
            None => return None,
            Some(entry) => {
                if entry.last_access.elapsed() > self.ttl {
                    true
                } else {
                    entry.last_access = Instant::now();
                    return Some(Arc::clone(&entry.pixels));
                }
            }
        };
        if expired {
            if let Some(entry) = state.map.pop(&key) {
                state.weight -= entry.weight;
            }
        }
        None
    }

    /// Inserts a slice, evicting least-recently-used entries until the
    /// byte budget holds.
    pub fn insert(&self, key: usize, pixels: Arc<PixelBuffer>) {
        let weight = pixels.byte_len();
        let mut state = self.state.lock();
        if let Some(old) = state.map.pop(&key) {
            state.weight -= old.weight;
        }
        state.weight += weight;
        state.map.put(
            key,
            CacheEntry {
                pixels,
                weight,
                last_access: Instant::now(),
            },
        );
        while state.weight > self.max_weight && state.map.len() > 1 {
            if let Some((_, evicted)) = state.map.pop_lru() {
                state.weight -= evicted.weight;
            } else {
                break;
            }
        }
    }

    /// Returns the cached slice or runs `loader` to produce it, ensuring at
    /// most one loader runs per key at a time. Concurrent missing readers
    /// block until the in-flight load settles, then re-check the cache.
    pub fn get_or_load(
        &self,
        key: usize,
        loader: impl FnOnce() -> Result<PixelBuffer>,
    ) -> Result<Arc<PixelBuffer>> {
        loop {
            if let Some(hit) = self.get(key) {
                return Ok(hit);
            }
            let mut in_flight = self.in_flight.lock();
            if in_flight.insert(key) {
                break;
            }
            self.in_flight_cv.wait(&mut in_flight);
        }

        let result = loader();

        {
            let mut in_flight = self.in_flight.lock();
            in_flight.remove(&key);
        }
        self.in_flight_cv.notify_all();

        match result {
            Ok(pixels) => {
                let pixels = Arc::new(pixels);
                self.insert(key, Arc::clone(&pixels));
                Ok(pixels)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`get_or_load`](Self::get_or_load) but never stores the result:
    /// the in-flight guard still applies, so a cache-bypassing read cannot
    /// duplicate a load already running for the same key.
    pub fn load_uncached(
        &self,
        key: usize,
        loader: impl FnOnce() -> Result<PixelBuffer>,
    ) -> Result<Arc<PixelBuffer>> {
        loop {
            if let Some(hit) = self.get(key) {
                return Ok(hit);
            }
            let mut in_flight = self.in_flight.lock();
            if in_flight.insert(key) {
                break;
            }
            self.in_flight_cv.wait(&mut in_flight);
        }

        let result = loader();

        {
            let mut in_flight = self.in_flight.lock();
            in_flight.remove(&key);
        }
        self.in_flight_cv.notify_all();

        result.map(Arc::new)
    }

    /// Drops every entry; used when the backing file closes.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.map.clear();
        state.weight = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total byte weight.
    pub fn weight(&self) -> usize {
        self.state.lock().weight
    }
}

impl Default for SliceCache {
    fn default() -> Self {
        Self::new()
    }
}

struct PoolState {
    size: usize,
    buffers: Vec<Vec<u8>>,
}

/// Fixed set of reusable raw byte buffers, one per hardware thread.
pub struct BufferPool {
    state: Mutex<PoolState>,
    cv: Condvar,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                size: 0,
                buffers: Vec::new(),
            }),
            cv: Condvar::new(),
        }
    }

    /// (Re)sizes every pooled buffer. No-op when the size is unchanged;
    /// otherwise existing buffers are discarded and a fresh set allocated.
    pub fn set_size(&self, size: usize) {
        let mut state = self.state.lock();
        if state.size == size {
            return;
        }
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        state.size = size;
        state.buffers = (0..n).map(|_| vec![0u8; size]).collect();
        drop(state);
        self.cv.notify_all();
    }

    /// Checks out a buffer, blocking while all are in use. The buffer
    /// returns to the pool when the guard drops.
    pub fn checkout(&self) -> PoolBuffer<'_> {
        let mut state = self.state.lock();
        loop {
            if let Some(buf) = state.buffers.pop() {
                return PoolBuffer {
                    pool: self,
                    buf: Some(buf),
                };
            }
            self.cv.wait(&mut state);
        }
    }

    fn put_back(&self, buf: Vec<u8>) {
        let mut state = self.state.lock();
        // A resize may have happened while this buffer was out; stale
        // buffers are dropped instead of rejoining the pool.
        if buf.len() == state.size {
            state.buffers.push(buf);
            drop(state);
            self.cv.notify_one();
        }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.state.lock().buffers.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII checkout of one pool buffer.
pub struct PoolBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl std::ops::Deref for PoolBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl std::ops::DerefMut for PoolBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PoolBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put_back(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plane(fill: u8, len: usize) -> Arc<PixelBuffer> {
        Arc::new(PixelBuffer::U8(vec![fill; len]))
    }

    #[test]
    fn test_weight_eviction_drops_lru_first() {
        let cache = SliceCache::with_limits(250, Duration::from_secs(60));
        cache.insert(0, plane(0, 100));
        cache.insert(1, plane(1, 100));
        // Touch 0 so 1 becomes the eviction candidate.
        assert!(cache.get(0).is_some());
        cache.insert(2, plane(2, 100));
        assert!(cache.get(1).is_none());
        assert!(cache.get(0).is_some());
        assert!(cache.get(2).is_some());
        assert_eq!(cache.weight(), 200);
    }

    #[test]
    fn test_access_expiry() {
        let cache = SliceCache::with_limits(1000, Duration::from_millis(20));
        cache.insert(7, plane(7, 10));
        assert!(cache.get(7).is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(7).is_none());
        assert_eq!(cache.weight(), 0);
    }

    #[test]
    fn test_reinsert_replaces_weight() {
        let cache = SliceCache::with_limits(1000, Duration::from_secs(60));
        cache.insert(3, plane(0, 100));
        cache.insert(3, plane(0, 40));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.weight(), 40);
    }

    #[test]
    fn test_loader_runs_at_most_once_per_key() {
        let cache = Arc::new(SliceCache::with_limits(1000, Duration::from_secs(60)));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            handles.push(std::thread::spawn(move || {
                cache
                    .get_or_load(5, || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        Ok(PixelBuffer::U8(vec![5; 8]))
                    })
                    .unwrap()
            }));
        }
        for h in handles {
            let got = h.join().unwrap();
            assert_eq!(*got, PixelBuffer::U8(vec![5; 8]));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_releases_the_key() {
        let cache = SliceCache::with_limits(1000, Duration::from_secs(60));
        let err = cache.get_or_load(9, || Err(crate::util::Error::other("boom")));
        assert!(err.is_err());
        // The key is free again; a retry succeeds.
        let ok = cache
            .get_or_load(9, || Ok(PixelBuffer::U8(vec![9; 4])))
            .unwrap();
        assert_eq!(ok.len(), 4);
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = SliceCache::with_limits(1000, Duration::from_secs(60));
        cache.insert(0, plane(0, 10));
        cache.insert(1, plane(1, 10));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.weight(), 0);
    }

    #[test]
    fn test_pool_resize_is_noop_for_same_size() {
        let pool = BufferPool::new();
        pool.set_size(64);
        let before = pool.available();
        pool.set_size(64);
        assert_eq!(pool.available(), before);
        pool.set_size(128);
        let buf = pool.checkout();
        assert_eq!(buf.len(), 128);
    }

    #[test]
    fn test_pool_discards_stale_buffers() {
        let pool = BufferPool::new();
        pool.set_size(32);
        let before = pool.available();
        let buf = pool.checkout();
        pool.set_size(64);
        let resized = pool.available();
        drop(buf);
        // The 32-byte buffer must not rejoin the 64-byte pool.
        assert_eq!(pool.available(), resized);
        assert!(before >= 1);
    }

    #[test]
    fn test_checkout_blocks_until_return() {
        let pool = Arc::new(BufferPool::new());
        pool.set_size(16);
        let all: Vec<_> = (0..pool.available()).map(|_| pool.checkout()).collect();
        assert_eq!(pool.available(), 0);

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let buf = pool.checkout();
                buf.len()
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(all);
        assert_eq!(waiter.join().unwrap(), 16);
    }
}
