//! Byte-bounded LRU cache of rendered tiles.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Default tile budget: 100 MiB.
pub const DEFAULT_TILE_BUDGET_BYTES: usize = 100 * 1024 * 1024;

/// An immutable rendered tile.
///
/// Pixel data is shared; clones are cheap and consumers only ever get a
/// read-only view.
#[derive(Debug, Clone)]
pub struct TileImage {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
}

impl TileImage {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self { pixels: pixels.into(), width, height }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Cache usage counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entry_count: usize,
    pub bytes_used: usize,
    pub bytes_limit: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState {
    tiles: HashMap<String, TileImage>,
    /// Least recently used at the front.
    lru_order: VecDeque<String>,
    bytes_used: usize,
    max_bytes: usize,
    stats: CacheStats,
}

impl CacheState {
    fn new(max_bytes: usize) -> Self {
        Self {
            tiles: HashMap::new(),
            lru_order: VecDeque::new(),
            bytes_used: 0,
            max_bytes,
            stats: CacheStats { bytes_limit: max_bytes, ..Default::default() },
        }
    }

    fn touch(&mut self, key: &str) {
        self.lru_order.retain(|existing| existing != key);
        self.lru_order.push_back(key.to_owned());
    }

    fn evict_lru(&mut self) {
        if let Some(oldest) = self.lru_order.pop_front() {
            if let Some(tile) = self.tiles.remove(&oldest) {
                self.bytes_used = self.bytes_used.saturating_sub(tile.byte_size());
                self.stats.evictions += 1;
                debug!(key = %oldest, bytes = tile.byte_size(), "evicted tile");
            }
        }
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.tiles.len();
        self.stats.bytes_used = self.bytes_used;
    }
}

/// Rendered-tile cache, LRU by total bytes, safe to share across threads.
pub struct TileCache {
    state: Mutex<CacheState>,
}

impl TileCache {
    pub fn new(max_bytes: usize) -> Self {
        Self { state: Mutex::new(CacheState::new(max_bytes)) }
    }

    /// Look up a tile by fingerprint, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<TileImage> {
        let mut state = self.state.lock().unwrap();

        if let Some(tile) = state.tiles.get(key).cloned() {
            state.touch(key);
            state.stats.hits += 1;
            Some(tile)
        } else {
            state.stats.misses += 1;
            None
        }
    }

    /// Check for a tile without disturbing LRU order or counters.
    pub fn contains(&self, key: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.tiles.contains_key(key)
    }

    /// Insert a tile, evicting least-recently-used entries until the byte
    /// budget holds.
    ///
    /// Returns false, storing nothing, for empty images and for images
    /// larger than the entire budget (those could never satisfy the budget
    /// invariant). Re-inserting an existing key replaces it, subtracting the
    /// old entry's bytes first.
    pub fn put(&self, key: &str, image: TileImage) -> bool {
        if image.is_empty() {
            return false;
        }

        let mut state = self.state.lock().unwrap();
        let new_bytes = image.byte_size();

        if let Some(old) = state.tiles.remove(key) {
            state.bytes_used = state.bytes_used.saturating_sub(old.byte_size());
            state.lru_order.retain(|existing| existing != key);
        }

        while state.bytes_used + new_bytes > state.max_bytes && !state.lru_order.is_empty() {
            state.evict_lru();
        }

        if state.bytes_used + new_bytes > state.max_bytes {
            state.sync_stats();
            return false;
        }

        state.bytes_used += new_bytes;
        state.tiles.insert(key.to_owned(), image);
        state.lru_order.push_back(key.to_owned());
        state.sync_stats();
        true
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_used(&self) -> usize {
        self.state.lock().unwrap().bytes_used
    }

    pub fn stats(&self) -> CacheStats {
        let mut state = self.state.lock().unwrap();
        state.sync_stats();
        state.stats
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.tiles.clear();
        state.lru_order.clear();
        state.bytes_used = 0;
        state.sync_stats();
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_BUDGET_BYTES)
    }
}
