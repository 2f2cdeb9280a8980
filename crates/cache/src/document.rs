//! Count-bounded LRU cache of open document handles.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use paperglass_engine::{DocumentHandle, PageSize, RasterizeResult, Rasterizer};
use tracing::{debug, warn};

/// Default number of simultaneously open documents.
pub const DEFAULT_DOCUMENT_CAPACITY: usize = 5;

struct DocState {
    rasterizer: Box<dyn Rasterizer>,
    handles: HashMap<PathBuf, DocumentHandle>,
    /// Least recently used at the front.
    order: VecDeque<PathBuf>,
    capacity: usize,
}

impl DocState {
    fn touch(&mut self, path: &Path) {
        self.order.retain(|existing| existing != path);
        self.order.push_back(path.to_path_buf());
    }

    /// Return the handle for `path`, opening it on a miss. Opening evicts
    /// (and closes) the least recently used document once the cache is full.
    /// Nothing is inserted when the open fails.
    fn handle_for(&mut self, path: &Path) -> RasterizeResult<DocumentHandle> {
        if let Some(&handle) = self.handles.get(path) {
            self.touch(path);
            return Ok(handle);
        }

        let handle = self.rasterizer.open(path)?;

        if self.handles.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                if let Some(evicted) = self.handles.remove(&oldest) {
                    debug!(path = %oldest.display(), "evicting least recently used document");
                    if let Err(err) = self.rasterizer.close(evicted) {
                        warn!(path = %oldest.display(), %err, "failed to close evicted document");
                    }
                }
            }
        }

        self.handles.insert(path.to_path_buf(), handle);
        self.order.push_back(path.to_path_buf());
        Ok(handle)
    }
}

/// Open-document cache that owns the rasterizer it serializes.
///
/// All access funnels through one mutex, which both guards the LRU
/// bookkeeping and serializes the non-reentrant rasterizer instance, so a
/// single cache can be shared by a metadata reader and a render worker.
pub struct DocumentCache {
    state: Mutex<DocState>,
}

impl DocumentCache {
    pub fn new(rasterizer: Box<dyn Rasterizer>, capacity: usize) -> Self {
        Self {
            state: Mutex::new(DocState {
                rasterizer,
                handles: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Run `f` against the (opened) document at `path`, holding the lock for
    /// the duration so rasterizer calls never overlap.
    pub fn with_document<T>(
        &self,
        path: &Path,
        f: impl FnOnce(&dyn Rasterizer, DocumentHandle) -> RasterizeResult<T>,
    ) -> RasterizeResult<T> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let handle = state.handle_for(path)?;
        f(state.rasterizer.as_ref(), handle)
    }

    pub fn page_count(&self, path: &Path) -> RasterizeResult<u32> {
        self.with_document(path, |rasterizer, handle| rasterizer.page_count(handle))
    }

    pub fn page_size(&self, path: &Path, page: u32) -> RasterizeResult<PageSize> {
        self.with_document(path, |rasterizer, handle| rasterizer.page_size(handle, page))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.state.lock().unwrap().handles.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every cached document.
    pub fn clear(&self) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        for (path, handle) in state.handles.drain() {
            if let Err(err) = state.rasterizer.close(handle) {
                warn!(path = %path.display(), %err, "failed to close document");
            }
        }
        state.order.clear();
    }
}
