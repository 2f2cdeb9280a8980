//! Tiled render pipeline.
//!
//! Alternative to the whole-viewport pipeline: the viewport is covered by
//! fixed-size tiles rendered at a bucketed zoom, cached by fingerprint, and
//! scheduled center-first. Tile requests carry the generation current at
//! planning time; the worker silently drops requests whose generation has
//! been superseded by the time they are dequeued.

use std::cmp::Ordering as CmpOrdering;
use std::collections::hash_map::DefaultHasher;
use std::collections::BinaryHeap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use paperglass_cache::{DocumentCache, TileCache, TileImage};
use paperglass_engine::{ClipRect, PageSize, RasterizeResult};

/// Tile edge length in device pixels.
pub const TILE_SIZE: u32 = 256;

/// Ratio of the geometric zoom ladder.
pub const BUCKET_RATIO: f64 = 1.125;

/// Snap a zoom factor onto the geometric ladder `BUCKET_RATIO^k`.
///
/// Nearby zooms share a bucket, so continuous zooming reuses cached tiles
/// instead of invalidating them at every step. Idempotent: bucketing a
/// bucketed zoom returns it unchanged.
pub fn bucket_zoom(zoom: f64) -> f64 {
    if zoom <= 0.0 {
        return 1.0;
    }
    let bucket = (zoom.ln() / BUCKET_RATIO.ln()).round();
    BUCKET_RATIO.powi(bucket as i32)
}

fn path_hash_prefix(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    let hex = format!("{:016x}", hasher.finish());
    hex[..8].to_owned()
}

/// Stable content-addressing key for a rendered tile.
pub fn tile_fingerprint(path: &Path, page: u32, bucket: f64, row: i64, col: i64) -> String {
    format!("{}_{}_{:.4}_{}_{}", path_hash_prefix(path), page, bucket, row, col)
}

/// Visible region in device pixels at `zoom`.
#[derive(Debug, Clone, Copy)]
pub struct TileViewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub zoom: f64,
}

/// One tile the planner wants rendered (or served from cache).
#[derive(Debug, Clone)]
pub struct TilePlan {
    pub fingerprint: String,
    pub row: i64,
    pub col: i64,
    pub bucket_zoom: f64,
    /// Tile rectangle clipped to the page, in page units.
    pub clip: ClipRect,
    /// Twice the Manhattan distance from the visible-range midpoint, kept
    /// integral; lower schedules first.
    pub priority: u32,
}

/// Cover `viewport` with tiles of `page`, clipped to the page rectangle.
///
/// Tiles are `TILE_SIZE / bucket_zoom` page units on a side; the visible
/// range itself is computed at the *actual* zoom so the cover stays correct
/// between bucket steps. Fully off-page and degenerate tiles are skipped.
pub fn plan_tiles(
    path: &Path,
    page: u32,
    page_size: PageSize,
    viewport: &TileViewport,
) -> Vec<TilePlan> {
    if viewport.zoom <= 0.0 || viewport.width <= 0.0 || viewport.height <= 0.0 {
        return Vec::new();
    }

    let bucket = bucket_zoom(viewport.zoom);
    let tile_pw = TILE_SIZE as f64 / bucket;
    let tile_ph = TILE_SIZE as f64 / bucket;
    let page_w = page_size.width_pt as f64;
    let page_h = page_size.height_pt as f64;

    let start_px = viewport.x / viewport.zoom;
    let start_py = viewport.y / viewport.zoom;
    let end_px = (viewport.x + viewport.width) / viewport.zoom;
    let end_py = (viewport.y + viewport.height) / viewport.zoom;

    let start_col = (start_px / tile_pw).floor() as i64;
    let start_row = (start_py / tile_ph).floor() as i64;
    let end_col = (end_px / tile_pw).ceil() as i64;
    let end_row = (end_py / tile_ph).ceil() as i64;

    let mut plans = Vec::new();
    for row in start_row..=end_row {
        for col in start_col..=end_col {
            let tx = col as f64 * tile_pw;
            let ty = row as f64 * tile_ph;

            if tx >= page_w || ty >= page_h || tx + tile_pw <= 0.0 || ty + tile_ph <= 0.0 {
                continue;
            }

            let clip_x0 = tx.max(0.0);
            let clip_y0 = ty.max(0.0);
            let clip_x1 = (tx + tile_pw).min(page_w);
            let clip_y1 = (ty + tile_ph).min(page_h);
            if clip_x1 - clip_x0 <= 0.0 || clip_y1 - clip_y0 <= 0.0 {
                continue;
            }

            let priority = ((2 * row - (start_row + end_row)).unsigned_abs()
                + (2 * col - (start_col + end_col)).unsigned_abs()) as u32;

            plans.push(TilePlan {
                fingerprint: tile_fingerprint(path, page, bucket, row, col),
                row,
                col,
                bucket_zoom: bucket,
                clip: ClipRect::new(clip_x0 as f32, clip_y0 as f32, clip_x1 as f32, clip_y1 as f32),
                priority,
            });
        }
    }

    plans
}

/// A queued tile render.
#[derive(Debug, Clone)]
pub struct TileRenderRequest {
    pub fingerprint: String,
    pub pdf_path: PathBuf,
    pub page_number: u32,
    pub bucket_zoom: f64,
    pub clip: ClipRect,
    pub row: i64,
    pub col: i64,
    pub generation: u64,
}

struct QueuedTile {
    priority: u32,
    sequence: u64,
    request: TileRenderRequest,
}

impl PartialEq for QueuedTile {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTile {}

impl PartialOrd for QueuedTile {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTile {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the lowest (priority, sequence)
        // pops first. Sequence breaks ties in insertion order.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority queue of tile renders: closest to the viewport center first,
/// insertion order within equal distance.
#[derive(Default)]
pub struct TileQueue {
    heap: BinaryHeap<QueuedTile>,
    sequence: u64,
}

impl TileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: TileRenderRequest, priority: u32) {
        self.sequence += 1;
        self.heap.push(QueuedTile { priority, sequence: self.sequence, request });
    }

    pub fn pop(&mut self) -> Option<TileRenderRequest> {
        self.heap.pop().map(|queued| queued.request)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

/// Payload of a tile-ready notification.
#[derive(Debug, Clone)]
pub struct TileReady {
    pub fingerprint: String,
    pub row: i64,
    pub col: i64,
    pub bucket_zoom: f64,
}

/// Callback invoked for every tile that became available, either straight
/// from cache at planning time or from the worker after rendering.
pub type TileReadyFn = Arc<dyn Fn(TileReady) + Send + Sync>;

/// The tiled render pipeline: planner, priority queue, worker, cache.
///
/// Shares a `DocumentCache` with whoever reads page metadata; the cache's
/// mutex serializes the rasterizer between them.
pub struct TilePipeline {
    documents: Arc<DocumentCache>,
    cache: Arc<TileCache>,
    queue: Arc<Mutex<TileQueue>>,
    generation: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    on_tile_ready: TileReadyFn,
    worker: Option<JoinHandle<()>>,
}

impl TilePipeline {
    pub fn spawn(
        documents: Arc<DocumentCache>,
        cache: Arc<TileCache>,
        on_tile_ready: TileReadyFn,
        poll: Duration,
    ) -> Self {
        let queue = Arc::new(Mutex::new(TileQueue::new()));
        let generation = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let documents = documents.clone();
            let cache = cache.clone();
            let queue = queue.clone();
            let generation = generation.clone();
            let shutdown = shutdown.clone();
            let on_tile_ready = on_tile_ready.clone();

            thread::Builder::new()
                .name("paperglass-tile-worker".to_owned())
                .spawn(move || {
                    run_worker(documents, cache, queue, generation, shutdown, on_tile_ready, poll)
                })
                .expect("failed to spawn tile worker thread")
        };

        Self {
            documents,
            cache,
            queue,
            generation,
            shutdown,
            on_tile_ready,
            worker: Some(worker),
        }
    }

    /// Re-plan for a new viewport.
    ///
    /// Bumps the generation (stale queued work dies at dequeue), emits
    /// ready callbacks for tiles already cached, and enqueues the misses
    /// center-first. Returns the number of renders enqueued.
    pub fn update_viewport(
        &self,
        path: &Path,
        page: u32,
        viewport: &TileViewport,
    ) -> RasterizeResult<usize> {
        // A generation is consumed per viewport update, even when the page
        // lookup fails below: queued work for the old viewport is stale
        // either way.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let page_size = self.documents.page_size(path, page)?;

        let plans = plan_tiles(path, page, page_size, viewport);
        let mut enqueued = 0;

        let mut queue = self.queue.lock().unwrap();
        for plan in plans {
            if self.cache.get(&plan.fingerprint).is_some() {
                (self.on_tile_ready)(TileReady {
                    fingerprint: plan.fingerprint,
                    row: plan.row,
                    col: plan.col,
                    bucket_zoom: plan.bucket_zoom,
                });
                continue;
            }

            queue.push(
                TileRenderRequest {
                    fingerprint: plan.fingerprint,
                    pdf_path: path.to_path_buf(),
                    page_number: page,
                    bucket_zoom: plan.bucket_zoom,
                    clip: plan.clip,
                    row: plan.row,
                    col: plan.col,
                    generation,
                },
                plan.priority,
            );
            enqueued += 1;
        }

        debug!(generation, enqueued, "tile viewport updated");
        Ok(enqueued)
    }

    /// Pull a rendered tile by fingerprint.
    pub fn tile(&self, fingerprint: &str) -> Option<TileImage> {
        self.cache.get(fingerprint)
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stop the worker and wait for it.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for TilePipeline {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn run_worker(
    documents: Arc<DocumentCache>,
    cache: Arc<TileCache>,
    queue: Arc<Mutex<TileQueue>>,
    generation: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    on_tile_ready: TileReadyFn,
    poll: Duration,
) {
    debug!("tile worker started");
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let next = queue.lock().unwrap().pop();
        let Some(request) = next else {
            thread::sleep(poll);
            continue;
        };

        let current = generation.load(Ordering::SeqCst);
        if request.generation < current {
            debug!(
                fingerprint = %request.fingerprint,
                request_generation = request.generation,
                current_generation = current,
                "stale tile request dropped"
            );
            continue;
        }

        let rendered = documents.with_document(&request.pdf_path, |rasterizer, handle| {
            rasterizer.render_clip(
                handle,
                request.page_number,
                request.bucket_zoom as f32,
                request.clip,
            )
        });

        match rendered {
            Ok(tile) => {
                let image = TileImage::new(tile.pixels, tile.width, tile.height);
                if cache.put(&request.fingerprint, image) {
                    on_tile_ready(TileReady {
                        fingerprint: request.fingerprint,
                        row: request.row,
                        col: request.col,
                        bucket_zoom: request.bucket_zoom,
                    });
                }
            }
            Err(err) => {
                warn!(fingerprint = %request.fingerprint, %err, "tile render failed");
            }
        }
    }
    debug!("tile worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperglass_engine::{test_fixtures, LopdfRasterizer};
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn bucket_zoom_snaps_to_the_ladder() {
        // S3 values.
        assert_eq!(bucket_zoom(1.0), 1.0);
        assert_eq!(bucket_zoom(1.05), 1.0);
        assert_eq!(bucket_zoom(1.07), 1.125);
        assert_eq!(bucket_zoom(1.125), 1.125);
        assert_eq!(bucket_zoom(0.0), 1.0);
        assert_eq!(bucket_zoom(-2.0), 1.0);
    }

    #[test]
    fn bucket_zoom_is_idempotent() {
        for raw in [0.01, 0.3, 0.92, 1.0, 1.06, 2.7, 14.2, 800.0] {
            let once = bucket_zoom(raw);
            assert_eq!(bucket_zoom(once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn fingerprints_are_stable_and_distinct() {
        let path = Path::new("doc.pdf");
        let a = tile_fingerprint(path, 0, 1.125, 2, 3);
        let b = tile_fingerprint(path, 0, 1.125, 2, 3);
        assert_eq!(a, b);
        assert!(a.ends_with("_0_1.1250_2_3"));

        assert_ne!(a, tile_fingerprint(path, 0, 1.125, 3, 2));
        assert_ne!(a, tile_fingerprint(path, 1, 1.125, 2, 3));
        assert_ne!(a, tile_fingerprint(Path::new("other.pdf"), 0, 1.125, 2, 3));
    }

    fn page(width: f32, height: f32) -> PageSize {
        PageSize { width_pt: width, height_pt: height }
    }

    #[test]
    fn plans_cover_the_viewport_center_first() {
        // S6: rows and cols 0..=3, midpoint (1.5, 1.5).
        let viewport = TileViewport { x: 0.0, y: 0.0, width: 700.0, height: 700.0, zoom: 1.0 };
        let plans = plan_tiles(Path::new("doc.pdf"), 0, page(1024.0, 1024.0), &viewport);

        assert_eq!(plans.len(), 16);

        let find = |row, col| {
            plans
                .iter()
                .find(|plan| plan.row == row && plan.col == col)
                .unwrap_or_else(|| panic!("missing tile ({row}, {col})"))
        };
        // Priorities are doubled Manhattan distances.
        assert_eq!(find(1, 2).priority, 2); // distance 1.0
        assert_eq!(find(0, 0).priority, 6); // distance 3.0
        assert!(find(1, 2).priority < find(0, 0).priority);
    }

    #[test]
    fn plans_clip_to_the_page_and_skip_offpage_tiles() {
        // Page is 300x300 at zoom 1: tiles (0,0), (0,1), (1,0), (1,1),
        // where row/col 1 are 44-unit slivers.
        let viewport = TileViewport { x: 0.0, y: 0.0, width: 600.0, height: 600.0, zoom: 1.0 };
        let plans = plan_tiles(Path::new("doc.pdf"), 0, page(300.0, 300.0), &viewport);

        assert_eq!(plans.len(), 4);
        let corner = plans.iter().find(|plan| plan.row == 1 && plan.col == 1).expect("sliver");
        assert_eq!(corner.clip, ClipRect::new(256.0, 256.0, 300.0, 300.0));

        // A viewport panned fully past the page plans nothing.
        let far = TileViewport { x: 2048.0, y: 2048.0, width: 512.0, height: 512.0, zoom: 1.0 };
        assert!(plan_tiles(Path::new("doc.pdf"), 0, page(300.0, 300.0), &far).is_empty());
    }

    #[test]
    fn plans_use_bucketed_zoom_for_tile_size() {
        let viewport = TileViewport { x: 0.0, y: 0.0, width: 512.0, height: 512.0, zoom: 1.06 };
        let plans = plan_tiles(Path::new("doc.pdf"), 0, page(2000.0, 2000.0), &viewport);

        // 1.06 buckets to 1.0, so tiles are 256 page units despite the zoom.
        assert!(plans.iter().all(|plan| plan.bucket_zoom == 1.0));
        let first = plans.iter().find(|plan| plan.row == 0 && plan.col == 0).expect("origin tile");
        assert_eq!(first.clip, ClipRect::new(0.0, 0.0, 256.0, 256.0));
    }

    #[test]
    fn queue_pops_by_priority_then_insertion_order() {
        let request = |fingerprint: &str| TileRenderRequest {
            fingerprint: fingerprint.to_owned(),
            pdf_path: PathBuf::from("doc.pdf"),
            page_number: 0,
            bucket_zoom: 1.0,
            clip: ClipRect::new(0.0, 0.0, 256.0, 256.0),
            row: 0,
            col: 0,
            generation: 1,
        };

        let mut queue = TileQueue::new();
        queue.push(request("far"), 6);
        queue.push(request("center"), 2);
        queue.push(request("near-a"), 4);
        queue.push(request("near-b"), 4);

        assert_eq!(queue.pop().expect("pop").fingerprint, "center");
        assert_eq!(queue.pop().expect("pop").fingerprint, "near-a");
        assert_eq!(queue.pop().expect("pop").fingerprint, "near-b");
        assert_eq!(queue.pop().expect("pop").fingerprint, "far");
        assert!(queue.pop().is_none());
    }

    fn test_pipeline() -> (TilePipeline, Arc<StdMutex<Vec<TileReady>>>) {
        let documents = Arc::new(DocumentCache::new(Box::new(LopdfRasterizer::new()), 5));
        let cache = Arc::new(TileCache::new(32 * 1024 * 1024));
        let readies = Arc::new(StdMutex::new(Vec::new()));
        let readies_inner = readies.clone();
        let pipeline = TilePipeline::spawn(
            documents,
            cache,
            Arc::new(move |ready| readies_inner.lock().unwrap().push(ready)),
            POLL,
        );
        (pipeline, readies)
    }

    fn wait_for(deadline_ms: u64, check: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while !check() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn renders_planned_tiles_and_notifies() {
        let pdf = test_fixtures::single_page_pdf(256.0, 256.0);
        let (pipeline, readies) = test_pipeline();

        let viewport = TileViewport { x: 0.0, y: 0.0, width: 200.0, height: 200.0, zoom: 1.0 };
        let enqueued = pipeline.update_viewport(pdf.path(), 0, &viewport).expect("update");
        assert_eq!(enqueued, 1);

        let fingerprint = tile_fingerprint(pdf.path(), 0, 1.0, 0, 0);
        wait_for(5000, || !readies.lock().unwrap().is_empty());

        let tile = pipeline.tile(&fingerprint).expect("tile");
        assert_eq!((tile.width(), tile.height()), (256, 256));

        let readies = readies.lock().unwrap();
        assert_eq!(readies.len(), 1);
        assert_eq!(readies[0].fingerprint, fingerprint);
        assert_eq!((readies[0].row, readies[0].col), (0, 0));

        drop(readies);
        pipeline.shutdown();
    }

    #[test]
    fn cached_tiles_are_announced_without_rerendering() {
        let pdf = test_fixtures::single_page_pdf(256.0, 256.0);
        let (pipeline, readies) = test_pipeline();
        let viewport = TileViewport { x: 0.0, y: 0.0, width: 200.0, height: 200.0, zoom: 1.0 };

        pipeline.update_viewport(pdf.path(), 0, &viewport).expect("update");
        let fingerprint = tile_fingerprint(pdf.path(), 0, 1.0, 0, 0);
        wait_for(5000, || !readies.lock().unwrap().is_empty());
        assert!(pipeline.tile(&fingerprint).is_some());

        // Second pass over the same viewport: served from cache, nothing queued.
        let enqueued = pipeline.update_viewport(pdf.path(), 0, &viewport).expect("update");
        assert_eq!(enqueued, 0);
        assert_eq!(readies.lock().unwrap().len(), 2);

        pipeline.shutdown();
    }

    #[test]
    fn stale_generations_are_dropped_at_dequeue() {
        let pdf = test_fixtures::single_page_pdf(256.0, 256.0);
        let (pipeline, readies) = test_pipeline();

        // Bump the generation past the request we are about to inject.
        let degenerate = TileViewport { x: 0.0, y: 0.0, width: 0.0, height: 0.0, zoom: 1.0 };
        pipeline.update_viewport(pdf.path(), 0, &degenerate).expect("update");
        assert_eq!(pipeline.current_generation(), 1);

        let fingerprint = tile_fingerprint(pdf.path(), 0, 1.0, 0, 0);
        pipeline.queue.lock().unwrap().push(
            TileRenderRequest {
                fingerprint: fingerprint.clone(),
                pdf_path: pdf.path().to_path_buf(),
                page_number: 0,
                bucket_zoom: 1.0,
                clip: ClipRect::new(0.0, 0.0, 256.0, 256.0),
                row: 0,
                col: 0,
                generation: 0,
            },
            0,
        );

        thread::sleep(Duration::from_millis(150));
        assert!(pipeline.tile(&fingerprint).is_none());
        assert!(readies.lock().unwrap().is_empty());

        pipeline.shutdown();
    }

    #[test]
    fn page_errors_propagate_from_update() {
        let pdf = test_fixtures::single_page_pdf(256.0, 256.0);
        let (pipeline, _readies) = test_pipeline();
        let viewport = TileViewport { x: 0.0, y: 0.0, width: 200.0, height: 200.0, zoom: 1.0 };

        let err = pipeline.update_viewport(pdf.path(), 5, &viewport).expect_err("bad page");
        assert!(matches!(err, paperglass_engine::RasterizeError::PageOutOfRange { .. }));
        // The failed update still consumed a generation.
        assert_eq!(pipeline.current_generation(), 1);

        pipeline.shutdown();
    }
}
