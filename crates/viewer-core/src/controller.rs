//! The viewport controller: scheduling discipline and pipeline wiring.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use paperglass_cache::{DocumentCache, FrameCache, TileCache};
use paperglass_engine::RasterizerFactory;
use paperglass_scheduler::{
    DebounceTimer, Frame, FrameBufferPool, RenderExecutor, RenderRequest, ResultRouter,
    RouterHooks, TilePipeline,
};

use crate::config::ViewerConfig;
use crate::events::ViewerEvent;
use crate::viewport::Viewport;

/// Owns viewport state and drives the render pipeline.
///
/// Lives on the embedding's UI context; every method is called from that
/// single context. Pipeline threads talk back exclusively through the event
/// channel, so there is no shared mutable state beyond the frame cache, the
/// buffer pool and the latest-generation atomic.
///
/// Scheduling discipline: render requests are debounced; at most one render
/// is in flight; requests arriving while one is in flight coalesce into a
/// single trailing dispatch; results for any generation but the latest are
/// dropped before they touch a buffer.
pub struct ViewportController {
    config: ViewerConfig,
    factory: RasterizerFactory,
    viewport: Viewport,
    pdf_path: Option<PathBuf>,
    page_number: u32,

    metadata: Arc<DocumentCache>,
    pool: Arc<Mutex<FrameBufferPool>>,
    frame_cache: Arc<FrameCache<Frame>>,

    generation: u64,
    latest_generation: Arc<AtomicU64>,
    in_flight: bool,
    pending: bool,
    respawned: bool,
    fatal: bool,

    executor: Option<RenderExecutor>,
    router: Option<ResultRouter>,
    debounce: Option<DebounceTimer>,

    events_tx: Sender<ViewerEvent>,
    events_rx: Receiver<ViewerEvent>,
}

impl ViewportController {
    pub fn new(config: ViewerConfig, factory: RasterizerFactory) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let pool = Arc::new(Mutex::new(FrameBufferPool::new(config.buffer_count)));
        let frame_cache = Arc::new(FrameCache::new());
        let latest_generation = Arc::new(AtomicU64::new(0));
        let metadata =
            Arc::new(DocumentCache::new(factory(), config.document_cache_capacity));

        let (executor, router) =
            spawn_pipeline(&config, &factory, &pool, &frame_cache, &latest_generation, &events_tx);

        let debounce = {
            let tick_tx = events_tx.clone();
            DebounceTimer::spawn(
                config.debounce(),
                Arc::new(move || {
                    let _ = tick_tx.send(ViewerEvent::RenderTick);
                }),
            )
        };

        Self {
            config,
            factory,
            viewport: Viewport::default(),
            pdf_path: None,
            page_number: 0,
            metadata,
            pool,
            frame_cache,
            generation: 0,
            latest_generation,
            in_flight: false,
            pending: false,
            respawned: false,
            fatal: false,
            executor: Some(executor),
            router: Some(router),
            debounce: Some(debounce),
            events_tx,
            events_rx,
        }
    }

    /// The event stream the embedding loop should drain.
    pub fn events(&self) -> Receiver<ViewerEvent> {
        self.events_rx.clone()
    }

    // --- Document & page -------------------------------------------------

    /// Load a document. On failure the controller enters a degraded state
    /// (zero page dimensions, no renders scheduled) and still emits
    /// `PageChanged` so the UI can reflect it.
    pub fn set_pdf(&mut self, path: &Path) {
        if self.pdf_path.as_deref() == Some(path) {
            return;
        }
        debug!(path = %path.display(), "document set");
        self.pdf_path = Some(path.to_path_buf());
        self.reload_page_metadata();
        self.fit_page();
        self.emit(ViewerEvent::PageChanged);
    }

    pub fn set_page(&mut self, page_number: u32) {
        if self.page_number == page_number {
            return;
        }
        debug!(page_number, "page set");
        self.page_number = page_number;
        self.reload_page_metadata();
        self.fit_page();
        self.emit(ViewerEvent::PageChanged);
    }

    fn reload_page_metadata(&mut self) {
        let Some(path) = self.pdf_path.clone() else {
            return;
        };
        match self.metadata.page_size(&path, self.page_number) {
            Ok(size) => {
                self.viewport.set_page_size(size.width_pt as f64, size.height_pt as f64);
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read page size");
                self.viewport.set_page_size(0.0, 0.0);
            }
        }
    }

    // --- Viewport mutation -----------------------------------------------

    pub fn set_viewport_size(&mut self, logical_width: f64, logical_height: f64, dpr: f64) {
        let (pixel_w, pixel_h) = self.viewport.set_size(logical_width, logical_height, dpr);
        debug!(pixel_w, pixel_h, dpr = self.viewport.dpr, "viewport size set");

        if let Err(err) = self.pool.lock().unwrap().resize(pixel_w, pixel_h) {
            warn!(%err, "frame buffer pool resize failed");
            return;
        }
        self.schedule_render();
    }

    pub fn fit_page(&mut self) {
        if self.viewport.fit_page() {
            debug!(
                scale = self.viewport.scale,
                center_x = self.viewport.center_x,
                center_y = self.viewport.center_y,
                "fit page"
            );
            self.schedule_render();
        }
    }

    pub fn pan_by(&mut self, dx_logical: f64, dy_logical: f64) {
        if self.viewport.pan_by(dx_logical, dy_logical) {
            self.schedule_render();
        }
    }

    pub fn zoom_at(&mut self, factor: f64, anchor_x_logical: f64, anchor_y_logical: f64) {
        if self.viewport.zoom_at(factor, anchor_x_logical, anchor_y_logical) {
            self.schedule_render();
        }
    }

    // --- Scheduling ------------------------------------------------------

    /// Ask for a fresh frame. Coalesced through the debounce timer; the
    /// actual dispatch happens in `on_render_tick`.
    pub fn request_render(&mut self) {
        self.schedule_render();
    }

    fn schedule_render(&self) {
        if self.fatal {
            return;
        }
        if self.pdf_path.is_none() {
            debug!("render skipped: no document");
            return;
        }
        if !self.viewport.has_pixels() {
            debug!("render skipped: degenerate viewport");
            return;
        }
        if !self.viewport.has_page() {
            debug!("render skipped: zero page dimensions");
            return;
        }
        if let Some(debounce) = &self.debounce {
            debounce.arm();
        }
    }

    /// Debounce timer elapsed (routed back from the event loop).
    pub fn on_render_tick(&mut self) {
        self.render_now();
    }

    fn render_now(&mut self) {
        if self.fatal {
            return;
        }
        let Some(path) = self.pdf_path.clone() else {
            return;
        };
        if !self.viewport.has_page() {
            return;
        }

        let request = {
            let mut pool = self.pool.lock().unwrap();
            if !pool.has_buffers() {
                debug!("render skipped: no buffers");
                return;
            }
            if self.in_flight {
                self.pending = true;
                debug!("render deferred: already in flight");
                return;
            }
            let Some((buffer_name, _buffer)) = pool.acquire() else {
                return;
            };

            self.generation += 1;
            let (pixel_w, pixel_h) = pool.pixel_size();
            RenderRequest {
                request_id: self.generation,
                pdf_path: path,
                page_number: self.page_number,
                center_x: self.viewport.center_x,
                center_y: self.viewport.center_y,
                render_scale: self.viewport.scale,
                pixel_w,
                pixel_h,
                buffer_name,
                buffer_size: pool.buffer_size(),
                stride: pool.stride(),
                dpr: self.viewport.dpr,
                created_at: Instant::now(),
            }
        };

        self.latest_generation.store(self.generation, Ordering::SeqCst);
        self.in_flight = true;
        debug!(generation = self.generation, buffer = %request.buffer_name, "render queued");

        let submitted = match &self.executor {
            Some(executor) => executor.submit(request),
            None => Err(paperglass_scheduler::QueueClosed),
        };
        if submitted.is_err() {
            self.handle_queue_closed();
        }
    }

    /// A frame for `generation` was published (routed from the event loop).
    pub fn on_frame_ready(&mut self, generation: u64) {
        if generation != self.latest_generation.load(Ordering::SeqCst) {
            return;
        }
        self.in_flight = false;
        if self.pending {
            self.pending = false;
            self.render_now();
        }
    }

    /// The render for `generation` failed. The previous frame stays; the
    /// in-flight slot opens so later input can schedule again.
    pub fn on_render_failed(&mut self, generation: u64) {
        if generation != self.latest_generation.load(Ordering::SeqCst) {
            return;
        }
        self.in_flight = false;
        if self.pending {
            self.pending = false;
            self.render_now();
        }
    }

    /// Executor queue disconnected: respawn once and re-dispatch the latest
    /// viewport; declare a fatal state the second time.
    fn handle_queue_closed(&mut self) {
        self.in_flight = false;
        self.pending = false;

        if self.respawned {
            warn!("render executor failed again; giving up");
            self.fatal = true;
            self.emit(ViewerEvent::Fatal("render executor failed repeatedly".to_owned()));
            return;
        }

        warn!("render executor queue closed; respawning");
        self.respawned = true;
        if let Some(router) = self.router.take() {
            router.stop();
        }
        self.executor = None;

        let (executor, router) = spawn_pipeline(
            &self.config,
            &self.factory,
            &self.pool,
            &self.frame_cache,
            &self.latest_generation,
            &self.events_tx,
        );
        self.executor = Some(executor);
        self.router = Some(router);
        self.render_now();
    }

    // --- Tiled variant ---------------------------------------------------

    /// Build the tiled pipeline wired into this controller's event channel.
    ///
    /// Shares the controller's document cache, so metadata reads and tile
    /// renders are serialized on one rasterizer instance. Tiles surface as
    /// `ViewerEvent::TileReady`; pull pixels with [`TilePipeline::tile`].
    /// The caller owns the returned pipeline and its worker.
    pub fn tile_pipeline(&self) -> TilePipeline {
        let tile_tx = self.events_tx.clone();
        TilePipeline::spawn(
            self.metadata.clone(),
            Arc::new(TileCache::new(self.config.tile_budget_bytes)),
            Arc::new(move |ready| {
                let _ = tile_tx.send(ViewerEvent::TileReady(ready));
            }),
            self.config.tile_worker_poll(),
        )
    }

    // --- Reads -----------------------------------------------------------

    /// Latest rendered frame, if any.
    pub fn frame(&self) -> Option<Frame> {
        self.frame_cache.get()
    }

    pub fn pdf_path(&self) -> Option<&Path> {
        self.pdf_path.as_deref()
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn page_width(&self) -> f64 {
        self.viewport.page_width
    }

    pub fn page_height(&self) -> f64 {
        self.viewport.page_height
    }

    pub fn zoom_percent(&self) -> f64 {
        self.viewport.zoom_percent()
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn latest_generation(&self) -> u64 {
        self.latest_generation.load(Ordering::SeqCst)
    }

    pub fn is_render_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn has_pending_render(&self) -> bool {
        self.pending
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    // --- Shutdown --------------------------------------------------------

    /// Orderly teardown: stop the debouncer, post the executor sentinel and
    /// join it (detaching after the configured timeout), stop the router,
    /// then close and unlink every shared buffer.
    pub fn shutdown(mut self) {
        debug!("shutdown initiated");
        self.debounce.take();

        if let Some(executor) = self.executor.take() {
            executor.request_shutdown();
            if !executor.join_timeout(self.config.executor_join_timeout()) {
                warn!("render executor unresponsive; detached");
            }
        }
        if let Some(router) = self.router.take() {
            router.stop();
        }
        self.pool.lock().unwrap().shutdown();
        debug!("shutdown complete");
    }

    fn emit(&self, event: ViewerEvent) {
        let _ = self.events_tx.send(event);
    }
}

fn spawn_pipeline(
    config: &ViewerConfig,
    factory: &RasterizerFactory,
    pool: &Arc<Mutex<FrameBufferPool>>,
    frame_cache: &Arc<FrameCache<Frame>>,
    latest_generation: &Arc<AtomicU64>,
    events_tx: &Sender<ViewerEvent>,
) -> (RenderExecutor, ResultRouter) {
    let buffer_dir = pool.lock().unwrap().dir().clone();
    let (executor, results) =
        RenderExecutor::spawn(factory.clone(), config.document_cache_capacity, buffer_dir);

    let latest = latest_generation.clone();
    let lookup_pool = pool.clone();
    let ready_tx = events_tx.clone();
    let failed_tx = events_tx.clone();

    let router = ResultRouter::spawn(
        results,
        RouterHooks {
            accept: Arc::new(move |generation| generation == latest.load(Ordering::SeqCst)),
            lookup: Arc::new(move |name| lookup_pool.lock().unwrap().lookup(name)),
            frame_cache: frame_cache.clone(),
            on_frame_ready: Arc::new(move |generation| {
                let _ = ready_tx.send(ViewerEvent::FrameReady(generation));
            }),
            on_render_failed: Arc::new(move |generation| {
                let _ = failed_tx.send(ViewerEvent::RenderFailed(generation));
            }),
        },
        config.result_poll(),
    );

    (executor, router)
}
