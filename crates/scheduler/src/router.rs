//! Result routing: staleness filtering and zero-copy frame publication.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, warn};

use paperglass_cache::FrameCache;
use paperglass_engine::PixelFormat;

use crate::message::{RenderResult, ResultMessage};
use crate::shm::SharedBuffer;

/// A published frame: a read-only view over a shared buffer.
///
/// No pixel data is copied; the frame keeps the mapping alive, so it stays
/// readable even after the pool resizes and unlinks the buffer.
#[derive(Clone)]
pub struct Frame {
    buffer: Arc<SharedBuffer>,
    width: u32,
    height: u32,
    stride: usize,
    dpr: f64,
    generation: u64,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn dpr(&self) -> f64 {
        self.dpr
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::Bgra
    }

    /// BGRA pixel rows, `stride` bytes apart.
    pub fn pixels(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.stride * self.height as usize]
    }
}

/// Decides whether a result generation is still current.
pub type AcceptFn = Arc<dyn Fn(u64) -> bool + Send + Sync>;
/// Resolves a buffer name to the pool's live mapping.
pub type BufferLookupFn = Arc<dyn Fn(&str) -> Option<Arc<SharedBuffer>> + Send + Sync>;
/// Notification callbacks, invoked on the router thread.
pub type NotifyFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Everything the router needs to route one result.
pub struct RouterHooks {
    pub accept: AcceptFn,
    pub lookup: BufferLookupFn,
    pub frame_cache: Arc<FrameCache<Frame>>,
    pub on_frame_ready: NotifyFn,
    pub on_render_failed: NotifyFn,
}

/// Dedicated thread draining the executor's result queue.
///
/// Failures are reported and dropped; stale generations are dropped without
/// touching their buffer; fresh results are wrapped zero-copy and published
/// to the frame cache.
pub struct ResultRouter {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ResultRouter {
    pub fn spawn(results: Receiver<ResultMessage>, hooks: RouterHooks, poll: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let thread = thread::Builder::new()
            .name("paperglass-result-router".to_owned())
            .spawn(move || run(results, hooks, poll, stop_flag))
            .expect("failed to spawn result router thread");

        Self { stop, thread: Some(thread) }
    }

    /// Stop the router and wait for it. The short receive timeout bounds
    /// how long this blocks.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ResultRouter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(
    results: Receiver<ResultMessage>,
    hooks: RouterHooks,
    poll: Duration,
    stop: Arc<AtomicBool>,
) {
    debug!("result router started");
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        match results.recv_timeout(poll) {
            Ok(ResultMessage::Shutdown) => {
                debug!("result router received shutdown sentinel");
                break;
            }
            Ok(ResultMessage::Rendered(result)) => route_one(result, &hooks),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("result queue disconnected");
                break;
            }
        }
    }
    debug!("result router stopped");
}

fn route_one(result: RenderResult, hooks: &RouterHooks) {
    let generation = result.request_id;

    let Some(buffer_name) = result.buffer_name else {
        debug!(generation, "render failure routed");
        (hooks.on_render_failed)(generation);
        return;
    };

    if !(hooks.accept)(generation) {
        debug!(generation, "result dropped (stale)");
        return;
    }

    let Some(buffer) = (hooks.lookup)(&buffer_name) else {
        debug!(generation, buffer = %buffer_name, "result skipped (missing buffer)");
        return;
    };

    let needed = result.stride * result.pixel_h as usize;
    if buffer.len() < needed {
        warn!(generation, buffer = %buffer_name, "result skipped (buffer too small)");
        return;
    }

    let frame = Frame {
        buffer,
        width: result.pixel_w,
        height: result.pixel_h,
        stride: result.stride,
        dpr: result.dpr,
        generation,
    };

    if hooks.frame_cache.set(frame, generation) {
        let queue_ms = result.created_at.elapsed().as_secs_f64() * 1000.0;
        debug!(generation, queue_ms, "frame ready");
        (hooks.on_frame_ready)(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{RenderRequest, RenderResult};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::tempdir;

    const POLL: Duration = Duration::from_millis(10);

    struct Fixture {
        latest: Arc<AtomicU64>,
        frame_cache: Arc<FrameCache<Frame>>,
        ready: Arc<Mutex<Vec<u64>>>,
        failed: Arc<Mutex<Vec<u64>>>,
        _buffer: Arc<SharedBuffer>,
    }

    fn fixture(dir: &std::path::Path, name: &str) -> (RouterHooks, Fixture) {
        let mut buffer = SharedBuffer::create_in(dir, name, 16 * 8 * 4).expect("create");
        buffer.as_mut_slice().fill(0xab);
        let buffer = Arc::new(buffer);

        let latest = Arc::new(AtomicU64::new(0));
        let frame_cache = Arc::new(FrameCache::new());
        let ready = Arc::new(Mutex::new(Vec::new()));
        let failed = Arc::new(Mutex::new(Vec::new()));

        let accept_latest = latest.clone();
        let lookup_buffer = buffer.clone();
        let ready_log = ready.clone();
        let failed_log = failed.clone();

        let hooks = RouterHooks {
            accept: Arc::new(move |generation| {
                generation == accept_latest.load(Ordering::SeqCst)
            }),
            lookup: Arc::new(move |requested: &str| {
                (requested == lookup_buffer.name()).then(|| lookup_buffer.clone())
            }),
            frame_cache: frame_cache.clone(),
            on_frame_ready: Arc::new(move |generation| {
                ready_log.lock().unwrap().push(generation)
            }),
            on_render_failed: Arc::new(move |generation| {
                failed_log.lock().unwrap().push(generation)
            }),
        };

        (hooks, Fixture { latest, frame_cache, ready, failed, _buffer: buffer })
    }

    fn result_for(name: &str, generation: u64) -> RenderResult {
        let request = RenderRequest {
            request_id: generation,
            pdf_path: PathBuf::from("test.pdf"),
            page_number: 0,
            center_x: 0.0,
            center_y: 0.0,
            render_scale: 1.0,
            pixel_w: 16,
            pixel_h: 8,
            buffer_name: name.to_owned(),
            buffer_size: 16 * 8 * 4,
            stride: 16 * 4,
            dpr: 2.0,
            created_at: Instant::now(),
        };
        RenderResult::success(&request, 1.0, 2.0)
    }

    fn drain(deadline_ms: u64, check: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while !check() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn fresh_result_publishes_a_zero_copy_frame() {
        let dir = tempdir().expect("tempdir");
        let (hooks, fx) = fixture(dir.path(), "router_fresh");
        let (tx, rx) = crossbeam_channel::unbounded();
        let router = ResultRouter::spawn(rx, hooks, POLL);

        fx.latest.store(1, Ordering::SeqCst);
        tx.send(ResultMessage::Rendered(result_for("router_fresh", 1))).expect("send");

        drain(2000, || fx.frame_cache.get().is_some());
        let frame = fx.frame_cache.get().expect("frame");
        assert_eq!(frame.generation(), 1);
        assert_eq!(frame.dpr(), 2.0);
        assert_eq!(frame.pixels().len(), 16 * 8 * 4);
        // The frame reads the shared mapping itself, not a copy.
        assert!(frame.pixels().iter().all(|&byte| byte == 0xab));
        assert_eq!(fx.ready.lock().unwrap().as_slice(), &[1]);

        router.stop();
    }

    #[test]
    fn stale_result_is_dropped() {
        // S5: generation 2 completes first; generation 1 arrives later and
        // must not overwrite it.
        let dir = tempdir().expect("tempdir");
        let (hooks, fx) = fixture(dir.path(), "router_stale");
        let (tx, rx) = crossbeam_channel::unbounded();
        let router = ResultRouter::spawn(rx, hooks, POLL);

        fx.latest.store(2, Ordering::SeqCst);
        tx.send(ResultMessage::Rendered(result_for("router_stale", 2))).expect("send");
        tx.send(ResultMessage::Rendered(result_for("router_stale", 1))).expect("send");

        drain(2000, || !fx.ready.lock().unwrap().is_empty());
        thread::sleep(Duration::from_millis(50));

        assert_eq!(fx.ready.lock().unwrap().as_slice(), &[2]);
        assert_eq!(fx.frame_cache.get().expect("frame").generation(), 2);

        router.stop();
    }

    #[test]
    fn failure_result_notifies_and_keeps_previous_frame() {
        let dir = tempdir().expect("tempdir");
        let (hooks, fx) = fixture(dir.path(), "router_fail");
        let (tx, rx) = crossbeam_channel::unbounded();
        let router = ResultRouter::spawn(rx, hooks, POLL);

        fx.latest.store(1, Ordering::SeqCst);
        tx.send(ResultMessage::Rendered(result_for("router_fail", 1))).expect("send");
        drain(2000, || fx.frame_cache.get().is_some());

        fx.latest.store(2, Ordering::SeqCst);
        let mut failure = result_for("router_fail", 2);
        failure.buffer_name = None;
        tx.send(ResultMessage::Rendered(failure)).expect("send");

        drain(2000, || !fx.failed.lock().unwrap().is_empty());
        assert_eq!(fx.failed.lock().unwrap().as_slice(), &[2]);
        // The previous frame is untouched.
        assert_eq!(fx.frame_cache.get().expect("frame").generation(), 1);

        router.stop();
    }

    #[test]
    fn shutdown_sentinel_stops_the_router() {
        let dir = tempdir().expect("tempdir");
        let (hooks, _fx) = fixture(dir.path(), "router_stop");
        let (tx, rx) = crossbeam_channel::unbounded();
        let router = ResultRouter::spawn(rx, hooks, POLL);

        tx.send(ResultMessage::Shutdown).expect("send");
        router.stop();
    }
}
