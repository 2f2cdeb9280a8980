//! The render executor: a dedicated thread that owns the rasterizer.
//!
//! All rasterization for the viewport pipeline is serialized on this thread.
//! A crash inside a render surfaces as a failure result, never as a torn-down
//! process; a hung rasterizer stalls only this thread. Documents and shared
//! buffer attachments are cached executor-locally and dropped on shutdown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use paperglass_cache::DocumentCache;
use paperglass_engine::{ClipRect, PageTransform, RasterizerFactory, RenderTarget};

use crate::message::{ExecutorMessage, QueueClosed, RenderRequest, RenderResult, ResultMessage};
use crate::shm::{BufferError, SharedBuffer};

#[derive(Debug, thiserror::Error)]
enum RenderError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Rasterize(#[from] paperglass_engine::RasterizeError),
}

/// Handle to the executor thread and its inbound queue.
pub struct RenderExecutor {
    requests: Sender<ExecutorMessage>,
    thread: Option<JoinHandle<()>>,
}

impl RenderExecutor {
    /// Spawn the executor. Returns the handle and the result queue it
    /// produces on; pass `buffer_dir` so attaches resolve against the same
    /// directory the pool creates buffers in.
    pub fn spawn(
        factory: RasterizerFactory,
        document_capacity: usize,
        buffer_dir: PathBuf,
    ) -> (Self, Receiver<ResultMessage>) {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<ExecutorMessage>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<ResultMessage>();

        let thread = thread::Builder::new()
            .name("paperglass-render-executor".to_owned())
            .spawn(move || run(factory, document_capacity, buffer_dir, request_rx, result_tx))
            .expect("failed to spawn render executor thread");

        (Self { requests: request_tx, thread: Some(thread) }, result_rx)
    }

    /// Enqueue a render request. Non-blocking; fails only when the executor
    /// is gone.
    pub fn submit(&self, request: RenderRequest) -> Result<(), QueueClosed> {
        self.requests.send(ExecutorMessage::Render(request)).map_err(|_| QueueClosed)
    }

    /// Post the shutdown sentinel.
    pub fn request_shutdown(&self) {
        let _ = self.requests.send(ExecutorMessage::Shutdown);
    }

    /// Join the executor thread, giving up after `timeout`.
    ///
    /// Returns true when the thread exited; false leaves it detached (a
    /// hung rasterizer cannot be forced off its thread).
    pub fn join_timeout(mut self, timeout: Duration) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!("render executor did not stop in time; detaching");
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }

        thread.join().is_ok()
    }
}

fn run(
    factory: RasterizerFactory,
    document_capacity: usize,
    buffer_dir: PathBuf,
    requests: Receiver<ExecutorMessage>,
    results: Sender<ResultMessage>,
) {
    let documents = DocumentCache::new(factory(), document_capacity);
    let mut attached: HashMap<String, SharedBuffer> = HashMap::new();
    debug!("render executor started");

    while let Ok(message) = requests.recv() {
        let request = match message {
            ExecutorMessage::Shutdown => {
                debug!("render executor received shutdown sentinel");
                // Forward the sentinel so the result router can exit
                // without waiting out its receive timeout.
                let _ = results.send(ResultMessage::Shutdown);
                break;
            }
            ExecutorMessage::Render(request) => request,
        };

        let started = Instant::now();
        debug!(
            id = request.request_id,
            page = request.page_number,
            scale = request.render_scale,
            buffer = %request.buffer_name,
            "render request"
        );

        let result = match render_one(&documents, &mut attached, &buffer_dir, &request) {
            Ok(render_ms) => {
                let total_ms = started.elapsed().as_secs_f64() * 1000.0;
                debug!(id = request.request_id, render_ms, total_ms, "render complete");
                RenderResult::success(&request, render_ms, total_ms)
            }
            Err(err) => {
                warn!(id = request.request_id, %err, "render failed");
                RenderResult::failure(&request)
            }
        };

        if results.send(ResultMessage::Rendered(result)).is_err() {
            debug!("result queue closed; stopping executor");
            break;
        }
    }

    // Executor-local caches die with the thread.
    documents.clear();
    attached.clear();
    debug!("render executor stopped");
}

fn render_one(
    documents: &DocumentCache,
    attached: &mut HashMap<String, SharedBuffer>,
    buffer_dir: &Path,
    request: &RenderRequest,
) -> Result<f64, RenderError> {
    if !attached.contains_key(&request.buffer_name) {
        let buffer =
            SharedBuffer::attach_in(buffer_dir, &request.buffer_name, request.buffer_size)?;
        attached.insert(request.buffer_name.clone(), buffer);
    }
    let buffer = attached
        .get_mut(&request.buffer_name)
        .ok_or_else(|| BufferError::Attach {
            name: request.buffer_name.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "attach cache miss"),
        })?;

    // A resized pool reuses no names, but stale attachments to unlinked
    // buffers must not be written past their mapping.
    if buffer.len() < request.buffer_size {
        attached.remove(&request.buffer_name);
        return Err(RenderError::Buffer(BufferError::Size {
            name: request.buffer_name.clone(),
            expected: request.buffer_size,
            actual: 0,
        }));
    }

    let render_ms = documents.with_document(&request.pdf_path, |rasterizer, handle| {
        let transform = PageTransform::viewport(
            request.render_scale as f32,
            request.center_x as f32,
            request.center_y as f32,
            request.pixel_w,
            request.pixel_h,
        );
        let clip = ClipRect::of_size(request.pixel_w, request.pixel_h);
        let mut target = RenderTarget::new(
            buffer.as_mut_slice(),
            request.pixel_w,
            request.pixel_h,
            request.stride,
        );

        let render_started = Instant::now();
        rasterizer.render_into(handle, request.page_number, transform, clip, &mut target)?;
        Ok(render_started.elapsed().as_secs_f64() * 1000.0)
    })?;

    Ok(render_ms)
}
