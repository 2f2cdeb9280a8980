//! Double-buffered pool of named shared frame buffers.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use tracing::debug;

use crate::shm::{shm_dir, BufferError, SharedBuffer};

/// Buffers per pool. Two are enough to hide one frame of latency under the
/// controller's single-in-flight discipline.
pub const DEFAULT_BUFFER_COUNT: usize = 2;

const BYTES_PER_PIXEL: usize = 4;

/// Owns the named shared buffers the executor renders into.
///
/// Buffers are created lazily on the first `resize` and recreated whenever
/// the viewport pixel size changes; `acquire` hands them out round-robin.
/// With `DEFAULT_BUFFER_COUNT` buffers and at most one render in flight, a
/// buffer is never written while its previous frame is still being read.
pub struct FrameBufferPool {
    dir: PathBuf,
    buffer_count: usize,
    buffers: Vec<Arc<SharedBuffer>>,
    next: usize,
    pixel_w: u32,
    pixel_h: u32,
}

impl FrameBufferPool {
    pub fn new(buffer_count: usize) -> Self {
        Self::with_dir(shm_dir(), buffer_count)
    }

    pub fn with_dir(dir: PathBuf, buffer_count: usize) -> Self {
        Self {
            dir,
            buffer_count: buffer_count.max(1),
            buffers: Vec::new(),
            next: 0,
            pixel_w: 0,
            pixel_h: 0,
        }
    }

    /// Directory the pool creates its buffers in; attachers must use the
    /// same one.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Resize the pool to `pixel_w` x `pixel_h` frames.
    ///
    /// Idempotent for the current dimensions. Otherwise all existing
    /// buffers are closed and unlinked before the new set is created.
    /// Degenerate dimensions leave the pool untouched.
    pub fn resize(&mut self, pixel_w: u32, pixel_h: u32) -> Result<(), BufferError> {
        if pixel_w == 0 || pixel_h == 0 {
            return Ok(());
        }
        if pixel_w == self.pixel_w && pixel_h == self.pixel_h && !self.buffers.is_empty() {
            return Ok(());
        }

        self.shutdown();

        let size = pixel_w as usize * pixel_h as usize * BYTES_PER_PIXEL;
        for index in 0..self.buffer_count {
            let name = buffer_name(index, pixel_w, pixel_h);
            let buffer = SharedBuffer::create_in(&self.dir, &name, size)?;
            self.buffers.push(Arc::new(buffer));
        }

        self.pixel_w = pixel_w;
        self.pixel_h = pixel_h;
        self.next = 0;
        debug!(pixel_w, pixel_h, size, count = self.buffer_count, "frame buffer pool resized");
        Ok(())
    }

    /// Next buffer in round-robin order.
    pub fn acquire(&mut self) -> Option<(String, Arc<SharedBuffer>)> {
        if self.buffers.is_empty() {
            return None;
        }
        let buffer = self.buffers[self.next].clone();
        self.next = (self.next + 1) % self.buffers.len();
        Some((buffer.name().to_owned(), buffer))
    }

    /// Look up a live buffer by name (used by the result router).
    pub fn lookup(&self, name: &str) -> Option<Arc<SharedBuffer>> {
        self.buffers.iter().find(|buffer| buffer.name() == name).cloned()
    }

    pub fn has_buffers(&self) -> bool {
        !self.buffers.is_empty()
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        (self.pixel_w, self.pixel_h)
    }

    pub fn stride(&self) -> usize {
        self.pixel_w as usize * BYTES_PER_PIXEL
    }

    pub fn buffer_size(&self) -> usize {
        self.stride() * self.pixel_h as usize
    }

    /// Close and unlink every buffer. Mappings still referenced by
    /// in-flight frames stay readable until those frames drop.
    pub fn shutdown(&mut self) {
        for buffer in self.buffers.drain(..) {
            buffer.unlink();
        }
        self.pixel_w = 0;
        self.pixel_h = 0;
        self.next = 0;
    }
}

impl Drop for FrameBufferPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn buffer_name(index: usize, pixel_w: u32, pixel_h: u32) -> String {
    format!("pdf_viewport_full_{}_{}_{}x{}", process::id(), index, pixel_w, pixel_h)
}
