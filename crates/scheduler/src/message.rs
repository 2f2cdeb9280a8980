//! Messages exchanged between the controller, executor and router.

use std::path::PathBuf;
use std::time::Instant;

/// A render intent, immutable once enqueued.
///
/// `request_id` is the controller's generation for this request; the whole
/// staleness discipline keys off it.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub request_id: u64,
    pub pdf_path: PathBuf,
    pub page_number: u32,
    pub center_x: f64,
    pub center_y: f64,
    pub render_scale: f64,
    pub pixel_w: u32,
    pub pixel_h: u32,
    pub buffer_name: String,
    pub buffer_size: usize,
    pub stride: usize,
    pub dpr: f64,
    pub created_at: Instant,
}

/// Outcome of one render request.
///
/// `buffer_name` is `None` exactly when the render failed; a failed result
/// carries no pixels and must not be used to touch any buffer.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub request_id: u64,
    pub buffer_name: Option<String>,
    pub pixel_w: u32,
    pub pixel_h: u32,
    pub stride: usize,
    pub dpr: f64,
    pub created_at: Instant,
    pub render_ms: Option<f64>,
    pub total_ms: Option<f64>,
}

impl RenderResult {
    pub fn success(request: &RenderRequest, render_ms: f64, total_ms: f64) -> Self {
        Self {
            request_id: request.request_id,
            buffer_name: Some(request.buffer_name.clone()),
            pixel_w: request.pixel_w,
            pixel_h: request.pixel_h,
            stride: request.stride,
            dpr: request.dpr,
            created_at: request.created_at,
            render_ms: Some(render_ms),
            total_ms: Some(total_ms),
        }
    }

    pub fn failure(request: &RenderRequest) -> Self {
        Self {
            request_id: request.request_id,
            buffer_name: None,
            pixel_w: request.pixel_w,
            pixel_h: request.pixel_h,
            stride: request.stride,
            dpr: request.dpr,
            created_at: request.created_at,
            render_ms: None,
            total_ms: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.buffer_name.is_none()
    }
}

/// Inbound executor queue message.
#[derive(Debug)]
pub enum ExecutorMessage {
    Render(RenderRequest),
    Shutdown,
}

/// Outbound result queue message.
#[derive(Debug)]
pub enum ResultMessage {
    Rendered(RenderResult),
    Shutdown,
}

/// The far side of a queue is gone (executor died or was shut down).
#[derive(Debug, thiserror::Error)]
#[error("render queue closed")]
pub struct QueueClosed;
