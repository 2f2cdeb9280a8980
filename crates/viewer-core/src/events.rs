//! Events the controller emits toward the embedding event loop.

use paperglass_scheduler::TileReady;

/// Out-of-band notifications from the render pipeline.
///
/// The embedding loop is expected to route `RenderTick` back into
/// [`ViewportController::on_render_tick`] and `FrameReady`/`RenderFailed`
/// into [`ViewportController::on_frame_ready`] /
/// [`ViewportController::on_render_failed`]; the rest is informational.
///
/// [`ViewportController::on_render_tick`]: crate::ViewportController::on_render_tick
/// [`ViewportController::on_frame_ready`]: crate::ViewportController::on_frame_ready
/// [`ViewportController::on_render_failed`]: crate::ViewportController::on_render_failed
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    /// Document, page or page geometry changed (also fired for degraded
    /// zero-size states after a failed open).
    PageChanged,
    /// The debounce timer elapsed; the controller should dispatch now.
    RenderTick,
    /// A new frame for this generation is in the frame cache.
    FrameReady(u64),
    /// The render for this generation failed; the previous frame stands.
    RenderFailed(u64),
    /// A tile became available (tiled pipeline only).
    TileReady(TileReady),
    /// The pipeline is beyond recovery (executor died twice).
    Fatal(String),
}
