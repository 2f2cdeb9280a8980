//! Rasterizer capability for the paperglass viewport pipeline.
//!
//! The pipeline treats page rasterization as an opaque, handle-based
//! capability: open a document, ask for page geometry, render a page into a
//! caller-supplied BGRA buffer under an affine transform. Instances are
//! single-threaded and non-reentrant; whoever owns one is responsible for
//! serializing calls to it (see `DocumentCache` in `paperglass-cache`).

mod placeholder;
mod types;

#[cfg(feature = "pdfium")]
pub mod pdfium_backend;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod test_fixtures;

pub use placeholder::LopdfRasterizer;
pub use types::{
    ClipRect, DocumentHandle, PageSize, PageTransform, PixelFormat, RenderTarget, TilePixels,
};

use std::path::Path;

/// Errors produced by rasterizer backends.
#[derive(Debug, thiserror::Error)]
pub enum RasterizeError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("failed to decode document: {0}")]
    Decode(String),
    #[error("invalid document handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("rasterize failure: {0}")]
    Rasterize(String),
}

/// Result type for rasterizer operations.
pub type RasterizeResult<T> = Result<T, RasterizeError>;

/// A page rasterization backend.
///
/// One instance is one serialization domain: calls must never overlap, and
/// an instance must only be driven from one context at a time. Instances are
/// `Send` so they can be moved onto a dedicated executor thread.
///
/// `render_into` fills the destination with opaque white before drawing, so
/// a failed render never leaves stale pixels from a previous frame visible.
pub trait Rasterizer: Send {
    /// Open the document at `path` and return a handle to it.
    ///
    /// On failure nothing is retained; the handle space is unaffected.
    fn open(&mut self, path: &Path) -> RasterizeResult<DocumentHandle>;

    /// Number of pages in the document.
    fn page_count(&self, doc: DocumentHandle) -> RasterizeResult<u32>;

    /// Size of `page` (0-based) in page units.
    fn page_size(&self, doc: DocumentHandle, page: u32) -> RasterizeResult<PageSize>;

    /// Render `page` into `target` under `transform`, limited to `clip`
    /// (device pixels). The target is white-filled first.
    fn render_into(
        &self,
        doc: DocumentHandle,
        page: u32,
        transform: PageTransform,
        clip: ClipRect,
        target: &mut RenderTarget<'_>,
    ) -> RasterizeResult<()>;

    /// Render the page-space rectangle `clip` of `page` at `scale` into an
    /// owned pixel buffer. Used by the tiled pipeline.
    fn render_clip(
        &self,
        doc: DocumentHandle,
        page: u32,
        scale: f32,
        clip: ClipRect,
    ) -> RasterizeResult<TilePixels>;

    /// Close the document behind `handle`, releasing its resources.
    fn close(&mut self, doc: DocumentHandle) -> RasterizeResult<()>;
}

/// Factory for rasterizer instances.
///
/// The pipeline spawns one instance per execution context (viewport
/// executor, tile worker, UI-side metadata cache) and respawns the executor
/// after a queue disconnect, so construction has to be repeatable.
pub type RasterizerFactory = std::sync::Arc<dyn Fn() -> Box<dyn Rasterizer> + Send + Sync>;

/// Factory for the default placeholder backend.
pub fn placeholder_factory() -> RasterizerFactory {
    std::sync::Arc::new(|| Box::new(LopdfRasterizer::new()) as Box<dyn Rasterizer>)
}
