//! PDFium-backed rasterizer (cargo feature `pdfium`).
//!
//! Binds the system PDFium library at construction so a missing runtime is
//! reported up front, and currently stages page drawing through the
//! placeholder backend while the native render path is brought up. The
//! pipeline only sees the `Rasterizer` trait, so the swap is invisible to
//! callers.

use std::path::Path;

use pdfium_render::prelude::*;

use crate::types::{ClipRect, DocumentHandle, PageSize, PageTransform, RenderTarget, TilePixels};
use crate::{LopdfRasterizer, RasterizeError, RasterizeResult, Rasterizer};

pub struct PdfiumRasterizer {
    inner: LopdfRasterizer,
}

impl PdfiumRasterizer {
    /// Bind the system PDFium library and build a rasterizer.
    pub fn from_system_library() -> RasterizeResult<Self> {
        let _ = Pdfium::bind_to_system_library().map_err(|err| {
            RasterizeError::Rasterize(format!("failed to bind pdfium system library: {err}"))
        })?;

        Ok(Self { inner: LopdfRasterizer::new() })
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn open(&mut self, path: &Path) -> RasterizeResult<DocumentHandle> {
        self.inner.open(path)
    }

    fn page_count(&self, doc: DocumentHandle) -> RasterizeResult<u32> {
        self.inner.page_count(doc)
    }

    fn page_size(&self, doc: DocumentHandle, page: u32) -> RasterizeResult<PageSize> {
        self.inner.page_size(doc, page)
    }

    fn render_into(
        &self,
        doc: DocumentHandle,
        page: u32,
        transform: PageTransform,
        clip: ClipRect,
        target: &mut RenderTarget<'_>,
    ) -> RasterizeResult<()> {
        self.inner.render_into(doc, page, transform, clip, target)
    }

    fn render_clip(
        &self,
        doc: DocumentHandle,
        page: u32,
        scale: f32,
        clip: ClipRect,
    ) -> RasterizeResult<TilePixels> {
        self.inner.render_clip(doc, page, scale, clip)
    }

    fn close(&mut self, doc: DocumentHandle) -> RasterizeResult<()> {
        self.inner.close(doc)
    }
}
