//! Placeholder rasterizer backend.
//!
//! Parses real page geometry with `lopdf` and renders pages as white
//! rectangles with a gray page border, mapped through the requested
//! transform. This keeps the whole pipeline exercisable (and testable)
//! without a native PDF runtime; the `pdfium` feature swaps in a real
//! rasterizer behind the same trait.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use lopdf::Document;
use tracing::debug;

use crate::types::{
    ClipRect, DocumentHandle, PageSize, PageTransform, PixelFormat, RenderTarget, TilePixels,
};
use crate::{RasterizeError, RasterizeResult, Rasterizer};

/// Page border color, BGRA.
const BORDER_BGRA: [u8; 4] = [220, 220, 220, 255];

/// Page size assumed when a page carries no usable `MediaBox` (US Letter).
const DEFAULT_PAGE_SIZE: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

#[derive(Debug)]
struct DocumentRecord {
    path: PathBuf,
    page_sizes: Vec<PageSize>,
}

/// Rasterizer backed by `lopdf` page geometry and placeholder drawing.
#[derive(Debug, Default)]
pub struct LopdfRasterizer {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_sizes(bytes: &[u8]) -> RasterizeResult<Vec<PageSize>> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(RasterizeError::Decode("encrypted documents are not supported".into()));
        }

        let doc = Document::load_mem(bytes)
            .map_err(|err| RasterizeError::Decode(err.to_string()))?;
        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            let size = doc
                .get_dictionary(object_id)
                .ok()
                .and_then(|dict| dict.get(b"MediaBox").ok())
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    if array.len() != 4 {
                        return None;
                    }
                    let x0 = array[0].as_float().ok()?;
                    let y0 = array[1].as_float().ok()?;
                    let x1 = array[2].as_float().ok()?;
                    let y1 = array[3].as_float().ok()?;
                    Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
                })
                .unwrap_or(DEFAULT_PAGE_SIZE);

            sizes.push(size);
        }

        if sizes.is_empty() {
            return Err(RasterizeError::Decode("document has no pages".into()));
        }

        Ok(sizes)
    }

    fn record(&self, handle: DocumentHandle) -> RasterizeResult<&DocumentRecord> {
        self.docs.get(&handle).ok_or(RasterizeError::InvalidHandle(handle.raw()))
    }

    fn page_size_of(&self, handle: DocumentHandle, page: u32) -> RasterizeResult<PageSize> {
        let record = self.record(handle)?;
        record.page_sizes.get(page as usize).copied().ok_or(RasterizeError::PageOutOfRange {
            page,
            page_count: record.page_sizes.len() as u32,
        })
    }
}

impl Rasterizer for LopdfRasterizer {
    fn open(&mut self, path: &Path) -> RasterizeResult<DocumentHandle> {
        if !path.is_file() {
            return Err(RasterizeError::InvalidPath(path.display().to_string()));
        }

        let bytes = fs::read(path).map_err(|err| RasterizeError::Decode(err.to_string()))?;
        let page_sizes = Self::parse_sizes(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle::new(self.next_handle);
        debug!(path = %path.display(), pages = page_sizes.len(), handle = handle.raw(), "opened document");
        self.docs.insert(handle, DocumentRecord { path: path.to_path_buf(), page_sizes });

        Ok(handle)
    }

    fn page_count(&self, doc: DocumentHandle) -> RasterizeResult<u32> {
        Ok(self.record(doc)?.page_sizes.len() as u32)
    }

    fn page_size(&self, doc: DocumentHandle, page: u32) -> RasterizeResult<PageSize> {
        self.page_size_of(doc, page)
    }

    fn render_into(
        &self,
        doc: DocumentHandle,
        page: u32,
        transform: PageTransform,
        clip: ClipRect,
        target: &mut RenderTarget<'_>,
    ) -> RasterizeResult<()> {
        let size = self.page_size_of(doc, page)?;

        if target.format != PixelFormat::Bgra || !target.geometry_is_valid() {
            return Err(RasterizeError::Rasterize(format!(
                "destination geometry invalid: {}x{} stride={} len={}",
                target.width,
                target.height,
                target.stride,
                target.pixels.len()
            )));
        }

        target.fill_white();

        let (px0, py0) = transform.apply(0.0, 0.0);
        let (px1, py1) = transform.apply(size.width_pt, size.height_pt);
        draw_page_border(target, ClipRect::new(px0, py0, px1, py1), clip);

        Ok(())
    }

    fn render_clip(
        &self,
        doc: DocumentHandle,
        page: u32,
        scale: f32,
        clip: ClipRect,
    ) -> RasterizeResult<TilePixels> {
        let size = self.page_size_of(doc, page)?;

        if scale <= 0.0 || clip.is_degenerate() {
            return Err(RasterizeError::Rasterize(format!(
                "degenerate tile request: scale={scale} clip={clip:?}"
            )));
        }

        let width = (clip.width() * scale).round().max(1.0) as u32;
        let height = (clip.height() * scale).round().max(1.0) as u32;
        let mut pixels = vec![0u8; width as usize * height as usize * PixelFormat::BYTES_PER_PIXEL];

        let mut target = RenderTarget::packed(&mut pixels, width, height);
        target.fill_white();

        // Page rect mapped into tile-local pixels.
        let page_px = ClipRect::new(
            (0.0 - clip.x0) * scale,
            (0.0 - clip.y0) * scale,
            (size.width_pt - clip.x0) * scale,
            (size.height_pt - clip.y0) * scale,
        );
        draw_page_border(&mut target, page_px, ClipRect::of_size(width, height));

        Ok(TilePixels { pixels, width, height })
    }

    fn close(&mut self, doc: DocumentHandle) -> RasterizeResult<()> {
        match self.docs.remove(&doc) {
            Some(record) => {
                debug!(path = %record.path.display(), handle = doc.raw(), "closed document");
                Ok(())
            }
            None => Err(RasterizeError::InvalidHandle(doc.raw())),
        }
    }
}

/// Draw a 1px border along `page_px`, limited to `clip` and the target.
fn draw_page_border(target: &mut RenderTarget<'_>, page_px: ClipRect, clip: ClipRect) {
    let clip = clip.intersect(&ClipRect::of_size(target.width, target.height));
    if clip.is_degenerate() || page_px.is_degenerate() {
        return;
    }

    let x0 = page_px.x0.round() as i64;
    let x1 = page_px.x1.round() as i64 - 1;
    let y0 = page_px.y0.round() as i64;
    let y1 = page_px.y1.round() as i64 - 1;

    let cx0 = clip.x0.floor() as i64;
    let cx1 = clip.x1.ceil() as i64 - 1;
    let cy0 = clip.y0.floor() as i64;
    let cy1 = clip.y1.ceil() as i64 - 1;

    for x in x0.max(cx0)..=x1.min(cx1) {
        if (cy0..=cy1).contains(&y0) {
            target.put_pixel(x, y0, BORDER_BGRA);
        }
        if (cy0..=cy1).contains(&y1) {
            target.put_pixel(x, y1, BORDER_BGRA);
        }
    }
    for y in y0.max(cy0)..=y1.min(cy1) {
        if (cx0..=cx1).contains(&x0) {
            target.put_pixel(x0, y, BORDER_BGRA);
        }
        if (cx0..=cx1).contains(&x1) {
            target.put_pixel(x1, y, BORDER_BGRA);
        }
    }
}
