//! Headless driver for the paperglass render pipeline.
//!
//! Takes a PDF path, boots the viewport controller, pumps the event loop
//! until a frame arrives and writes it out as PNG. `--info` prints
//! machine-readable document metadata instead.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use paperglass_cache::{DocumentCache, DEFAULT_DOCUMENT_CAPACITY};
use paperglass_engine::{placeholder_factory, LopdfRasterizer};
use paperglass_scheduler::Frame;
use paperglass_viewer_core::{ViewerConfig, ViewerEvent, ViewportController};

#[derive(Debug, Parser)]
#[command(name = "paperglass")]
#[command(about = "Render a PDF viewport to a PNG")]
pub struct Cli {
    /// PDF to open.
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Page to display (0-based).
    #[arg(long, default_value_t = 0)]
    page: u32,

    /// Viewport width in logical pixels.
    #[arg(long, default_value_t = 1200.0)]
    width: f64,

    /// Viewport height in logical pixels.
    #[arg(long, default_value_t = 800.0)]
    height: f64,

    /// Device pixel ratio.
    #[arg(long, default_value_t = 1.0)]
    dpr: f64,

    /// Zoom relative to the fitted page, in percent.
    #[arg(long)]
    zoom: Option<f64>,

    /// Output PNG path (default: next to the PDF).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print document metadata as JSON and exit.
    #[arg(long)]
    info: bool,

    /// Give up when no frame arrives within this many milliseconds.
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    tracing_subscriber::fmt::init();

    let cli = Cli::parse_from(args);
    ensure_pdf_exists(&cli.file)?;

    if cli.info {
        run_info(&cli.file)
    } else {
        run_render(&cli)
    }
}

fn run_info(file: &Path) -> Result<()> {
    let documents = DocumentCache::new(Box::new(LopdfRasterizer::new()), DEFAULT_DOCUMENT_CAPACITY);
    let page_count = documents.page_count(file).context("failed to open PDF")?;

    let first_page_size_pt = documents
        .page_size(file, 0)
        .ok()
        .map(|size| PageSizeOutput { width: size.width_pt, height: size.height_pt });

    let payload =
        InfoOutput { path: file.display().to_string(), page_count, first_page_size_pt };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    Ok(())
}

fn run_render(cli: &Cli) -> Result<()> {
    let mut controller = ViewportController::new(ViewerConfig::default(), placeholder_factory());
    let events = controller.events();

    controller.set_viewport_size(cli.width, cli.height, cli.dpr);
    controller.set_pdf(&cli.file);
    if controller.page_width() <= 0.0 {
        bail!("failed to open {}", cli.file.display());
    }

    if cli.page != 0 {
        controller.set_page(cli.page);
        if controller.page_width() <= 0.0 {
            bail!("page {} is out of range", cli.page);
        }
    }

    if let Some(zoom) = cli.zoom {
        if zoom <= 0.0 {
            bail!("--zoom must be positive");
        }
        controller.zoom_at(zoom / 100.0, cli.width / 2.0, cli.height / 2.0);
    }

    let frame = pump_for_frame(&mut controller, &events, Duration::from_millis(cli.timeout_ms))?;

    let output =
        cli.output.clone().unwrap_or_else(|| default_frame_output(&cli.file, cli.page));
    write_png(&frame, &output)?;
    println!("{}", output.display());

    controller.shutdown();
    Ok(())
}

/// Drive the controller's event loop until a frame is published.
fn pump_for_frame(
    controller: &mut ViewportController,
    events: &crossbeam_channel::Receiver<ViewerEvent>,
    timeout: Duration,
) -> Result<Frame> {
    let deadline = Instant::now() + timeout;

    loop {
        let now = Instant::now();
        if now >= deadline {
            bail!("timed out waiting for a frame");
        }

        let wait = (deadline - now).min(Duration::from_millis(100));
        match events.recv_timeout(wait) {
            Ok(ViewerEvent::RenderTick) => controller.on_render_tick(),
            Ok(ViewerEvent::FrameReady(generation)) => {
                controller.on_frame_ready(generation);
                if let Some(frame) = controller.frame() {
                    return Ok(frame);
                }
            }
            Ok(ViewerEvent::RenderFailed(generation)) => {
                controller.on_render_failed(generation);
                bail!("render failed for generation {generation}");
            }
            Ok(ViewerEvent::Fatal(message)) => bail!("render pipeline failed: {message}"),
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("event channel closed"),
        }
    }
}

/// Convert the BGRA frame to RGBA and save it as PNG.
fn write_png(frame: &Frame, output: &Path) -> Result<()> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = width as usize * 4;

    let mut rgba = Vec::with_capacity(row_bytes * height as usize);
    for row in frame.pixels().chunks(frame.stride()).take(height as usize) {
        for bgra in row[..row_bytes].chunks_exact(4) {
            rgba.extend_from_slice(&[bgra[2], bgra[1], bgra[0], bgra[3]]);
        }
    }

    let image = image::RgbaImage::from_raw(width, height, rgba)
        .context("frame geometry mismatch while encoding")?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    image.save(output).with_context(|| format!("failed to write image to {}", output.display()))
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("file does not exist: {}", path.display());
    }
    if !path.is_file() {
        bail!("path is not a file: {}", path.display());
    }
    Ok(())
}

fn default_frame_output(file: &Path, page: u32) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("frame");
    file.with_file_name(format!("{stem}-page-{page}.png"))
}
