//! Render scheduling and frame exchange for the paperglass pipeline.
//!
//! Two render strategies share this crate:
//!
//! - the **viewport pipeline**: a [`RenderExecutor`] thread owns the
//!   rasterizer and writes whole-viewport frames into named shared-memory
//!   buffers handed out by a [`FrameBufferPool`]; a [`ResultRouter`] thread
//!   drops stale results and publishes fresh frames zero-copy;
//! - the **tiled pipeline** ([`tiles`]): a worker renders 256px tiles by
//!   priority into a byte-bounded cache, keyed by a stable fingerprint.
//!
//! Both are driven by the generation discipline owned by the viewport
//! controller in `paperglass-viewer-core`.

pub mod debounce;
pub mod executor;
pub mod message;
pub mod pool;
pub mod router;
pub mod shm;
pub mod tiles;

pub use debounce::DebounceTimer;
pub use executor::RenderExecutor;
pub use message::{ExecutorMessage, QueueClosed, RenderRequest, RenderResult, ResultMessage};
pub use pool::{FrameBufferPool, DEFAULT_BUFFER_COUNT};
pub use router::{Frame, ResultRouter, RouterHooks};
pub use shm::{BufferError, SharedBuffer};
pub use tiles::{
    bucket_zoom, plan_tiles, tile_fingerprint, TilePipeline, TilePlan, TileQueue, TileReady,
    TileReadyFn, TileRenderRequest, TileViewport, BUCKET_RATIO, TILE_SIZE,
};
