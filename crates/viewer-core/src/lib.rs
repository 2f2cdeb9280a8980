//! Viewport state and render orchestration for paperglass.
//!
//! [`ViewportController`] is the single entry point the embedding UI talks
//! to: it owns the viewport state and coordinate math, debounces render
//! requests, enforces the single-in-flight discipline, assigns generations,
//! and wires the executor/router pipeline from `paperglass-scheduler`
//! together. Everything it wants the UI to know arrives as a
//! [`ViewerEvent`] on a channel the embedding event loop drains.

pub mod config;
pub mod controller;
pub mod events;
pub mod viewport;

pub use config::ViewerConfig;
pub use controller::ViewportController;
pub use events::ViewerEvent;
pub use viewport::Viewport;
