//! Frame-level services on top of `lumen-rhi`.
//!
//! This crate provides:
//! - A pipeline cache keyed by pipeline state hash
//! - Frame pacing over a ring of command lists
//! - Reverse-Z projection helpers
//! - Debounced shader hot reload

pub mod frame;
pub mod pipeline_cache;
pub mod projection;
pub mod settings;
pub mod shader_reload;

pub use frame::{FramePacer, FrameStats};
pub use pipeline_cache::PipelineCache;
pub use projection::Projection;
pub use settings::{MAX_FRAMES_IN_FLIGHT, RendererSettings};
pub use shader_reload::{Debouncer, ShaderWatcher};
