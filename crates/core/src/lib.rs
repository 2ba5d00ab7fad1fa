//! Core utilities shared by the Lumen crates.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing

mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::{init_logging, init_logging_with};
pub use timer::FrameTimer;
