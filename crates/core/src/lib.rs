//! Core utilities shared by the FrameTech crates.
//!
//! This crate provides foundational types and utilities:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing and deadline pacing
//! - Static application configuration

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::{AppConfig, BUFFER_COUNT, FpsLimit, Version};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
