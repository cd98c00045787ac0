//! Error types shared outside the Vulkan layer.

use thiserror::Error;

/// Main error type for the non-GPU parts of the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors raised outside the RHI (surface creation)
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
