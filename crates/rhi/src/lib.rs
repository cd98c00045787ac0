//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Safe wrappers over `ash` for the pieces a single-pass forward renderer
//! needs:
//! - Instance, physical device selection and logical device creation
//! - Swapchain creation and per-image frame resources
//! - Render pass, pipeline layout and graphics pipeline
//! - Command pools and buffers
//! - Device-local buffers uploaded through staging memory
//! - Synchronization primitives

pub mod error;

pub mod buffer;
pub mod command;
pub mod device;
pub mod framebuffer;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{
    CommandError, CreationFailure, DeviceError, FrameError, PipelineError, ResourceError,
    RhiError, RhiResult, SwapchainError,
};

// Re-export ash types that users might need
pub use ash::vk;
