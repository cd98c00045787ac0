//! Error types for the RHI layer.
//!
//! Errors are grouped by the stage that raises them. [`RhiError`] wraps every
//! group so construction code can use a single `?` chain.

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

use crate::physical_device::QueueRole;

/// Coarse reason behind a failed native create call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationFailure {
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("extension not present")]
    ExtensionMissing,
    #[error("feature not present")]
    FeatureMissing,
    #[error("device lost")]
    DeviceLost,
    #[error("initialization failed")]
    InitializationFailed,
    #[error("surface lost")]
    SurfaceLost,
    #[error("native window in use")]
    NativeWindowInUse,
    #[error("undocumented error ({0})")]
    Other(vk::Result),
}

impl From<vk::Result> for CreationFailure {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfDeviceMemory,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT => Self::ExtensionMissing,
            vk::Result::ERROR_FEATURE_NOT_PRESENT => Self::FeatureMissing,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_INITIALIZATION_FAILED => Self::InitializationFailed,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => Self::NativeWindowInUse,
            other => Self::Other(other),
        }
    }
}

/// Physical and logical device setup errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no Vulkan physical device found")]
    NoDeviceFound,
    #[error("no suitable physical device among {candidates} candidate(s)")]
    NoSuitableDevice { candidates: usize },
    #[error("no unused queue family supports the {0} role")]
    NoQueueSupport(QueueRole),
    #[error("logical device creation failed: {0}")]
    DeviceCreationFailed(CreationFailure),
    #[error("failed to enumerate devices: {0}")]
    Enumeration(vk::Result),
}

/// Swapchain query, validation and creation errors.
#[derive(Error, Debug)]
pub enum SwapchainError {
    #[error(
        "surface supports {min}..={max} images with {formats} format(s) and {present_modes} present mode(s), {requested} requested"
    )]
    UnsupportedSwapchain {
        min: u32,
        max: u32,
        requested: u32,
        formats: usize,
        present_modes: usize,
    },
    #[error("surface reports no format")]
    NoSurfaceFormat,
    #[error("present mode {0:?} is not supported by the surface")]
    UnsupportedPresentMode(vk::PresentModeKHR),
    #[error("failed to query surface details: {0}")]
    QueryFailed(vk::Result),
    #[error("swapchain creation failed: {0}")]
    SwapchainCreationFailed(CreationFailure),
}

/// Image view, framebuffer and buffer errors.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("image view {index} creation failed: {reason}")]
    ImageViewCreationFailed { index: usize, reason: CreationFailure },
    #[error("framebuffer {index} creation failed: {result}")]
    FramebufferCreationFailed { index: usize, result: vk::Result },
    #[error("buffer creation failed: {0}")]
    BufferCreationFailed(vk::Result),
    #[error("buffer size must be greater than 0")]
    EmptyBuffer,
    #[error("write of {len} bytes at offset {offset} exceeds buffer of {size} bytes")]
    WriteOutOfBounds {
        offset: vk::DeviceSize,
        len: usize,
        size: vk::DeviceSize,
    },
    #[error("buffer memory is not host visible")]
    NotMapped,
    #[error("allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
    #[error("allocator lock poisoned")]
    AllocatorPoisoned,
}

/// Render pass, layout, sync object and pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("render pass creation failed: {0}")]
    RenderPassCreationFailed(vk::Result),
    #[error("pipeline layout creation failed: {0}")]
    LayoutCreationFailed(vk::Result),
    #[error("sync object creation failed: {0}")]
    SyncObjectCreationFailed(vk::Result),
    #[error("graphics pipeline creation failed: {0}")]
    PipelineCreationFailed(vk::Result),
    #[error("no shader stages to build the pipeline from")]
    MissingShaderStages,
    #[error("no pipeline layout to build the pipeline from")]
    MissingLayout,
    #[error("no render pass to build the pipeline from")]
    MissingRenderPass,
    #[error("no graphics pipeline to draw with")]
    MissingPipeline,
    #[error("synchronization objects not created")]
    MissingSyncObjects,
    #[error("no {0} buffer to draw from")]
    MissingBuffer(&'static str),
    #[error("invalid pipeline state: {from} cannot move to {to}")]
    InvalidPipelineState {
        from: &'static str,
        to: &'static str,
    },
    #[error("failed to read shader '{}': {source}", path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown shader stage for '{0}'")]
    UnknownShaderStage(String),
    #[error("invalid SPIR-V: {0}")]
    InvalidSpirv(String),
    #[error("shader module creation failed: {0}")]
    ShaderModuleCreationFailed(CreationFailure),
}

/// Command pool, buffer and recording errors.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command pool creation failed: {0}")]
    PoolCreationFailed(vk::Result),
    #[error("command buffer requested before its pool was created")]
    NoPool,
    #[error("command buffer used before it was allocated")]
    NoBuffer,
    #[error("command buffer allocation failed: {0}")]
    BufferAllocationFailed(vk::Result),
    #[error("frame index {index} out of range ({count} framebuffer(s))")]
    FrameIndexOutOfRange { index: u32, count: usize },
    #[error("command recording failed: {0}")]
    RecordingFailed(vk::Result),
    #[error("one-shot submission failed: {0}")]
    SubmitFailed(vk::Result),
}

/// Per-frame runtime errors.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("fence wait failed: {0}")]
    FenceWaitFailed(vk::Result),
    #[error("image acquisition failed: {0}")]
    AcquireFailed(vk::Result),
    #[error("queue submission failed: {0}")]
    SubmitFailed(vk::Result),
    #[error("presentation failed: {0}")]
    PresentFailed(vk::Result),
    #[error("recording failed: {0}")]
    Record(#[from] CommandError),
    #[error("pipeline not ready: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("{count} consecutive frames failed, last: {last}")]
    TooManyFailures { count: u32, last: String },
}

impl FrameError {
    /// Native result carried by this error, if any.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            FrameError::FenceWaitFailed(r)
            | FrameError::AcquireFailed(r)
            | FrameError::SubmitFailed(r)
            | FrameError::PresentFailed(r) => Some(*r),
            FrameError::Record(CommandError::RecordingFailed(r)) => Some(*r),
            _ => None,
        }
    }

    /// Errors after which no further frame can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::TooManyFailures { .. })
            || matches!(
                self.vk_result(),
                Some(vk::Result::ERROR_DEVICE_LOST | vk::Result::ERROR_SURFACE_LOST_KHR)
            )
    }
}

/// Umbrella error for the RHI crate.
#[derive(Error, Debug)]
pub enum RhiError {
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    #[error("Failed to load Vulkan library: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("Surface error: {0}")]
    SurfaceError(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Swapchain(#[from] SwapchainError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
