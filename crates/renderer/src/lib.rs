//! Frame orchestration on top of the RHI.
//!
//! - [`Engine`] owns the device, swapchain, pipeline and recorders
//! - [`RenderPipeline`] runs acquire, draw and present for the single frame
//!   in flight
//! - [`CommandRecorder`] records the frame and one-shot transfers
//! - [`FrameScheduler`] sequences frames, paces them and counts failures

pub mod engine;
pub mod mesh;
pub mod recorder;
pub mod render_pipeline;
pub mod scheduler;

pub use engine::{Engine, SHADER_PATHS};
pub use mesh::MeshData;
pub use recorder::{CommandRecorder, CommandRole, DrawContext, Overlay};
pub use render_pipeline::{AcquirePlan, FrameSlot, PipelineState, RenderPipeline};
pub use scheduler::{
    FPS_RECORDS, FrameScheduler, FrameSequence, FrameStats, MAX_CONSECUTIVE_FRAME_FAILURES,
};
