//! The single graphics pipeline and the per-frame acquire/draw/present steps.
//!
//! [`RenderPipeline`] owns the render pass, the pipeline and its layout, the
//! shader modules, the vertex and index buffers, and the synchronization
//! objects of the one frame in flight. Construction runs in a fixed order
//! tracked by [`PipelineState`]:
//!
//! ```text
//! Uncreated -> RenderPassReady -> LayoutReady -> PipelineReady
//!     -> Acquired -> Submitted -> Presented -> Acquired ...
//! ```
//!
//! The in-flight fence gates every CPU-side reuse: the command buffer in
//! [`acquire_image`](RenderPipeline::acquire_image) and the vertex and index
//! buffers in [`create_vertex_buffer`](RenderPipeline::create_vertex_buffer).

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, trace};

use frametech_rhi::buffer::{Buffer, BufferUsage};
use frametech_rhi::device::Device;
use frametech_rhi::framebuffer::FrameResources;
use frametech_rhi::pipeline::{
    CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout, PolygonMode,
    PrimitiveTopology,
};
use frametech_rhi::render_pass::RenderPass;
use frametech_rhi::shader::{Shader, ShaderSource};
use frametech_rhi::swapchain::Swapchain;
use frametech_rhi::sync::SyncObjects;
use frametech_rhi::vertex::Vertex;
use frametech_rhi::{FrameError, PipelineError, RhiResult};

use crate::mesh::MeshData;
use crate::recorder::{CommandRecorder, DrawContext};

/// Construction and per-frame progress of a [`RenderPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Uncreated,
    RenderPassReady,
    LayoutReady,
    PipelineReady,
    Acquired,
    Submitted,
    Presented,
}

impl PipelineState {
    pub fn name(self) -> &'static str {
        match self {
            PipelineState::Uncreated => "uncreated",
            PipelineState::RenderPassReady => "render-pass-ready",
            PipelineState::LayoutReady => "layout-ready",
            PipelineState::PipelineReady => "pipeline-ready",
            PipelineState::Acquired => "acquired",
            PipelineState::Submitted => "submitted",
            PipelineState::Presented => "presented",
        }
    }

    /// Whether `self -> next` is a legal step.
    ///
    /// A frame that failed after its acquire, or whose present failed, may
    /// acquire again without reaching `Presented`.
    pub fn can_transition(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Uncreated, RenderPassReady)
                | (RenderPassReady, LayoutReady)
                | (LayoutReady, PipelineReady)
                | (PipelineReady | Presented | Acquired | Submitted, Acquired)
                | (Acquired, Submitted)
                | (Submitted, Presented)
        )
    }

    /// Fails with [`PipelineError::InvalidPipelineState`] unless
    /// `self -> next` is legal.
    pub fn check(self, next: PipelineState) -> Result<(), PipelineError> {
        if self.can_transition(next) {
            Ok(())
        } else {
            Err(PipelineError::InvalidPipelineState {
                from: self.name(),
                to: next.name(),
            })
        }
    }

    pub fn transition(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        self.check(next)?;
        trace!("Pipeline state {} -> {}", self.name(), next.name());
        *self = next;
        Ok(())
    }

    /// Recording is only valid between an acquire and its submit.
    pub fn check_recordable(self) -> Result<(), PipelineError> {
        if self == PipelineState::Acquired {
            Ok(())
        } else {
            Err(PipelineError::InvalidPipelineState {
                from: self.name(),
                to: "recording",
            })
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the next acquire must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePlan {
    /// Hand out the image still held by a frame that failed before submit.
    Reuse(u32),
    /// Acquire a fresh image, first waiting on and resetting the fence when
    /// `wait_fence` is set.
    Acquire { wait_fence: bool },
}

/// Pipeline state plus the fence and image bookkeeping of the frame in
/// flight.
///
/// A step that fails leaves the slot untouched, so the next
/// [`plan_acquire`](Self::plan_acquire) sees exactly where the frame stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSlot {
    state: PipelineState,
    /// Fence was reset and no submit has been queued to signal it yet.
    fence_pending: bool,
    /// Image held since the last acquire, until it is presented.
    acquired_image: Option<u32>,
}

impl FrameSlot {
    #[inline]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[inline]
    pub fn is_fence_pending(&self) -> bool {
        self.fence_pending
    }

    #[inline]
    pub fn acquired_image(&self) -> Option<u32> {
        self.acquired_image
    }

    pub fn check(&self, next: PipelineState) -> Result<(), PipelineError> {
        self.state.check(next)
    }

    pub fn transition(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        self.state.transition(next)
    }

    /// Decides how the next acquire proceeds.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidPipelineState`] before the pipeline is built.
    pub fn plan_acquire(&self) -> Result<AcquirePlan, PipelineError> {
        self.state.check(PipelineState::Acquired)?;
        match (self.state, self.acquired_image) {
            (PipelineState::Acquired, Some(image_index)) => Ok(AcquirePlan::Reuse(image_index)),
            _ => Ok(AcquirePlan::Acquire {
                wait_fence: !self.fence_pending,
            }),
        }
    }

    /// The fence was reset; it stays unsignaled until a submit.
    pub fn on_fence_reset(&mut self) {
        self.fence_pending = true;
    }

    pub fn on_acquire(&mut self, image_index: u32) -> Result<(), PipelineError> {
        self.state.transition(PipelineState::Acquired)?;
        self.acquired_image = Some(image_index);
        Ok(())
    }

    pub fn on_submit(&mut self) -> Result<(), PipelineError> {
        self.state.transition(PipelineState::Submitted)?;
        self.fence_pending = false;
        Ok(())
    }

    pub fn on_present(&mut self) -> Result<(), PipelineError> {
        self.state.transition(PipelineState::Presented)?;
        self.acquired_image = None;
        Ok(())
    }

    /// Forgets everything; used on teardown.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Render pass, graphics pipeline, geometry buffers and frame sync.
///
/// Every resource is optional until its construction step has run, so
/// [`destroy`](Self::destroy) works on partially built state.
pub struct RenderPipeline {
    device: Arc<Device>,
    slot: FrameSlot,
    shaders: Vec<Shader>,
    render_pass: Option<RenderPass>,
    layout: Option<PipelineLayout>,
    vertex_buffer: Option<Buffer>,
    index_buffer: Option<Buffer>,
    index_count: u32,
    pipeline: Option<Pipeline>,
    sync: Option<SyncObjects>,
}

impl RenderPipeline {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            slot: FrameSlot::default(),
            shaders: Vec::new(),
            render_pass: None,
            layout: None,
            vertex_buffer: None,
            index_buffer: None,
            index_count: 0,
            pipeline: None,
            sync: None,
        }
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Loads each SPIR-V file and creates its shader module, replacing any
    /// previously loaded set.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::ShaderLoad`] for a missing or unreadable file
    /// - [`PipelineError::UnknownShaderStage`] if a file name has no stage
    /// - [`PipelineError::InvalidSpirv`]
    /// - [`PipelineError::ShaderModuleCreationFailed`]
    pub fn load_shaders<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<(), PipelineError> {
        let mut shaders = Vec::with_capacity(paths.len());
        for path in paths {
            let source = ShaderSource::load(path)?;
            shaders.push(Shader::new(self.device.clone(), &source)?);
        }

        info!("Loaded {} shader stage(s)", shaders.len());
        self.shaders = shaders;
        Ok(())
    }

    /// Creates the single-subpass color render pass for `format`.
    pub fn setup_render_pass(&mut self, format: vk::Format) -> Result<(), PipelineError> {
        self.slot.check(PipelineState::RenderPassReady)?;
        self.render_pass = Some(RenderPass::new(self.device.clone(), format)?);
        self.slot.transition(PipelineState::RenderPassReady)
    }

    /// Creates the empty pipeline layout and the frame's sync objects.
    ///
    /// # Errors
    ///
    /// [`PipelineError::LayoutCreationFailed`] or
    /// [`PipelineError::SyncObjectCreationFailed`].
    pub fn preconfigure(&mut self) -> Result<(), PipelineError> {
        self.slot.check(PipelineState::LayoutReady)?;
        self.layout = Some(PipelineLayout::new(self.device.clone())?);
        self.sync = Some(SyncObjects::new(self.device.clone())?);
        self.slot.transition(PipelineState::LayoutReady)
    }

    /// Builds the graphics pipeline from the loaded shaders.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::MissingShaderStages`] if no shader was loaded
    /// - [`PipelineError::MissingLayout`] before
    ///   [`preconfigure`](Self::preconfigure)
    /// - [`PipelineError::InvalidPipelineState`] out of order
    /// - [`PipelineError::PipelineCreationFailed`]
    pub fn create(&mut self) -> Result<(), PipelineError> {
        if self.shaders.is_empty() {
            return Err(PipelineError::MissingShaderStages);
        }
        let layout = self.layout.as_ref().ok_or(PipelineError::MissingLayout)?;
        self.slot.check(PipelineState::PipelineReady)?;

        let attributes = Vertex::attribute_descriptions();
        let mut builder = GraphicsPipelineBuilder::new()
            .shaders(self.shaders.iter())
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&attributes)
            .topology(PrimitiveTopology::TriangleList)
            .polygon_mode(PolygonMode::Fill)
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::Clockwise)
            .layout(layout);
        if let Some(render_pass) = self.render_pass.as_ref() {
            builder = builder.render_pass(render_pass);
        }

        self.pipeline = Some(builder.build(self.device.clone())?);
        self.slot.transition(PipelineState::PipelineReady)
    }

    /// Uploads `mesh`'s vertices into a new device-local vertex buffer.
    ///
    /// Replaces the previous buffer once the GPU is done with it.
    pub fn create_vertex_buffer(
        &mut self,
        mesh: &MeshData,
        transfer: &CommandRecorder,
    ) -> RhiResult<()> {
        self.wait_for_frame()?;
        self.vertex_buffer = None;
        self.vertex_buffer = Some(self.upload(BufferUsage::Vertex, mesh.vertex_bytes(), transfer)?);
        debug!("Vertex buffer holds {} vertices", mesh.vertices.len());
        Ok(())
    }

    /// Uploads `mesh`'s indices into a new device-local index buffer.
    pub fn create_index_buffer(
        &mut self,
        mesh: &MeshData,
        transfer: &CommandRecorder,
    ) -> RhiResult<()> {
        self.wait_for_frame()?;
        self.index_buffer = None;
        self.index_count = 0;
        self.index_buffer = Some(self.upload(BufferUsage::Index, mesh.index_bytes(), transfer)?);
        self.index_count = mesh.index_count();
        debug!("Index buffer holds {} indices", self.index_count);
        Ok(())
    }

    fn upload(
        &self,
        usage: BufferUsage,
        bytes: &[u8],
        transfer: &CommandRecorder,
    ) -> RhiResult<Buffer> {
        let staging = Buffer::staging_with_data(self.device.clone(), bytes)?;
        let buffer = Buffer::new(
            self.device.clone(),
            usage,
            staging.size(),
            &self.buffer_families(),
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size(),
        };
        transfer.submit_one_shot(self.device.transfer_queue(), |cmd| {
            cmd.copy_buffer(staging.handle(), buffer.handle(), &[region]);
        })?;

        Ok(buffer)
    }

    /// Families the geometry buffers are shared between.
    fn buffer_families(&self) -> Vec<u32> {
        let families = self.device.queue_families();
        let mut indices = vec![families.graphics(), families.transfer()];
        indices.dedup();
        indices
    }

    /// Waits for the frame in flight, unless no submit is pending on the
    /// fence.
    fn wait_for_frame(&self) -> Result<(), FrameError> {
        if let Some(sync) = self.sync.as_ref()
            && !self.slot.is_fence_pending()
        {
            sync.in_flight()
                .wait(u64::MAX)
                .map_err(FrameError::FenceWaitFailed)?;
        }
        Ok(())
    }

    // =========================================================================
    // Per-frame
    // =========================================================================

    /// Waits for the previous frame, then acquires the next swapchain image.
    ///
    /// When the previous frame failed between its acquire and its submit,
    /// the image it acquired is handed out again instead.
    ///
    /// # Errors
    ///
    /// - [`FrameError::FenceWaitFailed`] if waiting on or resetting the
    ///   fence fails
    /// - [`FrameError::AcquireFailed`]
    /// - [`FrameError::Pipeline`] before the pipeline is built
    pub fn acquire_image(&mut self, swapchain: &Swapchain) -> Result<u32, FrameError> {
        let wait_fence = match self.slot.plan_acquire()? {
            AcquirePlan::Reuse(image_index) => {
                debug!("Reusing image {} from the failed frame", image_index);
                return Ok(image_index);
            }
            AcquirePlan::Acquire { wait_fence } => wait_fence,
        };

        let sync = self.sync.as_ref().ok_or(PipelineError::MissingSyncObjects)?;

        if wait_fence {
            let fence = sync.in_flight();
            fence.wait(u64::MAX).map_err(FrameError::FenceWaitFailed)?;
            fence.reset().map_err(FrameError::FenceWaitFailed)?;
            self.slot.on_fence_reset();
        }

        let (image_index, suboptimal) = swapchain
            .acquire_next_image(sync.image_acquired())
            .map_err(FrameError::AcquireFailed)?;
        if suboptimal {
            trace!("Acquired image {} is suboptimal", image_index);
        }

        self.slot.on_acquire(image_index)?;
        Ok(image_index)
    }

    /// Borrows everything recording needs for `frame_index`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidPipelineState`] unless an image is acquired
    /// and not yet submitted; a `Missing*` error for an absent resource.
    pub fn draw_context<'a>(
        &self,
        framebuffers: &'a FrameResources,
        extent: vk::Extent2D,
        frame_index: u32,
    ) -> Result<DrawContext<'a>, PipelineError> {
        self.slot.state().check_recordable()?;

        Ok(DrawContext {
            render_pass: self
                .render_pass
                .as_ref()
                .map(RenderPass::handle)
                .ok_or(PipelineError::MissingRenderPass)?,
            framebuffers,
            extent,
            pipeline: self
                .pipeline
                .as_ref()
                .map(Pipeline::handle)
                .ok_or(PipelineError::MissingPipeline)?,
            vertex_buffer: self
                .vertex_buffer
                .as_ref()
                .map(Buffer::handle)
                .ok_or(PipelineError::MissingBuffer("vertex"))?,
            index_buffer: self
                .index_buffer
                .as_ref()
                .map(Buffer::handle)
                .ok_or(PipelineError::MissingBuffer("index"))?,
            index_count: self.index_count,
            frame_index,
        })
    }

    /// Submits `command_buffer` to the graphics queue.
    ///
    /// Waits on the image-acquired semaphore at color output, signals the
    /// render-finished semaphore and the in-flight fence.
    pub fn draw(&mut self, command_buffer: vk::CommandBuffer) -> Result<(), FrameError> {
        self.slot.check(PipelineState::Submitted)?;
        let sync = self.sync.as_ref().ok_or(PipelineError::MissingSyncObjects)?;

        let wait_semaphores = [sync.image_acquired()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished()];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.handle().queue_submit(
                self.device.graphics_queue(),
                &[submit_info],
                sync.in_flight().handle(),
            )
        }
        .map_err(FrameError::SubmitFailed)?;

        self.slot.on_submit()?;
        Ok(())
    }

    /// Queues `image_index` for presentation after rendering finishes.
    pub fn present(&mut self, swapchain: &Swapchain, image_index: u32) -> Result<(), FrameError> {
        self.slot.check(PipelineState::Presented)?;
        let sync = self.sync.as_ref().ok_or(PipelineError::MissingSyncObjects)?;

        let suboptimal = swapchain
            .present(
                self.device.present_queue(),
                image_index,
                sync.render_finished(),
            )
            .map_err(FrameError::PresentFailed)?;
        if suboptimal {
            trace!("Presented image {} is suboptimal", image_index);
        }

        self.slot.on_present()?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn state(&self) -> PipelineState {
        self.slot.state()
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    #[inline]
    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn render_pass(&self) -> Option<&RenderPass> {
        self.render_pass.as_ref()
    }

    #[inline]
    pub fn is_fence_pending(&self) -> bool {
        self.slot.is_fence_pending()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
            && self.render_pass.is_none()
            && self.layout.is_none()
            && self.vertex_buffer.is_none()
            && self.index_buffer.is_none()
            && self.pipeline.is_none()
            && self.sync.is_none()
    }

    /// Releases everything after the device goes idle. Safe to call more
    /// than once and on partially built state.
    pub fn destroy(&mut self) {
        if self.is_empty() {
            return;
        }

        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle before pipeline teardown: {}", e);
        }

        self.shaders.clear();
        self.render_pass = None;
        self.layout = None;
        self.vertex_buffer = None;
        self.index_buffer = None;
        self.index_count = 0;
        self.pipeline = None;
        self.sync = None;

        self.slot.reset();
        info!("Render pipeline destroyed");
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use PipelineState::*;

    #[test]
    fn test_construction_order() {
        let mut state = PipelineState::default();
        assert_eq!(state, Uncreated);
        state.transition(RenderPassReady).unwrap();
        state.transition(LayoutReady).unwrap();
        state.transition(PipelineReady).unwrap();
        assert_eq!(state, PipelineReady);
    }

    #[test]
    fn test_construction_steps_cannot_be_skipped() {
        assert!(Uncreated.check(LayoutReady).is_err());
        assert!(Uncreated.check(PipelineReady).is_err());
        assert!(RenderPassReady.check(PipelineReady).is_err());
        assert!(Uncreated.check(Acquired).is_err());
        assert!(LayoutReady.check(Acquired).is_err());
    }

    #[test]
    fn test_frame_cycle() {
        let mut state = PipelineReady;
        for _ in 0..3 {
            state.transition(Acquired).unwrap();
            state.check_recordable().unwrap();
            state.transition(Submitted).unwrap();
            state.transition(Presented).unwrap();
        }
        assert_eq!(state, Presented);
    }

    #[test]
    fn test_submit_requires_acquire() {
        assert!(PipelineReady.check(Submitted).is_err());
        assert!(Presented.check(Submitted).is_err());
        assert!(Submitted.check(Submitted).is_err());
        assert!(Acquired.check(Presented).is_err());
    }

    #[test]
    fn test_recording_requires_acquire() {
        for state in [Uncreated, PipelineReady, Submitted, Presented] {
            assert!(matches!(
                state.check_recordable(),
                Err(PipelineError::InvalidPipelineState { to: "recording", .. })
            ));
        }
        assert!(Acquired.check_recordable().is_ok());
    }

    #[test]
    fn test_failed_frame_can_reacquire() {
        assert!(Acquired.check(Acquired).is_ok());
        assert!(Submitted.check(Acquired).is_ok());
    }

    /// A slot whose pipeline is built and whose last frame was presented.
    fn presented_slot() -> FrameSlot {
        let mut slot = FrameSlot::default();
        slot.transition(RenderPassReady).unwrap();
        slot.transition(LayoutReady).unwrap();
        slot.transition(PipelineReady).unwrap();
        assert_eq!(slot.plan_acquire().unwrap(), AcquirePlan::Acquire { wait_fence: true });
        slot.on_fence_reset();
        slot.on_acquire(0).unwrap();
        slot.on_submit().unwrap();
        slot.on_present().unwrap();
        slot
    }

    #[test]
    fn test_acquire_before_build_is_rejected() {
        let slot = FrameSlot::default();
        assert!(matches!(
            slot.plan_acquire(),
            Err(PipelineError::InvalidPipelineState { .. })
        ));
    }

    #[test]
    fn test_full_frame_waits_on_the_fence() {
        let slot = presented_slot();
        assert_eq!(slot.state(), Presented);
        assert!(!slot.is_fence_pending());
        assert_eq!(slot.acquired_image(), None);
        assert_eq!(slot.plan_acquire().unwrap(), AcquirePlan::Acquire { wait_fence: true });
    }

    #[test]
    fn test_draw_failure_reuses_the_held_image_without_waiting() {
        let mut slot = presented_slot();
        slot.on_fence_reset();
        slot.on_acquire(2).unwrap();
        // Submit failed: nothing else recorded on the slot.

        assert_eq!(slot.plan_acquire().unwrap(), AcquirePlan::Reuse(2));
        assert!(slot.is_fence_pending());
        assert!(slot.state().check_recordable().is_ok());

        slot.on_submit().unwrap();
        slot.on_present().unwrap();
        assert_eq!(slot.plan_acquire().unwrap(), AcquirePlan::Acquire { wait_fence: true });
    }

    #[test]
    fn test_acquire_failure_after_reset_skips_the_wait() {
        let mut slot = presented_slot();
        slot.on_fence_reset();
        // Image acquisition failed.

        assert_eq!(slot.plan_acquire().unwrap(), AcquirePlan::Acquire { wait_fence: false });

        slot.on_acquire(1).unwrap();
        assert_eq!(slot.acquired_image(), Some(1));
        slot.on_submit().unwrap();
        assert!(!slot.is_fence_pending());
    }

    #[test]
    fn test_present_failure_acquires_fresh_after_waiting() {
        let mut slot = presented_slot();
        slot.on_fence_reset();
        slot.on_acquire(1).unwrap();
        slot.on_submit().unwrap();
        // Present failed.

        assert_eq!(slot.state(), Submitted);
        assert_eq!(slot.plan_acquire().unwrap(), AcquirePlan::Acquire { wait_fence: true });
        slot.on_fence_reset();
        slot.on_acquire(2).unwrap();
        assert_eq!(slot.acquired_image(), Some(2));
    }

    #[test]
    fn test_reset_forgets_the_frame() {
        let mut slot = presented_slot();
        slot.on_fence_reset();
        slot.on_acquire(1).unwrap();
        slot.reset();
        assert_eq!(slot, FrameSlot::default());
        assert_eq!(slot.state(), Uncreated);
    }

    #[test]
    fn test_invalid_transition_error_names_states() {
        let err = Presented.check(Submitted).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid pipeline state: presented cannot move to submitted"
        );
    }
}
