//! Command recording for the graphics and transfer roles.
//!
//! Each [`CommandRecorder`] owns one resettable pool and one primary buffer.
//! The graphics recorder re-records the same buffer every frame; the
//! transfer recorder runs one-shot copies and waits for them.

use std::fmt;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, trace};

use frametech_rhi::CommandError;
use frametech_rhi::command::{CommandBuffer, CommandPool};
use frametech_rhi::device::Device;
use frametech_rhi::framebuffer::FrameResources;

/// Opaque black.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Queue role a recorder submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandRole {
    Graphics,
    Transfer,
}

impl CommandRole {
    pub fn name(self) -> &'static str {
        match self {
            CommandRole::Graphics => "graphics",
            CommandRole::Transfer => "transfer",
        }
    }
}

impl fmt::Display for CommandRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hook recorded after the main draw, inside the render pass.
///
/// A debug UI renderer implements this to draw on top of the frame.
pub trait Overlay {
    fn record(
        &mut self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
    );
}

/// Everything one frame's draw needs, borrowed from the engine.
pub struct DrawContext<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffers: &'a FrameResources,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub frame_index: u32,
}

/// One command pool and its single primary buffer.
pub struct CommandRecorder {
    device: Arc<Device>,
    role: CommandRole,
    // Declared before the pool: the buffer is freed with it.
    buffer: Option<CommandBuffer>,
    pool: Option<CommandPool>,
}

impl CommandRecorder {
    pub fn new(device: Arc<Device>, role: CommandRole) -> Self {
        Self {
            device,
            role,
            buffer: None,
            pool: None,
        }
    }

    #[inline]
    pub fn role(&self) -> CommandRole {
        self.role
    }

    /// Creates the pool on `queue_family_index`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::PoolCreationFailed`].
    pub fn create_pool(&mut self, queue_family_index: u32) -> Result<(), CommandError> {
        self.destroy();
        self.pool = Some(CommandPool::new(self.device.clone(), queue_family_index)?);
        debug!("{} command pool ready", self.role);
        Ok(())
    }

    /// Allocates the primary buffer from the pool.
    ///
    /// # Errors
    ///
    /// - [`CommandError::NoPool`] if [`create_pool`](Self::create_pool) has
    ///   not run
    /// - [`CommandError::BufferAllocationFailed`]
    pub fn create_buffer(&mut self) -> Result<(), CommandError> {
        let pool = self.pool.as_ref().ok_or(CommandError::NoPool)?;
        self.buffer = Some(CommandBuffer::new(self.device.clone(), pool)?);
        debug!("{} command buffer allocated", self.role);
        Ok(())
    }

    /// The allocated buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::NoBuffer`] before
    /// [`create_buffer`](Self::create_buffer).
    pub fn buffer(&self) -> Result<&CommandBuffer, CommandError> {
        self.buffer.as_ref().ok_or(CommandError::NoBuffer)
    }

    /// Records the frame's render pass into the buffer.
    ///
    /// The buffer must not be in use by the GPU; callers wait on the
    /// in-flight fence first.
    ///
    /// # Errors
    ///
    /// - [`CommandError::NoBuffer`]
    /// - [`CommandError::FrameIndexOutOfRange`] if `ctx.frame_index` has no
    ///   framebuffer
    /// - [`CommandError::RecordingFailed`] on a native reset, begin or end
    ///   failure
    pub fn record(
        &mut self,
        ctx: &DrawContext<'_>,
        overlay: Option<&mut dyn Overlay>,
    ) -> Result<(), CommandError> {
        let cmd = self.buffer()?;

        cmd.reset()?;
        cmd.begin()?;

        let framebuffer = framebuffer_at(ctx.framebuffers, ctx.frame_index)?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        }];
        let (viewport, scissor) = full_viewport(ctx.extent);
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(ctx.render_pass)
            .framebuffer(framebuffer)
            .render_area(scissor)
            .clear_values(&clear_values);

        cmd.begin_render_pass(&begin_info);
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, ctx.pipeline);
        cmd.set_viewport(&viewport);
        cmd.set_scissor(&scissor);
        cmd.bind_vertex_buffers(0, &[ctx.vertex_buffer], &[0]);
        cmd.bind_index_buffer(ctx.index_buffer, 0, vk::IndexType::UINT32);
        cmd.draw_indexed(ctx.index_count, 1, 0, 0, 0);

        if let Some(overlay) = overlay {
            overlay.record(self.device.handle(), cmd.handle(), ctx.render_pass);
        }

        cmd.end_render_pass();
        cmd.end()?;

        trace!(
            "Recorded frame {} ({} indices)",
            ctx.frame_index, ctx.index_count
        );
        Ok(())
    }

    /// Records `f` as a one-time submission on `queue` and waits for the
    /// queue to drain.
    ///
    /// # Errors
    ///
    /// - [`CommandError::NoBuffer`]
    /// - [`CommandError::RecordingFailed`]
    /// - [`CommandError::SubmitFailed`] if the submit or the wait fails
    pub fn submit_one_shot(
        &self,
        queue: vk::Queue,
        f: impl FnOnce(&CommandBuffer),
    ) -> Result<(), CommandError> {
        let cmd = self.buffer()?;

        cmd.reset()?;
        cmd.begin_one_shot()?;
        f(cmd);
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe {
            let device = self.device.handle();
            device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(CommandError::SubmitFailed)?;
            device
                .queue_wait_idle(queue)
                .map_err(CommandError::SubmitFailed)?;
        }

        debug!("{} one-shot submission complete", self.role);
        Ok(())
    }

    /// Frees the buffer and the pool. Safe to call more than once.
    pub fn destroy(&mut self) {
        self.buffer = None;
        if self.pool.take().is_some() {
            info!("{} command recorder destroyed", self.role);
        }
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn framebuffer_at(frames: &FrameResources, frame_index: u32) -> Result<vk::Framebuffer, CommandError> {
    check_frame_index(frame_index, frames.framebuffer_count())?;
    frames
        .framebuffer(frame_index as usize)
        .ok_or(CommandError::FrameIndexOutOfRange {
            index: frame_index,
            count: frames.framebuffer_count(),
        })
}

/// Rejects a frame index with no framebuffer behind it.
pub fn check_frame_index(index: u32, count: usize) -> Result<(), CommandError> {
    if (index as usize) < count {
        Ok(())
    } else {
        Err(CommandError::FrameIndexOutOfRange { index, count })
    }
}

/// Viewport and scissor covering the whole `extent` with depth 0..1.
pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_frame_index() {
        assert!(check_frame_index(0, 3).is_ok());
        assert!(check_frame_index(2, 3).is_ok());
        assert!(matches!(
            check_frame_index(3, 3),
            Err(CommandError::FrameIndexOutOfRange { index: 3, count: 3 })
        ));
        assert!(check_frame_index(0, 0).is_err());
    }

    #[test]
    fn test_full_viewport() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let (viewport, scissor) = full_viewport(extent);
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (1280.0, 720.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(scissor.extent, extent);
    }

    #[test]
    fn test_clear_color_is_opaque_black() {
        assert_eq!(CLEAR_COLOR, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_role_names() {
        assert_eq!(CommandRole::Graphics.to_string(), "graphics");
        assert_eq!(CommandRole::Transfer.to_string(), "transfer");
    }
}
