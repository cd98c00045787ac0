//! Command pool and command buffer wrappers.
//!
//! - [`CommandPool`] owns a VkCommandPool for one queue family.
//! - [`CommandBuffer`] records into a primary buffer allocated from a pool.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frametech_rhi::device::Device;
//! use frametech_rhi::command::{CommandBuffer, CommandPool};
//!
//! # fn example(device: Arc<Device>) -> Result<(), frametech_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.queue_families().graphics())?;
//! let cmd = CommandBuffer::new(device, &pool)?;
//!
//! cmd.reset()?;
//! cmd.begin()?;
//! // ... record ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::device::Device;
use crate::error::CommandError;

/// Vulkan command pool wrapper.
///
/// Buffers allocated from the pool are freed with it.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a pool whose buffers can be reset individually.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::PoolCreationFailed`].
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> Result<Self, CommandError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None) }
            .map_err(CommandError::PoolCreationFailed)?;

        info!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates one primary command buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::BufferAllocationFailed`].
    pub fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer, CommandError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info) }
            .map_err(CommandError::BufferAllocationFailed)?;

        buffers
            .into_iter()
            .next()
            .ok_or(CommandError::BufferAllocationFailed(vk::Result::ERROR_UNKNOWN))
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Primary command buffer.
///
/// Does not own the VkCommandBuffer; it is freed when its [`CommandPool`]
/// is destroyed.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates a primary buffer from `pool`.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> Result<Self, CommandError> {
        let buffer = pool.allocate_command_buffer()?;
        Ok(Self { device, buffer })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins a recording that may be submitted repeatedly.
    pub fn begin(&self) -> Result<(), CommandError> {
        self.begin_with(vk::CommandBufferUsageFlags::empty())
    }

    /// Begins a recording that is submitted once.
    pub fn begin_one_shot(&self) -> Result<(), CommandError> {
        self.begin_with(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    fn begin_with(&self, flags: vk::CommandBufferUsageFlags) -> Result<(), CommandError> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)
        }
        .map_err(CommandError::RecordingFailed)
    }

    pub fn end(&self) -> Result<(), CommandError> {
        unsafe { self.device.handle().end_command_buffer(self.buffer) }
            .map_err(CommandError::RecordingFailed)
    }

    /// Returns the buffer to the initial state so it can be re-recorded.
    pub fn reset(&self) -> Result<(), CommandError> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(CommandError::RecordingFailed)
    }

    // =========================================================================
    // Render Pass
    // =========================================================================

    pub fn begin_render_pass(&self, begin_info: &vk::RenderPassBeginInfo) {
        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.buffer,
                begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            self.device.handle().cmd_end_render_pass(self.buffer);
        }
    }

    // =========================================================================
    // Binding and State
    // =========================================================================

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    pub fn bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device.handle().cmd_bind_vertex_buffers(
                self.buffer,
                first_binding,
                buffers,
                offsets,
            );
        }
    }

    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
        }
    }

    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    // =========================================================================
    // Draw and Transfer
    // =========================================================================

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }
}
