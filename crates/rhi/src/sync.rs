//! Synchronization primitives.
//!
//! - [`Semaphore`] orders work between queue operations.
//! - [`Fence`] lets the host wait on submitted work.
//! - [`SyncObjects`] groups the three objects a single in-flight frame needs.
//!
//! # Usage Pattern
//!
//! ```text
//! 1. Wait for the in-flight fence, then reset it
//! 2. Acquire a swapchain image (signals image_acquired)
//! 3. Submit: wait on image_acquired, signal render_finished and the fence
//! 4. Present: wait on render_finished
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::PipelineError;

/// Vulkan semaphore wrapper.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SyncObjectCreationFailed`].
    pub fn new(device: Arc<Device>) -> Result<Self, PipelineError> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None) }
            .map_err(PipelineError::SyncObjectCreationFailed)?;

        debug!("Created semaphore");
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled so the first wait
    /// returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SyncObjectCreationFailed`].
    pub fn new(device: Arc<Device>, signaled: bool) -> Result<Self, PipelineError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None) }
            .map_err(PipelineError::SyncObjectCreationFailed)?;

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds pass.
    pub fn wait(&self, timeout: u64) -> Result<(), vk::Result> {
        let fences = [self.fence];
        unsafe { self.device.handle().wait_for_fences(&fences, true, timeout) }
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not be referenced by a pending submission.
    pub fn reset(&self) -> Result<(), vk::Result> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences) }
    }

    /// Non-blocking status check.
    pub fn is_signaled(&self) -> bool {
        let result = unsafe { self.device.handle().get_fence_status(self.fence) };
        matches!(result, Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence");
    }
}

/// Synchronization for the single frame in flight.
pub struct SyncObjects {
    image_acquired: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl SyncObjects {
    /// Creates both semaphores and the in-flight fence, which starts signaled.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SyncObjectCreationFailed`]; objects created
    /// before the failure are released.
    pub fn new(device: Arc<Device>) -> Result<Self, PipelineError> {
        let image_acquired = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        debug!("Created frame synchronization objects");

        Ok(Self {
            image_acquired,
            render_finished,
            in_flight,
        })
    }

    #[inline]
    pub fn image_acquired(&self) -> vk::Semaphore {
        self.image_acquired.handle()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<SyncObjects>();
    }
}
