//! Vulkan logical device and queue management.
//!
//! The [`Device`] owns the logical device, one queue per assigned role and the
//! gpu-allocator instance every buffer allocates from.

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::{CreationFailure, DeviceError, ResourceError, RhiError};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueAssignment};

/// Device extensions the engine enables.
#[cfg(not(target_os = "macos"))]
pub const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Device extensions the engine enables.
#[cfg(target_os = "macos")]
pub const DEVICE_EXTENSIONS: &[&CStr] = &[
    ash::khr::portability_subset::NAME,
    ash::khr::swapchain::NAME,
];

/// Priority given to every queue. One queue per family is requested.
const QUEUE_PRIORITY: [f32; 1] = [1.0];

/// Vulkan logical device wrapper.
///
/// # Thread Safety
///
/// The [`Device`] is shared through `Arc`. The allocator is behind a `Mutex`;
/// queues are only used from the render thread.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// GPU memory allocator. Dropped before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
    /// Family chosen for each queue role.
    queue_families: QueueAssignment,
}

impl Device {
    /// Creates the logical device for `physical_device_info`.
    ///
    /// One queue at priority 1.0 is requested per distinct family of
    /// `queue_families`, and [`DEVICE_EXTENSIONS`] are enabled. No optional
    /// device features are turned on.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceCreationFailed`] with the mapped native
    /// reason, or an allocator error.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
        queue_families: QueueAssignment,
    ) -> Result<Arc<Self>, RhiError> {
        let unique_families = queue_families.unique_families();

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&QUEUE_PRIORITY)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let features = vk::PhysicalDeviceFeatures::default();

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)
        }
        .map_err(|result| {
            let reason = CreationFailure::from(result);
            tracing::error!("vkCreateDevice: {}", reason);
            DeviceError::DeviceCreationFailed(reason)
        })?;

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics(), 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present(), 0) };
        let transfer_queue = unsafe { device.get_device_queue(queue_families.transfer(), 0) };
        debug!(
            "Queues retrieved (graphics={}, present={}, transfer={})",
            queue_families.graphics(),
            queue_families.present(),
            queue_families.transfer()
        );

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(ResourceError::Allocation(e).into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            transfer_queue,
            queue_families,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Returns the queue family chosen for each role.
    #[inline]
    pub fn queue_families(&self) -> &QueueAssignment {
        &self.queue_families
    }

    /// Returns a reference to the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Waits for the device to become idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // Every allocation is freed by now; the allocator must go before the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: Device is Send+Sync because:
// - ash::Device is Send+Sync
// - vk::PhysicalDevice and vk::Queue are Copy types (handles)
// - Allocator is protected by Mutex
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
        #[cfg(not(target_os = "macos"))]
        assert_eq!(DEVICE_EXTENSIONS.len(), 1);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
