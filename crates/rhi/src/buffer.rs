//! GPU buffers backed by gpu-allocator.
//!
//! Vertex and index buffers live in device-local memory and are filled
//! through a host-visible [`BufferUsage::Staging`] buffer and a copy on the
//! transfer queue.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::ResourceError;

/// Intended use of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Host-writable copy source.
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Staging => "staging",
        }
    }
}

/// VkBuffer and its allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// With more than one entry in `queue_families` the buffer is shared
    /// concurrently between them; otherwise it is exclusive.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::EmptyBuffer`] if `size` is 0
    /// - [`ResourceError::BufferCreationFailed`] if the buffer or binding fails
    /// - [`ResourceError::Allocation`] if no memory can be found
    pub fn new(
        device: Arc<Device>,
        usage: BufferUsage,
        size: vk::DeviceSize,
        queue_families: &[u32],
    ) -> Result<Self, ResourceError> {
        if size == 0 {
            return Err(ResourceError::EmptyBuffer);
        }

        let (sharing_mode, families) = if queue_families.len() > 1 {
            (vk::SharingMode::CONCURRENT, queue_families)
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(sharing_mode)
            .queue_family_indices(families);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None) }
            .map_err(ResourceError::BufferCreationFailed)?;

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = match Self::allocate(&device, usage, requirements) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on Drop releases both the buffer and the allocation.
        let buffer = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };

        if let Some(allocation) = buffer.allocation.as_ref() {
            unsafe {
                buffer.device.handle().bind_buffer_memory(
                    buffer.buffer,
                    allocation.memory(),
                    allocation.offset(),
                )
            }
            .map_err(ResourceError::BufferCreationFailed)?;
        }

        debug!(
            "Created {} buffer: {} bytes, {:?}",
            usage.name(),
            size,
            sharing_mode
        );
        Ok(buffer)
    }

    fn allocate(
        device: &Device,
        usage: BufferUsage,
        requirements: vk::MemoryRequirements,
    ) -> Result<Allocation, ResourceError> {
        let mut allocator = device
            .allocator()
            .lock()
            .map_err(|_| ResourceError::AllocatorPoisoned)?;

        Ok(allocator.allocate(&AllocationCreateDesc {
            name: usage.name(),
            requirements,
            location: usage.memory_location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    /// Creates a staging buffer holding `data`.
    pub fn staging_with_data(device: Arc<Device>, data: &[u8]) -> Result<Self, ResourceError> {
        let buffer = Self::new(
            device,
            BufferUsage::Staging,
            data.len() as vk::DeviceSize,
            &[],
        )?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::WriteOutOfBounds`] if the write does not fit
    /// - [`ResourceError::NotMapped`] for device-local buffers
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<(), ResourceError> {
        if data.is_empty() {
            return Ok(());
        }

        let fits = offset
            .checked_add(data.len() as vk::DeviceSize)
            .is_some_and(|end| end <= self.size);
        if !fits {
            return Err(ResourceError::WriteOutOfBounds {
                offset,
                len: data.len(),
                size: self.size,
            });
        }

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or(ResourceError::NotMapped)?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator().lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        tracing::error!("Failed to free {} buffer allocation: {:?}", self.usage.name(), e);
                    }
                }
                Err(_) => tracing::error!("Allocator lock poisoned; leaking buffer allocation"),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed {} buffer ({} bytes)", self.usage.name(), self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_flags() {
        assert!(BufferUsage::Vertex
            .to_vk_usage()
            .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));
        assert!(BufferUsage::Index
            .to_vk_usage()
            .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(BufferUsage::Vertex.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Index.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Staging.memory_location(), MemoryLocation::CpuToGpu);
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Index.name(), "index");
        assert_eq!(BufferUsage::Staging.name(), "staging");
    }
}
