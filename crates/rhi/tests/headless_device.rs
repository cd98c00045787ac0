//! Device-level tests that need a Vulkan implementation but no window.
//!
//! Skipped when no loader or suitable GPU is present.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme};

use frametech_rhi::ResourceError;
use frametech_rhi::buffer::{Buffer, BufferUsage};
use frametech_rhi::device::{DEVICE_EXTENSIONS, Device};
use frametech_rhi::framebuffer::FrameResources;
use frametech_rhi::instance::{Instance, InstanceConfig};
use frametech_rhi::physical_device::{QueueCapabilities, QueueFamilySet, select_physical_device};
use frametech_rhi::render_pass::RenderPass;
use frametech_rhi::sync::{Fence, SyncObjects};

struct Gpu {
    device: Arc<Device>,
    _instance: Instance,
}

fn headless_gpu() -> Option<Gpu> {
    let config = InstanceConfig {
        app_name: "frametech-rhi-tests".to_string(),
        app_version: (0, 1, 0),
        enable_validation: false,
    };
    let instance = Instance::new(&config, &[])
        .map_err(|e| eprintln!("Skipping: no Vulkan instance ({})", e))
        .ok()?;
    let info = select_physical_device(instance.handle(), DEVICE_EXTENSIONS)
        .map_err(|e| eprintln!("Skipping: {}", e))
        .ok()?;

    let capabilities = info
        .queue_families
        .iter()
        .map(|family| {
            let mut caps = QueueCapabilities::PRESENT;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                caps |= QueueCapabilities::GRAPHICS;
            }
            if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
                caps |= QueueCapabilities::TRANSFER;
            }
            caps
        })
        .collect();
    let assignment = QueueFamilySet::from_capabilities(capabilities)
        .assign()
        .map_err(|e| eprintln!("Skipping: {}", e))
        .ok()?;

    let device = Device::new(&instance, &info, assignment)
        .map_err(|e| eprintln!("Skipping: device creation failed ({})", e))
        .ok()?;
    Some(Gpu {
        device,
        _instance: instance,
    })
}

#[test]
fn test_assigned_families_are_distinct() {
    let Some(gpu) = headless_gpu() else { return };
    let families = gpu.device.queue_families();
    assert_eq!(families.unique_families().len(), 3);
}

#[test]
fn test_staging_buffer_bounds() {
    let Some(gpu) = headless_gpu() else { return };

    let staging = Buffer::staging_with_data(gpu.device.clone(), &[1, 2, 3, 4]).unwrap();
    assert_eq!(staging.size(), 4);
    staging.write_data(2, &[9, 9]).unwrap();
    assert!(matches!(
        staging.write_data(3, &[9, 9]),
        Err(ResourceError::WriteOutOfBounds { offset: 3, len: 2, size: 4 })
    ));

    assert!(matches!(
        Buffer::new(gpu.device.clone(), BufferUsage::Vertex, 0, &[]),
        Err(ResourceError::EmptyBuffer)
    ));
}

#[test]
fn test_device_local_buffer_is_not_mapped() {
    let Some(gpu) = headless_gpu() else { return };
    let families = gpu.device.queue_families().unique_families();

    let vertex = Buffer::new(gpu.device.clone(), BufferUsage::Vertex, 64, &families).unwrap();
    // GpuOnly memory may still be host visible on unified-memory devices.
    if let Err(e) = vertex.write_data(0, &[0; 4]) {
        assert!(matches!(e, ResourceError::NotMapped));
    }
}

#[test]
fn test_fence_lifecycle() {
    let Some(gpu) = headless_gpu() else { return };

    let sync = SyncObjects::new(gpu.device.clone()).unwrap();
    assert!(sync.in_flight().is_signaled());
    sync.in_flight().wait(u64::MAX).unwrap();
    sync.in_flight().reset().unwrap();
    assert!(!sync.in_flight().is_signaled());

    let fence = Fence::new(gpu.device.clone(), false).unwrap();
    assert_eq!(fence.wait(0), Err(vk::Result::TIMEOUT));
}

#[test]
fn test_frame_resources_are_replaced_not_appended() {
    let Some(gpu) = headless_gpu() else { return };
    let device = gpu.device.handle();
    let format = vk::Format::B8G8R8A8_UNORM;
    let extent = vk::Extent2D {
        width: 16,
        height: 16,
    };

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    let image = unsafe { device.create_image(&image_info, None) }.unwrap();
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let allocation = gpu
        .device
        .allocator()
        .lock()
        .unwrap()
        .allocate(&AllocationCreateDesc {
            name: "color target",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .unwrap();
    unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }.unwrap();

    let render_pass = RenderPass::new(gpu.device.clone(), format).unwrap();
    let images = [image, image];
    let mut frames = FrameResources::new(gpu.device.clone());
    for _ in 0..2 {
        frames.create_image_views(&images, format).unwrap();
        assert_eq!(frames.image_views().len(), images.len());
        for _ in 0..2 {
            frames
                .create_framebuffers(render_pass.handle(), extent)
                .unwrap();
            assert_eq!(frames.framebuffer_count(), images.len());
        }
    }

    // Views alone after a rebuild; the old framebuffers went with the views.
    frames.create_image_views(&images[..1], format).unwrap();
    assert_eq!(frames.image_views().len(), 1);
    assert_eq!(frames.framebuffer_count(), 0);

    frames.destroy();
    drop(render_pass);
    gpu.device.allocator().lock().unwrap().free(allocation).unwrap();
    unsafe { device.destroy_image(image, None) };
}
