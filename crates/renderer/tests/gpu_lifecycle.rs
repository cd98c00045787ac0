//! Lifecycle tests against a real Vulkan device.
//!
//! They run headless: no window or surface, and queue roles are assigned
//! from the queue flags alone. Every test skips when no Vulkan loader or
//! suitable GPU is available.

use std::sync::Arc;

use ash::vk;

use frametech_renderer::{CommandRecorder, CommandRole, MeshData, PipelineState, RenderPipeline};
use frametech_rhi::device::{DEVICE_EXTENSIONS, Device};
use frametech_rhi::framebuffer::FrameResources;
use frametech_rhi::instance::{Instance, InstanceConfig};
use frametech_rhi::physical_device::{QueueCapabilities, QueueFamilySet, select_physical_device};
use frametech_rhi::{CommandError, PipelineError, RhiError};

/// Device first: it must be destroyed before the instance.
struct Gpu {
    device: Arc<Device>,
    _instance: Instance,
}

fn headless_gpu() -> Option<Gpu> {
    let config = InstanceConfig {
        app_name: "frametech-tests".to_string(),
        app_version: (0, 1, 0),
        enable_validation: false,
    };
    let instance = match Instance::new(&config, &[]) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("Skipping: no Vulkan instance ({})", e);
            return None;
        }
    };

    let info = match select_physical_device(instance.handle(), DEVICE_EXTENSIONS) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("Skipping: {}", e);
            return None;
        }
    };

    // Without a surface any family may stand in for presentation.
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
    let assignment = match QueueFamilySet::from_capabilities(capabilities).assign() {
        Ok(assignment) => assignment,
        Err(e) => {
            eprintln!("Skipping: {}", e);
            return None;
        }
    };

    match Device::new(&instance, &info, assignment) {
        Ok(device) => Some(Gpu {
            device,
            _instance: instance,
        }),
        Err(e) => {
            eprintln!("Skipping: device creation failed ({})", e);
            None
        }
    }
}

#[test]
fn test_pipeline_destroy_twice_then_drop() {
    let Some(gpu) = headless_gpu() else { return };

    let mut pipeline = RenderPipeline::new(gpu.device.clone());
    pipeline
        .setup_render_pass(vk::Format::B8G8R8A8_SRGB)
        .unwrap();
    pipeline.preconfigure().unwrap();
    assert_eq!(pipeline.state(), PipelineState::LayoutReady);

    // No shaders loaded.
    assert!(matches!(
        pipeline.create(),
        Err(PipelineError::MissingShaderStages)
    ));

    pipeline.destroy();
    assert!(pipeline.is_empty());
    assert_eq!(pipeline.state(), PipelineState::Uncreated);
    pipeline.destroy();
    drop(pipeline);
}

#[test]
fn test_recorder_destroy_twice_then_drop() {
    let Some(gpu) = headless_gpu() else { return };

    let mut recorder = CommandRecorder::new(gpu.device.clone(), CommandRole::Graphics);
    assert!(matches!(recorder.create_buffer(), Err(CommandError::NoPool)));
    assert!(matches!(recorder.buffer(), Err(CommandError::NoBuffer)));

    recorder
        .create_pool(gpu.device.queue_families().graphics())
        .unwrap();
    recorder.create_buffer().unwrap();
    assert!(recorder.buffer().is_ok());

    recorder.destroy();
    assert!(matches!(recorder.buffer(), Err(CommandError::NoBuffer)));
    recorder.destroy();
    drop(recorder);
}

#[test]
fn test_frame_resources_destroy_twice_then_drop() {
    let Some(gpu) = headless_gpu() else { return };

    let mut frames = FrameResources::new(gpu.device.clone());
    frames
        .create_image_views(&[], vk::Format::B8G8R8A8_SRGB)
        .unwrap();
    assert_eq!(frames.framebuffer_count(), 0);

    frames.destroy();
    frames.destroy();
    assert!(frames.is_empty());
    drop(frames);
}

#[test]
fn test_mesh_upload_is_reentrant() {
    let Some(gpu) = headless_gpu() else { return };
    let families = gpu.device.queue_families();

    let mut transfer = CommandRecorder::new(gpu.device.clone(), CommandRole::Transfer);
    transfer.create_pool(families.transfer()).unwrap();
    transfer.create_buffer().unwrap();

    let mut pipeline = RenderPipeline::new(gpu.device.clone());
    let mesh = MeshData::triangle();
    for _ in 0..2 {
        pipeline.create_vertex_buffer(&mesh, &transfer).unwrap();
        pipeline.create_index_buffer(&mesh, &transfer).unwrap();
    }
    assert_eq!(pipeline.index_count(), 3);

    let empty = MeshData::new(Vec::new(), Vec::new());
    assert!(matches!(
        pipeline.create_vertex_buffer(&empty, &transfer),
        Err(RhiError::Resource(_))
    ));

    pipeline.destroy();
    pipeline.destroy();
}

#[test]
fn test_recording_requires_an_acquired_image() {
    let Some(gpu) = headless_gpu() else { return };

    let mut pipeline = RenderPipeline::new(gpu.device.clone());
    pipeline
        .setup_render_pass(vk::Format::B8G8R8A8_SRGB)
        .unwrap();
    let frames = FrameResources::new(gpu.device.clone());

    let extent = vk::Extent2D {
        width: 64,
        height: 64,
    };
    assert!(matches!(
        pipeline.draw_context(&frames, extent, 0),
        Err(PipelineError::InvalidPipelineState { .. })
    ));
    assert!(pipeline.draw(vk::CommandBuffer::null()).is_err());
}
