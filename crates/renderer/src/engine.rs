//! The top-level owner of every GPU object.
//!
//! [`Engine`] is built once from the configuration and the window, handed
//! to the [`FrameScheduler`](crate::FrameScheduler) through
//! [`FrameSequence`], and torn down in reverse dependency order.
//!
//! # Resource Destruction Order
//!
//! 1. Wait for the device to go idle
//! 2. Command recorders (pools and buffers)
//! 3. Render pipeline (shaders, render pass, layout, buffers, pipeline, sync)
//! 4. Frame resources (framebuffers, image views)
//! 5. Swapchain
//! 6. Surface
//! 7. Logical device
//! 8. Instance
//!
//! `ManuallyDrop` holds every field to that order.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::{error, info};

use frametech_core::AppConfig;
use frametech_platform::{Surface, Window};
use frametech_rhi::device::{DEVICE_EXTENSIONS, Device};
use frametech_rhi::framebuffer::FrameResources;
use frametech_rhi::instance::{Instance, InstanceConfig};
use frametech_rhi::physical_device::{QueueFamilySet, select_physical_device};
use frametech_rhi::swapchain::{Swapchain, SwapchainSettings, SwapchainSupportDetails};
use frametech_rhi::{FrameError, PipelineError, RhiError, RhiResult};

use crate::mesh::MeshData;
use crate::recorder::{CommandRecorder, CommandRole, Overlay};
use crate::render_pipeline::RenderPipeline;
use crate::scheduler::FrameSequence;

/// SPIR-V shaders of the single pipeline, relative to the working directory.
pub const SHADER_PATHS: [&str; 2] = [
    "shaders/basic_triangle.vert.spv",
    "shaders/basic_triangle.frag.spv",
];

/// Device, swapchain, pipeline and command state of a running renderer.
pub struct Engine {
    graphics: ManuallyDrop<CommandRecorder>,
    transfer: ManuallyDrop<CommandRecorder>,
    pipeline: ManuallyDrop<RenderPipeline>,
    frames: ManuallyDrop<FrameResources>,
    swapchain: ManuallyDrop<Swapchain>,
    surface: ManuallyDrop<Surface>,
    device: ManuallyDrop<Arc<Device>>,
    instance: ManuallyDrop<Instance>,
    mesh: MeshData,
    overlay: Option<Box<dyn Overlay>>,
}

impl Engine {
    /// Builds the engine for `window`, uploading [`MeshData::triangle`].
    ///
    /// Steps run in dependency order and stop at the first failure; whatever
    /// was built before it is released on return.
    ///
    /// # Errors
    ///
    /// The first construction error, e.g. [`RhiError::Device`] when no
    /// suitable GPU exists or a shader file is missing
    /// ([`RhiError::Pipeline`]).
    pub fn new(config: &AppConfig, window: &Window) -> RhiResult<Self> {
        Self::with_mesh(config, window, MeshData::triangle())
    }

    /// Like [`new`](Self::new), drawing `mesh` instead of the triangle.
    pub fn with_mesh(config: &AppConfig, window: &Window, mesh: MeshData) -> RhiResult<Self> {
        let (width, height) = window.framebuffer_size();
        info!("Initializing engine for a {}x{} surface", width, height);

        let surface_extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let instance = Instance::new(
            &InstanceConfig {
                app_name: config.name.clone(),
                app_version: (
                    u32::from(config.version.major),
                    u32::from(config.version.minor),
                    u32::from(config.version.patch),
                ),
                enable_validation: config.enable_validation,
            },
            &surface_extensions,
        )?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        // Device
        let physical_device = select_physical_device(instance.handle(), DEVICE_EXTENSIONS)?;
        let queue_families =
            QueueFamilySet::discover(&physical_device, surface.handle(), surface.loader())?;
        let assignment = queue_families.assign()?;
        let device = Device::new(&instance, &physical_device, assignment)?;

        // Swapchain
        let details =
            SwapchainSupportDetails::query(device.physical_device(), surface.handle(), surface.loader())?;
        details.check(config.buffer_count)?;
        let settings = SwapchainSettings::choose(
            &details,
            config.buffer_count,
            config.fps_limit.is_limited(),
            width,
            height,
        )?;
        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), &details, settings)?;

        let mut frames = FrameResources::new(device.clone());
        frames.create_image_views(swapchain.images(), swapchain.format())?;

        // Pipeline
        let mut pipeline = RenderPipeline::new(device.clone());
        pipeline.load_shaders(&SHADER_PATHS[..])?;
        pipeline.setup_render_pass(swapchain.format())?;
        pipeline.preconfigure()?;
        pipeline.create()?;

        let render_pass = pipeline
            .render_pass()
            .map(|pass| pass.handle())
            .ok_or(PipelineError::MissingRenderPass)?;
        frames.create_framebuffers(render_pass, swapchain.extent())?;

        // Commands and geometry
        let families = device.queue_families();
        let mut transfer = CommandRecorder::new(device.clone(), CommandRole::Transfer);
        transfer.create_pool(families.transfer())?;
        transfer.create_buffer()?;

        let mut graphics = CommandRecorder::new(device.clone(), CommandRole::Graphics);
        graphics.create_pool(families.graphics())?;

        pipeline.create_vertex_buffer(&mesh, &transfer)?;
        pipeline.create_index_buffer(&mesh, &transfer)?;
        graphics.create_buffer()?;

        info!(
            "Engine ready: {} framebuffers, {:?}, {} indices",
            frames.framebuffer_count(),
            swapchain.present_mode(),
            mesh.index_count()
        );

        Ok(Self {
            graphics: ManuallyDrop::new(graphics),
            transfer: ManuallyDrop::new(transfer),
            pipeline: ManuallyDrop::new(pipeline),
            frames: ManuallyDrop::new(frames),
            swapchain: ManuallyDrop::new(swapchain),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            instance: ManuallyDrop::new(instance),
            mesh,
            overlay: None,
        })
    }

    /// Installs a hook recorded after the main draw each frame.
    pub fn set_overlay(&mut self, overlay: Box<dyn Overlay>) {
        self.overlay = Some(overlay);
    }

    pub fn clear_overlay(&mut self) {
        self.overlay = None;
    }

    /// Replaces the drawn geometry, re-uploading both buffers.
    pub fn upload_mesh(&mut self, mesh: MeshData) -> RhiResult<()> {
        self.pipeline.create_vertex_buffer(&mesh, &self.transfer)?;
        self.pipeline.create_index_buffer(&mesh, &self.transfer)?;
        self.mesh = mesh;
        Ok(())
    }

    /// Blocks until all queued GPU work has finished.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn mesh(&self) -> &MeshData {
        &self.mesh
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn has_validation(&self) -> bool {
        self.instance.has_validation()
    }
}

impl FrameSequence for Engine {
    fn acquire_image(&mut self) -> Result<u32, FrameError> {
        self.pipeline.acquire_image(&self.swapchain)
    }

    fn record(&mut self, frame_index: u32) -> Result<(), FrameError> {
        let ctx = self
            .pipeline
            .draw_context(&self.frames, self.swapchain.extent(), frame_index)?;
        let overlay = self
            .overlay
            .as_deref_mut()
            .map(|overlay| overlay as &mut dyn Overlay);
        self.graphics.record(&ctx, overlay)?;
        Ok(())
    }

    fn draw(&mut self) -> Result<(), FrameError> {
        let command_buffer = self.graphics.buffer()?.handle();
        self.pipeline.draw(command_buffer)
    }

    fn present(&mut self, frame_index: u32) -> Result<(), FrameError> {
        self.pipeline.present(&self.swapchain, frame_index)
    }

    fn buffer_count(&self) -> u32 {
        u32::try_from(self.frames.framebuffer_count()).unwrap_or(u32::MAX)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during engine drop: {}", e);
        }

        unsafe {
            ManuallyDrop::drop(&mut self.graphics);
            ManuallyDrop::drop(&mut self.transfer);
            ManuallyDrop::drop(&mut self.pipeline);
            ManuallyDrop::drop(&mut self.frames);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Engine destroyed");
    }
}
