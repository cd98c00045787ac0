//! Pipeline layout and graphics pipeline creation.
//!
//! [`GraphicsPipelineBuilder`] collects shader stages and fixed-function state
//! and builds a [`Pipeline`] against a render pass. Depth, stencil and
//! blending are always off; viewport and scissor are dynamic.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frametech_rhi::device::Device;
//! use frametech_rhi::pipeline::{GraphicsPipelineBuilder, PipelineLayout};
//! use frametech_rhi::render_pass::RenderPass;
//! use frametech_rhi::shader::Shader;
//! use frametech_rhi::vertex::Vertex;
//!
//! # fn example(device: Arc<Device>, vs: &Shader, fs: &Shader, pass: &RenderPass)
//! #     -> Result<(), frametech_rhi::RhiError> {
//! let layout = PipelineLayout::new(device.clone())?;
//! let pipeline = GraphicsPipelineBuilder::new()
//!     .shader(vs)
//!     .shader(fs)
//!     .vertex_binding(Vertex::binding_description())
//!     .vertex_attributes(&Vertex::attribute_descriptions())
//!     .layout(&layout)
//!     .render_pass(pass)
//!     .build(device)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::PipelineError;
use crate::render_pass::RenderPass;
use crate::shader::Shader;

/// Pipeline layout with no descriptor sets and no push constants.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// # Errors
    ///
    /// Returns [`PipelineError::LayoutCreationFailed`].
    pub fn new(device: Arc<Device>) -> Result<Self, PipelineError> {
        let create_info = vk::PipelineLayoutCreateInfo::default();

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None) }
            .map_err(PipelineError::LayoutCreationFailed)?;

        debug!("Created empty pipeline layout");
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Graphics pipeline wrapper.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    fn create_graphics_internal(
        device: Arc<Device>,
        create_info: &vk::GraphicsPipelineCreateInfo,
    ) -> Result<Self, PipelineError> {
        let pipelines = unsafe {
            device.handle().create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(create_info),
                None,
            )
        }
        .map_err(|(_, result)| PipelineError::PipelineCreationFailed(result))?;

        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or(PipelineError::PipelineCreationFailed(
                vk::Result::ERROR_UNKNOWN,
            ))?;

        info!("Graphics pipeline created");
        Ok(Self { device, pipeline })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::GRAPHICS
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        info!("Graphics pipeline destroyed");
    }
}

/// Primitive topology for input assembly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

/// Polygon rasterization mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

impl PolygonMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
            PolygonMode::Point => vk::PolygonMode::POINT,
        }
    }
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Winding order treated as front-facing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    CounterClockwise,
    #[default]
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Builder for a single-subpass graphics pipeline.
///
/// Defaults: triangle list, fill, back-face culling, clockwise front face,
/// one sample, dynamic viewport and scissor.
pub struct GraphicsPipelineBuilder<'a> {
    shaders: Vec<&'a Shader>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: PrimitiveTopology,
    polygon_mode: PolygonMode,
    cull_mode: CullMode,
    front_face: FrontFace,
    line_width: f32,
    layout: Option<&'a PipelineLayout>,
    render_pass: Option<&'a RenderPass>,
    subpass: u32,
    dynamic_states: Vec<vk::DynamicState>,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self {
            shaders: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Clockwise,
            line_width: 1.0,
            layout: None,
            render_pass: None,
            subpass: 0,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }

    /// Adds a shader stage.
    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shaders.push(shader);
        self
    }

    pub fn shaders(mut self, shaders: impl IntoIterator<Item = &'a Shader>) -> Self {
        self.shaders.extend(shaders);
        self
    }

    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes.extend_from_slice(attributes);
        self
    }

    pub fn topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    pub fn layout(mut self, layout: &'a PipelineLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn render_pass(mut self, render_pass: &'a RenderPass) -> Self {
        self.render_pass = Some(render_pass);
        self
    }

    /// Adds a dynamic state; duplicates are ignored.
    pub fn dynamic_state(mut self, state: vk::DynamicState) -> Self {
        if !self.dynamic_states.contains(&state) {
            self.dynamic_states.push(state);
        }
        self
    }

    fn validate(&self) -> Result<(vk::PipelineLayout, vk::RenderPass), PipelineError> {
        if self.shaders.is_empty() {
            return Err(PipelineError::MissingShaderStages);
        }
        let layout = self.layout.ok_or(PipelineError::MissingLayout)?;
        let render_pass = self.render_pass.ok_or(PipelineError::MissingRenderPass)?;
        Ok((layout.handle(), render_pass.handle()))
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::MissingShaderStages`] if no shader was added
    /// - [`PipelineError::MissingLayout`] / [`PipelineError::MissingRenderPass`]
    /// - [`PipelineError::PipelineCreationFailed`] if the driver rejects it
    pub fn build(self, device: Arc<Device>) -> Result<Pipeline, PipelineError> {
        let (layout, render_pass) = self.validate()?;

        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .shaders
            .iter()
            .map(|shader| shader.stage_create_info())
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology.to_vk())
            .primitive_restart_enable(false);

        // Counts only; the rectangles are set while recording.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode.to_vk())
            .line_width(self.line_width)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face.to_vk())
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&self.dynamic_states);

        debug!(
            "Building graphics pipeline: {} stage(s), {:?}, cull {:?}, front {:?}",
            shader_stages.len(),
            self.topology,
            self.cull_mode,
            self.front_face
        );

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(self.subpass);

        Pipeline::create_graphics_internal(device, &pipeline_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = GraphicsPipelineBuilder::new();
        assert!(builder.shaders.is_empty());
        assert_eq!(builder.topology, PrimitiveTopology::TriangleList);
        assert_eq!(builder.polygon_mode, PolygonMode::Fill);
        assert_eq!(builder.cull_mode, CullMode::Back);
        assert_eq!(builder.front_face, FrontFace::Clockwise);
        assert_eq!(
            builder.dynamic_states,
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
    }

    #[test]
    fn test_validate_requires_shader_stages_first() {
        let builder = GraphicsPipelineBuilder::new();
        assert!(matches!(
            builder.validate(),
            Err(PipelineError::MissingShaderStages)
        ));
    }

    #[test]
    fn test_dynamic_state_deduplicates() {
        let builder = GraphicsPipelineBuilder::new()
            .dynamic_state(vk::DynamicState::LINE_WIDTH)
            .dynamic_state(vk::DynamicState::LINE_WIDTH)
            .dynamic_state(vk::DynamicState::VIEWPORT);
        assert_eq!(builder.dynamic_states.len(), 3);
    }

    #[test]
    fn test_fixed_function_conversions() {
        assert_eq!(
            PrimitiveTopology::TriangleList.to_vk(),
            vk::PrimitiveTopology::TRIANGLE_LIST
        );
        assert_eq!(PolygonMode::Line.to_vk(), vk::PolygonMode::LINE);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(FrontFace::Clockwise.to_vk(), vk::FrontFace::CLOCKWISE);
        assert_eq!(FrontFace::default(), FrontFace::Clockwise);
    }
}
