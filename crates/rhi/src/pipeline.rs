//! Compiled pipelines.
//!
//! # Overview
//!
//! A [`Pipeline`] is built from a [`PipelineState`] and the
//! [`DescriptorSetLayout`] reflected from its shaders. It owns the backend
//! pipeline layout and pipeline handles; both go through the deletion queue
//! when the pipeline is dropped.
//!
//! Everything a backend needs is derived here, in plain functions over the
//! state, so the derivation rules hold for every backend:
//!
//! - attachment formats: the swapchain format wins, otherwise color textures in
//!   slot order up to the first empty slot
//! - vertex input: the shader's stream at binding 0, plus a per-instance
//!   transform stream at binding 1 when instancing
//! - one blend attachment per color format
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::backend::Backend;
//! use lumen_rhi::{DescriptorSetLayout, Device, Pipeline, PipelineState};
//!
//! # fn example<B: Backend>(device: Arc<Device<B>>, pso: PipelineState<B>) -> lumen_rhi::RhiResult<()> {
//! let shaders: Vec<_> = [&pso.shader_vertex, &pso.shader_pixel]
//!     .into_iter()
//!     .flatten()
//!     .map(|s| s.as_ref())
//!     .collect();
//! let layout = Arc::new(DescriptorSetLayout::from_shaders(device.clone(), &shaders, &pso.name)?);
//! let pipeline = Pipeline::new(device, &pso, layout)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::backend::{
    Backend, ColorBlendDesc, GraphicsPipelineDesc, Resource, ShaderStageDesc, VertexAttribute,
    VertexBinding, VertexInputRate,
};
use crate::definitions::{Format, ObjectId, PipelineKind};
use crate::descriptor::DescriptorSetLayout;
use crate::device::Device;
use crate::error::RhiResult;
use crate::pipeline_state::PipelineState;
use crate::shader::Shader;
use crate::state::BlendState;

/// Per-instance stream stride: one column-major 4x4 f32 matrix.
pub const INSTANCE_STRIDE: u32 = 64;

/// Vertex binding of the per-instance transform stream.
pub const INSTANCE_BINDING: u32 = 1;

pub struct Pipeline<B: Backend> {
    device: Arc<Device<B>>,
    id: ObjectId,
    state: PipelineState<B>,
    layout: Arc<DescriptorSetLayout<B>>,
    pipeline_layout: B::PipelineLayout,
    pipeline: B::Pipeline,
    kind: PipelineKind,
    color_formats: Vec<Format>,
    depth_format: Format,
    stencil_format: Format,
}

impl<B: Backend> Pipeline<B> {
    /// Compiles a pipeline.
    ///
    /// # Panics
    ///
    /// Panics if `state` is not valid.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the pipeline layout or pipeline fails to
    /// compile. The error is also logged.
    pub fn new(
        device: Arc<Device<B>>,
        state: &PipelineState<B>,
        layout: Arc<DescriptorSetLayout<B>>,
    ) -> RhiResult<Self> {
        assert!(
            state.is_valid(),
            "pipeline state '{}' is not valid",
            state.name
        );

        let backend = device.backend();
        let [comparison, regular] = backend.sampler_set_layouts();
        let set_layouts = [layout.handle(), comparison, regular];

        let pipeline_layout = backend
            .create_pipeline_layout(&set_layouts, layout.push_constant_ranges(), &state.name)
            .inspect_err(|e| {
                error!("Failed to create pipeline layout for '{}': {}", state.name, e)
            })?;
        device.set_name(Resource::PipelineLayout(pipeline_layout), &state.name);

        let (color_formats, depth_format, stencil_format) = attachment_formats(state);

        let result = match state.shader_compute.as_deref() {
            Some(shader) => {
                backend.create_compute_pipeline(&stage_desc(shader), pipeline_layout, &state.name)
            }
            None => {
                let desc = graphics_desc(
                    state,
                    color_formats.clone(),
                    depth_format,
                    stencil_format,
                );
                backend.create_graphics_pipeline(&desc, pipeline_layout)
            }
        };

        let pipeline = match result {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("Failed to create pipeline '{}': {}", state.name, e);
                device.defer_release(Resource::PipelineLayout(pipeline_layout));
                return Err(e);
            }
        };
        device.set_name(Resource::Pipeline(pipeline), &state.name);

        let kind = if state.is_compute() {
            PipelineKind::Compute
        } else {
            PipelineKind::Graphics
        };

        info!(
            "{:?} pipeline '{}' created ({} color target(s), depth {:?})",
            kind,
            state.name,
            color_formats.len(),
            depth_format
        );

        Ok(Self {
            device,
            id: ObjectId::next(),
            state: state.clone(),
            layout,
            pipeline_layout,
            pipeline,
            kind,
            color_formats,
            depth_format,
            stencil_format,
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> B::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout_handle(&self) -> B::PipelineLayout {
        self.pipeline_layout
    }

    #[inline]
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// The state this pipeline was compiled from.
    #[inline]
    pub fn state(&self) -> &PipelineState<B> {
        &self.state
    }

    #[inline]
    pub fn descriptor_set_layout(&self) -> &Arc<DescriptorSetLayout<B>> {
        &self.layout
    }

    #[inline]
    pub fn color_formats(&self) -> &[Format] {
        &self.color_formats
    }

    #[inline]
    pub fn depth_format(&self) -> Format {
        self.depth_format
    }

    #[inline]
    pub fn stencil_format(&self) -> Format {
        self.stencil_format
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.state.name
    }
}

impl<B: Backend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        self.device.defer_release(Resource::Pipeline(self.pipeline));
        self.device
            .defer_release(Resource::PipelineLayout(self.pipeline_layout));
        debug!("Queued pipeline '{}' for release", self.state.name);
    }
}

// =============================================================================
// Derivation
// =============================================================================

/// Color formats, depth format and stencil format of the render targets.
pub fn attachment_formats<B: Backend>(state: &PipelineState<B>) -> (Vec<Format>, Format, Format) {
    let color_formats = match &state.render_target_swapchain {
        Some(swapchain) => vec![swapchain.format()],
        None => state.color_textures().map(|t| t.format()).collect(),
    };

    let depth_format = state
        .render_target_depth_texture
        .as_ref()
        .map_or(Format::Undefined, |t| t.format());

    let stencil_format = if depth_format.is_stencil() {
        depth_format
    } else {
        Format::Undefined
    };

    (color_formats, depth_format, stencil_format)
}

/// Vertex bindings and attributes for a vertex shader's reflection.
pub fn vertex_input<B: Backend>(
    vertex_shader: &Shader<B>,
    instancing: bool,
) -> (Vec<VertexBinding>, Vec<VertexAttribute>) {
    let reflection = vertex_shader.reflection();
    let mut bindings = Vec::new();
    let mut attributes = reflection.vertex_attributes.clone();

    if reflection.vertex_stride > 0 {
        bindings.push(VertexBinding {
            binding: 0,
            stride: reflection.vertex_stride,
            rate: VertexInputRate::Vertex,
        });
    }

    if instancing {
        bindings.push(VertexBinding {
            binding: INSTANCE_BINDING,
            stride: INSTANCE_STRIDE,
            rate: VertexInputRate::Instance,
        });

        let first_location = attributes.len() as u32;
        attributes.extend((0..4).map(|column| VertexAttribute {
            location: first_location + column,
            binding: INSTANCE_BINDING,
            format: Format::R32G32B32A32Float,
            offset: column * 16,
        }));
    }

    (bindings, attributes)
}

/// One blend attachment per color format.
pub fn blend_attachments(blend: &BlendState, color_format_count: usize) -> Vec<ColorBlendDesc> {
    vec![blend.to_desc(); color_format_count]
}

fn stage_desc<B: Backend>(shader: &Shader<B>) -> ShaderStageDesc<'_, B> {
    ShaderStageDesc {
        stage: shader.stage(),
        module: shader.handle(),
        entry_point: shader.entry_point(),
    }
}

fn graphics_desc<B: Backend>(
    state: &PipelineState<B>,
    color_formats: Vec<Format>,
    depth_format: Format,
    stencil_format: Format,
) -> GraphicsPipelineDesc<'_, B> {
    let mut stages = Vec::with_capacity(2);
    let mut vertex_bindings = Vec::new();
    let mut vertex_attributes = Vec::new();

    if let Some(vertex_shader) = state.shader_vertex.as_deref() {
        stages.push(stage_desc(vertex_shader));
        if !state.is_fullscreen_triangle {
            (vertex_bindings, vertex_attributes) = vertex_input(vertex_shader, state.instancing);
        }
    }
    if let Some(pixel_shader) = state.shader_pixel.as_deref() {
        stages.push(stage_desc(pixel_shader));
    }

    // is_valid() guarantees all three states for graphics
    let (Some(rasterizer), Some(blend), Some(depth_stencil)) = (
        state.rasterizer_state.as_deref(),
        state.blend_state.as_deref(),
        state.depth_stencil_state.as_deref(),
    ) else {
        unreachable!("graphics state without fixed-function states")
    };

    GraphicsPipelineDesc {
        name: &state.name,
        stages,
        vertex_bindings,
        vertex_attributes,
        topology: state.primitive_topology,
        rasterizer: rasterizer.to_desc(),
        blend_attachments: blend_attachments(blend, color_formats.len()),
        blend_constants: blend.blend_constants(),
        depth_stencil: depth_stencil.to_desc(),
        color_formats,
        depth_format,
        stencil_format,
        dynamic_scissor: state.dynamic_scissor,
        width: state.width(),
        height: state.height(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::definitions::{CullMode, DescriptorType, PolygonMode, ShaderStage};
    use crate::descriptor::Descriptor;
    use crate::device::DeviceSettings;
    use crate::shader::ShaderReflection;
    use crate::state::{DepthStencilState, RasterizerState};
    use crate::swapchain::Swapchain;
    use crate::texture::{Texture, TextureDesc};

    fn device() -> Arc<Device<NullBackend>> {
        Device::new(NullBackend::new(), DeviceSettings::default())
    }

    fn shader(
        device: &Arc<Device<NullBackend>>,
        stage: ShaderStage,
        reflection: ShaderReflection,
    ) -> Arc<Shader<NullBackend>> {
        Arc::new(
            Shader::from_spirv_bytes(device.clone(), &[0u8; 8], stage, reflection, stage.name())
                .unwrap(),
        )
    }

    fn mesh_reflection() -> ShaderReflection {
        ShaderReflection::new("main")
            .with_vertex_attribute(Format::R32G32B32Float)
            .with_vertex_attribute(Format::R32G32Float)
            .with_vertex_attribute(Format::R32G32B32Float)
            .with_descriptor(Descriptor::new(
                "frame",
                DescriptorType::ConstantBuffer,
                0,
                ShaderStage::VERTEX,
            ))
    }

    fn graphics_state(device: &Arc<Device<NullBackend>>) -> PipelineState<NullBackend> {
        let mut pso = PipelineState::new("mesh");
        pso.shader_vertex = Some(shader(device, ShaderStage::VERTEX, mesh_reflection()));
        pso.shader_pixel = Some(shader(device, ShaderStage::PIXEL, ShaderReflection::new("main")));
        pso.rasterizer_state = Some(Arc::new(RasterizerState::new(CullMode::Back, PolygonMode::Solid)));
        pso.blend_state = Some(Arc::new(BlendState::alpha()));
        pso.depth_stencil_state = Some(Arc::new(DepthStencilState::read_write()));
        pso
    }

    fn texture(device: &Arc<Device<NullBackend>>, desc: TextureDesc) -> Arc<Texture<NullBackend>> {
        Arc::new(Texture::new(device.clone(), desc).unwrap())
    }

    fn layout(
        device: &Arc<Device<NullBackend>>,
        pso: &PipelineState<NullBackend>,
    ) -> Arc<DescriptorSetLayout<NullBackend>> {
        let shaders: Vec<&Shader<NullBackend>> = [&pso.shader_vertex, &pso.shader_pixel, &pso.shader_compute]
            .into_iter()
            .flatten()
            .map(|s| s.as_ref())
            .collect();
        Arc::new(DescriptorSetLayout::from_shaders(device.clone(), &shaders, &pso.name).unwrap())
    }

    #[test]
    fn test_single_color_target_without_depth() {
        let device = device();
        let mut pso = graphics_state(&device);
        pso.render_target_color_textures[0] = Some(texture(
            &device,
            TextureDesc::render_target(64, 64, Format::R16G16B16A16Float, "hdr"),
        ));

        let (colors, depth, stencil) = attachment_formats(&pso);
        assert_eq!(colors, vec![Format::R16G16B16A16Float]);
        assert_eq!(depth, Format::Undefined);
        assert_eq!(stencil, Format::Undefined);
    }

    #[test]
    fn test_swapchain_target_yields_its_format_only() {
        let device = device();
        let swapchain = Arc::new(
            Swapchain::new(device.clone(), 64, 64, Format::B8R8G8A8Unorm, 2, "sc").unwrap(),
        );
        let mut pso = graphics_state(&device);
        pso.render_target_swapchain = Some(swapchain);

        let (colors, _, _) = attachment_formats(&pso);
        assert_eq!(colors, vec![Format::B8R8G8A8Unorm]);
    }

    #[test]
    fn test_stencil_format_follows_depth_aspect() {
        let device = device();
        let mut pso = graphics_state(&device);
        pso.render_target_depth_texture = Some(texture(
            &device,
            TextureDesc::depth_stencil(64, 64, Format::D32FloatS8X24Uint, "ds"),
        ));
        let (_, depth, stencil) = attachment_formats(&pso);
        assert_eq!(depth, Format::D32FloatS8X24Uint);
        assert_eq!(stencil, Format::D32FloatS8X24Uint);

        pso.render_target_depth_texture = Some(texture(
            &device,
            TextureDesc::depth_stencil(64, 64, Format::D32Float, "d"),
        ));
        let (_, depth, stencil) = attachment_formats(&pso);
        assert_eq!(depth, Format::D32Float);
        assert_eq!(stencil, Format::Undefined);
    }

    #[test]
    fn test_color_formats_stop_at_first_empty_slot() {
        let device = device();
        let mut pso = graphics_state(&device);
        pso.render_target_color_textures[0] = Some(texture(
            &device,
            TextureDesc::render_target(8, 8, Format::R8G8B8A8Unorm, "a"),
        ));
        pso.render_target_color_textures[1] = Some(texture(
            &device,
            TextureDesc::render_target(8, 8, Format::R16G16Float, "b"),
        ));
        pso.render_target_color_textures[3] = Some(texture(
            &device,
            TextureDesc::render_target(8, 8, Format::R32Float, "c"),
        ));

        let (colors, _, _) = attachment_formats(&pso);
        assert_eq!(colors, vec![Format::R8G8B8A8Unorm, Format::R16G16Float]);
    }

    #[test]
    fn test_instancing_appends_matrix_columns() {
        let device = device();
        let vs = shader(&device, ShaderStage::VERTEX, mesh_reflection());
        let (bindings, attributes) = vertex_input(&vs, true);

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].stride, 32);
        assert_eq!(bindings[0].rate, VertexInputRate::Vertex);
        assert_eq!(bindings[1].stride, INSTANCE_STRIDE);
        assert_eq!(bindings[1].rate, VertexInputRate::Instance);

        let instance: Vec<_> = attributes.iter().filter(|a| a.binding == 1).collect();
        assert_eq!(instance.len(), 4);
        for (i, attribute) in instance.iter().enumerate() {
            assert_eq!(attribute.location, 3 + i as u32);
            assert_eq!(attribute.offset, 16 * i as u32);
            assert_eq!(attribute.format, Format::R32G32B32A32Float);
        }
    }

    #[test]
    fn test_blend_attachment_per_color_format() {
        let blend = BlendState::alpha();
        assert_eq!(blend_attachments(&blend, 3).len(), 3);
        assert!(blend_attachments(&blend, 0).is_empty());
    }

    #[test]
    fn test_graphics_pipeline_record() {
        let device = device();
        let mut pso = graphics_state(&device);
        pso.instancing = true;
        pso.render_target_color_textures[0] = Some(texture(
            &device,
            TextureDesc::render_target(64, 32, Format::R8G8B8A8Unorm, "albedo"),
        ));
        let layout = layout(&device, &pso);
        let pipeline = Pipeline::new(device.clone(), &pso, layout).unwrap();

        assert_eq!(pipeline.kind(), PipelineKind::Graphics);
        let record = device.backend().pipeline(pipeline.handle()).unwrap();
        assert_eq!(record.vertex_bindings.len(), 2);
        assert_eq!(record.vertex_attributes.len(), 7);
        assert_eq!(record.blend_attachments.len(), 1);
        assert_eq!(record.color_formats, vec![Format::R8G8B8A8Unorm]);
        assert!(!record.dynamic_scissor);

        let layout_record = device
            .backend()
            .pipeline_layout(pipeline.layout_handle())
            .unwrap();
        let [comparison, regular] = device.backend().sampler_set_layouts();
        assert_eq!(layout_record.set_layouts[1], comparison);
        assert_eq!(layout_record.set_layouts[2], regular);
    }

    #[test]
    fn test_fullscreen_triangle_has_no_vertex_input() {
        let device = device();
        let mut pso = graphics_state(&device);
        pso.is_fullscreen_triangle = true;
        let layout = layout(&device, &pso);
        let pipeline = Pipeline::new(device.clone(), &pso, layout).unwrap();

        let record = device.backend().pipeline(pipeline.handle()).unwrap();
        assert!(record.vertex_bindings.is_empty());
        assert!(record.vertex_attributes.is_empty());
    }

    #[test]
    fn test_compute_pipeline() {
        let device = device();
        let mut pso = PipelineState::new("blur");
        pso.shader_compute = Some(shader(&device, ShaderStage::COMPUTE, ShaderReflection::new("main")));
        let layout = layout(&device, &pso);
        let pipeline = Pipeline::new(device.clone(), &pso, layout).unwrap();

        assert_eq!(pipeline.kind(), PipelineKind::Compute);
        assert!(pipeline.color_formats().is_empty());
        let record = device.backend().pipeline(pipeline.handle()).unwrap();
        assert_eq!(record.stages, vec![ShaderStage::COMPUTE]);
    }

    #[test]
    fn test_drop_queues_both_handles() {
        let device = device();
        let mut pso = PipelineState::new("blur");
        pso.shader_compute = Some(shader(&device, ShaderStage::COMPUTE, ShaderReflection::new("main")));
        let layout = layout(&device, &pso);
        let pipeline = Pipeline::new(device.clone(), &pso, layout).unwrap();
        let handle = pipeline.handle();
        let pipeline_layout = pipeline.layout_handle();

        drop(pipeline);
        assert!(device.deletion_queue().contains(&Resource::Pipeline(handle)));
        assert!(device
            .deletion_queue()
            .contains(&Resource::PipelineLayout(pipeline_layout)));
        assert!(device.backend().is_live(handle));

        device.collect_garbage();
        assert!(!device.backend().is_live(handle));
    }

    #[test]
    #[should_panic(expected = "is not valid")]
    fn test_invalid_state_panics() {
        let device = device();
        let mut pso = graphics_state(&device);
        pso.shader_compute = Some(shader(&device, ShaderStage::COMPUTE, ShaderReflection::new("main")));
        let layout = layout(&device, &pso);
        let _ = Pipeline::new(device, &pso, layout);
    }
}
