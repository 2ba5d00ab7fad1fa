//! The backend capability interface.
//!
//! # Overview
//!
//! [`Backend`] is the single seam between the RHI core and a concrete graphics
//! API. Every backend picks its own strong handle types (associated types bound
//! by [`GpuHandle`]); the core never inspects them beyond null checks and
//! equality. Two implementations ship with the crate:
//!
//! - [`null::NullBackend`]: in-memory recorder used for tests and headless runs
//! - `vulkan::VulkanBackend`: ash-based Vulkan 1.3 backend (feature `vulkan`)
//!
//! The core owns all validation and bookkeeping. Backends only translate and
//! record; they never assert on command-list state.

use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::buffer::BufferDesc;
use crate::definitions::{
    BlendFactor, BlendOp, ClearValue, CompareOp, CullMode, DescriptorType, Format, ImageAspect,
    ImageLayout, IndexFormat, PipelineKind, PolygonMode, PrimitiveTopology, QueueType, Rect,
    ResourceType, ShaderStage, StencilOp, Viewport,
};
use crate::descriptor::Descriptor;
use crate::error::RhiResult;
use crate::sampler::SamplerDesc;
use crate::texture::TextureDesc;

pub mod null;
#[cfg(feature = "vulkan")]
pub mod vulkan;

/// Bounds shared by every backend handle type.
pub trait GpuHandle: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    fn is_null(&self) -> bool;
}

/// Limits and properties queried during object creation.
#[derive(Clone, Debug)]
pub struct Capabilities {
    pub device_name: String,
    pub max_push_constant_size: u32,
    /// Nanoseconds per timestamp tick
    pub timestamp_period: f32,
    pub timestamps_supported: bool,
    pub max_texture_dimension: u32,
}

/// Graphics API implementation behind the RHI.
pub trait Backend: Send + Sync + Sized + 'static {
    type ShaderModule: GpuHandle;
    type DescriptorSetLayout: GpuHandle;
    type PipelineLayout: GpuHandle;
    type Pipeline: GpuHandle;
    type CommandBuffer: GpuHandle;
    type Buffer: GpuHandle;
    type Texture: GpuHandle;
    type Sampler: GpuHandle;

    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &Capabilities;

    /// The fixed layouts bound at [`DescriptorSetSlot::ComparisonSampler`] and
    /// [`DescriptorSetSlot::RegularSamplers`], in that order.
    ///
    /// [`DescriptorSetSlot::ComparisonSampler`]: crate::DescriptorSetSlot::ComparisonSampler
    /// [`DescriptorSetSlot::RegularSamplers`]: crate::DescriptorSetSlot::RegularSamplers
    fn sampler_set_layouts(&self) -> [Self::DescriptorSetLayout; 2];

    // =========================================================================
    // Object creation and release
    // =========================================================================

    fn create_shader_module(&self, bytecode: &[u8], name: &str) -> RhiResult<Self::ShaderModule>;

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<Self::Buffer>;

    fn write_buffer(&self, buffer: Self::Buffer, offset: u64, data: &[u8]) -> RhiResult<()>;

    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<Self::Texture>;

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<Self::Sampler>;

    /// Creates the per-pipeline resource layout. Push-constant descriptors are
    /// never passed here.
    fn create_descriptor_set_layout(
        &self,
        bindings: &[Descriptor],
        name: &str,
    ) -> RhiResult<Self::DescriptorSetLayout>;

    /// `set_layouts` is indexed by `DescriptorSetSlot`.
    fn create_pipeline_layout(
        &self,
        set_layouts: &[Self::DescriptorSetLayout; 3],
        push_constant_ranges: &[PushConstantRange],
        name: &str,
    ) -> RhiResult<Self::PipelineLayout>;

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_, Self>,
        layout: Self::PipelineLayout,
    ) -> RhiResult<Self::Pipeline>;

    fn create_compute_pipeline(
        &self,
        stage: &ShaderStageDesc<'_, Self>,
        layout: Self::PipelineLayout,
        name: &str,
    ) -> RhiResult<Self::Pipeline>;

    /// Attaches a debug name. Backends without naming support ignore it.
    fn set_name(&self, resource: Resource<Self>, name: &str);

    /// Destroys a handle. Only the deletion queue and command-list teardown
    /// call this, after proving the GPU no longer references the handle.
    fn release(&self, resource: Resource<Self>);

    // =========================================================================
    // Queues
    // =========================================================================

    fn create_command_buffer(&self, queue: QueueType, name: &str)
    -> RhiResult<Self::CommandBuffer>;

    fn submit(&self, cmd: Self::CommandBuffer, queue: QueueType) -> RhiResult<()>;

    /// Non-blocking completion check for the last submission of `cmd`.
    fn is_complete(&self, cmd: Self::CommandBuffer) -> RhiResult<bool>;

    fn wait_for_completion(&self, cmd: Self::CommandBuffer, timeout: Duration) -> RhiResult<()>;

    fn wait_idle(&self) -> RhiResult<()>;

    /// Raw timestamp ticks written by the last completed submission.
    fn read_timestamps(
        &self,
        cmd: Self::CommandBuffer,
        first: u32,
        count: u32,
    ) -> RhiResult<Vec<u64>>;

    // =========================================================================
    // Recording
    // =========================================================================

    fn begin_command_buffer(&self, cmd: Self::CommandBuffer) -> RhiResult<()>;

    fn end_command_buffer(&self, cmd: Self::CommandBuffer) -> RhiResult<()>;

    fn cmd_begin_rendering(&self, cmd: Self::CommandBuffer, info: &RenderingInfo<Self>);

    fn cmd_end_rendering(&self, cmd: Self::CommandBuffer);

    /// Binds the pipeline together with the fixed sampler sets.
    fn cmd_bind_pipeline(
        &self,
        cmd: Self::CommandBuffer,
        kind: PipelineKind,
        pipeline: Self::Pipeline,
        layout: Self::PipelineLayout,
    );

    fn cmd_bind_descriptors(
        &self,
        cmd: Self::CommandBuffer,
        kind: PipelineKind,
        layout: Self::PipelineLayout,
        writes: &[DescriptorWrite<Self>],
    );

    fn cmd_push_constants(
        &self,
        cmd: Self::CommandBuffer,
        layout: Self::PipelineLayout,
        stages: ShaderStage,
        offset: u32,
        data: &[u8],
    );

    fn cmd_bind_vertex_buffer(&self, cmd: Self::CommandBuffer, binding: u32, buffer: Self::Buffer);

    fn cmd_bind_index_buffer(
        &self,
        cmd: Self::CommandBuffer,
        buffer: Self::Buffer,
        format: IndexFormat,
    );

    fn cmd_set_viewport(&self, cmd: Self::CommandBuffer, viewport: &Viewport);

    fn cmd_set_scissor(&self, cmd: Self::CommandBuffer, rect: &Rect);

    fn cmd_draw(&self, cmd: Self::CommandBuffer, vertex_count: u32, first_vertex: u32);

    fn cmd_draw_indexed(
        &self,
        cmd: Self::CommandBuffer,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
        instance_count: u32,
    );

    fn cmd_dispatch(&self, cmd: Self::CommandBuffer, x: u32, y: u32, z: u32);

    fn cmd_image_barrier(&self, cmd: Self::CommandBuffer, barrier: &ImageBarrier<Self>);

    /// Scaled copy of one mip level with linear filtering.
    fn cmd_blit(
        &self,
        cmd: Self::CommandBuffer,
        src: &TextureRegion<Self>,
        dst: &TextureRegion<Self>,
    );

    /// Exact copy of one mip level; both regions have identical extents.
    fn cmd_copy(
        &self,
        cmd: Self::CommandBuffer,
        src: &TextureRegion<Self>,
        dst: &TextureRegion<Self>,
    );

    /// Clears a texture outside of a render pass. The texture is in `layout`.
    fn cmd_clear_texture(
        &self,
        cmd: Self::CommandBuffer,
        texture: Self::Texture,
        aspect: ImageAspect,
        layout: ImageLayout,
        value: ClearValue,
    );

    fn cmd_write_timestamp(&self, cmd: Self::CommandBuffer, index: u32);

    fn cmd_begin_marker(&self, cmd: Self::CommandBuffer, name: &str);

    fn cmd_end_marker(&self, cmd: Self::CommandBuffer);
}

// =============================================================================
// Typed handles for deferred release
// =============================================================================

/// A backend handle tagged with its kind.
pub enum Resource<B: Backend> {
    Pipeline(B::Pipeline),
    PipelineLayout(B::PipelineLayout),
    DescriptorSetLayout(B::DescriptorSetLayout),
    Shader(B::ShaderModule),
    Sampler(B::Sampler),
    Texture(B::Texture),
    Buffer(B::Buffer),
    CommandList(B::CommandBuffer),
}

impl<B: Backend> Resource<B> {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Resource::Pipeline(_) => ResourceType::Pipeline,
            Resource::PipelineLayout(_) => ResourceType::PipelineLayout,
            Resource::DescriptorSetLayout(_) => ResourceType::DescriptorSetLayout,
            Resource::Shader(_) => ResourceType::Shader,
            Resource::Sampler(_) => ResourceType::Sampler,
            Resource::Texture(_) => ResourceType::Texture,
            Resource::Buffer(_) => ResourceType::Buffer,
            Resource::CommandList(_) => ResourceType::CommandList,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Resource::Pipeline(h) => h.is_null(),
            Resource::PipelineLayout(h) => h.is_null(),
            Resource::DescriptorSetLayout(h) => h.is_null(),
            Resource::Shader(h) => h.is_null(),
            Resource::Sampler(h) => h.is_null(),
            Resource::Texture(h) => h.is_null(),
            Resource::Buffer(h) => h.is_null(),
            Resource::CommandList(h) => h.is_null(),
        }
    }
}

// Derives would demand `B: Clone + PartialEq + ...`; only the handles need it.
impl<B: Backend> Clone for Resource<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend> Copy for Resource<B> {}

impl<B: Backend> PartialEq for Resource<B> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Resource::Pipeline(a), Resource::Pipeline(b)) => a == b,
            (Resource::PipelineLayout(a), Resource::PipelineLayout(b)) => a == b,
            (Resource::DescriptorSetLayout(a), Resource::DescriptorSetLayout(b)) => a == b,
            (Resource::Shader(a), Resource::Shader(b)) => a == b,
            (Resource::Sampler(a), Resource::Sampler(b)) => a == b,
            (Resource::Texture(a), Resource::Texture(b)) => a == b,
            (Resource::Buffer(a), Resource::Buffer(b)) => a == b,
            (Resource::CommandList(a), Resource::CommandList(b)) => a == b,
            _ => false,
        }
    }
}

impl<B: Backend> Eq for Resource<B> {}

impl<B: Backend> Hash for Resource<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_type().hash(state);
        match self {
            Resource::Pipeline(h) => h.hash(state),
            Resource::PipelineLayout(h) => h.hash(state),
            Resource::DescriptorSetLayout(h) => h.hash(state),
            Resource::Shader(h) => h.hash(state),
            Resource::Sampler(h) => h.hash(state),
            Resource::Texture(h) => h.hash(state),
            Resource::Buffer(h) => h.hash(state),
            Resource::CommandList(h) => h.hash(state),
        }
    }
}

impl<B: Backend> Debug for Resource<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Pipeline(h) => f.debug_tuple("Pipeline").field(h).finish(),
            Resource::PipelineLayout(h) => f.debug_tuple("PipelineLayout").field(h).finish(),
            Resource::DescriptorSetLayout(h) => {
                f.debug_tuple("DescriptorSetLayout").field(h).finish()
            }
            Resource::Shader(h) => f.debug_tuple("Shader").field(h).finish(),
            Resource::Sampler(h) => f.debug_tuple("Sampler").field(h).finish(),
            Resource::Texture(h) => f.debug_tuple("Texture").field(h).finish(),
            Resource::Buffer(h) => f.debug_tuple("Buffer").field(h).finish(),
            Resource::CommandList(h) => f.debug_tuple("CommandList").field(h).finish(),
        }
    }
}

// =============================================================================
// Pipeline descriptions handed to the backend
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: ShaderStage,
    pub offset: u32,
    pub size: u32,
}

pub struct ShaderStageDesc<'a, B: Backend> {
    pub stage: ShaderStage,
    pub module: B::ShaderModule,
    pub entry_point: &'a str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub rate: VertexInputRate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizerDesc {
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub depth_clip_enabled: bool,
    pub depth_bias: Option<DepthBias>,
    pub line_width: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorBlendDesc {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilFaceDesc {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub compare_op: CompareOp,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub stencil_test: bool,
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
    pub front: StencilFaceDesc,
    pub back: StencilFaceDesc,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
}

/// Everything a backend needs to compile a graphics pipeline.
pub struct GraphicsPipelineDesc<'a, B: Backend> {
    pub name: &'a str,
    pub stages: Vec<ShaderStageDesc<'a, B>>,
    pub vertex_bindings: Vec<VertexBinding>,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub topology: PrimitiveTopology,
    pub rasterizer: RasterizerDesc,
    pub blend_attachments: Vec<ColorBlendDesc>,
    pub blend_constants: [f32; 4],
    pub depth_stencil: DepthStencilDesc,
    pub color_formats: Vec<Format>,
    pub depth_format: Format,
    pub stencil_format: Format,
    pub dynamic_scissor: bool,
    /// Render-target extent, used for the static scissor.
    pub width: u32,
    pub height: u32,
}

// =============================================================================
// Recording descriptions
// =============================================================================

pub struct ColorAttachment<B: Backend> {
    pub texture: B::Texture,
    pub clear: Option<glam::Vec4>,
}

pub struct DepthAttachment<B: Backend> {
    pub texture: B::Texture,
    pub aspect: ImageAspect,
    pub clear_depth: Option<f32>,
    pub clear_stencil: Option<u32>,
    pub read_only: bool,
}

pub struct RenderingInfo<B: Backend> {
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<ColorAttachment<B>>,
    pub depth_attachment: Option<DepthAttachment<B>>,
}

pub enum DescriptorResource<B: Backend> {
    ConstantBuffer(B::Buffer),
    StructuredBuffer(B::Buffer),
    /// Sampled texture in `ShaderReadOnly` or `DepthStencilReadOnly` layout
    Texture {
        texture: B::Texture,
        layout: ImageLayout,
    },
    /// Storage texture in `General` layout; `mip` selects a single level
    TextureStorage {
        texture: B::Texture,
        mip: Option<u32>,
    },
    Sampler(B::Sampler),
}

impl<B: Backend> DescriptorResource<B> {
    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            DescriptorResource::ConstantBuffer(_) => DescriptorType::ConstantBuffer,
            DescriptorResource::StructuredBuffer(_) => DescriptorType::StructuredBuffer,
            DescriptorResource::Texture { .. } => DescriptorType::Texture,
            DescriptorResource::TextureStorage { .. } => DescriptorType::TextureStorage,
            DescriptorResource::Sampler(_) => DescriptorType::Sampler,
        }
    }
}

impl<B: Backend> Clone for DescriptorResource<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend> Copy for DescriptorResource<B> {}

pub struct DescriptorWrite<B: Backend> {
    pub slot: u32,
    pub resource: DescriptorResource<B>,
}

pub struct ImageBarrier<B: Backend> {
    pub texture: B::Texture,
    pub aspect: ImageAspect,
    pub mip_start: u32,
    pub mip_range: u32,
    pub array_length: u32,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
}

/// One mip level of a texture, in the given layout.
pub struct TextureRegion<B: Backend> {
    pub texture: B::Texture,
    pub aspect: ImageAspect,
    pub layout: ImageLayout,
    pub mip: u32,
    pub array_length: u32,
    pub width: u32,
    pub height: u32,
}
