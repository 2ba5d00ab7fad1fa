//! Backend-agnostic enums, limits and identifiers.
//!
//! Everything in here is plain data. Backends translate these values into their
//! native equivalents (see `backend::vulkan::conversions`).

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

/// Maximum number of simultaneously bound color render targets.
pub const MAX_RENDER_TARGET_COUNT: usize = 8;

/// Maximum number of GPU timestamp queries per command list.
pub const MAX_TIMESTAMPS: u32 = 512;

// =============================================================================
// Object identity
// =============================================================================

/// Process-unique identifier assigned to every RHI object at construction.
///
/// Redundant-bind elision and pipeline hashing compare these instead of
/// addresses, so an object that is dropped and reallocated at the same address
/// never aliases its predecessor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Allocates the next identifier. Never returns zero.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Binding-slot reservation table
// =============================================================================

/// Descriptor-set slots of every pipeline layout.
///
/// Shaders declare their bindings against these set indices, so every backend
/// must assemble pipeline layouts in exactly this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DescriptorSetSlot {
    /// Per-pipeline resources reflected from the shaders
    Resources = 0,
    /// The fixed comparison sampler used for shadow lookups
    ComparisonSampler = 1,
    /// The fixed set of regular samplers
    RegularSamplers = 2,
}

impl DescriptorSetSlot {
    /// All slots, in pipeline-layout order.
    pub const ALL: [DescriptorSetSlot; 3] = [
        DescriptorSetSlot::Resources,
        DescriptorSetSlot::ComparisonSampler,
        DescriptorSetSlot::RegularSamplers,
    ];

    #[inline]
    pub fn index(self) -> u32 {
        self as u32
    }
}

// =============================================================================
// Queues and resource kinds
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Copy,
}

impl QueueType {
    pub fn name(self) -> &'static str {
        match self {
            QueueType::Graphics => "graphics",
            QueueType::Compute => "compute",
            QueueType::Copy => "copy",
        }
    }
}

/// Kind tag for deferred release.
///
/// Declaration order is release order: objects that reference others go first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    Pipeline,
    PipelineLayout,
    DescriptorSetLayout,
    Shader,
    Sampler,
    Texture,
    Buffer,
    CommandList,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

// =============================================================================
// Formats and layouts
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Format {
    // R
    R8Unorm,
    R8Uint,
    R16Unorm,
    R16Uint,
    R16Float,
    R32Uint,
    R32Float,
    // RG
    R8G8Unorm,
    R16G16Float,
    R32G32Float,
    // RGB
    R11G11B10Float,
    R32G32B32Float,
    // RGBA
    R8G8B8A8Unorm,
    R10G10B10A2Unorm,
    R16G16B16A16Unorm,
    R16G16B16A16Snorm,
    R16G16B16A16Float,
    R32G32B32A32Float,
    // Depth
    D16Unorm,
    D32Float,
    D32FloatS8X24Uint,
    // Surface
    B8R8G8A8Unorm,
    #[default]
    Undefined,
}

impl Format {
    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D16Unorm | Format::D32Float | Format::D32FloatS8X24Uint
        )
    }

    #[inline]
    pub fn is_stencil(self) -> bool {
        matches!(self, Format::D32FloatS8X24Uint)
    }

    /// Size of one texel or vertex element in bytes.
    pub fn bytes_per_element(self) -> u32 {
        match self {
            Format::R8Unorm | Format::R8Uint => 1,
            Format::R16Unorm | Format::R16Uint | Format::R16Float | Format::D16Unorm => 2,
            Format::R8G8Unorm => 2,
            Format::R32Uint | Format::R32Float | Format::D32Float => 4,
            Format::R16G16Float | Format::R11G11B10Float => 4,
            Format::R8G8B8A8Unorm | Format::R10G10B10A2Unorm | Format::B8R8G8A8Unorm => 4,
            Format::R32G32Float | Format::D32FloatS8X24Uint => 8,
            Format::R16G16B16A16Unorm | Format::R16G16B16A16Snorm | Format::R16G16B16A16Float => 8,
            Format::R32G32B32Float => 12,
            Format::R32G32B32A32Float => 16,
            Format::Undefined => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    Preinitialized,
    ColorAttachment,
    DepthAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

bitflags! {
    /// Image aspects touched by a barrier, clear or copy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageAspect: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

impl ImageAspect {
    /// Aspect mask implied by a format.
    pub fn from_format(format: Format) -> Self {
        if format.is_stencil() {
            ImageAspect::DEPTH | ImageAspect::STENCIL
        } else if format.is_depth() {
            ImageAspect::DEPTH
        } else {
            ImageAspect::COLOR
        }
    }
}

// =============================================================================
// Shader stages and descriptors
// =============================================================================

bitflags! {
    /// Shader stage mask.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u32 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        if self == ShaderStage::VERTEX {
            "vertex"
        } else if self == ShaderStage::PIXEL {
            "pixel"
        } else if self == ShaderStage::COMPUTE {
            "compute"
        } else {
            "mixed"
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    Texture,
    TextureStorage,
    PushConstantBuffer,
    ConstantBuffer,
    StructuredBuffer,
}

// =============================================================================
// Fixed-function state
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    LineList,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    #[default]
    Solid,
    Wireframe,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    #[default]
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
    SrcAlphaSat,
    /// The blend state's constant factor
    Constant,
    InvConstant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SamplerAddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    ClampToBorder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

// =============================================================================
// Viewport, scissor, clear values
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub depth_min: f32,
    pub depth_max: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            depth_min: 0.0,
            depth_max: 1.0,
        }
    }
}

/// Scissor rectangle in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color(glam::Vec4),
    DepthStencil { depth: f32, stencil: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ids_are_unique_and_nonzero() {
        let a = ObjectId::next();
        let b = ObjectId::next();
        assert_ne!(a, b);
        assert!(a.get() > 0);
        assert!(b.get() > 0);
    }

    #[test]
    fn test_descriptor_set_slot_order() {
        let indices: Vec<u32> = DescriptorSetSlot::ALL.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(DescriptorSetSlot::ComparisonSampler.index(), 1);
        assert_eq!(DescriptorSetSlot::RegularSamplers.index(), 2);
    }

    #[test]
    fn test_depth_stencil_predicates() {
        assert!(Format::D32Float.is_depth());
        assert!(!Format::D32Float.is_stencil());
        assert!(Format::D32FloatS8X24Uint.is_depth());
        assert!(Format::D32FloatS8X24Uint.is_stencil());
        assert!(!Format::R8G8B8A8Unorm.is_depth());
    }

    #[test]
    fn test_aspect_from_format() {
        assert_eq!(ImageAspect::from_format(Format::R16G16B16A16Float), ImageAspect::COLOR);
        assert_eq!(ImageAspect::from_format(Format::D32Float), ImageAspect::DEPTH);
        assert_eq!(
            ImageAspect::from_format(Format::D32FloatS8X24Uint),
            ImageAspect::DEPTH | ImageAspect::STENCIL
        );
    }

    #[test]
    fn test_release_order() {
        assert!(ResourceType::Pipeline < ResourceType::PipelineLayout);
        assert!(ResourceType::PipelineLayout < ResourceType::DescriptorSetLayout);
        assert!(ResourceType::Texture < ResourceType::Buffer);
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(Format::R32G32B32A32Float.bytes_per_element(), 16);
        assert_eq!(Format::R32G32B32Float.bytes_per_element(), 12);
        assert_eq!(Format::Undefined.bytes_per_element(), 0);
    }

    #[test]
    fn test_shader_stage_names() {
        assert_eq!(ShaderStage::VERTEX.name(), "vertex");
        assert_eq!(ShaderStage::PIXEL.name(), "pixel");
        assert_eq!((ShaderStage::VERTEX | ShaderStage::PIXEL).name(), "mixed");
    }
}
