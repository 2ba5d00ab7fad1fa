//! Translation of RHI enums into their Vulkan equivalents.

use ash::vk;

use crate::backend::VertexInputRate;
use crate::definitions::{
    BlendFactor, BlendOp, CompareOp, CullMode, DescriptorType, Filter, Format, ImageAspect,
    ImageLayout, IndexFormat, PolygonMode, PrimitiveTopology, SamplerAddressMode, ShaderStage,
    StencilOp,
};

impl Format {
    pub fn to_vk(self) -> vk::Format {
        match self {
            Format::R8Unorm => vk::Format::R8_UNORM,
            Format::R8Uint => vk::Format::R8_UINT,
            Format::R16Unorm => vk::Format::R16_UNORM,
            Format::R16Uint => vk::Format::R16_UINT,
            Format::R16Float => vk::Format::R16_SFLOAT,
            Format::R32Uint => vk::Format::R32_UINT,
            Format::R32Float => vk::Format::R32_SFLOAT,
            Format::R8G8Unorm => vk::Format::R8G8_UNORM,
            Format::R16G16Float => vk::Format::R16G16_SFLOAT,
            Format::R32G32Float => vk::Format::R32G32_SFLOAT,
            Format::R11G11B10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
            Format::R32G32B32Float => vk::Format::R32G32B32_SFLOAT,
            Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::R10G10B10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
            Format::R16G16B16A16Unorm => vk::Format::R16G16B16A16_UNORM,
            Format::R16G16B16A16Snorm => vk::Format::R16G16B16A16_SNORM,
            Format::R16G16B16A16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
            Format::D16Unorm => vk::Format::D16_UNORM,
            Format::D32Float => vk::Format::D32_SFLOAT,
            Format::D32FloatS8X24Uint => vk::Format::D32_SFLOAT_S8_UINT,
            Format::B8R8G8A8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::Undefined => vk::Format::UNDEFINED,
        }
    }
}

impl ImageLayout {
    pub fn to_vk(self) -> vk::ImageLayout {
        match self {
            ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayout::General => vk::ImageLayout::GENERAL,
            ImageLayout::Preinitialized => vk::ImageLayout::PREINITIALIZED,
            ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            ImageLayout::DepthStencilAttachment => {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            }
            ImageLayout::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Pipeline stages and accesses that touch an image in this layout, used
    /// as the source (old layout) or destination (new layout) scope of a
    /// barrier.
    pub fn sync_scope(self) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        match self {
            ImageLayout::Undefined | ImageLayout::Preinitialized => {
                (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE)
            }
            ImageLayout::General => (
                vk::PipelineStageFlags2::ALL_COMMANDS,
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
            ImageLayout::ColorAttachment => (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            ),
            ImageLayout::DepthAttachment | ImageLayout::DepthStencilAttachment => (
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            ImageLayout::DepthStencilReadOnly => (
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::FRAGMENT_SHADER
                    | vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::SHADER_READ,
            ),
            ImageLayout::ShaderReadOnly => (
                vk::PipelineStageFlags2::VERTEX_SHADER
                    | vk::PipelineStageFlags2::FRAGMENT_SHADER
                    | vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
            ),
            ImageLayout::TransferSrc => (
                vk::PipelineStageFlags2::ALL_TRANSFER,
                vk::AccessFlags2::TRANSFER_READ,
            ),
            ImageLayout::TransferDst => (
                vk::PipelineStageFlags2::ALL_TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
            ),
            ImageLayout::PresentSrc => {
                (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE)
            }
        }
    }
}

impl ImageAspect {
    pub fn to_vk(self) -> vk::ImageAspectFlags {
        let mut flags = vk::ImageAspectFlags::empty();
        if self.contains(ImageAspect::COLOR) {
            flags |= vk::ImageAspectFlags::COLOR;
        }
        if self.contains(ImageAspect::DEPTH) {
            flags |= vk::ImageAspectFlags::DEPTH;
        }
        if self.contains(ImageAspect::STENCIL) {
            flags |= vk::ImageAspectFlags::STENCIL;
        }
        flags
    }
}

impl ShaderStage {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        let mut flags = vk::ShaderStageFlags::empty();
        if self.contains(ShaderStage::VERTEX) {
            flags |= vk::ShaderStageFlags::VERTEX;
        }
        if self.contains(ShaderStage::PIXEL) {
            flags |= vk::ShaderStageFlags::FRAGMENT;
        }
        if self.contains(ShaderStage::COMPUTE) {
            flags |= vk::ShaderStageFlags::COMPUTE;
        }
        flags
    }
}

impl DescriptorType {
    /// `None` for push constants, which live outside descriptor sets.
    pub fn to_vk(self) -> Option<vk::DescriptorType> {
        match self {
            DescriptorType::Sampler => Some(vk::DescriptorType::SAMPLER),
            DescriptorType::Texture => Some(vk::DescriptorType::SAMPLED_IMAGE),
            DescriptorType::TextureStorage => Some(vk::DescriptorType::STORAGE_IMAGE),
            DescriptorType::ConstantBuffer => Some(vk::DescriptorType::UNIFORM_BUFFER),
            DescriptorType::StructuredBuffer => Some(vk::DescriptorType::STORAGE_BUFFER),
            DescriptorType::PushConstantBuffer => None,
        }
    }
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        }
    }
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

impl PolygonMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Solid => vk::PolygonMode::FILL,
            PolygonMode::Wireframe => vk::PolygonMode::LINE,
        }
    }
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

impl StencilOp {
    pub fn to_vk(self) -> vk::StencilOp {
        match self {
            StencilOp::Keep => vk::StencilOp::KEEP,
            StencilOp::Zero => vk::StencilOp::ZERO,
            StencilOp::Replace => vk::StencilOp::REPLACE,
            StencilOp::IncrSat => vk::StencilOp::INCREMENT_AND_CLAMP,
            StencilOp::DecrSat => vk::StencilOp::DECREMENT_AND_CLAMP,
            StencilOp::Invert => vk::StencilOp::INVERT,
            StencilOp::Incr => vk::StencilOp::INCREMENT_AND_WRAP,
            StencilOp::Decr => vk::StencilOp::DECREMENT_AND_WRAP,
        }
    }
}

impl BlendFactor {
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DestAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::InvDestAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            BlendFactor::DestColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::InvDestColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::SrcAlphaSat => vk::BlendFactor::SRC_ALPHA_SATURATE,
            BlendFactor::Constant => vk::BlendFactor::CONSTANT_COLOR,
            BlendFactor::InvConstant => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        }
    }
}

impl BlendOp {
    pub fn to_vk(self) -> vk::BlendOp {
        match self {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::RevSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

impl Filter {
    pub fn to_vk(self) -> vk::Filter {
        match self {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }

    pub fn to_vk_mipmap(self) -> vk::SamplerMipmapMode {
        match self {
            Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
            Filter::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

impl SamplerAddressMode {
    pub fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            SamplerAddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
            SamplerAddressMode::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
            SamplerAddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            SamplerAddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

impl IndexFormat {
    pub fn to_vk(self) -> vk::IndexType {
        match self {
            IndexFormat::U16 => vk::IndexType::UINT16,
            IndexFormat::U32 => vk::IndexType::UINT32,
        }
    }
}

impl VertexInputRate {
    pub fn to_vk(self) -> vk::VertexInputRate {
        match self {
            VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
            VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_masks() {
        assert_eq!(
            (ShaderStage::VERTEX | ShaderStage::PIXEL).to_vk(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ShaderStage::COMPUTE.to_vk(), vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_depth_stencil_aspect() {
        let aspect = ImageAspect::from_format(Format::D32FloatS8X24Uint);
        assert_eq!(
            aspect.to_vk(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_reverse_z_compare() {
        assert_eq!(CompareOp::GreaterEqual.to_vk(), vk::CompareOp::GREATER_OR_EQUAL);
    }

    #[test]
    fn test_push_constants_have_no_descriptor_type() {
        assert_eq!(DescriptorType::PushConstantBuffer.to_vk(), None);
        assert_eq!(
            DescriptorType::ConstantBuffer.to_vk(),
            Some(vk::DescriptorType::UNIFORM_BUFFER)
        );
    }

    #[test]
    fn test_undefined_layout_has_no_source_access() {
        let (stage, access) = ImageLayout::Undefined.sync_scope();
        assert_eq!(stage, vk::PipelineStageFlags2::TOP_OF_PIPE);
        assert_eq!(access, vk::AccessFlags2::NONE);
    }
}
