//! Render Hardware Interface.
//!
//! A thin, backend-agnostic layer over an explicit graphics API. It handles:
//! - Pipeline state descriptions and compiled pipelines
//! - Descriptor set layouts merged from shader reflection
//! - Command list recording with state validation and bind elision
//! - Deferred release of GPU handles
//!
//! Concrete graphics APIs plug in through [`backend::Backend`]. The Vulkan
//! backend is behind the `vulkan` feature; [`backend::null::NullBackend`]
//! records commands in memory and is always available.

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod counters;
pub mod definitions;
pub mod deletion_queue;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod pipeline_state;
pub mod sampler;
pub mod shader;
pub mod state;
pub mod swapchain;
pub mod texture;

pub use error::{RhiError, RhiResult};

pub use buffer::{Buffer, BufferDesc, BufferUsage};
pub use command::{CommandList, CommandListState, GpuTiming};
pub use counters::{Counter, CounterSink, CounterSnapshot, FrameCounters};
pub use definitions::{
    BlendFactor, BlendOp, ClearValue, CompareOp, CullMode, DescriptorSetSlot, DescriptorType,
    Filter, Format, ImageAspect, ImageLayout, IndexFormat, MAX_RENDER_TARGET_COUNT,
    MAX_TIMESTAMPS, ObjectId, PipelineKind, PolygonMode, PrimitiveTopology, QueueType, Rect,
    ResourceType, SamplerAddressMode, ShaderStage, StencilOp, Viewport,
};
pub use deletion_queue::DeletionQueue;
pub use descriptor::{Descriptor, DescriptorSetLayout};
pub use device::{Device, DeviceSettings};
pub use pipeline::Pipeline;
pub use pipeline_state::PipelineState;
pub use sampler::{Sampler, SamplerDesc};
pub use shader::{Shader, ShaderReflection};
pub use state::{BlendState, DepthStencilState, RasterizerState};
pub use swapchain::Swapchain;
pub use texture::{Texture, TextureDesc, TextureFlags};

pub use backend::null::NullBackend;
#[cfg(feature = "vulkan")]
pub use backend::vulkan::VulkanBackend;

#[cfg(feature = "vulkan")]
pub use ash::vk;
