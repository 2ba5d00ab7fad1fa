//! Vulkan 1.3 backend built on ash and gpu-allocator.
//!
//! The backend is headless: render targets, including the swapchain images
//! managed by the core, are ordinary device-local images. Rendering uses
//! dynamic rendering and synchronization2; per-draw resources go through push
//! descriptors.

mod command;
pub mod conversions;
mod device;
mod instance;
mod physical_device;
mod pipeline;
mod resources;

use std::ffi::CString;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

pub use device::LogicalDevice;
pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device};

use self::command::CommandRecords;
use self::resources::ResourceTables;
use super::{
    Backend, Capabilities, DescriptorWrite, GpuHandle, GraphicsPipelineDesc, ImageBarrier,
    PushConstantRange, RenderingInfo, Resource, ShaderStageDesc, TextureRegion,
};
use crate::buffer::BufferDesc;
use crate::definitions::{
    ClearValue, ImageAspect, ImageLayout, IndexFormat, PipelineKind, QueueType, Rect,
    ShaderStage, Viewport,
};
use crate::descriptor::Descriptor;
use crate::error::RhiResult;
use crate::sampler::SamplerDesc;
use crate::texture::TextureDesc;

macro_rules! impl_gpu_handle {
    ($($ty:ty),* $(,)?) => {
        $(
            impl GpuHandle for $ty {
                #[inline]
                fn is_null(&self) -> bool {
                    *self == <$ty>::null()
                }
            }
        )*
    };
}

impl_gpu_handle!(
    vk::ShaderModule,
    vk::DescriptorSetLayout,
    vk::PipelineLayout,
    vk::Pipeline,
    vk::CommandBuffer,
    vk::Buffer,
    vk::Image,
    vk::Sampler,
);

/// The immutable samplers bound at sets 1 and 2 of every pipeline layout.
struct SamplerSets {
    samplers: Vec<vk::Sampler>,
    layouts: [vk::DescriptorSetLayout; 2],
    pool: vk::DescriptorPool,
    sets: [vk::DescriptorSet; 2],
}

pub struct VulkanBackend {
    sampler_sets: SamplerSets,
    commands: CommandRecords,
    resources: ResourceTables,
    capabilities: Capabilities,
    physical_device: PhysicalDeviceInfo,
    // Dropped after everything above has been destroyed through it.
    device: LogicalDevice,
    _instance: Instance,
}

impl VulkanBackend {
    /// Loads Vulkan, picks a GPU and creates the device.
    ///
    /// # Errors
    ///
    /// Fails when no Vulkan loader is present or no GPU supports Vulkan 1.3
    /// with push descriptors.
    pub fn new(enable_validation: bool) -> RhiResult<Self> {
        let instance = Instance::new(enable_validation)?;
        let physical_device = select_physical_device(instance.handle())?;
        let device = LogicalDevice::new(&instance, &physical_device)?;
        let capabilities = physical_device.capabilities();
        let resources = ResourceTables::default();

        let sampler_sets = create_sampler_sets(&device, &resources)?;
        info!(
            "Vulkan backend ready on '{}' (timestamps: {})",
            capabilities.device_name, capabilities.timestamps_supported
        );

        Ok(Self {
            sampler_sets,
            commands: CommandRecords::default(),
            resources,
            capabilities,
            physical_device,
            device,
            _instance: instance,
        })
    }

    #[inline]
    pub fn device(&self) -> &LogicalDevice {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    fn name_object<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = self.device.debug_utils() else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            warn!("Failed to name object: {:?}", e);
        }
    }
}

fn create_sampler_sets(device: &LogicalDevice, resources: &ResourceTables) -> RhiResult<SamplerSets> {
    let comparison = resources.create_sampler(device, &SamplerDesc::COMPARE_DEPTH)?;
    let mut regular = Vec::with_capacity(SamplerDesc::REGULAR.len());
    for desc in &SamplerDesc::REGULAR {
        regular.push(resources.create_sampler(device, desc)?);
    }

    let layouts = [
        pipeline::create_sampler_set_layout(device, std::slice::from_ref(&comparison))?,
        pipeline::create_sampler_set_layout(device, &regular)?,
    ];
    let (pool, sets) =
        pipeline::allocate_sampler_sets(device, &layouts, 1 + regular.len() as u32)?;
    debug!("Created {} immutable sampler(s)", 1 + regular.len());

    let mut samplers = regular;
    samplers.insert(0, comparison);
    Ok(SamplerSets {
        samplers,
        layouts,
        pool,
        sets,
    })
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("Failed to wait for device idle during drop: {:?}", e);
        }
        self.commands.destroy_all(&self.device);
        self.resources.destroy_all(&self.device);
        let raw = self.device.handle();
        unsafe {
            raw.destroy_descriptor_pool(self.sampler_sets.pool, None);
            for layout in self.sampler_sets.layouts {
                raw.destroy_descriptor_set_layout(layout, None);
            }
            for &sampler in &self.sampler_sets.samplers {
                raw.destroy_sampler(sampler, None);
            }
        }
        info!("Vulkan backend destroyed");
    }
}

impl Backend for VulkanBackend {
    type ShaderModule = vk::ShaderModule;
    type DescriptorSetLayout = vk::DescriptorSetLayout;
    type PipelineLayout = vk::PipelineLayout;
    type Pipeline = vk::Pipeline;
    type CommandBuffer = vk::CommandBuffer;
    type Buffer = vk::Buffer;
    type Texture = vk::Image;
    type Sampler = vk::Sampler;

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn sampler_set_layouts(&self) -> [vk::DescriptorSetLayout; 2] {
        self.sampler_sets.layouts
    }

    fn create_shader_module(&self, bytecode: &[u8], name: &str) -> RhiResult<vk::ShaderModule> {
        let module = pipeline::create_shader_module(&self.device, bytecode)?;
        self.name_object(module, name);
        Ok(module)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<vk::Buffer> {
        self.resources.create_buffer(&self.device, desc)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        self.resources.write_buffer(buffer, offset, data)
    }

    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<vk::Image> {
        self.resources.create_texture(&self.device, desc)
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        self.resources.create_sampler(&self.device, desc)
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[Descriptor],
        name: &str,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let layout = pipeline::create_resource_set_layout(&self.device, bindings)?;
        self.name_object(layout, name);
        Ok(layout)
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout; 3],
        push_constant_ranges: &[PushConstantRange],
        name: &str,
    ) -> RhiResult<vk::PipelineLayout> {
        let layout =
            pipeline::create_pipeline_layout(&self.device, set_layouts, push_constant_ranges)?;
        self.name_object(layout, name);
        Ok(layout)
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_, Self>,
        layout: vk::PipelineLayout,
    ) -> RhiResult<vk::Pipeline> {
        let pipeline = pipeline::create_graphics_pipeline(&self.device, desc, layout)?;
        self.name_object(pipeline, desc.name);
        Ok(pipeline)
    }

    fn create_compute_pipeline(
        &self,
        stage: &ShaderStageDesc<'_, Self>,
        layout: vk::PipelineLayout,
        name: &str,
    ) -> RhiResult<vk::Pipeline> {
        let pipeline = pipeline::create_compute_pipeline(&self.device, stage, layout, name)?;
        self.name_object(pipeline, name);
        Ok(pipeline)
    }

    fn set_name(&self, resource: Resource<Self>, name: &str) {
        match resource {
            Resource::Pipeline(h) => self.name_object(h, name),
            Resource::PipelineLayout(h) => self.name_object(h, name),
            Resource::DescriptorSetLayout(h) => self.name_object(h, name),
            Resource::Shader(h) => self.name_object(h, name),
            Resource::Sampler(h) => self.name_object(h, name),
            Resource::Texture(h) => self.name_object(h, name),
            Resource::Buffer(h) => self.name_object(h, name),
            Resource::CommandList(h) => self.name_object(h, name),
        }
    }

    fn release(&self, resource: Resource<Self>) {
        let raw = self.device.handle();
        unsafe {
            match resource {
                Resource::Pipeline(h) => raw.destroy_pipeline(h, None),
                Resource::PipelineLayout(h) => raw.destroy_pipeline_layout(h, None),
                Resource::DescriptorSetLayout(h) => raw.destroy_descriptor_set_layout(h, None),
                Resource::Shader(h) => raw.destroy_shader_module(h, None),
                Resource::Sampler(h) => raw.destroy_sampler(h, None),
                Resource::Texture(h) => self.resources.destroy_texture(&self.device, h),
                Resource::Buffer(h) => self.resources.destroy_buffer(&self.device, h),
                Resource::CommandList(h) => self.commands.destroy(&self.device, h),
            }
        }
    }

    fn create_command_buffer(&self, queue: QueueType, name: &str) -> RhiResult<vk::CommandBuffer> {
        let cmd = self.commands.create(
            &self.device,
            queue,
            self.capabilities.timestamps_supported,
        )?;
        self.name_object(cmd, name);
        Ok(cmd)
    }

    fn submit(&self, cmd: vk::CommandBuffer, queue: QueueType) -> RhiResult<()> {
        debug_assert_eq!(self.commands.queue_of(cmd).ok(), Some(queue));
        self.commands.submit(&self.device, cmd, queue)
    }

    fn is_complete(&self, cmd: vk::CommandBuffer) -> RhiResult<bool> {
        self.commands.is_complete(&self.device, cmd)
    }

    fn wait_for_completion(&self, cmd: vk::CommandBuffer, timeout: Duration) -> RhiResult<()> {
        self.commands.wait(&self.device, cmd, timeout)
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn read_timestamps(&self, cmd: vk::CommandBuffer, first: u32, count: u32) -> RhiResult<Vec<u64>> {
        self.commands.read_timestamps(&self.device, cmd, first, count)
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.commands.begin(&self.device, cmd)
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.handle().end_command_buffer(cmd)? };
        Ok(())
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &RenderingInfo<Self>) {
        command::begin_rendering(&self.device, &self.resources, cmd, info);
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.handle().cmd_end_rendering(cmd) };
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        kind: PipelineKind,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    ) {
        let raw = self.device.handle();
        let bind_point = command::bind_point(kind);
        unsafe {
            raw.cmd_bind_pipeline(cmd, bind_point, pipeline);
            raw.cmd_bind_descriptor_sets(cmd, bind_point, layout, 1, &self.sampler_sets.sets, &[]);
        }
    }

    fn cmd_bind_descriptors(
        &self,
        cmd: vk::CommandBuffer,
        kind: PipelineKind,
        layout: vk::PipelineLayout,
        writes: &[DescriptorWrite<Self>],
    ) {
        command::push_descriptors(&self.device, &self.resources, cmd, kind, layout, writes);
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: ShaderStage,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_push_constants(cmd, layout, stages.to_vk(), offset, data)
        };
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, binding: u32, buffer: vk::Buffer) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(cmd, binding, &[buffer], &[0])
        };
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, format: IndexFormat) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(cmd, buffer, 0, format.to_vk())
        };
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &Viewport) {
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.depth_min,
            max_depth: viewport.depth_max,
        };
        unsafe { self.device.handle().cmd_set_viewport(cmd, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, rect: &Rect) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.x,
                y: rect.y,
            },
            extent: vk::Extent2D {
                width: rect.width,
                height: rect.height,
            },
        };
        unsafe { self.device.handle().cmd_set_scissor(cmd, 0, &[scissor]) };
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, first_vertex: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw(cmd, vertex_count, 1, first_vertex, 0)
        };
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
        instance_count: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                0,
            )
        };
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.handle().cmd_dispatch(cmd, x, y, z) };
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier<Self>) {
        command::image_barrier(&self.device, cmd, barrier);
    }

    fn cmd_blit(&self, cmd: vk::CommandBuffer, src: &TextureRegion<Self>, dst: &TextureRegion<Self>) {
        command::blit(&self.device, cmd, src, dst);
    }

    fn cmd_copy(&self, cmd: vk::CommandBuffer, src: &TextureRegion<Self>, dst: &TextureRegion<Self>) {
        command::copy(&self.device, cmd, src, dst);
    }

    fn cmd_clear_texture(
        &self,
        cmd: vk::CommandBuffer,
        texture: vk::Image,
        aspect: ImageAspect,
        layout: ImageLayout,
        value: ClearValue,
    ) {
        command::clear_texture(&self.device, cmd, texture, aspect, layout, value);
    }

    fn cmd_write_timestamp(&self, cmd: vk::CommandBuffer, index: u32) {
        if let Some(query_pool) = self.commands.query_pool(cmd) {
            unsafe {
                self.device.handle().cmd_write_timestamp2(
                    cmd,
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                    query_pool,
                    index,
                )
            };
        }
    }

    fn cmd_begin_marker(&self, cmd: vk::CommandBuffer, name: &str) {
        command::begin_marker(&self.device, cmd, name);
    }

    fn cmd_end_marker(&self, cmd: vk::CommandBuffer) {
        command::end_marker(&self.device, cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles() {
        assert!(vk::Pipeline::null().is_null());
        assert!(vk::CommandBuffer::null().is_null());
        assert!(!<vk::Buffer as vk::Handle>::from_raw(42).is_null());
    }

    #[test]
    fn test_backend_creation() {
        // Machines without a Vulkan loader or a capable GPU skip the test.
        match VulkanBackend::new(false) {
            Ok(backend) => {
                assert_eq!(backend.name(), "vulkan");
                assert!(backend.capabilities().max_push_constant_size >= 128);
                assert!(backend.sampler_set_layouts().iter().all(|l| !l.is_null()));
            }
            Err(e) => eprintln!("Skipping Vulkan backend test: {}", e),
        }
    }
}
