//! Command pools, fences, timestamp queries and command recording.

use std::collections::HashMap;
use std::ffi::CString;
use std::time::Duration;

use ash::vk;
use parking_lot::Mutex;
use tracing::{error, warn};

use super::device::LogicalDevice;
use super::resources::ResourceTables;
use crate::backend::{
    DescriptorResource, DescriptorWrite, ImageBarrier, RenderingInfo, TextureRegion,
};
use crate::definitions::{
    ClearValue, ImageAspect, ImageLayout, MAX_TIMESTAMPS, PipelineKind, QueueType,
};
use crate::error::{RhiError, RhiResult};

/// Everything owned by one command buffer. Each buffer gets its own pool so
/// that beginning it again is a pool reset.
struct CommandRecord {
    pool: vk::CommandPool,
    fence: vk::Fence,
    query_pool: Option<vk::QueryPool>,
    queue: QueueType,
    submitted: bool,
}

#[derive(Default)]
pub struct CommandRecords {
    records: Mutex<HashMap<vk::CommandBuffer, CommandRecord>>,
}

impl CommandRecords {
    pub fn create(
        &self,
        device: &LogicalDevice,
        queue: QueueType,
        timestamps: bool,
    ) -> RhiResult<vk::CommandBuffer> {
        let raw = device.handle();
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(device.queue_family(queue));
        let pool = unsafe { raw.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = match unsafe { raw.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { raw.destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };

        let fence = unsafe { raw.create_fence(&vk::FenceCreateInfo::default(), None)? };

        let query_pool = if timestamps {
            let info = vk::QueryPoolCreateInfo::default()
                .query_type(vk::QueryType::TIMESTAMP)
                .query_count(MAX_TIMESTAMPS);
            Some(unsafe { raw.create_query_pool(&info, None)? })
        } else {
            None
        };

        self.records.lock().insert(
            cmd,
            CommandRecord {
                pool,
                fence,
                query_pool,
                queue,
                submitted: false,
            },
        );
        Ok(cmd)
    }

    pub fn destroy(&self, device: &LogicalDevice, cmd: vk::CommandBuffer) {
        let Some(record) = self.records.lock().remove(&cmd) else {
            warn!("Release of unknown command buffer {:?}", cmd);
            return;
        };
        destroy_record(device, cmd, record);
    }

    pub fn destroy_all(&self, device: &LogicalDevice) {
        let records: Vec<_> = self.records.lock().drain().collect();
        for (cmd, record) in records {
            destroy_record(device, cmd, record);
        }
    }

    fn with_record<T>(
        &self,
        cmd: vk::CommandBuffer,
        f: impl FnOnce(&mut CommandRecord) -> RhiResult<T>,
    ) -> RhiResult<T> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(&cmd)
            .ok_or_else(|| RhiError::InvalidHandle(format!("Unknown command buffer {:?}", cmd)))?;
        f(record)
    }

    pub fn queue_of(&self, cmd: vk::CommandBuffer) -> RhiResult<QueueType> {
        self.with_record(cmd, |record| Ok(record.queue))
    }

    pub fn query_pool(&self, cmd: vk::CommandBuffer) -> Option<vk::QueryPool> {
        self.records.lock().get(&cmd).and_then(|r| r.query_pool)
    }

    pub fn begin(&self, device: &LogicalDevice, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.with_record(cmd, |record| {
            let raw = device.handle();
            unsafe {
                raw.reset_command_pool(record.pool, vk::CommandPoolResetFlags::empty())?;
                let begin_info = vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                raw.begin_command_buffer(cmd, &begin_info)?;
                if let Some(query_pool) = record.query_pool {
                    raw.cmd_reset_query_pool(cmd, query_pool, 0, MAX_TIMESTAMPS);
                }
            }
            Ok(())
        })
    }

    pub fn submit(
        &self,
        device: &LogicalDevice,
        cmd: vk::CommandBuffer,
        queue: QueueType,
    ) -> RhiResult<()> {
        self.with_record(cmd, |record| {
            unsafe { device.handle().reset_fences(&[record.fence])? };
            device.submit(queue, cmd, record.fence)?;
            record.submitted = true;
            Ok(())
        })
    }

    pub fn is_complete(&self, device: &LogicalDevice, cmd: vk::CommandBuffer) -> RhiResult<bool> {
        self.with_record(cmd, |record| {
            if !record.submitted {
                return Ok(true);
            }
            Ok(unsafe { device.handle().get_fence_status(record.fence)? })
        })
    }

    pub fn wait(
        &self,
        device: &LogicalDevice,
        cmd: vk::CommandBuffer,
        timeout: Duration,
    ) -> RhiResult<()> {
        let fence = self.with_record(cmd, |record| Ok(record.submitted.then_some(record.fence)))?;
        let Some(fence) = fence else {
            return Ok(());
        };
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { device.handle().wait_for_fences(&[fence], true, nanos) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout(format!("command buffer {:?}", cmd))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_timestamps(
        &self,
        device: &LogicalDevice,
        cmd: vk::CommandBuffer,
        first: u32,
        count: u32,
    ) -> RhiResult<Vec<u64>> {
        let mut ticks = vec![0u64; count as usize];
        let Some(query_pool) = self.query_pool(cmd) else {
            return Ok(ticks);
        };
        let result = unsafe {
            device.handle().get_query_pool_results(
                query_pool,
                first,
                &mut ticks,
                vk::QueryResultFlags::TYPE_64,
            )
        };
        match result {
            // Unwritten slots stay zero.
            Ok(()) | Err(vk::Result::NOT_READY) => Ok(ticks),
            Err(e) => Err(e.into()),
        }
    }
}

fn destroy_record(device: &LogicalDevice, cmd: vk::CommandBuffer, record: CommandRecord) {
    let raw = device.handle();
    unsafe {
        if record.submitted
            && let Err(e) = raw.wait_for_fences(&[record.fence], true, u64::MAX)
        {
            error!("Failed to wait for command buffer {:?}: {:?}", cmd, e);
        }
        raw.free_command_buffers(record.pool, &[cmd]);
        raw.destroy_command_pool(record.pool, None);
        raw.destroy_fence(record.fence, None);
        if let Some(query_pool) = record.query_pool {
            raw.destroy_query_pool(query_pool, None);
        }
    }
}

pub fn bind_point(kind: PipelineKind) -> vk::PipelineBindPoint {
    match kind {
        PipelineKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

fn load_op(clear: bool) -> vk::AttachmentLoadOp {
    if clear {
        vk::AttachmentLoadOp::CLEAR
    } else {
        vk::AttachmentLoadOp::LOAD
    }
}

pub fn begin_rendering(
    device: &LogicalDevice,
    resources: &ResourceTables,
    cmd: vk::CommandBuffer,
    info: &RenderingInfo<super::VulkanBackend>,
) {
    let color_attachments: Vec<vk::RenderingAttachmentInfo> = info
        .color_attachments
        .iter()
        .map(|attachment| {
            let clear = attachment.clear.unwrap_or_default();
            vk::RenderingAttachmentInfo::default()
                .image_view(resources.view(attachment.texture, None))
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(load_op(attachment.clear.is_some()))
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: clear.to_array(),
                    },
                })
        })
        .collect();

    let depth_stencil = info.depth_attachment.as_ref().map(|depth| {
        let layout = if depth.read_only {
            ImageLayout::DepthStencilReadOnly
        } else if depth.aspect.contains(ImageAspect::STENCIL) {
            ImageLayout::DepthStencilAttachment
        } else {
            ImageLayout::DepthAttachment
        };
        let store_op = if depth.read_only {
            vk::AttachmentStoreOp::NONE
        } else {
            vk::AttachmentStoreOp::STORE
        };
        let clear_value = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: depth.clear_depth.unwrap_or(0.0),
                stencil: depth.clear_stencil.unwrap_or(0),
            },
        };
        let view = resources.view(depth.texture, None);
        let depth_info = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(layout.to_vk())
            .load_op(load_op(depth.clear_depth.is_some()))
            .store_op(store_op)
            .clear_value(clear_value);
        let stencil_info = depth.aspect.contains(ImageAspect::STENCIL).then(|| {
            vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(layout.to_vk())
                .load_op(load_op(depth.clear_stencil.is_some()))
                .store_op(store_op)
                .clear_value(clear_value)
        });
        (depth_info, stencil_info)
    });

    let mut rendering_info = vk::RenderingInfo::default()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: info.width,
                height: info.height,
            },
        })
        .layer_count(1)
        .color_attachments(&color_attachments);
    if let Some((depth_info, stencil_info)) = depth_stencil.as_ref() {
        rendering_info = rendering_info.depth_attachment(depth_info);
        if let Some(stencil_info) = stencil_info {
            rendering_info = rendering_info.stencil_attachment(stencil_info);
        }
    }

    unsafe { device.handle().cmd_begin_rendering(cmd, &rendering_info) };
}

enum WriteInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// Writes the resource set through `VK_KHR_push_descriptor`.
pub fn push_descriptors(
    device: &LogicalDevice,
    resources: &ResourceTables,
    cmd: vk::CommandBuffer,
    kind: PipelineKind,
    layout: vk::PipelineLayout,
    writes: &[DescriptorWrite<super::VulkanBackend>],
) {
    let infos: Vec<WriteInfo> = writes
        .iter()
        .map(|write| match write.resource {
            DescriptorResource::ConstantBuffer(buffer)
            | DescriptorResource::StructuredBuffer(buffer) => {
                WriteInfo::Buffer(vk::DescriptorBufferInfo {
                    buffer,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                })
            }
            DescriptorResource::Texture { texture, layout } => {
                WriteInfo::Image(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: resources.view(texture, None),
                    image_layout: layout.to_vk(),
                })
            }
            DescriptorResource::TextureStorage { texture, mip } => {
                WriteInfo::Image(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: resources.view(texture, mip),
                    image_layout: vk::ImageLayout::GENERAL,
                })
            }
            DescriptorResource::Sampler(sampler) => WriteInfo::Image(vk::DescriptorImageInfo {
                sampler,
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            }),
        })
        .collect();

    let vk_writes: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .zip(&infos)
        .filter_map(|(write, info)| {
            let ty = write.resource.descriptor_type().to_vk()?;
            let base = vk::WriteDescriptorSet::default()
                .dst_binding(write.slot)
                .descriptor_type(ty);
            Some(match info {
                WriteInfo::Buffer(buffer) => base.buffer_info(std::slice::from_ref(buffer)),
                WriteInfo::Image(image) => base.image_info(std::slice::from_ref(image)),
            })
        })
        .collect();
    if vk_writes.is_empty() {
        return;
    }

    unsafe {
        device
            .push_descriptor()
            .cmd_push_descriptor_set(cmd, bind_point(kind), layout, 0, &vk_writes);
    }
}

pub fn image_barrier(
    device: &LogicalDevice,
    cmd: vk::CommandBuffer,
    barrier: &ImageBarrier<super::VulkanBackend>,
) {
    let (src_stage, src_access) = barrier.old_layout.sync_scope();
    let (dst_stage, dst_access) = barrier.new_layout.sync_scope();
    let image_barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
        .old_layout(barrier.old_layout.to_vk())
        .new_layout(barrier.new_layout.to_vk())
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(barrier.texture)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: barrier.aspect.to_vk(),
            base_mip_level: barrier.mip_start,
            level_count: barrier.mip_range,
            base_array_layer: 0,
            layer_count: barrier.array_length,
        });
    let dependency =
        vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&image_barrier));
    unsafe { device.handle().cmd_pipeline_barrier2(cmd, &dependency) };
}

fn subresource_layers(region: &TextureRegion<super::VulkanBackend>) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: region.aspect.to_vk(),
        mip_level: region.mip,
        base_array_layer: 0,
        layer_count: region.array_length,
    }
}

fn far_corner(region: &TextureRegion<super::VulkanBackend>) -> vk::Offset3D {
    vk::Offset3D {
        x: region.width as i32,
        y: region.height as i32,
        z: 1,
    }
}

pub fn blit(
    device: &LogicalDevice,
    cmd: vk::CommandBuffer,
    src: &TextureRegion<super::VulkanBackend>,
    dst: &TextureRegion<super::VulkanBackend>,
) {
    let region = vk::ImageBlit2::default()
        .src_subresource(subresource_layers(src))
        .src_offsets([vk::Offset3D::default(), far_corner(src)])
        .dst_subresource(subresource_layers(dst))
        .dst_offsets([vk::Offset3D::default(), far_corner(dst)]);
    let filter = if src.aspect.intersects(ImageAspect::DEPTH | ImageAspect::STENCIL) {
        vk::Filter::NEAREST
    } else {
        vk::Filter::LINEAR
    };
    let info = vk::BlitImageInfo2::default()
        .src_image(src.texture)
        .src_image_layout(src.layout.to_vk())
        .dst_image(dst.texture)
        .dst_image_layout(dst.layout.to_vk())
        .regions(std::slice::from_ref(&region))
        .filter(filter);
    unsafe { device.handle().cmd_blit_image2(cmd, &info) };
}

pub fn copy(
    device: &LogicalDevice,
    cmd: vk::CommandBuffer,
    src: &TextureRegion<super::VulkanBackend>,
    dst: &TextureRegion<super::VulkanBackend>,
) {
    let region = vk::ImageCopy2::default()
        .src_subresource(subresource_layers(src))
        .dst_subresource(subresource_layers(dst))
        .extent(vk::Extent3D {
            width: src.width,
            height: src.height,
            depth: 1,
        });
    let info = vk::CopyImageInfo2::default()
        .src_image(src.texture)
        .src_image_layout(src.layout.to_vk())
        .dst_image(dst.texture)
        .dst_image_layout(dst.layout.to_vk())
        .regions(std::slice::from_ref(&region));
    unsafe { device.handle().cmd_copy_image2(cmd, &info) };
}

pub fn clear_texture(
    device: &LogicalDevice,
    cmd: vk::CommandBuffer,
    texture: vk::Image,
    aspect: ImageAspect,
    layout: ImageLayout,
    value: ClearValue,
) {
    let range = vk::ImageSubresourceRange {
        aspect_mask: aspect.to_vk(),
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    };
    let raw = device.handle();
    unsafe {
        match value {
            ClearValue::Color(color) => {
                let value = vk::ClearColorValue {
                    float32: color.to_array(),
                };
                raw.cmd_clear_color_image(cmd, texture, layout.to_vk(), &value, &[range]);
            }
            ClearValue::DepthStencil { depth, stencil } => {
                let value = vk::ClearDepthStencilValue { depth, stencil };
                raw.cmd_clear_depth_stencil_image(cmd, texture, layout.to_vk(), &value, &[range]);
            }
        }
    }
}

pub fn begin_marker(device: &LogicalDevice, cmd: vk::CommandBuffer, name: &str) {
    let Some(debug_utils) = device.debug_utils() else {
        return;
    };
    let Ok(name) = CString::new(name) else {
        return;
    };
    let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
    unsafe { debug_utils.cmd_begin_debug_utils_label(cmd, &label) };
}

pub fn end_marker(device: &LogicalDevice, cmd: vk::CommandBuffer) {
    if let Some(debug_utils) = device.debug_utils() {
        unsafe { debug_utils.cmd_end_debug_utils_label(cmd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_points() {
        assert_eq!(bind_point(PipelineKind::Graphics), vk::PipelineBindPoint::GRAPHICS);
        assert_eq!(bind_point(PipelineKind::Compute), vk::PipelineBindPoint::COMPUTE);
    }

    #[test]
    fn test_load_op_follows_clear() {
        assert_eq!(load_op(true), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(load_op(false), vk::AttachmentLoadOp::LOAD);
    }

    #[test]
    fn test_region_corner_is_extent() {
        let region = TextureRegion::<super::super::VulkanBackend> {
            texture: vk::Image::null(),
            aspect: ImageAspect::COLOR,
            layout: ImageLayout::TransferSrc,
            mip: 2,
            array_length: 1,
            width: 64,
            height: 32,
        };
        let corner = far_corner(&region);
        assert_eq!((corner.x, corner.y, corner.z), (64, 32, 1));
        assert_eq!(subresource_layers(&region).mip_level, 2);
    }
}
