//! Buffers, images and samplers backed by gpu-allocator.
//!
//! The backend hands out raw `vk::Buffer` / `vk::Image` handles. Allocations
//! and image views live in [`ResourceTables`], keyed by those handles, until
//! the handle is released.

use std::collections::HashMap;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use parking_lot::Mutex;
use tracing::{debug, error};

use super::device::LogicalDevice;
use crate::buffer::{BufferDesc, BufferUsage};
use crate::definitions::{ImageAspect, ImageLayout};
use crate::error::{RhiError, RhiResult};
use crate::sampler::SamplerDesc;
use crate::texture::{TextureDesc, TextureFlags};

struct BufferEntry {
    allocation: Allocation,
    size: u64,
}

pub struct TextureEntry {
    allocation: Allocation,
    /// All mips and layers; depth-only for depth-stencil formats.
    pub view: vk::ImageView,
    /// Single-mip views for storage writes, empty without `UAV`.
    pub mip_views: Vec<vk::ImageView>,
}

#[derive(Default)]
pub struct ResourceTables {
    buffers: Mutex<HashMap<vk::Buffer, BufferEntry>>,
    textures: Mutex<HashMap<vk::Image, TextureEntry>>,
}

impl BufferUsage {
    fn to_vk_usage(self) -> vk::BufferUsageFlags {
        let usage = match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Constant => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Structured => vk::BufferUsageFlags::STORAGE_BUFFER,
        };
        usage | vk::BufferUsageFlags::TRANSFER_DST
    }
}

impl TextureFlags {
    fn to_vk_usage(self) -> vk::ImageUsageFlags {
        // Every texture can be a clear, blit or copy destination.
        let mut usage = vk::ImageUsageFlags::TRANSFER_DST;
        if self.contains(TextureFlags::SRV) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(TextureFlags::UAV) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if self.contains(TextureFlags::RENDER_TARGET) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(TextureFlags::DEPTH_STENCIL) {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(TextureFlags::CLEAR_BLIT) {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        usage
    }
}

impl ResourceTables {
    /// Creates a host-visible buffer so `write_buffer` can map it directly.
    pub fn create_buffer(&self, device: &LogicalDevice, desc: &BufferDesc) -> RhiResult<vk::Buffer> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "Buffer '{}' has zero size",
                desc.name
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name: &desc.name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created {} buffer '{}': {} bytes", desc.usage.name(), desc.name, desc.size);
        self.buffers.lock().insert(
            buffer,
            BufferEntry {
                allocation,
                size: desc.size,
            },
        );
        Ok(buffer)
    }

    pub fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut buffers = self.buffers.lock();
        let entry = buffers
            .get_mut(&buffer)
            .ok_or_else(|| RhiError::InvalidHandle(format!("Unknown buffer {:?}", buffer)))?;

        let end = offset + data.len() as u64;
        if end > entry.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                entry.size
            )));
        }

        let mapped = entry
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    pub fn create_texture(&self, device: &LogicalDevice, desc: &TextureDesc) -> RhiResult<vk::Image> {
        let format = desc.format.to_vk();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_count)
            .array_layers(desc.array_length)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.flags.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(ImageLayout::Undefined.to_vk());

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name: &desc.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        // Sampled views of depth-stencil images may only name one aspect.
        let view_aspect = if desc.format.is_depth() {
            ImageAspect::DEPTH
        } else {
            ImageAspect::from_format(desc.format)
        };
        let view = create_view(device, image, desc, view_aspect, 0, desc.mip_count)?;
        let mip_views = if desc.flags.contains(TextureFlags::UAV) {
            (0..desc.mip_count)
                .map(|mip| create_view(device, image, desc, view_aspect, mip, 1))
                .collect::<RhiResult<Vec<_>>>()?
        } else {
            Vec::new()
        };

        debug!(
            "Created texture '{}': {}x{}, {:?}, {} mip(s)",
            desc.name, desc.width, desc.height, desc.format, desc.mip_count
        );
        self.textures.lock().insert(
            image,
            TextureEntry {
                allocation,
                view,
                mip_views,
            },
        );
        Ok(image)
    }

    /// The full view of `image`, or the view of one mip.
    pub fn view(&self, image: vk::Image, mip: Option<u32>) -> vk::ImageView {
        let textures = self.textures.lock();
        let Some(entry) = textures.get(&image) else {
            error!("Unknown texture {:?}", image);
            return vk::ImageView::null();
        };
        match mip {
            Some(mip) => entry
                .mip_views
                .get(mip as usize)
                .copied()
                .unwrap_or(entry.view),
            None => entry.view,
        }
    }

    pub fn create_sampler(&self, device: &LogicalDevice, desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        let address_mode = desc.address_mode.to_vk();
        let mut info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter.to_vk())
            .min_filter(desc.min_filter.to_vk())
            .mipmap_mode(desc.mip_filter.to_vk_mipmap())
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .mip_lod_bias(desc.mip_lod_bias)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);

        if desc.anisotropy > 0.0 {
            info = info.anisotropy_enable(true).max_anisotropy(desc.anisotropy);
        }
        if let Some(compare) = desc.comparison {
            info = info.compare_enable(true).compare_op(compare.to_vk());
        }

        let sampler = unsafe { device.handle().create_sampler(&info, None)? };
        Ok(sampler)
    }

    pub fn destroy_buffer(&self, device: &LogicalDevice, buffer: vk::Buffer) {
        let entry = self.buffers.lock().remove(&buffer);
        unsafe { device.handle().destroy_buffer(buffer, None) };
        if let Some(entry) = entry
            && let Err(e) = device.allocator().lock().free(entry.allocation)
        {
            error!("Failed to free buffer memory: {:?}", e);
        }
    }

    pub fn destroy_texture(&self, device: &LogicalDevice, image: vk::Image) {
        let entry = self.textures.lock().remove(&image);
        if let Some(entry) = entry {
            unsafe {
                for view in entry.mip_views {
                    device.handle().destroy_image_view(view, None);
                }
                device.handle().destroy_image_view(entry.view, None);
                device.handle().destroy_image(image, None);
            }
            if let Err(e) = device.allocator().lock().free(entry.allocation) {
                error!("Failed to free texture memory: {:?}", e);
            }
        } else {
            unsafe { device.handle().destroy_image(image, None) };
        }
    }

    /// Releases everything still alive. Called at backend teardown.
    pub fn destroy_all(&self, device: &LogicalDevice) {
        let buffers: Vec<vk::Buffer> = self.buffers.lock().keys().copied().collect();
        let textures: Vec<vk::Image> = self.textures.lock().keys().copied().collect();
        if !buffers.is_empty() || !textures.is_empty() {
            debug!(
                "Destroying {} leaked buffer(s) and {} texture(s)",
                buffers.len(),
                textures.len()
            );
        }
        for buffer in buffers {
            self.destroy_buffer(device, buffer);
        }
        for image in textures {
            self.destroy_texture(device, image);
        }
    }
}

fn create_view(
    device: &LogicalDevice,
    image: vk::Image,
    desc: &TextureDesc,
    aspect: ImageAspect,
    base_mip: u32,
    mip_count: u32,
) -> RhiResult<vk::ImageView> {
    let view_type = if desc.array_length > 1 {
        vk::ImageViewType::TYPE_2D_ARRAY
    } else {
        vk::ImageViewType::TYPE_2D
    };
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(desc.format.to_vk())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect.to_vk())
                .base_mip_level(base_mip)
                .level_count(mip_count)
                .base_array_layer(0)
                .layer_count(desc.array_length),
        );
    let view = unsafe { device.handle().create_image_view(&info, None)? };
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_flags() {
        assert!(
            BufferUsage::Constant
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Structured
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::STORAGE_BUFFER)
        );
    }

    #[test]
    fn test_clear_blit_enables_transfers() {
        let usage = (TextureFlags::SRV | TextureFlags::CLEAR_BLIT).to_vk_usage();
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(!usage.contains(vk::ImageUsageFlags::STORAGE));
    }

    #[test]
    fn test_plain_textures_are_transfer_destinations() {
        let usage = TextureFlags::RENDER_TARGET.to_vk_usage();
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(!usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
    }
}
