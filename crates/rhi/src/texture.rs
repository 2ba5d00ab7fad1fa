//! Textures and their tracked layouts.
//!
//! A [`Texture`] remembers the layout of each mip level. Command lists read and
//! update that record when they insert barriers, so transitions always start
//! from the layout the GPU will actually see.

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{Backend, Resource};
use crate::definitions::{Format, ImageAspect, ImageLayout, ObjectId};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

bitflags! {
    /// What a texture may be used for.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct TextureFlags: u32 {
        /// Sampled from shaders
        const SRV = 1 << 0;
        /// Written as a storage image
        const UAV = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        /// May be cleared outside a render pass, blitted and copied
        const CLEAR_BLIT = 1 << 4;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub array_length: u32,
    pub format: Format,
    pub flags: TextureFlags,
    pub name: String,
}

impl TextureDesc {
    /// Sampled color render target with a single mip.
    pub fn render_target(width: u32, height: u32, format: Format, name: &str) -> Self {
        Self {
            width,
            height,
            mip_count: 1,
            array_length: 1,
            format,
            flags: TextureFlags::RENDER_TARGET | TextureFlags::SRV,
            name: name.to_string(),
        }
    }

    /// Sampled depth(-stencil) target with a single mip.
    pub fn depth_stencil(width: u32, height: u32, format: Format, name: &str) -> Self {
        Self {
            flags: TextureFlags::DEPTH_STENCIL | TextureFlags::SRV,
            ..Self::render_target(width, height, format, name)
        }
    }

    /// Sampled storage texture with a full set of mips down to `mip_count`.
    pub fn storage(width: u32, height: u32, mip_count: u32, format: Format, name: &str) -> Self {
        Self {
            mip_count,
            flags: TextureFlags::UAV | TextureFlags::SRV,
            ..Self::render_target(width, height, format, name)
        }
    }

    pub fn with_flags(mut self, flags: TextureFlags) -> Self {
        self.flags |= flags;
        self
    }
}

pub struct Texture<B: Backend> {
    device: Arc<Device<B>>,
    id: ObjectId,
    handle: B::Texture,
    desc: TextureDesc,
    layouts: Mutex<Vec<ImageLayout>>,
}

impl<B: Backend> Texture<B> {
    /// Creates a texture. All mips start in [`ImageLayout::Undefined`].
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] when the extent, mip count or
    /// flags do not fit the format, or the extent exceeds the device limit.
    pub fn new(device: Arc<Device<B>>, desc: TextureDesc) -> RhiResult<Self> {
        validate(&desc, device.backend().capabilities().max_texture_dimension)?;

        let handle = device.backend().create_texture(&desc)?;
        device.set_name(Resource::Texture(handle), &desc.name);

        debug!(
            "Created texture '{}' ({}x{}, {} mips, {:?}, {:?})",
            desc.name, desc.width, desc.height, desc.mip_count, desc.format, desc.flags
        );

        Ok(Self {
            device,
            id: ObjectId::next(),
            handle,
            layouts: Mutex::new(vec![ImageLayout::Undefined; desc.mip_count as usize]),
            desc,
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> B::Texture {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.desc.format
    }

    #[inline]
    pub fn mip_count(&self) -> u32 {
        self.desc.mip_count
    }

    #[inline]
    pub fn array_length(&self) -> u32 {
        self.desc.array_length
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn has_flags(&self, flags: TextureFlags) -> bool {
        self.desc.flags.contains(flags)
    }

    pub fn aspect(&self) -> ImageAspect {
        ImageAspect::from_format(self.desc.format)
    }

    /// Extent of one mip level, never smaller than 1x1.
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        ((self.desc.width >> mip).max(1), (self.desc.height >> mip).max(1))
    }

    pub fn layout(&self, mip: u32) -> ImageLayout {
        self.layouts.lock()[mip as usize]
    }

    /// True when every mip in the range shares one layout.
    pub fn is_layout_uniform(&self, mip_start: u32, mip_range: u32) -> bool {
        let end = self.mip_range_end(mip_start, mip_range);
        let layouts = self.layouts.lock();
        let range = &layouts[mip_start as usize..end];
        range.windows(2).all(|pair| pair[0] == pair[1])
    }

    /// End of a mip range.
    ///
    /// # Panics
    ///
    /// Panics if the range does not lie within the texture's mips.
    #[track_caller]
    pub fn mip_range_end(&self, mip_start: u32, mip_range: u32) -> usize {
        let end = mip_start.checked_add(mip_range);
        assert!(
            end.is_some_and(|end| end <= self.mip_count()),
            "mips {} (+{}) are out of range for texture '{}' with {} mips",
            mip_start,
            mip_range,
            self.desc.name,
            self.mip_count()
        );
        end.map_or(0, |end| end as usize)
    }

    pub(crate) fn set_layout(&self, mip_start: u32, mip_range: u32, layout: ImageLayout) {
        let end = self.mip_range_end(mip_start, mip_range);
        let mut layouts = self.layouts.lock();
        for entry in &mut layouts[mip_start as usize..end] {
            *entry = layout;
        }
    }
}

impl<B: Backend> Drop for Texture<B> {
    fn drop(&mut self) {
        self.device.defer_release(Resource::Texture(self.handle));
        debug!("Queued texture '{}' for release", self.desc.name);
    }
}

fn validate(desc: &TextureDesc, max_dimension: u32) -> RhiResult<()> {
    let invalid = |reason: &str| {
        Err(RhiError::InvalidHandle(format!(
            "Texture '{}': {}",
            desc.name, reason
        )))
    };

    if desc.width == 0 || desc.height == 0 || desc.array_length == 0 {
        return invalid("extent and array length must be non-zero");
    }
    if desc.width > max_dimension || desc.height > max_dimension {
        return invalid("extent exceeds the device limit");
    }
    let max_mips = 32 - desc.width.max(desc.height).leading_zeros();
    if desc.mip_count == 0 || desc.mip_count > max_mips {
        return invalid("mip count out of range");
    }
    if desc.format == Format::Undefined {
        return invalid("format is undefined");
    }
    if desc.flags.contains(TextureFlags::DEPTH_STENCIL) != desc.format.is_depth() {
        return invalid("DEPTH_STENCIL flag and depth format must go together");
    }
    if desc.format.is_depth() && desc.flags.contains(TextureFlags::RENDER_TARGET) {
        return invalid("depth formats cannot be color render targets");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::device::DeviceSettings;

    fn device() -> Arc<Device<NullBackend>> {
        Device::new(NullBackend::new(), DeviceSettings::default())
    }

    #[test]
    fn test_layouts_start_undefined() {
        let texture = Texture::new(
            device(),
            TextureDesc::storage(64, 64, 4, Format::R16G16B16A16Float, "bloom"),
        )
        .unwrap();
        for mip in 0..4 {
            assert_eq!(texture.layout(mip), ImageLayout::Undefined);
        }
        assert!(texture.is_layout_uniform(0, 4));
    }

    #[test]
    fn test_set_layout_range() {
        let texture = Texture::new(
            device(),
            TextureDesc::storage(64, 64, 4, Format::R16G16B16A16Float, "bloom"),
        )
        .unwrap();
        texture.set_layout(1, 2, ImageLayout::General);

        assert_eq!(texture.layout(0), ImageLayout::Undefined);
        assert_eq!(texture.layout(1), ImageLayout::General);
        assert_eq!(texture.layout(2), ImageLayout::General);
        assert_eq!(texture.layout(3), ImageLayout::Undefined);
        assert!(!texture.is_layout_uniform(0, 4));
        assert!(texture.is_layout_uniform(1, 2));
    }

    #[test]
    #[should_panic(expected = "out of range for texture 'bloom'")]
    fn test_layout_range_past_last_mip_panics() {
        let texture = Texture::new(
            device(),
            TextureDesc::storage(64, 64, 4, Format::R16G16B16A16Float, "bloom"),
        )
        .unwrap();
        texture.is_layout_uniform(2, u32::MAX);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let texture = Texture::new(
            device(),
            TextureDesc::storage(8, 2, 4, Format::R8G8B8A8Unorm, "strip"),
        )
        .unwrap();
        assert_eq!(texture.mip_extent(0), (8, 2));
        assert_eq!(texture.mip_extent(1), (4, 1));
        assert_eq!(texture.mip_extent(3), (1, 1));
    }

    #[test]
    fn test_validation() {
        let device = device();
        let zero = TextureDesc::render_target(0, 4, Format::R8G8B8A8Unorm, "zero");
        assert!(Texture::new(device.clone(), zero).is_err());

        let too_many_mips = TextureDesc::storage(4, 4, 4, Format::R8G8B8A8Unorm, "mips");
        assert!(Texture::new(device.clone(), too_many_mips).is_err());

        let depth_as_color = TextureDesc::render_target(4, 4, Format::D32Float, "depth");
        assert!(Texture::new(device.clone(), depth_as_color).is_err());

        let depth = TextureDesc::depth_stencil(4, 4, Format::D32Float, "depth");
        let depth = Texture::new(device, depth).unwrap();
        assert_eq!(depth.aspect(), ImageAspect::DEPTH);
    }

    #[test]
    fn test_with_flags_adds() {
        let desc = TextureDesc::render_target(4, 4, Format::R8G8B8A8Unorm, "rt")
            .with_flags(TextureFlags::CLEAR_BLIT);
        assert!(desc.flags.contains(TextureFlags::RENDER_TARGET | TextureFlags::CLEAR_BLIT));
    }
}
