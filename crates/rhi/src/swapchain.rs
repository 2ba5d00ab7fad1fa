//! Presentable image chain.
//!
//! The RHI core only needs a swapchain to hand out "the image presented next":
//! its handle, extent and format, and the layout it is currently in. Images are
//! plain [`Texture`]s created with blit/copy access, cycled round-robin by
//! [`Swapchain::acquire_next_image`]. Presentation to a window surface belongs to
//! the platform layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::definitions::{Format, ImageLayout, ObjectId};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::texture::{Texture, TextureDesc, TextureFlags};

pub const MIN_IMAGE_COUNT: u32 = 2;
pub const MAX_IMAGE_COUNT: u32 = 3;

pub struct Swapchain<B: Backend> {
    device: Arc<Device<B>>,
    id: ObjectId,
    images: RwLock<Vec<Arc<Texture<B>>>>,
    image_index: AtomicUsize,
    format: Format,
    name: String,
}

impl<B: Backend> Swapchain<B> {
    pub fn new(
        device: Arc<Device<B>>,
        width: u32,
        height: u32,
        format: Format,
        image_count: u32,
        name: &str,
    ) -> RhiResult<Self> {
        if format.is_depth() || format == Format::Undefined {
            return Err(RhiError::Unsupported(format!(
                "{:?} is not a presentable format",
                format
            )));
        }

        let image_count = image_count.clamp(MIN_IMAGE_COUNT, MAX_IMAGE_COUNT);
        let images = create_images(&device, width, height, format, image_count, name)?;

        info!(
            "Swapchain '{}' created: {}x{}, {:?}, {} images",
            name, width, height, format, image_count
        );

        Ok(Self {
            device,
            id: ObjectId::next(),
            images: RwLock::new(images),
            image_index: AtomicUsize::new(0),
            format,
            name: name.to_string(),
        })
    }

    /// Recreates the images at a new size. Old images go through the deletion
    /// queue, so lists still referencing them stay valid.
    pub fn recreate(&self, width: u32, height: u32) -> RhiResult<()> {
        info!("Recreating swapchain '{}' for new size: {}x{}", self.name, width, height);

        let mut images = self.images.write();
        *images = create_images(
            &self.device,
            width,
            height,
            self.format,
            images.len() as u32,
            &self.name,
        )?;
        self.image_index.store(0, Ordering::Release);
        Ok(())
    }

    /// Advances to the next image and returns its index.
    pub fn acquire_next_image(&self) -> usize {
        let count = self.images.read().len();
        let next = (self.image_index.load(Ordering::Acquire) + 1) % count;
        self.image_index.store(next, Ordering::Release);
        next
    }

    /// The image the next blit, copy or render pass targets.
    pub fn current_image(&self) -> Arc<Texture<B>> {
        let images = self.images.read();
        images[self.image_index.load(Ordering::Acquire) % images.len()].clone()
    }

    #[inline]
    pub fn image_index(&self) -> usize {
        self.image_index.load(Ordering::Acquire)
    }

    pub fn image_count(&self) -> usize {
        self.images.read().len()
    }

    /// Layout of the current image.
    pub fn layout(&self) -> ImageLayout {
        self.current_image().layout(0)
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.current_image().width()
    }

    pub fn height(&self) -> u32 {
        self.current_image().height()
    }
}

/// Picks the presentable format from what the backend supports.
///
/// Prefers B8R8G8A8_UNORM, then R8G8B8A8_UNORM, then the first entry.
pub fn choose_format(supported: &[Format]) -> Option<Format> {
    if supported.contains(&Format::B8R8G8A8Unorm) {
        debug!("Selected preferred swapchain format: B8R8G8A8_UNORM");
        return Some(Format::B8R8G8A8Unorm);
    }
    if supported.contains(&Format::R8G8B8A8Unorm) {
        warn!("Using fallback swapchain format: R8G8B8A8_UNORM");
        return Some(Format::R8G8B8A8Unorm);
    }
    let first = supported.first().copied();
    if let Some(format) = first {
        warn!("Using first available swapchain format: {:?}", format);
    }
    first
}

fn create_images<B: Backend>(
    device: &Arc<Device<B>>,
    width: u32,
    height: u32,
    format: Format,
    image_count: u32,
    name: &str,
) -> RhiResult<Vec<Arc<Texture<B>>>> {
    (0..image_count)
        .map(|i| {
            let desc = TextureDesc::render_target(width, height, format, &format!("{}_{}", name, i))
                .with_flags(TextureFlags::CLEAR_BLIT);
            Texture::new(device.clone(), desc).map(Arc::new)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::device::DeviceSettings;

    fn swapchain(image_count: u32) -> Swapchain<NullBackend> {
        let device = Device::new(NullBackend::new(), DeviceSettings::default());
        Swapchain::new(device, 320, 240, Format::B8R8G8A8Unorm, image_count, "swapchain").unwrap()
    }

    #[test]
    fn test_image_count_is_clamped() {
        assert_eq!(swapchain(1).image_count(), 2);
        assert_eq!(swapchain(8).image_count(), 3);
    }

    #[test]
    fn test_acquire_cycles() {
        let swapchain = swapchain(3);
        assert_eq!(swapchain.image_index(), 0);
        assert_eq!(swapchain.acquire_next_image(), 1);
        assert_eq!(swapchain.acquire_next_image(), 2);
        assert_eq!(swapchain.acquire_next_image(), 0);
    }

    #[test]
    fn test_images_allow_blits() {
        let swapchain = swapchain(2);
        assert!(swapchain.current_image().has_flags(TextureFlags::CLEAR_BLIT));
        assert_eq!(swapchain.layout(), ImageLayout::Undefined);
    }

    #[test]
    fn test_recreate_changes_extent() {
        let swapchain = swapchain(2);
        let old = swapchain.current_image().handle();
        swapchain.recreate(640, 480).unwrap();
        assert_eq!(swapchain.width(), 640);
        assert_eq!(swapchain.current_image().width(), 640);
        assert_ne!(swapchain.current_image().handle(), old);
    }

    #[test]
    fn test_choose_format() {
        assert_eq!(
            choose_format(&[Format::R8G8B8A8Unorm, Format::B8R8G8A8Unorm]),
            Some(Format::B8R8G8A8Unorm)
        );
        assert_eq!(choose_format(&[Format::R8G8B8A8Unorm]), Some(Format::R8G8B8A8Unorm));
        assert_eq!(
            choose_format(&[Format::R16G16B16A16Float]),
            Some(Format::R16G16B16A16Float)
        );
        assert_eq!(choose_format(&[]), None);
    }

    #[test]
    fn test_depth_format_rejected() {
        let device = Device::new(NullBackend::new(), DeviceSettings::default());
        assert!(Swapchain::new(device, 4, 4, Format::D32Float, 2, "bad").is_err());
    }
}
