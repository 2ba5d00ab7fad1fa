//! GPU buffers.
//!
//! # Overview
//!
//! - [`BufferUsage`] defines how a buffer is bound (vertex, index, constant, structured)
//! - [`Buffer`] owns a backend buffer handle plus its description
//!
//! All buffers are host-visible; writes go straight through the backend.
//!
//! # Example
//!
//! ```
//! use lumen_rhi::backend::null::NullBackend;
//! use lumen_rhi::{Buffer, BufferUsage, Device, DeviceSettings, IndexFormat};
//!
//! # fn main() -> Result<(), lumen_rhi::RhiError> {
//! let device = Device::new(NullBackend::new(), DeviceSettings::default());
//! let indices: [u16; 3] = [0, 1, 2];
//! let index_buffer = Buffer::with_data(device, BufferUsage::Index, &indices, "triangle_ib")?;
//! assert_eq!(index_buffer.index_format(), IndexFormat::U16);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytemuck::Pod;
use tracing::debug;

use crate::backend::{Backend, Resource};
use crate::definitions::{IndexFormat, ObjectId};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Per-vertex or per-instance stream
    Vertex,
    /// 16- or 32-bit indices, chosen by stride
    Index,
    /// Constant (uniform) buffer
    Constant,
    /// Structured (storage) buffer
    Structured,
}

impl BufferUsage {
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Constant => "constant",
            BufferUsage::Structured => "structured",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub usage: BufferUsage,
    /// Total size in bytes.
    pub size: u64,
    /// Size of one element in bytes.
    pub stride: u32,
    pub name: String,
}

pub struct Buffer<B: Backend> {
    device: Arc<Device<B>>,
    id: ObjectId,
    handle: B::Buffer,
    desc: BufferDesc,
}

impl<B: Backend> Buffer<B> {
    /// Creates an uninitialized buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for a zero size or stride.
    pub fn new(device: Arc<Device<B>>, desc: BufferDesc) -> RhiResult<Self> {
        if desc.size == 0 || desc.stride == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "Buffer '{}' needs a non-zero size and stride",
                desc.name
            )));
        }

        let handle = device.backend().create_buffer(&desc)?;
        device.set_name(Resource::Buffer(handle), &desc.name);

        debug!(
            "Created {} buffer '{}' ({} bytes, stride {})",
            desc.usage.name(),
            desc.name,
            desc.size,
            desc.stride
        );

        Ok(Self {
            device,
            id: ObjectId::next(),
            handle,
            desc,
        })
    }

    /// Creates a buffer sized and strided for `data` and uploads it.
    pub fn with_data<T: Pod>(
        device: Arc<Device<B>>,
        usage: BufferUsage,
        data: &[T],
        name: &str,
    ) -> RhiResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::new(
            device,
            BufferDesc {
                usage,
                size: bytes.len() as u64,
                stride: std::mem::size_of::<T>() as u32,
                name: name.to_string(),
            },
        )?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Writes `data` at byte `offset`.
    pub fn write<T: Pod>(&self, offset: u64, data: &[T]) -> RhiResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if offset + bytes.len() as u64 > self.desc.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer '{}': offset {} + data {} > size {}",
                self.desc.name,
                offset,
                bytes.len(),
                self.desc.size
            )));
        }
        self.device.backend().write_buffer(self.handle, offset, bytes)
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> B::Buffer {
        self.handle
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.desc.size
    }

    #[inline]
    pub fn stride(&self) -> u32 {
        self.desc.stride
    }

    pub fn element_count(&self) -> u64 {
        self.desc.size / u64::from(self.desc.stride)
    }

    /// Index width implied by the stride.
    pub fn index_format(&self) -> IndexFormat {
        if self.desc.stride == 2 {
            IndexFormat::U16
        } else {
            IndexFormat::U32
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }
}

impl<B: Backend> Drop for Buffer<B> {
    fn drop(&mut self) {
        self.device.defer_release(Resource::Buffer(self.handle));
        debug!("Queued {} buffer '{}' for release", self.desc.usage.name(), self.desc.name);
    }
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
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Constant.name(), "constant");
        assert_eq!(BufferUsage::Structured.name(), "structured");
    }

    #[test]
    fn test_with_data_uploads_contents() {
        let device = device();
        let data: [u32; 2] = [1, 2];
        let buffer = Buffer::with_data(device.clone(), BufferUsage::Structured, &data, "sb").unwrap();

        assert_eq!(buffer.size(), 8);
        assert_eq!(buffer.stride(), 4);
        assert_eq!(buffer.element_count(), 2);
        assert_eq!(
            device.backend().buffer_contents(buffer.handle()).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&data).to_vec()
        );
    }

    #[test]
    fn test_index_format_from_stride() {
        let device = device();
        let narrow = Buffer::with_data(device.clone(), BufferUsage::Index, &[0u16, 1, 2], "ib16").unwrap();
        let wide = Buffer::with_data(device, BufferUsage::Index, &[0u32, 1, 2], "ib32").unwrap();
        assert_eq!(narrow.index_format(), IndexFormat::U16);
        assert_eq!(wide.index_format(), IndexFormat::U32);
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = Buffer::new(
            device(),
            BufferDesc {
                usage: BufferUsage::Constant,
                size: 0,
                stride: 16,
                name: "empty".to_string(),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_bounds_write_rejected() {
        let buffer = Buffer::with_data(device(), BufferUsage::Constant, &[0f32; 4], "cb").unwrap();
        assert!(buffer.write(8, &[0f32; 4]).is_err());
        assert!(buffer.write(8, &[0f32; 2]).is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        let device = device();
        let a = Buffer::with_data(device.clone(), BufferUsage::Vertex, &[0f32; 3], "a").unwrap();
        let b = Buffer::with_data(device, BufferUsage::Vertex, &[0f32; 3], "b").unwrap();
        assert_ne!(a.id(), b.id());
    }
}
