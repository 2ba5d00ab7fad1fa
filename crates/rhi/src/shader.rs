//! Compiled shader modules and their reflection data.
//!
//! Shader source compilation happens elsewhere. A [`Shader`] is built from
//! SPIR-V bytecode together with the [`ShaderReflection`] the compiler produced
//! for it: the entry point, the vertex-input layout and the descriptor bindings.
//! Pipelines read the reflection when assembling their layouts and vertex input.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use lumen_rhi::backend::Backend;
//! use lumen_rhi::{Device, Shader, ShaderReflection, ShaderStage};
//!
//! # fn example<B: Backend>(device: Arc<Device<B>>) -> Result<(), lumen_rhi::RhiError> {
//! let vertex_shader = Shader::from_spirv_file(
//!     device,
//!     Path::new("shaders/mesh.vert.spv"),
//!     ShaderStage::VERTEX,
//!     ShaderReflection::new("main"),
//! )?;
//! assert_eq!(vertex_shader.entry_point(), "main");
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{Backend, Resource, VertexAttribute};
use crate::definitions::{Format, ObjectId, ShaderStage};
use crate::descriptor::Descriptor;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What the shader compiler reports about a compiled module.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderReflection {
    pub entry_point: String,
    /// Per-vertex inputs, all on binding 0. Empty for non-vertex stages.
    pub vertex_attributes: Vec<VertexAttribute>,
    /// Byte stride of the per-vertex stream.
    pub vertex_stride: u32,
    /// Resource bindings, including push-constant blocks.
    pub descriptors: Vec<Descriptor>,
}

impl ShaderReflection {
    pub fn new(entry_point: &str) -> Self {
        Self {
            entry_point: entry_point.to_string(),
            ..Default::default()
        }
    }

    /// Appends a vertex attribute at the next location, packed after the
    /// previous one.
    pub fn with_vertex_attribute(mut self, format: Format) -> Self {
        let location = self.vertex_attributes.len() as u32;
        self.vertex_attributes.push(VertexAttribute {
            location,
            binding: 0,
            format,
            offset: self.vertex_stride,
        });
        self.vertex_stride += format.bytes_per_element();
        self
    }

    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }
}

pub struct Shader<B: Backend> {
    device: Arc<Device<B>>,
    id: ObjectId,
    module: B::ShaderModule,
    stage: ShaderStage,
    reflection: ShaderReflection,
    name: String,
}

impl<B: Backend> Shader<B> {
    /// Creates a shader module from a SPIR-V file. The file name becomes the
    /// debug name.
    pub fn from_spirv_file(
        device: Arc<Device<B>>,
        path: &Path,
        stage: ShaderStage,
        reflection: ShaderReflection,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage.name(), path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self::from_spirv_bytes(device, &bytes, stage, reflection, &name)
    }

    /// Creates a shader module from SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the bytecode is empty, not 4-byte
    /// aligned, or the stage mask names more than one stage.
    pub fn from_spirv_bytes(
        device: Arc<Device<B>>,
        bytes: &[u8],
        stage: ShaderStage,
        reflection: ShaderReflection,
        name: &str,
    ) -> RhiResult<Self> {
        if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
            return Err(RhiError::ShaderError(format!(
                "SPIR-V code must be non-empty and 4-byte aligned, got {} bytes",
                bytes.len()
            )));
        }
        if stage.bits().count_ones() != 1 {
            return Err(RhiError::ShaderError(format!(
                "Shader '{}' must target exactly one stage, got {:?}",
                name, stage
            )));
        }

        let module = device.backend().create_shader_module(bytes, name)?;
        device.set_name(Resource::Shader(module), name);

        info!(
            "Created {} shader '{}' with entry point '{}'",
            stage.name(),
            name,
            reflection.entry_point
        );

        Ok(Self {
            device,
            id: ObjectId::next(),
            module,
            stage,
            reflection,
            name: name.to_string(),
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> B::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn entry_point(&self) -> &str {
        &self.reflection.entry_point
    }

    #[inline]
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<B: Backend> Drop for Shader<B> {
    fn drop(&mut self) {
        self.device.defer_release(Resource::Shader(self.module));
        debug!("Queued {} shader '{}' for release", self.stage.name(), self.name);
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
    fn test_reflection_packs_vertex_attributes() {
        let reflection = ShaderReflection::new("main")
            .with_vertex_attribute(Format::R32G32B32Float)
            .with_vertex_attribute(Format::R32G32B32Float)
            .with_vertex_attribute(Format::R32G32Float);

        assert_eq!(reflection.vertex_stride, 32);
        let offsets: Vec<u32> = reflection.vertex_attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        let locations: Vec<u32> = reflection
            .vertex_attributes
            .iter()
            .map(|a| a.location)
            .collect();
        assert_eq!(locations, vec![0, 1, 2]);
    }

    #[test]
    fn test_invalid_spirv_alignment() {
        let result = Shader::from_spirv_bytes(
            device(),
            &[0u8; 5],
            ShaderStage::VERTEX,
            ShaderReflection::new("main"),
            "bad",
        );
        assert!(matches!(result, Err(RhiError::ShaderError(_))));
    }

    #[test]
    fn test_multi_stage_mask_rejected() {
        let result = Shader::from_spirv_bytes(
            device(),
            &[0u8; 8],
            ShaderStage::VERTEX | ShaderStage::PIXEL,
            ShaderReflection::new("main"),
            "bad",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_defers_release() {
        let device = device();
        let shader = Shader::from_spirv_bytes(
            device.clone(),
            &[0u8; 8],
            ShaderStage::PIXEL,
            ShaderReflection::new("main"),
            "ps",
        )
        .unwrap();
        let handle = shader.handle();
        drop(shader);

        assert!(device.backend().is_live(handle));
        device.collect_garbage();
        assert!(!device.backend().is_live(handle));
    }

    #[test]
    fn test_missing_file_is_shader_error() {
        let result = Shader::from_spirv_file(
            device(),
            Path::new("does/not/exist.spv"),
            ShaderStage::COMPUTE,
            ShaderReflection::new("main"),
        );
        assert!(matches!(result, Err(RhiError::ShaderError(_))));
    }
}
