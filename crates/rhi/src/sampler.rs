//! Samplers.
//!
//! Pipelines never declare samplers of their own. Every pipeline layout carries
//! two fixed sampler sets (see [`DescriptorSetSlot`]) built from the
//! descriptions below, so shaders can rely on them by index.
//!
//! [`DescriptorSetSlot`]: crate::DescriptorSetSlot

use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, Resource};
use crate::definitions::{CompareOp, Filter, ObjectId, SamplerAddressMode};
use crate::device::Device;
use crate::error::RhiResult;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mip_filter: Filter,
    pub address_mode: SamplerAddressMode,
    /// Enables depth comparison with the given operator.
    pub comparison: Option<CompareOp>,
    /// Anisotropy level, 0 disables it.
    pub anisotropy: f32,
    pub mip_lod_bias: f32,
}

impl SamplerDesc {
    pub const fn new(filter: Filter, mip_filter: Filter, address_mode: SamplerAddressMode) -> Self {
        Self {
            min_filter: filter,
            mag_filter: filter,
            mip_filter,
            address_mode,
            comparison: None,
            anisotropy: 0.0,
            mip_lod_bias: 0.0,
        }
    }

    /// Shadow-map lookups. Compares with `GreaterEqual` for reverse-Z.
    pub const COMPARE_DEPTH: SamplerDesc = SamplerDesc {
        comparison: Some(CompareOp::GreaterEqual),
        ..SamplerDesc::new(Filter::Linear, Filter::Nearest, SamplerAddressMode::Clamp)
    };

    pub const POINT_CLAMP: SamplerDesc =
        SamplerDesc::new(Filter::Nearest, Filter::Nearest, SamplerAddressMode::Clamp);
    pub const POINT_WRAP: SamplerDesc =
        SamplerDesc::new(Filter::Nearest, Filter::Nearest, SamplerAddressMode::Wrap);
    pub const BILINEAR_CLAMP: SamplerDesc =
        SamplerDesc::new(Filter::Linear, Filter::Nearest, SamplerAddressMode::Clamp);
    pub const BILINEAR_WRAP: SamplerDesc =
        SamplerDesc::new(Filter::Linear, Filter::Nearest, SamplerAddressMode::Wrap);
    pub const TRILINEAR_CLAMP: SamplerDesc =
        SamplerDesc::new(Filter::Linear, Filter::Linear, SamplerAddressMode::Clamp);
    pub const ANISOTROPIC_WRAP: SamplerDesc = SamplerDesc {
        anisotropy: 16.0,
        ..SamplerDesc::new(Filter::Linear, Filter::Linear, SamplerAddressMode::Wrap)
    };

    /// Contents of the regular sampler set, in binding order.
    pub const REGULAR: [SamplerDesc; 6] = [
        SamplerDesc::POINT_CLAMP,
        SamplerDesc::POINT_WRAP,
        SamplerDesc::BILINEAR_CLAMP,
        SamplerDesc::BILINEAR_WRAP,
        SamplerDesc::TRILINEAR_CLAMP,
        SamplerDesc::ANISOTROPIC_WRAP,
    ];
}

pub struct Sampler<B: Backend> {
    device: Arc<Device<B>>,
    id: ObjectId,
    handle: B::Sampler,
    desc: SamplerDesc,
}

impl<B: Backend> Sampler<B> {
    pub fn new(device: Arc<Device<B>>, desc: SamplerDesc, name: &str) -> RhiResult<Self> {
        let handle = device.backend().create_sampler(&desc)?;
        device.set_name(Resource::Sampler(handle), name);
        debug!("Created sampler '{}'", name);

        Ok(Self {
            device,
            id: ObjectId::next(),
            handle,
            desc,
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> B::Sampler {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

impl<B: Backend> Drop for Sampler<B> {
    fn drop(&mut self) {
        self.device.defer_release(Resource::Sampler(self.handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_sampler_table() {
        assert_eq!(SamplerDesc::REGULAR.len(), 6);
        assert!(SamplerDesc::REGULAR.iter().all(|s| s.comparison.is_none()));
        assert_eq!(SamplerDesc::COMPARE_DEPTH.comparison, Some(CompareOp::GreaterEqual));
        assert_eq!(SamplerDesc::ANISOTROPIC_WRAP.anisotropy, 16.0);
    }
}
