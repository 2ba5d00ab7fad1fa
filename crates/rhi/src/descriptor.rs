//! Resource binding descriptions.
//!
//! A [`Descriptor`] is one binding reported by shader reflection: a type, a
//! slot, the stages that read it and, for push constants, a byte size. A
//! [`DescriptorSetLayout`] merges the descriptors of every stage of a pipeline
//! into one slot-ordered list and owns the backend layout for set 0.
//!
//! Push-constant descriptors never reach the backend set layout. They become
//! [`PushConstantRange`]s packed in slot order, and their total size is
//! checked against the device limit when the layout is built.
//!
//! # Example
//!
//! ```
//! use lumen_rhi::backend::null::NullBackend;
//! use lumen_rhi::{Descriptor, DescriptorSetLayout, DescriptorType, Device, DeviceSettings, ShaderStage};
//!
//! # fn main() -> Result<(), lumen_rhi::RhiError> {
//! let device = Device::new(NullBackend::new(), DeviceSettings::default());
//! let layout = DescriptorSetLayout::new(
//!     device,
//!     &[
//!         Descriptor::new("frame", DescriptorType::ConstantBuffer, 0, ShaderStage::VERTEX),
//!         Descriptor::new("frame", DescriptorType::ConstantBuffer, 0, ShaderStage::PIXEL),
//!         Descriptor::push_constant("pass", 0, ShaderStage::PIXEL, 64),
//!     ],
//!     "mesh",
//! )?;
//! assert_eq!(layout.bindings().count(), 1);
//! assert_eq!(layout.push_constant_size(), 64);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, PushConstantRange, Resource};
use crate::definitions::{DescriptorType, ObjectId, ShaderStage};
use crate::device::Device;
use crate::error::RhiResult;
use crate::shader::Shader;

/// One reflected resource binding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub name: String,
    pub descriptor_type: DescriptorType,
    pub slot: u32,
    pub stages: ShaderStage,
    /// Byte size of a push-constant block, 0 otherwise.
    pub size: u32,
    /// Element count, 1 for non-array bindings.
    pub array_length: u32,
}

impl Descriptor {
    pub fn new(name: &str, descriptor_type: DescriptorType, slot: u32, stages: ShaderStage) -> Self {
        Self {
            name: name.to_string(),
            descriptor_type,
            slot,
            stages,
            size: 0,
            array_length: 1,
        }
    }

    pub fn push_constant(name: &str, slot: u32, stages: ShaderStage, size: u32) -> Self {
        Self {
            size,
            ..Self::new(name, DescriptorType::PushConstantBuffer, slot, stages)
        }
    }

    pub fn with_array_length(mut self, array_length: u32) -> Self {
        self.array_length = array_length;
        self
    }

    #[inline]
    pub fn is_push_constant(&self) -> bool {
        self.descriptor_type == DescriptorType::PushConstantBuffer
    }
}

/// Merges descriptors reported by several stages.
///
/// Entries sharing a slot (push constants and regular bindings are separate
/// slot spaces) collapse into one with the union of their stage masks. The
/// result lists regular bindings by slot, then push constants by slot.
///
/// # Panics
///
/// Panics if two stages declare different types at the same slot.
pub fn merge_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a Descriptor>) -> Vec<Descriptor> {
    let mut merged: BTreeMap<(bool, u32), Descriptor> = BTreeMap::new();

    for descriptor in descriptors {
        let key = (descriptor.is_push_constant(), descriptor.slot);
        match merged.get_mut(&key) {
            Some(existing) => {
                assert_eq!(
                    existing.descriptor_type, descriptor.descriptor_type,
                    "descriptor slot {} declared as both {:?} and {:?}",
                    descriptor.slot, existing.descriptor_type, descriptor.descriptor_type
                );
                existing.stages |= descriptor.stages;
                existing.size = existing.size.max(descriptor.size);
                existing.array_length = existing.array_length.max(descriptor.array_length);
            }
            None => {
                merged.insert(key, descriptor.clone());
            }
        }
    }

    merged.into_values().collect()
}

/// Packs push-constant descriptors into ranges, in slot order.
///
/// # Panics
///
/// Panics if a block is not a multiple of 4 bytes or the packed total exceeds
/// `max_size`. The same input always fails the same way.
pub fn push_constant_ranges(descriptors: &[Descriptor], max_size: u32) -> Vec<PushConstantRange> {
    let mut blocks: Vec<&Descriptor> = descriptors.iter().filter(|d| d.is_push_constant()).collect();
    blocks.sort_by_key(|d| d.slot);

    let mut ranges = Vec::with_capacity(blocks.len());
    let mut offset = 0u32;
    for block in blocks {
        assert!(
            block.size > 0 && block.size.is_multiple_of(4),
            "push constant '{}' has size {}, expected a non-zero multiple of 4",
            block.name,
            block.size
        );
        ranges.push(PushConstantRange {
            stages: block.stages,
            offset,
            size: block.size,
        });
        offset += block.size;
    }

    assert!(
        offset <= max_size,
        "push constant block of {} bytes exceeds device limit of {} bytes",
        offset,
        max_size
    );
    ranges
}

/// The per-pipeline resource layout bound at set 0.
pub struct DescriptorSetLayout<B: Backend> {
    device: Arc<Device<B>>,
    id: ObjectId,
    handle: B::DescriptorSetLayout,
    descriptors: Vec<Descriptor>,
    push_constant_ranges: Vec<PushConstantRange>,
    hash: u64,
    name: String,
}

impl<B: Backend> DescriptorSetLayout<B> {
    /// Builds a layout from reflected descriptors.
    ///
    /// # Panics
    ///
    /// Panics on conflicting slot types or when the push constants exceed
    /// [`Device::max_push_constant_size`].
    pub fn new(device: Arc<Device<B>>, descriptors: &[Descriptor], name: &str) -> RhiResult<Self> {
        let descriptors = merge_descriptors(descriptors);
        let push_constant_ranges =
            push_constant_ranges(&descriptors, device.max_push_constant_size());

        let bindings: Vec<Descriptor> = descriptors
            .iter()
            .filter(|d| !d.is_push_constant())
            .cloned()
            .collect();
        let handle = device
            .backend()
            .create_descriptor_set_layout(&bindings, name)?;
        device.set_name(Resource::DescriptorSetLayout(handle), name);

        let hash = signature_hash(&descriptors);
        debug!(
            "Created descriptor set layout '{}' with {} binding(s) and {} push constant range(s)",
            name,
            bindings.len(),
            push_constant_ranges.len()
        );

        Ok(Self {
            device,
            id: ObjectId::next(),
            handle,
            descriptors,
            push_constant_ranges,
            hash,
            name: name.to_string(),
        })
    }

    /// Builds a layout from the reflection of every given shader.
    pub fn from_shaders(device: Arc<Device<B>>, shaders: &[&Shader<B>], name: &str) -> RhiResult<Self> {
        let descriptors: Vec<Descriptor> = shaders
            .iter()
            .flat_map(|shader| shader.reflection().descriptors.iter().cloned())
            .collect();
        Self::new(device, &descriptors, name)
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> B::DescriptorSetLayout {
        self.handle
    }

    /// All merged descriptors, regular bindings first.
    #[inline]
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Regular (non push-constant) bindings in slot order.
    pub fn bindings(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter().filter(|d| !d.is_push_constant())
    }

    /// The regular binding at `slot`.
    pub fn binding(&self, slot: u32) -> Option<&Descriptor> {
        self.bindings().find(|d| d.slot == slot)
    }

    #[inline]
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Total packed push-constant bytes.
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_ranges
            .last()
            .map_or(0, |r| r.offset + r.size)
    }

    /// Stage mask for a push-constant update of `size` bytes at `offset`.
    ///
    /// Returns `None` when the update is not fully covered by the ranges.
    pub fn push_constant_stages(&self, offset: u32, size: u32) -> Option<ShaderStage> {
        let end = offset.checked_add(size)?;
        if size == 0 || end > self.push_constant_size() {
            return None;
        }
        Some(
            self.push_constant_ranges
                .iter()
                .filter(|r| r.offset < end && offset < r.offset + r.size)
                .fold(ShaderStage::empty(), |stages, r| stages | r.stages),
        )
    }

    /// Content hash of the binding signature. Layouts with equal hashes are
    /// interchangeable.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<B: Backend> Drop for DescriptorSetLayout<B> {
    fn drop(&mut self) {
        self.device
            .defer_release(Resource::DescriptorSetLayout(self.handle));
        debug!("Queued descriptor set layout '{}' for release", self.name);
    }
}

fn signature_hash(descriptors: &[Descriptor]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for d in descriptors {
        d.descriptor_type.hash(&mut hasher);
        d.slot.hash(&mut hasher);
        d.stages.hash(&mut hasher);
        d.size.hash(&mut hasher);
        d.array_length.hash(&mut hasher);
    }
    hasher.finish()
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
    fn test_merge_unions_stage_masks() {
        let merged = merge_descriptors(&[
            Descriptor::new("material", DescriptorType::ConstantBuffer, 1, ShaderStage::PIXEL),
            Descriptor::new("frame", DescriptorType::ConstantBuffer, 0, ShaderStage::VERTEX),
            Descriptor::new("frame", DescriptorType::ConstantBuffer, 0, ShaderStage::PIXEL),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].slot, 0);
        assert_eq!(merged[0].stages, ShaderStage::VERTEX | ShaderStage::PIXEL);
        assert_eq!(merged[1].slot, 1);
    }

    #[test]
    fn test_push_constants_use_their_own_slot_space() {
        let merged = merge_descriptors(&[
            Descriptor::push_constant("pass", 0, ShaderStage::VERTEX, 16),
            Descriptor::new("tex", DescriptorType::Texture, 0, ShaderStage::PIXEL),
        ]);
        assert_eq!(merged.len(), 2);
        assert!(!merged[0].is_push_constant());
        assert!(merged[1].is_push_constant());
    }

    #[test]
    #[should_panic(expected = "declared as both")]
    fn test_conflicting_types_panic() {
        merge_descriptors(&[
            Descriptor::new("a", DescriptorType::Texture, 3, ShaderStage::PIXEL),
            Descriptor::new("b", DescriptorType::Sampler, 3, ShaderStage::PIXEL),
        ]);
    }

    #[test]
    fn test_push_constant_ranges_are_packed() {
        let ranges = push_constant_ranges(
            &[
                Descriptor::push_constant("b", 1, ShaderStage::PIXEL, 32),
                Descriptor::push_constant("a", 0, ShaderStage::VERTEX | ShaderStage::PIXEL, 64),
            ],
            128,
        );
        assert_eq!(
            ranges,
            vec![
                PushConstantRange {
                    stages: ShaderStage::VERTEX | ShaderStage::PIXEL,
                    offset: 0,
                    size: 64
                },
                PushConstantRange {
                    stages: ShaderStage::PIXEL,
                    offset: 64,
                    size: 32
                },
            ]
        );
    }

    #[test]
    #[should_panic(expected = "push constant block of 160 bytes exceeds device limit of 128 bytes")]
    fn test_oversized_push_constants_panic() {
        push_constant_ranges(
            &[
                Descriptor::push_constant("a", 0, ShaderStage::VERTEX, 128),
                Descriptor::push_constant("b", 1, ShaderStage::PIXEL, 32),
            ],
            128,
        );
    }

    #[test]
    fn test_layout_keeps_push_constants_out_of_backend_bindings() {
        let device = device();
        let layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                Descriptor::new("frame", DescriptorType::ConstantBuffer, 0, ShaderStage::VERTEX),
                Descriptor::push_constant("pass", 0, ShaderStage::PIXEL, 16),
            ],
            "layout",
        )
        .unwrap();

        let backend_bindings = device.backend().descriptor_set_layout(layout.handle()).unwrap();
        assert_eq!(backend_bindings.len(), 1);
        assert_eq!(backend_bindings[0].descriptor_type, DescriptorType::ConstantBuffer);
        assert_eq!(layout.push_constant_size(), 16);
        assert!(layout.binding(0).is_some());
        assert!(layout.binding(1).is_none());
    }

    #[test]
    fn test_push_constant_stages_cover_overlapping_ranges() {
        let layout = DescriptorSetLayout::new(
            device(),
            &[
                Descriptor::push_constant("a", 0, ShaderStage::VERTEX, 16),
                Descriptor::push_constant("b", 1, ShaderStage::PIXEL, 16),
            ],
            "layout",
        )
        .unwrap();

        assert_eq!(layout.push_constant_stages(0, 16), Some(ShaderStage::VERTEX));
        assert_eq!(
            layout.push_constant_stages(8, 16),
            Some(ShaderStage::VERTEX | ShaderStage::PIXEL)
        );
        assert_eq!(layout.push_constant_stages(16, 32), None);
        assert_eq!(layout.push_constant_stages(u32::MAX, 16), None);
    }

    #[test]
    fn test_signature_hash_ignores_names_and_declaration_order() {
        let device = device();
        let a = DescriptorSetLayout::new(
            device.clone(),
            &[
                Descriptor::new("x", DescriptorType::Texture, 1, ShaderStage::PIXEL),
                Descriptor::new("y", DescriptorType::ConstantBuffer, 0, ShaderStage::VERTEX),
            ],
            "a",
        )
        .unwrap();
        let b = DescriptorSetLayout::new(
            device,
            &[
                Descriptor::new("cb", DescriptorType::ConstantBuffer, 0, ShaderStage::VERTEX),
                Descriptor::new("tex", DescriptorType::Texture, 1, ShaderStage::PIXEL),
            ],
            "b",
        )
        .unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    #[should_panic(expected = "exceeds device limit")]
    fn test_layout_respects_device_override() {
        let settings = DeviceSettings {
            max_push_constant_size: Some(32),
            ..Default::default()
        };
        let device = Device::new(NullBackend::new(), settings);
        let _ = DescriptorSetLayout::new(
            device,
            &[Descriptor::push_constant("big", 0, ShaderStage::VERTEX, 64)],
            "big",
        );
    }
}
