//! Physical device (GPU) selection.
//!
//! Selection is headless: a device qualifies with a graphics queue family,
//! Vulkan 1.3 and `VK_KHR_push_descriptor`. Among qualifying devices, discrete
//! GPUs win, then larger image limits and more local memory.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::Capabilities;
use crate::definitions::QueueType;
use crate::error::RhiError;

/// Device extensions the backend cannot work without.
pub const REQUIRED_EXTENSIONS: &[&CStr] = &[ash::khr::push_descriptor::NAME];

/// Queue family for each [`QueueType`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub compute_family: Option<u32>,
    pub transfer_family: Option<u32>,
}

impl QueueFamilyIndices {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some()
    }

    /// Family serving `queue`. Compute and copy fall back to graphics.
    pub fn family(&self, queue: QueueType) -> Option<u32> {
        match queue {
            QueueType::Graphics => self.graphics_family,
            QueueType::Compute => self.compute_family.or(self.graphics_family),
            QueueType::Copy => self.transfer_family.or(self.graphics_family),
        }
    }

    /// Distinct families, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics_family, self.compute_family, self.transfer_family]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    /// Valid timestamp bits of the graphics family, 0 when unsupported.
    pub timestamp_valid_bits: u32,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Total device-local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// Limits the RHI core validates against.
    pub fn capabilities(&self) -> Capabilities {
        let limits = &self.properties.limits;
        Capabilities {
            device_name: self.device_name().to_string(),
            max_push_constant_size: limits.max_push_constants_size,
            timestamp_period: limits.timestamp_period,
            timestamps_supported: limits.timestamp_compute_and_graphics == vk::TRUE
                && self.timestamp_valid_bits > 0,
            max_texture_dimension: limits.max_image_dimension2_d,
        }
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the most suitable GPU.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device meets the requirements.
pub fn select_physical_device(instance: &ash::Instance) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }
    info!("Found {} GPU(s)", devices.len());

    let mut suitable: Vec<(PhysicalDeviceInfo, u64)> = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device))
        .map(|info| {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .collect();

    if suitable.is_empty() {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    }

    suitable.sort_by(|a, b| b.1.cmp(&a.1));
    let (selected, score) = suitable.swap_remove(0);

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        score
    );
    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let family_properties =
        unsafe { instance.get_physical_device_queue_family_properties(device) };

    let name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown")
    };

    let queue_families = find_queue_families(&family_properties);
    let Some(graphics_family) = queue_families.graphics_family else {
        debug!("GPU '{}' skipped: no graphics queue family", name);
        return None;
    };

    let (major, minor) = (
        vk::api_version_major(properties.api_version),
        vk::api_version_minor(properties.api_version),
    );
    if (major, minor) < (1, 3) {
        debug!(
            "GPU '{}' skipped: Vulkan 1.3 not supported (version: {}.{})",
            name, major, minor
        );
        return None;
    }

    let extensions =
        unsafe { instance.enumerate_device_extension_properties(device) }.unwrap_or_default();
    for required in REQUIRED_EXTENSIONS {
        let found = extensions.iter().any(|ext| {
            let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            ext_name == *required
        });
        if !found {
            debug!("GPU '{}' skipped: missing extension {:?}", name, required);
            return None;
        }
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
        timestamp_valid_bits: family_properties[graphics_family as usize].timestamp_valid_bits,
    })
}

/// Prefers dedicated compute and transfer families.
fn find_queue_families(families: &[vk::QueueFamilyProperties]) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    let mut dedicated_compute = None;
    let mut dedicated_transfer = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_compute = family.queue_flags.contains(vk::QueueFlags::COMPUTE);
        let has_transfer = family.queue_flags.contains(vk::QueueFlags::TRANSFER);

        if has_graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if has_compute && !has_graphics && dedicated_compute.is_none() {
            dedicated_compute = Some(i);
        }
        if has_transfer && !has_graphics && !has_compute && dedicated_transfer.is_none() {
            dedicated_transfer = Some(i);
        }
    }

    indices.compute_family = dedicated_compute.or(indices.graphics_family);
    indices.transfer_family = dedicated_transfer.or(indices.graphics_family);
    indices
}

fn rate_device(info: &PhysicalDeviceInfo) -> u64 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1_000,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    score += u64::from(info.properties.limits.max_image_dimension2_d);
    score += (info.device_local_memory() / (1024 * 1024)).min(16_000);

    let families = &info.queue_families;
    if families.compute_family != families.graphics_family {
        score += 100;
    }
    if families.transfer_family != families.graphics_family
        && families.transfer_family != families.compute_family
    {
        score += 100;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_universal_family() {
        let indices = find_queue_families(&[family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )]);
        assert!(indices.is_complete());
        assert_eq!(indices.unique_families(), vec![0]);
        assert_eq!(indices.family(QueueType::Copy), Some(0));
    }

    #[test]
    fn test_dedicated_families_are_preferred() {
        let indices = find_queue_families(&[
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ]);
        assert_eq!(indices.family(QueueType::Graphics), Some(0));
        assert_eq!(indices.family(QueueType::Compute), Some(1));
        assert_eq!(indices.family(QueueType::Copy), Some(2));
        assert_eq!(indices.unique_families(), vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_graphics_is_incomplete() {
        let indices = find_queue_families(&[family(vk::QueueFlags::COMPUTE)]);
        assert!(!indices.is_complete());
        assert_eq!(indices.family(QueueType::Graphics), None);
    }

    #[test]
    fn test_empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let indices = find_queue_families(&[empty, family(vk::QueueFlags::GRAPHICS)]);
        assert_eq!(indices.graphics_family, Some(1));
    }
}
