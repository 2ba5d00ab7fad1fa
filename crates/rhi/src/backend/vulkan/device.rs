//! Vulkan logical device, queues and memory allocator.

use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::instance::Instance;
use super::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, REQUIRED_EXTENSIONS};
use crate::definitions::QueueType;
use crate::error::RhiError;

/// One locked queue per distinct family. Every [`QueueType`] maps to a slot,
/// and types resolving to the same family share its lock.
struct Queues {
    slots: Vec<Mutex<vk::Queue>>,
    /// Slot index per queue type, in `[graphics, compute, copy]` order.
    by_type: [usize; 3],
}

/// Deduplicates queue families into slots. The graphics family always takes
/// slot 0; types without a family of their own fall back to graphics.
fn queue_slots(graphics: u32, compute: Option<u32>, copy: Option<u32>) -> (Vec<u32>, [usize; 3]) {
    let mut families = vec![graphics];
    let mut slot_of = |family: Option<u32>| match family {
        None => 0,
        Some(family) => match families.iter().position(|&f| f == family) {
            Some(slot) => slot,
            None => {
                families.push(family);
                families.len() - 1
            }
        },
    };
    let by_type = [0, slot_of(compute), slot_of(copy)];
    (families, by_type)
}

fn type_index(queue: QueueType) -> usize {
    match queue {
        QueueType::Graphics => 0,
        QueueType::Compute => 1,
        QueueType::Copy => 2,
    }
}

pub struct LogicalDevice {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    queues: Queues,
    queue_families: QueueFamilyIndices,
    push_descriptor: ash::khr::push_descriptor::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl LogicalDevice {
    /// Creates the device with dynamic rendering, synchronization2 and push
    /// descriptors enabled, and initializes the allocator.
    pub fn new(instance: &Instance, info: &PhysicalDeviceInfo) -> Result<Self, RhiError> {
        let queue_families = info.queue_families;
        let unique_families = queue_families.unique_families();
        let priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();
        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .host_query_reset(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(info.features.sampler_anisotropy == vk::TRUE)
            .fill_mode_non_solid(info.features.fill_mode_non_solid == vk::TRUE)
            .depth_clamp(info.features.depth_clamp == vk::TRUE)
            .depth_bias_clamp(info.features.depth_bias_clamp == vk::TRUE)
            .wide_lines(info.features.wide_lines == vk::TRUE);

        let extension_names: Vec<*const std::ffi::c_char> =
            REQUIRED_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)?
        };
        info!(
            "Logical device created with {} extension(s)",
            REQUIRED_EXTENSIONS.len()
        );

        let graphics_family = queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let (families, by_type) = queue_slots(
            graphics_family,
            queue_families.family(QueueType::Compute),
            queue_families.family(QueueType::Copy),
        );
        let slots = families
            .iter()
            .map(|&family| {
                debug!("Queue retrieved from family {}", family);
                Mutex::new(unsafe { device.get_device_queue(family, 0) })
            })
            .collect();
        let queues = Queues { slots, by_type };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: info.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;
        info!("GPU memory allocator initialized");

        let push_descriptor = ash::khr::push_descriptor::Device::new(instance.handle(), &device);
        let debug_utils = instance
            .has_debug_utils()
            .then(|| ash::ext::debug_utils::Device::new(instance.handle(), &device));

        Ok(Self {
            device,
            physical_device: info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            queues,
            queue_families,
            push_descriptor,
            debug_utils,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    #[inline]
    pub fn push_descriptor(&self) -> &ash::khr::push_descriptor::Device {
        &self.push_descriptor
    }

    #[inline]
    pub fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    /// Family index serving `queue`.
    pub fn queue_family(&self, queue: QueueType) -> u32 {
        self.queue_families
            .family(queue)
            .or(self.queue_families.graphics_family)
            .unwrap_or(0)
    }

    fn queue(&self, queue: QueueType) -> &Mutex<vk::Queue> {
        &self.queues.slots[self.queues.by_type[type_index(queue)]]
    }

    /// Submits one command buffer, signalling `fence` on completion.
    pub fn submit(
        &self,
        queue: QueueType,
        cmd: vk::CommandBuffer,
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&command_buffers);

        let queue = self.queue(queue).lock();
        unsafe {
            self.device
                .queue_submit2(*queue, std::slice::from_ref(&submit), fence)?;
        }
        Ok(())
    }

    /// Waits for all queues. Every queue lock is held for the duration of
    /// the wait, taken in slot order so it cannot deadlock with `submit`.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        let _guards: Vec<_> = self.queues.slots.iter().map(|queue| queue.lock()).collect();
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_descriptors_are_required() {
        assert!(REQUIRED_EXTENSIONS.contains(&ash::khr::push_descriptor::NAME));
    }

    #[test]
    fn test_queue_slots_share_graphics_family() {
        let (families, by_type) = queue_slots(0, Some(0), None);
        assert_eq!(families, vec![0]);
        assert_eq!(by_type, [0, 0, 0]);
    }

    #[test]
    fn test_queue_slots_share_one_lock_per_family() {
        // Compute and copy on the same dedicated family get one slot.
        let (families, by_type) = queue_slots(0, Some(2), Some(2));
        assert_eq!(families, vec![0, 2]);
        assert_eq!(by_type, [0, 1, 1]);

        let (families, by_type) = queue_slots(0, Some(1), Some(2));
        assert_eq!(families, vec![0, 1, 2]);
        assert_eq!(by_type, [0, 1, 2]);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LogicalDevice>();
    }
}
