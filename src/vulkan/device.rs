use ash::{khr::swapchain, vk};
use log::{info, warn};
use std::ffi::CStr;

use crate::vulkan::instance::VulkanInstance;
use crate::{RenderError, Result};

/// Device extensions every adapter must offer.
const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[swapchain::NAME];

/// Logical device wrapper: the adapter, the device, and the single
/// graphics + compute + transfer queue the submission core uses.
pub struct VulkanDevice {
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue_family_index: u32,
    pub queue: vk::Queue,
}

impl VulkanDevice {
    /// Pick the first adapter that can drive the surface and create a logical
    /// device on it with the Vulkan 1.3 features the renderer records against
    /// (dynamic rendering and synchronization2).
    pub fn new(vulkan_instance: &VulkanInstance) -> Result<Self> {
        let instance = vulkan_instance.instance();

        let physical_devices = unsafe {
            instance.enumerate_physical_devices().map_err(|e| {
                RenderError::DeviceInitFailed(format!("Failed to enumerate adapters: {e:?}"))
            })?
        };

        let physical_device = physical_devices
            .iter()
            .copied()
            .find(|&candidate| match validate_adapter(vulkan_instance, candidate) {
                Ok(()) => true,
                Err(reason) => {
                    warn!("Skipping adapter: {reason}");
                    false
                }
            })
            .ok_or_else(|| {
                RenderError::DeviceInitFailed(
                    "No adapter supports presentation, a unified queue and Vulkan 1.3 dynamic \
                     rendering + synchronization2"
                        .to_string(),
                )
            })?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        let version = properties.api_version;
        info!(
            "Using adapter {:?} with api version {}.{}.{}",
            name,
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version)
        );

        // The validated adapter exposes graphics, compute and transfer on
        // family 0; the whole renderer runs on that one queue.
        let queue_family_index = 0;
        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];

        let extension_names: Vec<*const i8> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let mut enabled_features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut enabled_features_1_3);

        let device = unsafe {
            instance
                .create_device(physical_device, &create_info, None)
                .map_err(|e| {
                    RenderError::DeviceInitFailed(format!("Failed to create device: {e:?}"))
                })?
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        Ok(Self {
            physical_device,
            device,
            queue_family_index,
            queue,
        })
    }

    /// Block until the device has retired all submitted work. Required before
    /// destroying anything a previous submission may still reference.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(map_device_result)?;
        }
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

/// Classify a raw Vulkan result from a queue/device operation, keeping device
/// loss distinguishable from everything else.
pub fn map_device_result(result: vk::Result) -> RenderError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        other => RenderError::Vulkan(other),
    }
}

/// Check one adapter against everything the renderer needs. Returns the
/// first failed requirement as a human-readable reason.
fn validate_adapter(
    vulkan_instance: &VulkanInstance,
    physical_device: vk::PhysicalDevice,
) -> std::result::Result<(), String> {
    let instance = vulkan_instance.instance();

    let presentable = unsafe {
        vulkan_instance
            .surface_loader()
            .get_physical_device_surface_support(physical_device, 0, vulkan_instance.surface())
            .map_err(|e| format!("surface support query failed: {e:?}"))?
    };
    if !presentable {
        return Err("queue family 0 cannot present to the surface".to_string());
    }

    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let unified = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
    match queue_families.first() {
        Some(family) if family.queue_flags.contains(unified) => {}
        _ => {
            return Err(
                "queue family 0 does not offer graphics + compute + transfer".to_string(),
            )
        }
    }

    let available_extensions = unsafe {
        instance
            .enumerate_device_extension_properties(physical_device)
            .map_err(|e| format!("extension enumeration failed: {e:?}"))?
    };
    for required in REQUIRED_DEVICE_EXTENSIONS {
        let found = available_extensions.iter().any(|ext| unsafe {
            CStr::from_ptr(ext.extension_name.as_ptr()) == *required
        });
        if !found {
            return Err(format!("missing device extension {required:?}"));
        }
    }

    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features_1_3);
    unsafe { instance.get_physical_device_features2(physical_device, &mut features) };

    if features_1_3.dynamic_rendering != vk::TRUE {
        return Err("dynamic rendering not supported".to_string());
    }
    if features_1_3.synchronization2 != vk::TRUE {
        return Err("synchronization2 not supported".to_string());
    }

    Ok(())
}
