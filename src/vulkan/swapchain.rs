use ash::{khr::swapchain, vk};
use log::{info, trace};

use crate::vulkan::device::VulkanDevice;
use crate::vulkan::instance::VulkanInstance;
use crate::{RenderError, Result};

/// Surface formats the renderer accepts, most preferred first.
pub const PREFERRED_SURFACE_FORMATS: &[vk::Format] =
    &[vk::Format::R8G8B8A8_SRGB, vk::Format::B8G8R8A8_SRGB];

/// Full single-layer, single-mip color range; every swapchain image view and
/// barrier in this crate covers exactly this.
pub const COLOR_SUBRESOURCE_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Pick the first preferred format the surface actually reports, carrying
/// the color space of the matching entry.
fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferences: &[vk::Format],
) -> Result<vk::SurfaceFormatKHR> {
    preferences
        .iter()
        .find_map(|&wanted| {
            available
                .iter()
                .find(|candidate| candidate.format == wanted)
                .copied()
        })
        .ok_or_else(|| RenderError::NoCompatibleFormat {
            requested: preferences.to_vec(),
        })
}

/// Image count to request: at least 3, more if the surface demands it,
/// clamped to the surface maximum when one exists.
fn negotiated_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count.max(3);
    if capabilities.max_image_count > 0 {
        wanted.min(capabilities.max_image_count)
    } else {
        wanted
    }
}

/// Owns the swapchain handle and its loader, plus the negotiated format and
/// extent the rest of the renderer keys off.
pub struct SwapchainWrapper {
    loader: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
}

impl SwapchainWrapper {
    /// Negotiate format and image count against the surface and create the
    /// swapchain: FIFO presentation, opaque alpha, exclusive sharing,
    /// color-attachment usage.
    pub fn new(
        vulkan_instance: &VulkanInstance,
        vulkan_device: &VulkanDevice,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let surface = vulkan_instance.surface();
        if surface == vk::SurfaceKHR::null() {
            return Err(RenderError::DeviceInitFailed(
                "Cannot create a swapchain without a surface".to_string(),
            ));
        }

        let capabilities = unsafe {
            vulkan_instance
                .surface_loader()
                .get_physical_device_surface_capabilities(vulkan_device.physical_device, surface)?
        };
        trace!("Surface capabilities {capabilities:?}");

        let available_formats = unsafe {
            vulkan_instance
                .surface_loader()
                .get_physical_device_surface_formats(vulkan_device.physical_device, surface)?
        };
        let format = select_surface_format(&available_formats, PREFERRED_SURFACE_FORMATS)?;
        let image_count = negotiated_image_count(&capabilities);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(false);

        let loader = swapchain::Device::new(vulkan_instance.instance(), &vulkan_device.device);
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        info!(
            "Swapchain created: {:?}, {} images requested, {}x{}",
            format.format, image_count, extent.width, extent.height
        );

        Ok(Self {
            loader,
            swapchain,
            format,
            extent,
        })
    }

    /// Fetch the images the implementation actually allocated. The count may
    /// exceed what was requested.
    pub fn images(&self) -> Result<Vec<vk::Image>> {
        let images = unsafe { self.loader.get_swapchain_images(self.swapchain)? };
        Ok(images)
    }

    /// Ask the surface for the next presentable image, signaling `semaphore`
    /// on the GPU timeline when it becomes available. Raw result; the caller
    /// classifies timeout/suboptimal/out-of-date.
    pub fn acquire(
        &self,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> std::result::Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
        }
    }

    /// Queue the image for presentation once `wait_semaphore` signals.
    /// `Ok(true)` means presented but suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> std::result::Result<bool, vk::Result> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }
}

impl Drop for SwapchainWrapper {
    fn drop(&mut self) {
        unsafe {
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }
}

/// The presentable image pool: one image + view pair per swapchain image,
/// indexed by acquisition index. Images belong to the swapchain; only the
/// views are owned here.
pub struct PresentTargets {
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl PresentTargets {
    /// Build one view per image over the full color subresource range. If
    /// any view fails, every view created so far is destroyed before the
    /// error propagates.
    pub fn new(device: &ash::Device, images: Vec<vk::Image>, format: vk::Format) -> Result<Self> {
        let mut views = Vec::with_capacity(images.len());

        for &image in &images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(COLOR_SUBRESOURCE_RANGE);

            match unsafe { device.create_image_view(&create_info, None) } {
                Ok(view) => views.push(view),
                Err(e) => {
                    for view in views.drain(..) {
                        unsafe { device.destroy_image_view(view, None) };
                    }
                    return Err(RenderError::ImageViewCreation(e));
                }
            }
        }

        trace!("Created {} presentable image views", views.len());
        Ok(Self { images, views })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    pub fn view(&self, index: u32) -> vk::ImageView {
        self.views[index as usize]
    }

    /// Destroy all views. Only call once the device is idle: no in-flight
    /// submission may still reference any of them. Safe to call twice; the
    /// second call finds nothing to release.
    ///
    /// # Safety
    /// The device must be idle and must outlive this call.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.views.is_empty() && self.images.is_empty() {
            return;
        }

        for view in self.views.drain(..) {
            device.destroy_image_view(view, None);
        }
        // Images are returned to the swapchain, not destroyed.
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn picks_first_preference_when_available() {
        let available = [fmt(vk::Format::B8G8R8A8_SRGB), fmt(vk::Format::R8G8B8A8_SRGB)];
        let chosen = select_surface_format(&available, PREFERRED_SURFACE_FORMATS).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn falls_through_preference_list_in_order() {
        let available = [fmt(vk::Format::R5G6B5_UNORM_PACK16), fmt(vk::Format::B8G8R8A8_SRGB)];
        let chosen = select_surface_format(&available, PREFERRED_SURFACE_FORMATS).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn result_is_always_one_of_the_preferences() {
        let available = [
            fmt(vk::Format::R8G8B8A8_UNORM),
            fmt(vk::Format::B8G8R8A8_SRGB),
            fmt(vk::Format::R8G8B8A8_SRGB),
        ];
        let chosen = select_surface_format(&available, PREFERRED_SURFACE_FORMATS).unwrap();
        assert!(PREFERRED_SURFACE_FORMATS.contains(&chosen.format));
    }

    #[test]
    fn no_intersection_is_a_defined_error() {
        let available = [fmt(vk::Format::R5G6B5_UNORM_PACK16)];
        let err = select_surface_format(&available, PREFERRED_SURFACE_FORMATS).unwrap_err();
        assert!(matches!(err, RenderError::NoCompatibleFormat { .. }));
    }

    #[test]
    fn carries_color_space_of_the_matching_entry() {
        let available = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        let chosen = select_surface_format(&available, PREFERRED_SURFACE_FORMATS).unwrap();
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT);
    }

    #[test]
    fn image_count_floors_at_three() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(negotiated_image_count(&caps), 3);
    }

    #[test]
    fn image_count_honors_larger_surface_minimum() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 4,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(negotiated_image_count(&caps), 4);
    }

    #[test]
    fn image_count_respects_surface_maximum() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(negotiated_image_count(&caps), 2);
    }
}
