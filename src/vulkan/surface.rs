//! Surface provider trait for decoupling windowing from renderer setup.
//!
//! The renderer never talks to a window library directly; it asks a
//! [`SurfaceProvider`] for the surface handle, its extent, and the instance
//! extensions it needs. That keeps window-system choice with the caller and
//! lets CI and benches run against a headless provider.

use ash::{khr::surface, vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};

#[cfg(target_os = "linux")]
use raw_window_handle::RawDisplayHandle;

use crate::{RenderError, Result};

/// Source of the Vulkan surface the swapchain will present to.
pub trait SurfaceProvider {
    /// Create a Vulkan surface using the provided entry and instance.
    ///
    /// # Safety
    /// The caller must ensure the entry and instance are valid.
    unsafe fn create_surface(&self, entry: &Entry, instance: &Instance) -> Result<vk::SurfaceKHR>;

    /// Current extent (size) of the surface in pixels.
    fn extent(&self) -> vk::Extent2D;

    /// Instance extensions this surface type needs.
    fn required_extensions(&self) -> Vec<*const i8> {
        let mut extensions = vec![surface::NAME.as_ptr()];

        #[cfg(target_os = "windows")]
        extensions.push(ash::khr::win32_surface::NAME.as_ptr());

        #[cfg(target_os = "linux")]
        {
            extensions.push(ash::khr::xlib_surface::NAME.as_ptr());
            extensions.push(ash::khr::wayland_surface::NAME.as_ptr());
        }

        extensions
    }
}

/// Window-backed provider wrapping anything with raw window/display handles
/// (e.g. `winit::window::Window` or a reference to one).
pub struct WindowSurfaceProvider<W> {
    window: W,
    width: u32,
    height: u32,
}

impl<W> WindowSurfaceProvider<W> {
    pub fn new(window: W, width: u32, height: u32) -> Self {
        Self {
            window,
            width,
            height,
        }
    }

    /// Update the extent, e.g. after a window resize.
    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn window(&self) -> &W {
        &self.window
    }
}

impl<W: HasWindowHandle + HasDisplayHandle> SurfaceProvider for WindowSurfaceProvider<W> {
    unsafe fn create_surface(&self, entry: &Entry, instance: &Instance) -> Result<vk::SurfaceKHR> {
        create_surface_from_handles(entry, instance, &self.window)
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// Headless provider for CI and benchmarks: null surface, no windowing
/// extensions. The renderer refuses to build a swapchain on it, so it is
/// only useful together with the simulator-driven paths.
pub struct HeadlessSurfaceProvider {
    width: u32,
    height: u32,
}

impl HeadlessSurfaceProvider {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl SurfaceProvider for HeadlessSurfaceProvider {
    unsafe fn create_surface(
        &self,
        _entry: &Entry,
        _instance: &Instance,
    ) -> Result<vk::SurfaceKHR> {
        Ok(vk::SurfaceKHR::null())
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    fn required_extensions(&self) -> Vec<*const i8> {
        Vec::new()
    }
}

#[cfg(target_os = "windows")]
unsafe fn create_surface_from_handles<W: HasWindowHandle + HasDisplayHandle>(
    entry: &Entry,
    instance: &Instance,
    window: &W,
) -> Result<vk::SurfaceKHR> {
    use ash::khr::win32_surface;

    match window.window_handle().map(|h| h.as_raw()) {
        Ok(RawWindowHandle::Win32(handle)) => {
            let hwnd = handle.hwnd.get();
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0);

            let create_info = vk::Win32SurfaceCreateInfoKHR::default()
                .hwnd(hwnd as vk::HWND)
                .hinstance(hinstance as vk::HINSTANCE);

            win32_surface::Instance::new(entry, instance)
                .create_win32_surface(&create_info, None)
                .map_err(RenderError::Vulkan)
        }
        _ => Err(RenderError::DeviceInitFailed(
            "Invalid window handle".to_string(),
        )),
    }
}

#[cfg(target_os = "linux")]
unsafe fn create_surface_from_handles<W: HasWindowHandle + HasDisplayHandle>(
    entry: &Entry,
    instance: &Instance,
    window: &W,
) -> Result<vk::SurfaceKHR> {
    use ash::khr::{wayland_surface, xlib_surface};

    match window.window_handle().map(|h| h.as_raw()) {
        Ok(RawWindowHandle::Wayland(handle)) => {
            let display = match window.display_handle().map(|h| h.as_raw()) {
                Ok(RawDisplayHandle::Wayland(d)) => d.display.as_ptr(),
                _ => {
                    return Err(RenderError::DeviceInitFailed(
                        "Invalid display handle".to_string(),
                    ))
                }
            };

            let create_info = vk::WaylandSurfaceCreateInfoKHR::default()
                .display(display)
                .surface(handle.surface.as_ptr());
            wayland_surface::Instance::new(entry, instance)
                .create_wayland_surface(&create_info, None)
                .map_err(RenderError::Vulkan)
        }
        Ok(RawWindowHandle::Xlib(handle)) => {
            let display = match window.display_handle().map(|h| h.as_raw()) {
                Ok(RawDisplayHandle::Xlib(d)) => d
                    .display
                    .map(|d| d.as_ptr())
                    .unwrap_or(std::ptr::null_mut()),
                _ => {
                    return Err(RenderError::DeviceInitFailed(
                        "Invalid display handle".to_string(),
                    ))
                }
            };

            let create_info = vk::XlibSurfaceCreateInfoKHR::default()
                .dpy(display as *mut _)
                .window(handle.window);
            xlib_surface::Instance::new(entry, instance)
                .create_xlib_surface(&create_info, None)
                .map_err(RenderError::Vulkan)
        }
        _ => Err(RenderError::DeviceInitFailed(
            "Invalid window handle".to_string(),
        )),
    }
}

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
unsafe fn create_surface_from_handles<W: HasWindowHandle + HasDisplayHandle>(
    _entry: &Entry,
    _instance: &Instance,
    _window: &W,
) -> Result<vk::SurfaceKHR> {
    Err(RenderError::DeviceInitFailed(
        "Platform not supported for surface creation".to_string(),
    ))
}
