//! Thin ownership wrappers over the raw Vulkan objects the renderer consumes.
//!
//! Everything in here is one-shot setup plumbing: created once after surface
//! negotiation, handed to the submission core as plain handles, destroyed in
//! reverse order behind a device idle wait.

pub mod command;
pub mod device;
pub mod instance;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use command::CommandPool;
pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use surface::{HeadlessSurfaceProvider, SurfaceProvider, WindowSurfaceProvider};
pub use swapchain::{PresentTargets, SwapchainWrapper, PREFERRED_SURFACE_FORMATS};
