//! Minimal Vulkan frame submission and presentation core built on ASH.
//!
//! The crate drives the classic "acquire an image, draw into it, present it"
//! protocol under overlapped CPU/GPU execution: two reusable frame slots are
//! rotated round-robin, each gated by a completion fence so its command
//! buffer and semaphores are never touched while the GPU still owns them.
//!
//! The submission cycle itself ([`SubmissionCycle`]) is generic over a
//! [`FrameDriver`], so the exact same state machine runs against a real
//! device ([`Renderer`]) and against the deterministic GPU-timeline
//! simulator ([`SimulatedGpu`]) used by the tests and benches.
//!
//! What this crate is *not*: a rendering engine. There is no scene graph, no
//! resource streaming, no render graph. Pipeline objects, descriptor content
//! and shader binaries are inputs; the per-frame draw work is a recording
//! callback supplied by the caller.

use ash::vk;
use thiserror::Error;

pub mod renderer;
pub mod vulkan;

pub use renderer::cycle::{
    FenceWait, FrameDriver, ImageAcquire, ImageState, PresentOutcome, SubmissionCycle,
    SurfaceStage, TickReport, TickStatus,
};
pub use renderer::frame::{FrameSlot, FrameSlotPool, FRAMES_IN_FLIGHT};
pub use renderer::renderer::{RecordContext, Renderer};
pub use renderer::sim::SimulatedGpu;
pub use vulkan::surface::{HeadlessSurfaceProvider, SurfaceProvider, WindowSurfaceProvider};

/// Crate-wide error type.
///
/// Every variant here is fatal to the renderer: creation failures during
/// setup, device loss, or an unexpected Vulkan result. Retryable per-tick
/// conditions (fence timeout, suboptimal surface, ...) are *not* errors;
/// they are reported through [`TickStatus`] and the cycle keeps advancing.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Raw Vulkan failure propagated from an API call.
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Instance, surface or logical-device setup failed.
    #[error("device initialization failed: {0}")]
    DeviceInitFailed(String),

    /// None of the preferred surface formats intersect what the surface
    /// reports.
    #[error("no compatible surface format among {requested:?}")]
    NoCompatibleFormat { requested: Vec<vk::Format> },

    /// A per-image view could not be constructed while building the
    /// presentable image pool.
    #[error("swapchain image view creation failed: {0}")]
    ImageViewCreation(vk::Result),

    /// Semaphore, fence or command-pool creation failed while building the
    /// frame slot pool.
    #[error("frame slot creation failed: {0}")]
    FrameSlotCreation(vk::Result),

    /// The logical device was lost. Nothing useful can be submitted again.
    #[error("device lost")]
    DeviceLost,
}

pub type Result<T> = std::result::Result<T, RenderError>;

pub mod prelude {
    //! Convenience re-exports for downstream users.
    pub use crate::renderer::cycle::{SubmissionCycle, TickReport, TickStatus};
    pub use crate::renderer::renderer::{RecordContext, Renderer};
    pub use crate::vulkan::surface::{SurfaceProvider, WindowSurfaceProvider};
    pub use crate::{RenderError, Result};
}
