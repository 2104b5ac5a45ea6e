//! Creation helpers for the two synchronization primitives the frame slots
//! carry: binary semaphores (GPU-to-GPU ordering, never observed by the CPU)
//! and fences (GPU-to-CPU completion).

use ash::vk;

use crate::{RenderError, Result};

/// Binary semaphore, created unsignaled.
pub fn create_binary_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    unsafe {
        device
            .create_semaphore(&create_info, None)
            .map_err(RenderError::FrameSlotCreation)
    }
}

/// Fence for CPU-side completion waits. Frame slot fences start signaled so
/// the very first wait passes without stalling on work that never existed.
pub fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let create_info = vk::FenceCreateInfo::default().flags(flags);
    unsafe {
        device
            .create_fence(&create_info, None)
            .map_err(RenderError::FrameSlotCreation)
    }
}
