use ash::vk;

use crate::{RenderError, Result};

/// Reset-capable command pool the frame slots allocate their recording
/// buffers from.
pub struct CommandPool {
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(device: &ash::Device, queue_family_index: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let pool = unsafe {
            device
                .create_command_pool(&create_info, None)
                .map_err(RenderError::FrameSlotCreation)?
        };

        Ok(Self { pool })
    }

    /// Allocate `count` primary command buffers. They are freed implicitly
    /// when the pool is destroyed.
    pub fn allocate_primary(&self, device: &ash::Device, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe {
            device
                .allocate_command_buffers(&allocate_info)
                .map_err(RenderError::FrameSlotCreation)?
        };
        Ok(buffers)
    }

    /// Destroy the pool and with it every buffer allocated from it. Second
    /// call is a no-op.
    ///
    /// # Safety
    /// The device must be idle and must outlive this call.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.pool == vk::CommandPool::null() {
            return;
        }
        device.destroy_command_pool(self.pool, None);
        self.pool = vk::CommandPool::null();
    }
}
