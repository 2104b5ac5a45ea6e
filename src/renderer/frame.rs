use ash::vk;
use log::debug;

use crate::vulkan::command::CommandPool;
use crate::vulkan::sync::{create_binary_semaphore, create_fence};
use crate::Result;

/// Number of frame slots, i.e. how many submissions may be in flight at
/// once. Two: the CPU records frame N+1 while the GPU retires frame N.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Slot used by a given tick of the submission cycle.
pub fn slot_for_tick(tick: u64) -> usize {
    (tick % FRAMES_IN_FLIGHT as u64) as usize
}

/// One reusable recording context: a command buffer plus the three
/// synchronization objects that pace its reuse.
///
/// The acquire semaphore is signaled by image acquisition and waited by the
/// submission; the present semaphore is signaled by the submission and
/// waited by presentation; the completion fence is signaled when the
/// submission retires and gates the next re-record of this slot. Each
/// semaphore is binary: signaled exactly once and waited exactly once per
/// cycle through the slot.
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub acquire_semaphore: vk::Semaphore,
    pub present_semaphore: vk::Semaphore,
    pub completion_fence: vk::Fence,
}

/// Fixed pool of [`FRAMES_IN_FLIGHT`] frame slots and the command pool
/// backing their buffers.
pub struct FrameSlotPool {
    command_pool: CommandPool,
    slots: Vec<FrameSlot>,
}

impl FrameSlotPool {
    /// Allocate the command buffers and synchronization objects for every
    /// slot. Fences start signaled so the first wait on each slot passes
    /// immediately. On any failure, everything created so far is destroyed
    /// before the error propagates.
    pub fn new(device: &ash::Device, queue_family_index: u32) -> Result<Self> {
        let mut command_pool = CommandPool::new(device, queue_family_index)?;

        let command_buffers = match command_pool.allocate_primary(device, FRAMES_IN_FLIGHT as u32)
        {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { command_pool.destroy(device) };
                return Err(e);
            }
        };

        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for command_buffer in command_buffers {
            match Self::create_slot(device, command_buffer) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    unsafe {
                        Self::destroy_slot_objects(device, &mut slots);
                        command_pool.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        debug!("Created {} frame slots", slots.len());
        Ok(Self {
            command_pool,
            slots,
        })
    }

    fn create_slot(device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<FrameSlot> {
        let acquire_semaphore = create_binary_semaphore(device)?;
        let present_semaphore = match create_binary_semaphore(device) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_semaphore(acquire_semaphore, None) };
                return Err(e);
            }
        };
        let completion_fence = match create_fence(device, true) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(acquire_semaphore, None);
                    device.destroy_semaphore(present_semaphore, None);
                }
                return Err(e);
            }
        };

        Ok(FrameSlot {
            command_buffer,
            acquire_semaphore,
            present_semaphore,
            completion_fence,
        })
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// Destroy every slot's synchronization objects and the backing command
    /// pool (which frees the command buffers). Only call once the device is
    /// idle. Safe to call twice; the second call finds an empty pool.
    ///
    /// # Safety
    /// No submission may still reference any slot, and the device must
    /// outlive this call.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.slots.is_empty() {
            self.command_pool.destroy(device);
            return;
        }

        Self::destroy_slot_objects(device, &mut self.slots);
        self.command_pool.destroy(device);
    }

    unsafe fn destroy_slot_objects(device: &ash::Device, slots: &mut Vec<FrameSlot>) {
        for slot in slots.drain(..) {
            device.destroy_semaphore(slot.acquire_semaphore, None);
            device.destroy_semaphore(slot.present_semaphore, None);
            device.destroy_fence(slot.completion_fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_slots_double_buffer() {
        assert_eq!(FRAMES_IN_FLIGHT, 2);
    }

    #[test]
    fn slot_rotation_is_strict_round_robin() {
        let observed: Vec<usize> = (0..6).map(slot_for_tick).collect();
        assert_eq!(observed, [0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn slot_rotation_never_resets_mid_sequence() {
        for tick in 0..1_000u64 {
            assert_eq!(slot_for_tick(tick + 2), slot_for_tick(tick));
            assert_ne!(slot_for_tick(tick + 1), slot_for_tick(tick));
        }
    }
}
