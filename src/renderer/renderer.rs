use ash::vk;
use log::info;

use crate::renderer::cycle::{
    FenceWait, FrameDriver, ImageAcquire, ImageState, PresentOutcome, SubmissionCycle, TickReport,
};
use crate::renderer::frame::{FrameSlot, FrameSlotPool, FRAMES_IN_FLIGHT};
use crate::vulkan::device::{map_device_result, VulkanDevice};
use crate::vulkan::instance::VulkanInstance;
use crate::vulkan::surface::SurfaceProvider;
use crate::vulkan::swapchain::{PresentTargets, SwapchainWrapper, COLOR_SUBRESOURCE_RANGE};
use crate::Result;

/// Everything a recording callback needs to emit draw work for one tick.
///
/// The image is already in color-attachment layout when the callback runs
/// and is transitioned to present-source afterwards; the callback only
/// records rendering commands (typically a dynamic-rendering begin/end pair
/// around its draws).
pub struct RecordContext<'a> {
    pub device: &'a ash::Device,
    pub command_buffer: vk::CommandBuffer,
    pub image: vk::Image,
    pub image_view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    /// Monotonic frame counter, usable for time-varying payload content.
    pub frame_index: u64,
}

/// The device-backed renderer: owns the Vulkan context, the presentable
/// image pool, the frame slot pool, and the submission cycle that drives
/// them.
///
/// One instance per surface. A surface or resolution change is not handled
/// live: drop the renderer (which idles the device first) and build a new
/// one.
pub struct Renderer {
    cycle: SubmissionCycle,
    slot_pool: FrameSlotPool,
    targets: PresentTargets,
    swapchain: SwapchainWrapper,
    vulkan_device: VulkanDevice,
    // Declared last: the instance owns the surface and must outlive
    // everything created against it.
    _vulkan_instance: VulkanInstance,
}

impl Renderer {
    /// Build the full context for the provider's surface: instance, device,
    /// swapchain, image pool and frame slots.
    pub fn new<S: SurfaceProvider>(surface_provider: &S) -> Result<Self> {
        let enable_validation = cfg!(all(debug_assertions, feature = "validation"));

        let vulkan_instance = VulkanInstance::new(surface_provider, enable_validation)?;
        if vulkan_instance.surface() == vk::SurfaceKHR::null() {
            return Err(crate::RenderError::DeviceInitFailed(
                "Surface provider produced no surface; presentation needs a window-backed \
                 provider"
                    .to_string(),
            ));
        }

        let vulkan_device = VulkanDevice::new(&vulkan_instance)?;
        let swapchain =
            SwapchainWrapper::new(&vulkan_instance, &vulkan_device, surface_provider.extent())?;

        let images = swapchain.images()?;
        let mut targets =
            PresentTargets::new(&vulkan_device.device, images, swapchain.format.format)?;

        let slot_pool =
            match FrameSlotPool::new(&vulkan_device.device, vulkan_device.queue_family_index) {
                Ok(pool) => pool,
                Err(e) => {
                    // Nothing is in flight yet; unwind the view pool by hand
                    // before the wrappers drop.
                    unsafe { targets.destroy(&vulkan_device.device) };
                    return Err(e);
                }
            };

        info!(
            "Renderer ready: {} presentable images, {} frame slots",
            targets.len(),
            FRAMES_IN_FLIGHT
        );

        Ok(Self {
            cycle: SubmissionCycle::new(),
            slot_pool,
            targets,
            swapchain,
            vulkan_device,
            _vulkan_instance: vulkan_instance,
        })
    }

    /// Run one tick of the submission cycle, recording the caller's payload
    /// into the acquired image.
    ///
    /// Returns the tick report; a non-`Presented` status is retryable and
    /// the cycle has already advanced past it. `Err` means the renderer is
    /// dead (device loss or an unexpected Vulkan failure).
    pub fn render_frame<F>(&mut self, record: &mut F) -> Result<TickReport>
    where
        F: FnMut(&RecordContext<'_>),
    {
        let Self {
            cycle,
            slot_pool,
            targets,
            swapchain,
            vulkan_device,
            ..
        } = self;

        let mut driver = AshFrameDriver {
            device: &vulkan_device.device,
            queue: vulkan_device.queue,
            swapchain,
            targets,
            slots: slot_pool.slots(),
            record,
        };

        cycle.tick(&mut driver)
    }

    /// Ticks completed so far.
    pub fn frame_counter(&self) -> u64 {
        self.cycle.frame_counter()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.swapchain.format
    }

    pub fn present_image_count(&self) -> usize {
        self.targets.len()
    }

    pub fn device(&self) -> &ash::Device {
        &self.vulkan_device.device
    }

    /// Block until the GPU has retired everything submitted so far. The
    /// caller's shutdown path: stop ticking, idle, then drop.
    pub fn wait_idle(&self) -> Result<()> {
        self.vulkan_device.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        info!("Shutting down renderer");

        // Scoped teardown: nothing may still be in flight when the pools go.
        if let Err(e) = self.vulkan_device.wait_idle() {
            log::error!("Device idle wait failed during shutdown: {e}");
        }

        unsafe {
            self.slot_pool.destroy(&self.vulkan_device.device);
            self.targets.destroy(&self.vulkan_device.device);
        }
        // Remaining fields drop in declaration order: swapchain, device,
        // instance.
    }
}

/// [`FrameDriver`] over a real device: raw Vulkan calls for each operation,
/// with surface conditions classified into the cycle's vocabulary.
struct AshFrameDriver<'a, F> {
    device: &'a ash::Device,
    queue: vk::Queue,
    swapchain: &'a SwapchainWrapper,
    targets: &'a PresentTargets,
    slots: &'a [FrameSlot],
    record: &'a mut F,
}

impl<F> AshFrameDriver<'_, F> {
    fn slot(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot]
    }
}

impl<F> FrameDriver for AshFrameDriver<'_, F>
where
    F: FnMut(&RecordContext<'_>),
{
    fn wait_slot_fence(&mut self, slot: usize, timeout_ns: u64) -> Result<FenceWait> {
        let fences = [self.slot(slot).completion_fence];
        match unsafe { self.device.wait_for_fences(&fences, true, timeout_ns) } {
            Ok(()) => Ok(FenceWait::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceWait::TimedOut),
            Err(e) => Err(map_device_result(e)),
        }
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        let fences = [self.slot(slot).completion_fence];
        unsafe {
            self.device
                .reset_fences(&fences)
                .map_err(map_device_result)?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize, timeout_ns: u64) -> Result<ImageAcquire> {
        match self
            .swapchain
            .acquire(self.slot(slot).acquire_semaphore, timeout_ns)
        {
            Ok((image_index, false)) => Ok(ImageAcquire::Ready { image_index }),
            Ok((image_index, true)) => Ok(ImageAcquire::Suboptimal { image_index }),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(ImageAcquire::TimedOut),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::ERROR_SURFACE_LOST_KHR) => {
                Ok(ImageAcquire::OutOfDate)
            }
            Err(e) => Err(map_device_result(e)),
        }
    }

    fn begin_recording(&mut self, slot: usize) -> Result<()> {
        let command_buffer = self.slot(slot).command_buffer;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(map_device_result)?;
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(map_device_result)?;
        }
        Ok(())
    }

    fn transition_image(
        &mut self,
        slot: usize,
        image_index: u32,
        from: ImageState,
        to: ImageState,
    ) -> Result<()> {
        let (src_stage_mask, src_access_mask) = transition_masks(from);
        let (dst_stage_mask, dst_access_mask) = transition_masks(to);

        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stage_mask)
            .src_access_mask(src_access_mask)
            .dst_stage_mask(dst_stage_mask)
            .dst_access_mask(dst_access_mask)
            .old_layout(image_layout(from))
            .new_layout(image_layout(to))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.targets.image(image_index))
            .subresource_range(COLOR_SUBRESOURCE_RANGE);

        let barriers = [barrier];
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

        unsafe {
            self.device
                .cmd_pipeline_barrier2(self.slot(slot).command_buffer, &dependency_info);
        }
        Ok(())
    }

    fn record_payload(&mut self, slot: usize, image_index: u32, tick: u64) -> Result<()> {
        let context = RecordContext {
            device: self.device,
            command_buffer: self.slot(slot).command_buffer,
            image: self.targets.image(image_index),
            image_view: self.targets.view(image_index),
            extent: self.swapchain.extent,
            format: self.swapchain.format.format,
            frame_index: tick,
        };
        (self.record)(&context);
        Ok(())
    }

    fn end_recording(&mut self, slot: usize) -> Result<()> {
        unsafe {
            self.device
                .end_command_buffer(self.slot(slot).command_buffer)
                .map_err(map_device_result)?;
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame_slot = self.slot(slot);

        let wait_semaphores = [frame_slot.acquire_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame_slot.command_buffer];
        let signal_semaphores = [frame_slot.present_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], frame_slot.completion_fence)
                .map_err(map_device_result)?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        match self
            .swapchain
            .present(self.queue, image_index, self.slot(slot).present_semaphore)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::ERROR_SURFACE_LOST_KHR) => {
                Ok(PresentOutcome::OutOfDate)
            }
            Err(e) => Err(map_device_result(e)),
        }
    }
}

fn image_layout(state: ImageState) -> vk::ImageLayout {
    match state {
        ImageState::Undefined => vk::ImageLayout::UNDEFINED,
        ImageState::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageState::PresentSource => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Stage and access masks for one side of a layout-transition barrier. The
/// undefined side synchronizes against color-attachment output with no
/// access (prior content is discarded); the present side needs none, the
/// display engine synchronizes through the present semaphore.
fn transition_masks(state: ImageState) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    match state {
        ImageState::Undefined => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::NONE,
        ),
        ImageState::ColorAttachment => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        ImageState::PresentSource => (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_follow_the_image_states() {
        assert_eq!(image_layout(ImageState::Undefined), vk::ImageLayout::UNDEFINED);
        assert_eq!(
            image_layout(ImageState::ColorAttachment),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            image_layout(ImageState::PresentSource),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn undefined_source_carries_no_access() {
        let (stage, access) = transition_masks(ImageState::Undefined);
        assert_eq!(stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(access, vk::AccessFlags2::NONE);
    }

    #[test]
    fn attachment_writes_are_made_visible() {
        let (stage, access) = transition_masks(ImageState::ColorAttachment);
        assert_eq!(stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
    }
}
