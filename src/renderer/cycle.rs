//! The submission cycle: the per-tick state machine that waits out a frame
//! slot's previous work, acquires a presentable image, records the command
//! stream (layout transitions included), submits, and presents.
//!
//! The cycle owns the counters and the full transition sequence; everything
//! device-shaped goes through [`FrameDriver`], so the same machine runs
//! against a real device and against the simulator in `sim`.

use log::warn;

use crate::renderer::frame::slot_for_tick;
use crate::Result;

/// How long a fence wait may block before the tick gives up (1 second).
pub const DEFAULT_FENCE_TIMEOUT_NS: u64 = 1_000_000_000;

/// How long image acquisition may block before the tick gives up (1 second).
pub const DEFAULT_ACQUIRE_TIMEOUT_NS: u64 = 1_000_000_000;

/// Layout a presentable image is in at some point of the recorded stream.
/// Every tick moves the acquired image undefined → color-attachment →
/// present-source; no stream may end in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// Contents unspecified; previous frames are explicitly discardable.
    Undefined,
    /// Renderable as a color target.
    ColorAttachment,
    /// Handed over to the display engine.
    PresentSource,
}

/// Outcome of a bounded fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
}

/// Outcome of requesting the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAcquire {
    Ready { image_index: u32 },
    /// Image delivered, but the surface is no longer optimally configured.
    Suboptimal { image_index: u32 },
    /// No image became available within the timeout.
    TimedOut,
    /// The surface can no longer serve images (out of date or lost). The
    /// caller decides whether to rebuild; the cycle keeps rotating.
    OutOfDate,
}

/// Outcome of queuing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Which step of the tick reported a surface condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStage {
    Acquire,
    Present,
}

/// Per-tick result reported to the caller. Everything except [`Presented`]
/// is retryable: the cycle has already advanced its counter and the next
/// tick may be attempted. Repeated non-`Presented` ticks are the caller's
/// signal to rebuild the surface.
///
/// [`Presented`]: TickStatus::Presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Frame submitted and queued for presentation.
    Presented,
    /// Frame went through, but the surface reported itself suboptimal.
    Suboptimal(SurfaceStage),
    /// The surface is out of date or lost. On `Acquire` nothing was
    /// submitted this tick; on `Present` the submission still retires.
    OutOfDate(SurfaceStage),
    /// The slot's previous submission did not retire within the timeout.
    /// Nothing was submitted; the slot's fence was not reset.
    FenceTimeout,
    /// No presentable image arrived within the timeout. Nothing was
    /// submitted this tick.
    AcquireTimeout,
}

impl TickStatus {
    /// True for every outcome the caller may simply retry on the next tick.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TickStatus::Presented)
    }
}

/// What one tick did: which tick number and slot ran, which image (if any)
/// was acquired, and how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub slot: usize,
    pub image_index: Option<u32>,
    pub status: TickStatus,
}

/// The per-tick operations the cycle needs from a device.
///
/// Methods are invoked in a fixed order each tick; implementations never
/// decide ordering, only perform the operation. An `Err` from any method is
/// fatal (device loss, unexpected API failure) and aborts the renderer;
/// retryable conditions are expressed in the return values.
pub trait FrameDriver {
    /// Block until the slot's previous submission retires, bounded by the
    /// timeout.
    fn wait_slot_fence(&mut self, slot: usize, timeout_ns: u64) -> Result<FenceWait>;

    /// Return the slot's fence to the unsignaled state. Called only after a
    /// successful wait.
    fn reset_slot_fence(&mut self, slot: usize) -> Result<()>;

    /// Request the next presentable image, signaling the slot's acquire
    /// semaphore on the GPU timeline when it becomes available.
    fn acquire_image(&mut self, slot: usize, timeout_ns: u64) -> Result<ImageAcquire>;

    /// Reset the slot's command buffer and begin one-time-submit recording.
    fn begin_recording(&mut self, slot: usize) -> Result<()>;

    /// Record a layout-transition barrier for the acquired image.
    fn transition_image(
        &mut self,
        slot: usize,
        image_index: u32,
        from: ImageState,
        to: ImageState,
    ) -> Result<()>;

    /// Record the frame's draw work against the acquired image.
    fn record_payload(&mut self, slot: usize, image_index: u32, tick: u64) -> Result<()>;

    /// Finish recording the slot's command buffer.
    fn end_recording(&mut self, slot: usize) -> Result<()>;

    /// Submit the slot's command buffer: wait the acquire semaphore at the
    /// color-attachment-output stage, signal the present semaphore and the
    /// completion fence.
    fn submit(&mut self, slot: usize) -> Result<()>;

    /// Queue the image for presentation behind the slot's present semaphore.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
}

/// The submission cycle state: a monotonically increasing frame counter and
/// the timeouts bounding the two blocking points. The current slot is always
/// `frame_counter mod FRAMES_IN_FLIGHT`; it advances exactly one step per
/// tick and resets only at construction or an explicit [`reset`].
///
/// [`reset`]: SubmissionCycle::reset
pub struct SubmissionCycle {
    frame_counter: u64,
    fence_timeout_ns: u64,
    acquire_timeout_ns: u64,
}

impl Default for SubmissionCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionCycle {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_FENCE_TIMEOUT_NS, DEFAULT_ACQUIRE_TIMEOUT_NS)
    }

    pub fn with_timeouts(fence_timeout_ns: u64, acquire_timeout_ns: u64) -> Self {
        Self {
            frame_counter: 0,
            fence_timeout_ns,
            acquire_timeout_ns,
        }
    }

    /// Ticks completed (or skipped on a retryable condition) so far. Usable
    /// by payloads for time-varying effects.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Slot the next tick will use.
    pub fn current_slot(&self) -> usize {
        slot_for_tick(self.frame_counter)
    }

    /// Return the counters to their initial state. Only meaningful as part
    /// of a full surface rebuild, after an idle wait.
    pub fn reset(&mut self) {
        self.frame_counter = 0;
    }

    /// Run one tick: wait out the slot, acquire, record, submit, present,
    /// advance.
    ///
    /// This function owns the whole transition sequence; drivers only
    /// execute the individual operations, so semaphore and barrier ordering
    /// cannot diverge between backends. Retryable conditions come back as a
    /// [`TickStatus`] with the counter already advanced; `Err` is fatal and
    /// leaves the counter untouched.
    pub fn tick<D: FrameDriver>(&mut self, driver: &mut D) -> Result<TickReport> {
        let tick = self.frame_counter;
        let slot = slot_for_tick(tick);

        if let FenceWait::TimedOut = driver.wait_slot_fence(slot, self.fence_timeout_ns)? {
            warn!("tick {tick}: slot {slot} fence wait exceeded {}ns", self.fence_timeout_ns);
            return Ok(self.finish(tick, slot, None, TickStatus::FenceTimeout));
        }
        driver.reset_slot_fence(slot)?;

        let (image_index, acquired_suboptimal) =
            match driver.acquire_image(slot, self.acquire_timeout_ns)? {
                ImageAcquire::Ready { image_index } => (image_index, false),
                ImageAcquire::Suboptimal { image_index } => {
                    warn!("tick {tick}: slot {slot} acquired image {image_index} on a suboptimal surface");
                    (image_index, true)
                }
                ImageAcquire::TimedOut => {
                    warn!("tick {tick}: slot {slot} image acquisition exceeded {}ns", self.acquire_timeout_ns);
                    return Ok(self.finish(tick, slot, None, TickStatus::AcquireTimeout));
                }
                ImageAcquire::OutOfDate => {
                    warn!("tick {tick}: slot {slot} surface out of date during acquire");
                    return Ok(self.finish(
                        tick,
                        slot,
                        None,
                        TickStatus::OutOfDate(SurfaceStage::Acquire),
                    ));
                }
            };

        driver.begin_recording(slot)?;
        driver.transition_image(
            slot,
            image_index,
            ImageState::Undefined,
            ImageState::ColorAttachment,
        )?;
        driver.record_payload(slot, image_index, tick)?;
        driver.transition_image(
            slot,
            image_index,
            ImageState::ColorAttachment,
            ImageState::PresentSource,
        )?;
        driver.end_recording(slot)?;

        driver.submit(slot)?;

        let status = match driver.present(slot, image_index)? {
            PresentOutcome::Presented if acquired_suboptimal => {
                TickStatus::Suboptimal(SurfaceStage::Acquire)
            }
            PresentOutcome::Presented => TickStatus::Presented,
            PresentOutcome::Suboptimal => {
                warn!("tick {tick}: slot {slot} surface suboptimal during present");
                TickStatus::Suboptimal(if acquired_suboptimal {
                    SurfaceStage::Acquire
                } else {
                    SurfaceStage::Present
                })
            }
            PresentOutcome::OutOfDate => {
                warn!("tick {tick}: slot {slot} surface out of date during present");
                TickStatus::OutOfDate(SurfaceStage::Present)
            }
        };

        Ok(self.finish(tick, slot, Some(image_index), status))
    }

    /// Advance the counter unconditionally and assemble the report. Every
    /// non-fatal path ends here so slot rotation never stalls on a bad
    /// frame.
    fn finish(
        &mut self,
        tick: u64,
        slot: usize,
        image_index: Option<u32>,
        status: TickStatus,
    ) -> TickReport {
        self.frame_counter += 1;
        TickReport {
            tick,
            slot,
            image_index,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::sim::{AcquireScript, PresentScript, RecordedOp, SimulatedGpu};

    const MS: u64 = 1_000_000;

    fn fast_gpu() -> SimulatedGpu {
        // Retires every submission within 1ms, well inside the 1s timeout.
        SimulatedGpu::new(3, MS)
    }

    #[test]
    fn five_fast_ticks_present_in_strict_rotation() {
        let mut cycle = SubmissionCycle::new();
        let mut gpu = fast_gpu();

        let mut slots = Vec::new();
        for _ in 0..5 {
            let report = cycle.tick(&mut gpu).unwrap();
            assert_eq!(report.status, TickStatus::Presented);
            slots.push(report.slot);
        }

        assert_eq!(cycle.frame_counter(), 5);
        assert_eq!(slots, [0, 1, 0, 1, 0]);
        assert_eq!(gpu.presented().len(), 5);
    }

    #[test]
    fn at_most_two_submissions_in_flight() {
        // GPU lags behind the CPU but stays inside the fence timeout, so
        // every tick submits while older work is still retiring.
        let mut cycle = SubmissionCycle::new();
        let mut gpu = SimulatedGpu::new(3, 500 * MS);

        for _ in 0..32 {
            let report = cycle.tick(&mut gpu).unwrap();
            assert_eq!(report.status, TickStatus::Presented);
        }

        assert!(gpu.peak_in_flight() <= 2, "observed {} concurrent submissions", gpu.peak_in_flight());
        assert_eq!(gpu.peak_in_flight(), 2);
    }

    #[test]
    fn fence_gate_blocks_until_prior_work_retires() {
        let latency = 400 * MS;
        let mut cycle = SubmissionCycle::new();
        let mut gpu = SimulatedGpu::new(3, latency);

        cycle.tick(&mut gpu).unwrap(); // slot 0, retires at t=400ms
        cycle.tick(&mut gpu).unwrap(); // slot 1
        let before = gpu.now_ns();
        cycle.tick(&mut gpu).unwrap(); // slot 0 again, must wait out tick 0

        assert!(gpu.now_ns() >= latency, "tick 2 recorded before slot 0 retired");
        assert!(gpu.now_ns() > before);
    }

    #[test]
    fn fence_timeout_skips_submission_but_advances_counter() {
        // GPU slower than the fence timeout: the third tick finds slot 0
        // still busy and must give up without touching its command buffer.
        let mut cycle = SubmissionCycle::with_timeouts(10 * MS, 10 * MS);
        let mut gpu = SimulatedGpu::new(3, 10_000 * MS);

        assert_eq!(cycle.tick(&mut gpu).unwrap().status, TickStatus::Presented);
        assert_eq!(cycle.tick(&mut gpu).unwrap().status, TickStatus::Presented);

        let report = cycle.tick(&mut gpu).unwrap();
        assert_eq!(report.status, TickStatus::FenceTimeout);
        assert_eq!(report.slot, 0);
        assert_eq!(report.image_index, None);
        assert!(report.status.is_retryable());

        assert_eq!(cycle.frame_counter(), 3);
        assert_eq!(gpu.submitted_streams().len(), 2, "timed-out tick must not submit");
    }

    #[test]
    fn suboptimal_acquire_completes_the_tick() {
        let mut cycle = SubmissionCycle::new();
        let mut gpu = fast_gpu();
        gpu.script_acquire(AcquireScript::Suboptimal);

        let report = cycle.tick(&mut gpu).unwrap();
        assert_eq!(report.status, TickStatus::Suboptimal(SurfaceStage::Acquire));
        assert!(report.status.is_retryable());
        assert_eq!(cycle.frame_counter(), 1);
        assert_eq!(gpu.presented().len(), 1, "a suboptimal acquire still presents");
    }

    #[test]
    fn suboptimal_present_is_reported_with_its_stage() {
        let mut cycle = SubmissionCycle::new();
        let mut gpu = fast_gpu();
        gpu.script_present(PresentScript::Suboptimal);

        let report = cycle.tick(&mut gpu).unwrap();
        assert_eq!(report.status, TickStatus::Suboptimal(SurfaceStage::Present));
        assert_eq!(cycle.frame_counter(), 1);
    }

    #[test]
    fn out_of_date_acquire_advances_without_submitting() {
        let mut cycle = SubmissionCycle::new();
        let mut gpu = fast_gpu();
        gpu.script_acquire(AcquireScript::OutOfDate);

        let report = cycle.tick(&mut gpu).unwrap();
        assert_eq!(report.status, TickStatus::OutOfDate(SurfaceStage::Acquire));
        assert_eq!(report.image_index, None);
        assert_eq!(cycle.frame_counter(), 1);
        assert!(gpu.submitted_streams().is_empty());

        // The cycle itself keeps rotating; the next tick runs slot 1.
        let next = cycle.tick(&mut gpu).unwrap();
        assert_eq!(next.slot, 1);
        assert_eq!(next.status, TickStatus::Presented);
    }

    #[test]
    fn every_stream_carries_exactly_the_two_transitions() {
        let mut cycle = SubmissionCycle::new();
        let mut gpu = fast_gpu();

        for _ in 0..6 {
            cycle.tick(&mut gpu).unwrap();
        }

        for stream in gpu.submitted_streams() {
            let transitions: Vec<_> = stream
                .ops
                .iter()
                .filter_map(|op| match op {
                    RecordedOp::Transition { from, to } => Some((*from, *to)),
                    _ => None,
                })
                .collect();
            assert_eq!(
                transitions,
                [
                    (ImageState::Undefined, ImageState::ColorAttachment),
                    (ImageState::ColorAttachment, ImageState::PresentSource),
                ]
            );

            // Payload sits strictly between the two barriers.
            assert!(matches!(stream.ops[1], RecordedOp::Payload { .. }));
            assert_eq!(stream.ops.len(), 3);
        }
    }

    #[test]
    fn acquisition_index_cycles_independently_of_slot_index() {
        // Three presentable images over two slots: the image sequence
        // 0,1,2,0,1,2 deliberately drifts against the slot sequence
        // 0,1,0,1,0,1.
        let mut cycle = SubmissionCycle::new();
        let mut gpu = fast_gpu();

        let mut pairs = Vec::new();
        for _ in 0..6 {
            let report = cycle.tick(&mut gpu).unwrap();
            pairs.push((report.slot, report.image_index.unwrap()));
        }

        let images: Vec<u32> = pairs.iter().map(|&(_, image)| image).collect();
        let slots: Vec<usize> = pairs.iter().map(|&(slot, _)| slot).collect();
        assert_eq!(images, [0, 1, 2, 0, 1, 2]);
        assert_eq!(slots, [0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn payload_sees_the_tick_number() {
        let mut cycle = SubmissionCycle::new();
        let mut gpu = fast_gpu();

        for _ in 0..3 {
            cycle.tick(&mut gpu).unwrap();
        }

        let ticks: Vec<u64> = gpu
            .submitted_streams()
            .iter()
            .flat_map(|stream| &stream.ops)
            .filter_map(|op| match op {
                RecordedOp::Payload { tick } => Some(*tick),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, [0, 1, 2]);
    }

    #[test]
    fn reset_returns_rotation_to_the_first_slot() {
        let mut cycle = SubmissionCycle::new();
        let mut gpu = fast_gpu();

        for _ in 0..3 {
            cycle.tick(&mut gpu).unwrap();
        }
        assert_eq!(cycle.current_slot(), 1);

        cycle.reset();
        assert_eq!(cycle.frame_counter(), 0);
        assert_eq!(cycle.current_slot(), 0);
    }

    #[test]
    fn acquire_timeout_parks_the_slot_until_rebuild() {
        // The fence is reset before acquisition, so a timed-out acquire
        // leaves the slot with nothing pending that could re-signal it. The
        // slot keeps reporting FenceTimeout until the caller rebuilds; the
        // other slot is unaffected.
        let mut cycle = SubmissionCycle::with_timeouts(10 * MS, 10 * MS);
        let mut gpu = fast_gpu();
        gpu.script_acquire(AcquireScript::TimedOut);

        assert_eq!(cycle.tick(&mut gpu).unwrap().status, TickStatus::AcquireTimeout);
        assert_eq!(cycle.tick(&mut gpu).unwrap().status, TickStatus::Presented);
        assert_eq!(cycle.tick(&mut gpu).unwrap().status, TickStatus::FenceTimeout);
        assert_eq!(cycle.tick(&mut gpu).unwrap().status, TickStatus::Presented);
        assert_eq!(cycle.frame_counter(), 4);
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut cycle = SubmissionCycle::new();
        let mut gpu = fast_gpu();
        for _ in 0..4 {
            cycle.tick(&mut gpu).unwrap();
        }

        gpu.wait_idle();
        gpu.release_resources();
        gpu.release_resources(); // second call finds empty state
        assert_eq!(gpu.release_calls(), 2);
    }
}
