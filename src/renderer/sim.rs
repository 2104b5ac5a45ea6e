//! Deterministic GPU-timeline simulator.
//!
//! Implements [`FrameDriver`] over a virtual clock instead of a device, for
//! the same reason the crate ships [`HeadlessSurfaceProvider`]: tests, CI
//! and benches need to drive the submission cycle without a display or a
//! Vulkan driver. Submissions retire after a configurable latency, fences
//! and image acquisition follow the virtual clock, and every recorded
//! command stream is kept for inspection.
//!
//! The simulator also asserts the invariants a real driver could only
//! express as validation-layer errors: re-recording a slot whose previous
//! submission has not retired, resetting a signaled-less fence, recording
//! against an image outside the pool, or presenting an image that was never
//! submitted. Hitting one of these panics the test.
//!
//! [`HeadlessSurfaceProvider`]: crate::vulkan::surface::HeadlessSurfaceProvider

use std::collections::VecDeque;

use crate::renderer::cycle::{
    FenceWait, FrameDriver, ImageAcquire, ImageState, PresentOutcome,
};
use crate::renderer::frame::FRAMES_IN_FLIGHT;
use crate::Result;

/// One operation recorded into a simulated command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedOp {
    Transition { from: ImageState, to: ImageState },
    Payload { tick: u64 },
}

/// A command stream that went through submit, with the image it targeted.
#[derive(Debug, Clone)]
pub struct SubmittedStream {
    pub slot: usize,
    pub image_index: u32,
    pub ops: Vec<RecordedOp>,
}

/// Behavior injected for the next acquire call; subsequent calls succeed.
#[derive(Debug, Clone, Copy)]
pub enum AcquireScript {
    Suboptimal,
    TimedOut,
    OutOfDate,
}

/// Behavior injected for the next present call.
#[derive(Debug, Clone, Copy)]
pub enum PresentScript {
    Suboptimal,
    OutOfDate,
}

struct Recording {
    image_index: Option<u32>,
    ops: Vec<RecordedOp>,
    ended: bool,
}

struct InFlight {
    slot: usize,
    retires_at: u64,
}

/// Fake GPU timeline: virtual nanosecond clock, per-slot fences, a rotating
/// set of presentable image indices, and a submission queue that retires
/// after `completion_latency_ns`.
pub struct SimulatedGpu {
    now_ns: u64,
    completion_latency_ns: u64,
    image_count: u32,
    next_image: u32,
    outstanding_images: Vec<u32>,
    fence_signaled: Vec<bool>,
    recordings: Vec<Option<Recording>>,
    in_flight: Vec<InFlight>,
    peak_in_flight: usize,
    submitted: Vec<SubmittedStream>,
    presented: Vec<u32>,
    acquire_scripts: VecDeque<AcquireScript>,
    present_scripts: VecDeque<PresentScript>,
    released: bool,
    release_calls: usize,
}

impl SimulatedGpu {
    /// A simulator with `image_count` presentable images whose submissions
    /// retire `completion_latency_ns` after submit. Fences start signaled,
    /// mirroring how the frame slot pool creates them.
    pub fn new(image_count: u32, completion_latency_ns: u64) -> Self {
        assert!(image_count > 0, "a surface always exposes at least one image");
        Self {
            now_ns: 0,
            completion_latency_ns,
            image_count,
            next_image: 0,
            outstanding_images: Vec::new(),
            fence_signaled: vec![true; FRAMES_IN_FLIGHT],
            recordings: (0..FRAMES_IN_FLIGHT).map(|_| None).collect(),
            in_flight: Vec::new(),
            peak_in_flight: 0,
            submitted: Vec::new(),
            presented: Vec::new(),
            acquire_scripts: VecDeque::new(),
            present_scripts: VecDeque::new(),
            released: false,
            release_calls: 0,
        }
    }

    /// Inject a non-default outcome for the next acquire call.
    pub fn script_acquire(&mut self, script: AcquireScript) {
        self.acquire_scripts.push_back(script);
    }

    /// Inject a non-default outcome for the next present call.
    pub fn script_present(&mut self, script: PresentScript) {
        self.present_scripts.push_back(script);
    }

    /// Current virtual time.
    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Highest number of concurrently unretired submissions ever observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    /// Every command stream that went through submit, in order.
    pub fn submitted_streams(&self) -> &[SubmittedStream] {
        &self.submitted
    }

    /// Image indices in presentation order.
    pub fn presented(&self) -> &[u32] {
        &self.presented
    }

    /// Advance the clock until everything submitted has retired.
    pub fn wait_idle(&mut self) {
        if let Some(latest) = self.in_flight.iter().map(|s| s.retires_at).max() {
            self.now_ns = self.now_ns.max(latest);
        }
        self.retire_due();
    }

    /// Mirror of the pools' destroy sequence: drop all per-slot state. Must
    /// follow [`wait_idle`]; calling it twice is a no-op on the empty state.
    ///
    /// [`wait_idle`]: SimulatedGpu::wait_idle
    pub fn release_resources(&mut self) {
        self.release_calls += 1;
        if self.released {
            return;
        }
        assert!(
            self.in_flight.is_empty(),
            "release_resources called with submissions still in flight"
        );
        for recording in &mut self.recordings {
            *recording = None;
        }
        self.outstanding_images.clear();
        self.released = true;
    }

    /// How many times the destroy sequence ran.
    pub fn release_calls(&self) -> usize {
        self.release_calls
    }

    fn retire_due(&mut self) {
        let now = self.now_ns;
        let mut index = 0;
        while index < self.in_flight.len() {
            if self.in_flight[index].retires_at <= now {
                let retired = self.in_flight.swap_remove(index);
                self.fence_signaled[retired.slot] = true;
            } else {
                index += 1;
            }
        }
    }

    fn recording_mut(&mut self, slot: usize) -> &mut Recording {
        self.recordings[slot]
            .as_mut()
            .expect("operation recorded outside begin/end")
    }

    fn note_image(&mut self, slot: usize, image_index: u32) {
        assert!(
            image_index < self.image_count,
            "image index {image_index} outside pool of {}",
            self.image_count
        );
        let recording = self.recording_mut(slot);
        match recording.image_index {
            None => recording.image_index = Some(image_index),
            Some(existing) => assert_eq!(
                existing, image_index,
                "one command stream touched two presentable images"
            ),
        }
    }
}

impl FrameDriver for SimulatedGpu {
    fn wait_slot_fence(&mut self, slot: usize, timeout_ns: u64) -> Result<FenceWait> {
        self.retire_due();
        if self.fence_signaled[slot] {
            return Ok(FenceWait::Signaled);
        }

        let deadline = self.now_ns + timeout_ns;
        let pending = self
            .in_flight
            .iter()
            .filter(|s| s.slot == slot)
            .map(|s| s.retires_at)
            .min();

        match pending {
            Some(retires_at) if retires_at <= deadline => {
                self.now_ns = self.now_ns.max(retires_at);
                self.retire_due();
                Ok(FenceWait::Signaled)
            }
            // Nothing pending can signal this fence, or it signals too
            // late: block for the full timeout.
            _ => {
                self.now_ns = deadline;
                self.retire_due();
                Ok(FenceWait::TimedOut)
            }
        }
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        assert!(
            self.fence_signaled[slot],
            "fence reset without a confirmed signal on slot {slot}"
        );
        self.fence_signaled[slot] = false;
        Ok(())
    }

    fn acquire_image(&mut self, _slot: usize, timeout_ns: u64) -> Result<ImageAcquire> {
        match self.acquire_scripts.pop_front() {
            Some(AcquireScript::TimedOut) => {
                self.now_ns += timeout_ns;
                return Ok(ImageAcquire::TimedOut);
            }
            Some(AcquireScript::OutOfDate) => return Ok(ImageAcquire::OutOfDate),
            Some(AcquireScript::Suboptimal) => {
                let image_index = self.take_next_image();
                return Ok(ImageAcquire::Suboptimal { image_index });
            }
            None => {}
        }

        let image_index = self.take_next_image();
        Ok(ImageAcquire::Ready { image_index })
    }

    fn begin_recording(&mut self, slot: usize) -> Result<()> {
        assert!(
            !self.in_flight.iter().any(|s| s.slot == slot),
            "slot {slot} re-recorded while its previous submission is in flight"
        );
        assert!(
            !self.fence_signaled[slot],
            "slot {slot} recorded without resetting its fence"
        );
        self.recordings[slot] = Some(Recording {
            image_index: None,
            ops: Vec::new(),
            ended: false,
        });
        Ok(())
    }

    fn transition_image(
        &mut self,
        slot: usize,
        image_index: u32,
        from: ImageState,
        to: ImageState,
    ) -> Result<()> {
        self.note_image(slot, image_index);
        let recording = self.recording_mut(slot);
        assert!(!recording.ended, "transition recorded after end");
        recording.ops.push(RecordedOp::Transition { from, to });
        Ok(())
    }

    fn record_payload(&mut self, slot: usize, image_index: u32, tick: u64) -> Result<()> {
        self.note_image(slot, image_index);
        let recording = self.recording_mut(slot);
        assert!(!recording.ended, "payload recorded after end");
        recording.ops.push(RecordedOp::Payload { tick });
        Ok(())
    }

    fn end_recording(&mut self, slot: usize) -> Result<()> {
        let recording = self.recording_mut(slot);
        assert!(!recording.ended, "recording ended twice");
        recording.ended = true;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let recording = self.recordings[slot]
            .take()
            .expect("submit without a recorded command stream");
        assert!(recording.ended, "submit with an open command stream");
        let image_index = recording
            .image_index
            .expect("submitted stream never touched an image");

        self.submitted.push(SubmittedStream {
            slot,
            image_index,
            ops: recording.ops,
        });
        self.in_flight.push(InFlight {
            slot,
            retires_at: self.now_ns + self.completion_latency_ns,
        });
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight.len());
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let stream = self
            .submitted
            .iter()
            .rev()
            .find(|stream| stream.slot == slot)
            .expect("present without a submission on this slot");
        assert_eq!(
            stream.image_index, image_index,
            "presented image differs from the one drawn into"
        );

        self.outstanding_images.retain(|&image| image != image_index);
        self.presented.push(image_index);

        Ok(match self.present_scripts.pop_front() {
            Some(PresentScript::Suboptimal) => PresentOutcome::Suboptimal,
            Some(PresentScript::OutOfDate) => PresentOutcome::OutOfDate,
            None => PresentOutcome::Presented,
        })
    }
}

impl SimulatedGpu {
    fn take_next_image(&mut self) -> u32 {
        let image_index = self.next_image;
        assert!(
            !self.outstanding_images.contains(&image_index),
            "image {image_index} acquired twice without an intervening present"
        );
        self.outstanding_images.push(image_index);
        self.next_image = (self.next_image + 1) % self.image_count;
        image_index
    }
}
