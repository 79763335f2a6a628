// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Frame scheduler.
//!
//! One fence, one monotonically increasing frame counter, and a cap of
//! two frames in flight.  When ending a frame would leave more than two
//! submitted-but-incomplete frames, the scheduler blocks until the oldest
//! one retires.  That wait is the guarantee the per-frame heaps rely on:
//! by the time frame slot N is reused, the GPU has finished every read it
//! issued the last time slot N was recorded.

use crate::imp;

pub const MAX_FRAMES_IN_FLIGHT: u64 = 2;

pub struct FrameScheduler {
    fence: imp::Fence,
    num_frames: u64,
    frame_index: u32,
}

impl FrameScheduler {
    pub fn new(device: &imp::Device) -> Self {
        FrameScheduler {
            fence: device.create_fence(0),
            num_frames: 0,
            frame_index: 0,
        }
    }

    /// Which of the two frame slots the CPU is currently recording into.
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Frames submitted and not yet known to be complete.
    pub fn frames_in_flight(&self) -> u64 {
        self.num_frames - self.fence.completed_value()
    }

    /// Called once per frame after the frame's work is submitted.
    /// Signals the fence, throttles if two frames are already in flight,
    /// and flips the frame slot.
    pub fn end_frame(&mut self, queue: &imp::Queue) {
        self.num_frames += 1;
        queue.signal(&self.fence, self.num_frames);

        let completed = self.fence.completed_value();
        if self.num_frames - completed >= MAX_FRAMES_IN_FLIGHT {
            self.fence.wait_for(completed + 1);
        }
        self.frame_index = (self.frame_index + 1) % 2;
    }

    /// Full drain: signal and wait for everything submitted so far.  The
    /// frame slot does not change; this is for init flushes, shutdown and
    /// anything else that must observe an idle GPU.
    pub fn wait_for_gpu(&mut self, queue: &imp::Queue) {
        logwise::info_sync!("draining the GPU queue");
        self.num_frames += 1;
        queue.signal(&self.fence, self.num_frames);
        self.fence.wait_for(self.num_frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::{Device, DeviceOptions, Queue};

    fn setup() -> (Device, Queue, FrameScheduler) {
        let device = Device::new(DeviceOptions::default()).unwrap();
        let queue = device.create_command_queue();
        let scheduler = FrameScheduler::new(&device);
        (device, queue, scheduler)
    }

    #[test]
    fn in_flight_frames_never_exceed_two() {
        let (_device, queue, mut scheduler) = setup();
        // The backend completes fence values only when waited on, so this
        // loop is the worst case the throttle must bound.
        for _ in 0..100 {
            scheduler.end_frame(&queue);
            assert!(scheduler.frames_in_flight() <= MAX_FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn frame_index_alternates() {
        let (_device, queue, mut scheduler) = setup();
        assert_eq!(scheduler.frame_index(), 0);
        scheduler.end_frame(&queue);
        assert_eq!(scheduler.frame_index(), 1);
        scheduler.end_frame(&queue);
        assert_eq!(scheduler.frame_index(), 0);
    }

    #[test]
    fn first_frame_does_not_block() {
        let (_device, queue, mut scheduler) = setup();
        scheduler.end_frame(&queue);
        // One frame submitted, nothing completed, no wait required.
        assert_eq!(scheduler.frames_in_flight(), 1);
    }

    #[test]
    fn drain_retires_everything() {
        let (_device, queue, mut scheduler) = setup();
        scheduler.end_frame(&queue);
        scheduler.end_frame(&queue);
        scheduler.wait_for_gpu(&queue);
        assert_eq!(scheduler.frames_in_flight(), 0);
    }

    #[test]
    fn drain_preserves_the_frame_slot() {
        let (_device, queue, mut scheduler) = setup();
        scheduler.end_frame(&queue);
        let index = scheduler.frame_index();
        scheduler.wait_for_gpu(&queue);
        assert_eq!(scheduler.frame_index(), index);
    }
}
