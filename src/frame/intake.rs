// SPDX-License-Identifier: GPL-3.0-only

//! Frame arrival handler registered with the device

use super::{FramePtr, FrameSlot, PublishOutcome, Resolution};
use crate::backends::FrameListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// Installs newly arrived frames into the [`FrameSlot`]
///
/// Runs on the device's capture thread. It does no GPU work and no copying:
/// the frame reference is moved into the slot under its lock and the call
/// returns. Nothing here can fail back into the device; rejected frames are
/// counted and logged.
pub struct FrameIntake {
    slot: Arc<FrameSlot>,
    expected: Resolution,
    rejected: AtomicU64,
}

impl FrameIntake {
    pub fn new(slot: Arc<FrameSlot>, expected: Resolution) -> Self {
        Self {
            slot,
            expected,
            rejected: AtomicU64::new(0),
        }
    }

    /// The slot frames are published into
    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    /// Frames dropped because their resolution did not match
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl FrameListener for FrameIntake {
    fn on_new_frame(&self, frame: FramePtr) {
        if frame.resolution != self.expected {
            // Startup validation catches a misconfigured device; a frame that
            // still slips through is dropped rather than reaching the GPU.
            let count = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
            if count == 1 || count.is_power_of_two() {
                warn!(
                    frame = %frame.resolution,
                    expected = %self.expected,
                    rejected = count,
                    "Dropping frame with unexpected resolution"
                );
            }
            return;
        }

        let timestamp = frame.timestamp;
        match self.slot.publish(frame, timestamp) {
            PublishOutcome::Stored => trace!(timestamp, "Frame stored"),
            PublishOutcome::Replaced => trace!(timestamp, "Frame replaced unconsumed frame"),
            PublishOutcome::Stale => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Intrinsics, RgbdFrame};

    fn frame(res: Resolution, ts: u64) -> FramePtr {
        let pixels = res.pixel_count();
        Arc::new(
            RgbdFrame::new(
                res,
                Intrinsics::kinect(res),
                vec![0; pixels * 3],
                vec![0; pixels],
                ts,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_intake_publishes_with_frame_timestamp() {
        let slot = Arc::new(FrameSlot::new());
        let res = Resolution::new(4, 4);
        let intake = FrameIntake::new(Arc::clone(&slot), res);

        intake.on_new_frame(frame(res, 42));
        assert_eq!(slot.latest_time(), Some(42));
        assert_eq!(slot.try_take_if_fresher().unwrap().timestamp, 42);
    }

    #[test]
    fn test_intake_drops_wrong_resolution() {
        let slot = Arc::new(FrameSlot::new());
        let intake = FrameIntake::new(Arc::clone(&slot), Resolution::new(4, 4));

        intake.on_new_frame(frame(Resolution::new(2, 2), 1));
        assert_eq!(intake.rejected(), 1);
        assert_eq!(slot.latest_time(), None);
    }
}
