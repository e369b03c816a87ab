// SPDX-License-Identifier: GPL-3.0-only

//! Latest-wins frame hand-off
//!
//! Single producer (device capture thread) and single consumer (render
//! loop). At most one frame is pending; a frame published while another is
//! still pending replaces it, and the replaced frame is dropped. There is no
//! queue: memory and latency stay bounded no matter how far the render loop
//! falls behind.

use super::{FramePtr, Timestamp};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Result of [`FrameSlot::publish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Slot was empty, frame stored
    Stored,
    /// An unconsumed frame was replaced (and dropped)
    Replaced,
    /// Timestamp was not newer than the latest publish; frame dropped
    Stale,
}

/// Counters for diagnostics (status bar, headless report)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub published: u64,
    pub taken: u64,
    /// Frames replaced before the render loop consumed them
    pub superseded: u64,
    /// Frames rejected for a non-increasing timestamp
    pub stale: u64,
}

#[derive(Default)]
struct SlotState {
    frame: Option<FramePtr>,
    latest_time: Option<Timestamp>,
    last_submitted_time: Option<Timestamp>,
    stats: SlotStats,
}

/// Holding cell for the most recent frame not yet consumed
///
/// Frame reference and both timestamps live behind one lock so the
/// consumer never observes a frame paired with a stale timestamp.
/// Invariant: `last_submitted_time <= latest_time`.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A panic while holding the lock cannot leave the state torn: every
        // critical section writes whole fields.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `frame` as the latest frame, captured at `timestamp`
    ///
    /// Never fails from the caller's point of view: a non-increasing
    /// timestamp drops the frame and reports [`PublishOutcome::Stale`].
    pub fn publish(&self, frame: FramePtr, timestamp: Timestamp) -> PublishOutcome {
        let mut state = self.lock();

        if state.latest_time.is_some_and(|latest| timestamp <= latest) {
            state.stats.stale += 1;
            debug!(
                timestamp,
                latest = ?state.latest_time,
                "Dropping frame with non-increasing timestamp"
            );
            return PublishOutcome::Stale;
        }

        let replaced = state.frame.replace(frame).is_some();
        state.latest_time = Some(timestamp);
        state.stats.published += 1;

        if replaced {
            state.stats.superseded += 1;
            PublishOutcome::Replaced
        } else {
            PublishOutcome::Stored
        }
    }

    /// Take the pending frame if it is newer than the last one taken
    ///
    /// On success `last_submitted_time` becomes `latest_time`. Calling this
    /// again without an intervening publish returns `None`.
    pub fn try_take_if_fresher(&self) -> Option<FramePtr> {
        let mut state = self.lock();

        if state.latest_time <= state.last_submitted_time {
            return None;
        }

        let frame = state.frame.take()?;
        state.last_submitted_time = state.latest_time;
        state.stats.taken += 1;
        Some(frame)
    }

    /// True if a frame newer than the last taken one is waiting
    pub fn has_fresher(&self) -> bool {
        let state = self.lock();
        state.latest_time > state.last_submitted_time
    }

    /// Timestamp of the most recent publish
    pub fn latest_time(&self) -> Option<Timestamp> {
        self.lock().latest_time
    }

    /// Timestamp of the frame last handed to the tracker
    pub fn last_submitted_time(&self) -> Option<Timestamp> {
        self.lock().last_submitted_time
    }

    pub fn stats(&self) -> SlotStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Intrinsics, Resolution, RgbdFrame};
    use std::sync::Arc;
    use std::thread;

    fn frame(ts: Timestamp) -> FramePtr {
        let res = Resolution::new(2, 2);
        Arc::new(RgbdFrame::new(res, Intrinsics::kinect(res), vec![0; 12], vec![0; 4], ts).unwrap())
    }

    #[test]
    fn test_empty_slot() {
        let slot = FrameSlot::new();
        assert!(slot.try_take_if_fresher().is_none());
        assert!(!slot.has_fresher());
        assert_eq!(slot.latest_time(), None);
        assert_eq!(slot.last_submitted_time(), None);
    }

    #[test]
    fn test_take_is_idempotent() {
        let slot = FrameSlot::new();
        assert_eq!(slot.publish(frame(100), 100), PublishOutcome::Stored);

        let taken = slot.try_take_if_fresher().expect("fresh frame");
        assert_eq!(taken.timestamp, 100);
        assert!(slot.try_take_if_fresher().is_none());
        assert_eq!(slot.last_submitted_time(), Some(100));
    }

    #[test]
    fn test_latest_wins() {
        let slot = FrameSlot::new();
        slot.publish(frame(100), 100);
        assert_eq!(slot.publish(frame(105), 105), PublishOutcome::Replaced);

        let taken = slot.try_take_if_fresher().unwrap();
        assert_eq!(taken.timestamp, 105);
        assert!(slot.try_take_if_fresher().is_none());
        assert_eq!(slot.stats().superseded, 1);
    }

    #[test]
    fn test_stale_publish_rejected() {
        let slot = FrameSlot::new();
        slot.publish(frame(100), 100);
        slot.try_take_if_fresher();

        assert_eq!(slot.publish(frame(100), 100), PublishOutcome::Stale);
        assert_eq!(slot.publish(frame(90), 90), PublishOutcome::Stale);
        assert!(slot.try_take_if_fresher().is_none());
        assert_eq!(slot.latest_time(), Some(100));
        assert_eq!(slot.stats().stale, 2);
    }

    #[test]
    fn test_timestamp_zero_is_fresh() {
        let slot = FrameSlot::new();
        slot.publish(frame(0), 0);
        assert_eq!(slot.try_take_if_fresher().map(|f| f.timestamp), Some(0));
    }

    #[test]
    fn test_concurrent_takes_strictly_increase() {
        let slot = Arc::new(FrameSlot::new());
        let producer_slot = Arc::clone(&slot);

        let producer = thread::spawn(move || {
            for ts in 1..=2000u64 {
                producer_slot.publish(frame(ts), ts);
            }
        });

        let mut last = None;
        let mut taken = 0;
        while !producer.is_finished() || slot.has_fresher() {
            if let Some(f) = slot.try_take_if_fresher() {
                assert!(Some(f.timestamp) > last, "takes must strictly increase");
                assert!(slot.last_submitted_time() <= slot.latest_time());
                last = Some(f.timestamp);
                taken += 1;
            }
        }
        producer.join().unwrap();

        assert!(taken >= 1);
        assert_eq!(last, Some(2000));
    }
}
