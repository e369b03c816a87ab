// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the latest-wins frame hand-off

use rgbd_viewer::backends::FrameListener;
use rgbd_viewer::frame::{FrameIntake, FramePtr, FrameSlot, Intrinsics, Resolution, RgbdFrame};
use std::sync::Arc;
use std::thread;

fn frame(timestamp: u64) -> FramePtr {
    let res = Resolution::new(4, 2);
    Arc::new(
        RgbdFrame::new(res, Intrinsics::kinect(res), vec![0; 24], vec![0; 8], timestamp)
            .expect("frame"),
    )
}

/// Deterministic interleaving of publishes and takes driven by a small LCG
fn interleaving(seed: u64, steps: usize) -> Vec<bool> {
    let mut state = seed;
    (0..steps)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) % 3 != 0
        })
        .collect()
}

#[test]
fn test_takes_return_newest_and_strictly_increase() {
    for seed in 0..32 {
        let slot = FrameSlot::new();
        let mut next_ts = 0u64;
        let mut newest = None;
        let mut last_taken = None;

        for publish in interleaving(seed, 200) {
            if publish {
                next_ts += 1 + seed % 5;
                slot.publish(frame(next_ts), next_ts);
                newest = Some(next_ts);
            } else {
                match slot.try_take_if_fresher() {
                    Some(f) => {
                        assert_eq!(Some(f.timestamp), newest, "seed {}", seed);
                        assert!(last_taken < Some(f.timestamp), "seed {}", seed);
                        last_taken = Some(f.timestamp);
                    }
                    None => assert_eq!(last_taken, newest, "seed {}", seed),
                }
            }
            assert!(slot.last_submitted_time() <= slot.latest_time());
        }
    }
}

#[test]
fn test_second_take_without_publish_is_empty() {
    let slot = FrameSlot::new();
    slot.publish(frame(7), 7);
    assert!(slot.try_take_if_fresher().is_some());
    assert!(slot.try_take_if_fresher().is_none());
    assert!(slot.try_take_if_fresher().is_none());
}

#[test]
fn test_intake_from_device_thread() {
    let slot = Arc::new(FrameSlot::new());
    let intake: Arc<dyn FrameListener> =
        Arc::new(FrameIntake::new(Arc::clone(&slot), Resolution::new(4, 2)));

    let producer = {
        let intake = Arc::clone(&intake);
        thread::spawn(move || {
            for ts in 1..=500 {
                intake.on_new_frame(frame(ts));
            }
        })
    };

    let mut taken = Vec::new();
    while !producer.is_finished() {
        if let Some(f) = slot.try_take_if_fresher() {
            taken.push(f.timestamp);
        }
    }
    producer.join().unwrap();
    if let Some(f) = slot.try_take_if_fresher() {
        taken.push(f.timestamp);
    }

    assert!(taken.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(taken.last(), Some(&500));
    let stats = slot.stats();
    assert_eq!(stats.published, 500);
    assert_eq!(stats.taken as usize, taken.len());
}
