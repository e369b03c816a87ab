// SPDX-License-Identifier: GPL-3.0-only
//! Paced capture thread for devices
//!
//! A device hands [`CaptureLoopController::spawn`] a closure that produces
//! one frame per call. The controller runs it on its own thread at a fixed
//! interval, stamps every call with a strictly increasing device-clock
//! timestamp, and stops and joins the thread on [`CaptureLoopController::stop`]
//! or drop.

use crate::frame::Timestamp;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single sleep, so a stop request is noticed quickly
const MAX_SLEEP: Duration = Duration::from_millis(5);

/// Returned by the produce closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    /// End the loop, e.g. the source ran dry
    Stop,
}

/// Timing of one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTick {
    /// Zero-based capture count
    pub index: u64,
    /// Time since the loop started
    pub elapsed: Duration,
    /// Microseconds since the loop started, strictly increasing
    pub timestamp: Timestamp,
}

/// Owner of a running capture thread
///
/// ```ignore
/// let controller = CaptureLoopController::spawn("synthetic-capture", interval, move |tick| {
///     listener.on_new_frame(render(tick.elapsed, tick.timestamp));
///     LoopAction::Continue
/// });
/// ```
pub struct CaptureLoopController {
    handle: Option<JoinHandle<u64>>,
    stop: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Call `produce` every `interval` on a new thread until it returns
    /// [`LoopAction::Stop`] or the controller is stopped
    ///
    /// A producer slower than `interval` runs back to back; missed ticks
    /// are skipped rather than replayed.
    pub fn spawn<F>(name: &str, interval: Duration, mut produce: F) -> Self
    where
        F: FnMut(CaptureTick) -> LoopAction + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_name = name.to_string();

        info!(name, interval_ms = interval.as_millis() as u64, "Starting capture loop");

        let handle = thread::spawn(move || {
            let started = Instant::now();
            let mut deadline = started;
            let mut last_timestamp: Option<Timestamp> = None;
            let mut index = 0u64;

            while !thread_stop.load(Ordering::Acquire) {
                let now = Instant::now();
                if now < deadline {
                    thread::sleep((deadline - now).min(MAX_SLEEP));
                    continue;
                }
                deadline = (deadline + interval).max(now);

                let elapsed = started.elapsed();
                let timestamp = match last_timestamp {
                    Some(last) => (elapsed.as_micros() as Timestamp).max(last + 1),
                    None => elapsed.as_micros() as Timestamp,
                };
                last_timestamp = Some(timestamp);

                let tick = CaptureTick {
                    index,
                    elapsed,
                    timestamp,
                };
                index += 1;
                if produce(tick) == LoopAction::Stop {
                    debug!(name = %thread_name, captures = index, "Producer ended the loop");
                    break;
                }
            }

            debug!(name = %thread_name, captures = index, "Capture thread exiting");
            index
        });

        Self {
            handle: Some(handle),
            stop,
            name: name.to_string(),
        }
    }

    /// True while the thread has not exited
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it; returns the number of captures
    pub fn stop(&mut self) -> u64 {
        self.stop.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.join() {
            Ok(captures) => {
                info!(name = %self.name, captures, "Capture loop stopped");
                captures
            }
            Err(e) => {
                warn!(name = %self.name, "Capture thread panicked: {:?}", e);
                0
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_producer_can_end_loop() {
        let mut controller =
            CaptureLoopController::spawn("test-loop", Duration::ZERO, |tick| {
                if tick.index >= 10 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            });
        while controller.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(controller.stop(), 11);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut controller =
            CaptureLoopController::spawn("test-timestamps", Duration::ZERO, move |tick| {
                sink.lock().unwrap().push(tick.timestamp);
                if tick.index >= 200 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            });
        while controller.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        controller.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 201);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_stop_joins_paced_loop() {
        let mut controller =
            CaptureLoopController::spawn("test-paced", Duration::from_millis(2), |_| {
                LoopAction::Continue
            });
        thread::sleep(Duration::from_millis(30));
        assert!(controller.is_running());
        assert!(controller.stop() > 0);
        assert!(!controller.is_running());
        assert_eq!(controller.stop(), 0);
    }

    #[test]
    fn test_drop_stops_loop() {
        let controller =
            CaptureLoopController::spawn("test-drop", Duration::from_millis(1), |_| {
                LoopAction::Continue
            });
        drop(controller);
    }
}
