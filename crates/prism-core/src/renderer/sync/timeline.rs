// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A monotonic 64-bit counter that threads can block on.
//!
//! `Timeline` is the common building block behind every emulated synchronization
//! primitive: a D3D12 fence, a Vulkan timeline semaphore, or the CPU-signalled stand-in
//! used by implicitly synchronized APIs. Two values are tracked:
//!
//! - the **scheduled** value, bumped every time work that will signal the timeline is
//!   enqueued (this is what `GpuEvent::sync_point` reports);
//! - the **completed** value, raised by whoever executes that work.
//!
//! The completed value never decreases, and a waiter is only released once the
//! completed value has actually reached the awaited value.

use crate::renderer::api::{deadline_after, remaining_until, WaitStatus};
use crate::renderer::error::RenderError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Result of [`Timeline::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineWait {
    /// The completed value reached the awaited value.
    Reached,
    /// The timeout elapsed first.
    TimedOut,
    /// The timeline was abandoned because its device was lost.
    Lost,
}

impl TimelineWait {
    /// Maps the outcome onto the public wait contract.
    pub fn into_status(self) -> Result<WaitStatus, RenderError> {
        match self {
            TimelineWait::Reached => Ok(WaitStatus::Signaled),
            TimelineWait::TimedOut => Ok(WaitStatus::Timeout),
            TimelineWait::Lost => Err(RenderError::DeviceLost),
        }
    }
}

#[derive(Debug, Default)]
struct TimelineState {
    completed: u64,
    lost: bool,
}

/// A monotonic counter with blocking waits. See the module documentation.
#[derive(Debug)]
pub struct Timeline {
    label: String,
    scheduled: AtomicU64,
    state: Mutex<TimelineState>,
    condvar: Condvar,
}

impl Timeline {
    /// Creates a timeline starting at zero.
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_initial_value(label, 0)
    }

    /// Creates a timeline whose scheduled and completed values start at `value`.
    pub fn with_initial_value(label: impl Into<String>, value: u64) -> Self {
        Self {
            label: label.into(),
            scheduled: AtomicU64::new(value),
            state: Mutex::new(TimelineState {
                completed: value,
                lost: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// The debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    // The guarded state is two plain values, a panic while holding the lock cannot
    // leave them inconsistent.
    fn lock(&self) -> MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves the next value for work about to be enqueued and returns it.
    pub fn schedule_next(&self) -> u64 {
        self.scheduled.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The highest value reserved so far.
    pub fn scheduled_value(&self) -> u64 {
        self.scheduled.load(Ordering::Acquire)
    }

    /// The highest value signalled so far.
    pub fn completed_value(&self) -> u64 {
        self.lock().completed
    }

    /// `true` once the completed value is at least `value`.
    pub fn is_reached(&self, value: u64) -> bool {
        self.lock().completed >= value
    }

    /// Raises the completed value to `value` and wakes waiters.
    ///
    /// Signalling a value lower than the current one changes nothing. Returns whether
    /// the completed value advanced.
    pub fn signal(&self, value: u64) -> bool {
        self.scheduled.fetch_max(value, Ordering::AcqRel);
        let mut state = self.lock();
        if value <= state.completed {
            return false;
        }
        state.completed = value;
        drop(state);
        self.condvar.notify_all();
        true
    }

    /// Blocks until the completed value reaches `value`, the timeout elapses, or the
    /// timeline is marked lost.
    pub fn wait(&self, value: u64, timeout: Duration) -> TimelineWait {
        let deadline = deadline_after(timeout);
        let mut state = self.lock();
        loop {
            if state.completed >= value {
                return TimelineWait::Reached;
            }
            if state.lost {
                return TimelineWait::Lost;
            }
            state = match remaining_until(deadline) {
                None => self
                    .condvar
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(left) if left.is_zero() => return TimelineWait::TimedOut,
                Some(left) => {
                    self.condvar
                        .wait_timeout(state, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Abandons the timeline: pending and future waits on unreached values fail.
    pub fn mark_lost(&self) {
        self.lock().lost = true;
        self.condvar.notify_all();
    }

    /// `true` once [`Timeline::mark_lost`] was called.
    pub fn is_lost(&self) -> bool {
        self.lock().lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_only_after_signal_from_other_thread() {
        let timeline = Arc::new(Timeline::new("gpu"));
        let target = timeline.schedule_next();
        let gpu = {
            let timeline = timeline.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                timeline.signal(target);
            })
        };

        assert!(!timeline.is_reached(target));
        let result = timeline.wait(target, Duration::from_secs(5));
        assert_eq!(result, TimelineWait::Reached);
        assert!(timeline.completed_value() >= target);
        gpu.join().unwrap();
    }

    #[test]
    fn test_wait_times_out_without_signal() {
        let timeline = Timeline::new("idle");
        let target = timeline.schedule_next();
        assert_eq!(
            timeline.wait(target, Duration::from_millis(10)),
            TimelineWait::TimedOut
        );
        assert_eq!(timeline.completed_value(), 0);
    }

    #[test]
    fn test_signal_is_monotonic() {
        let timeline = Timeline::new("mono");
        assert!(timeline.signal(5));
        assert!(!timeline.signal(3));
        assert_eq!(timeline.completed_value(), 5);
        assert_eq!(timeline.scheduled_value(), 5);
        assert_eq!(timeline.schedule_next(), 6);
    }

    #[test]
    fn test_mark_lost_releases_waiters() {
        let timeline = Arc::new(Timeline::new("lost"));
        let waiter = {
            let timeline = timeline.clone();
            thread::spawn(move || timeline.wait(1, Duration::MAX))
        };
        thread::sleep(Duration::from_millis(10));
        timeline.mark_lost();
        assert_eq!(waiter.join().unwrap(), TimelineWait::Lost);
        assert!(matches!(
            TimelineWait::Lost.into_status(),
            Err(RenderError::DeviceLost)
        ));
    }

    #[test]
    fn test_already_reached_value_does_not_block() {
        let timeline = Timeline::with_initial_value("pre", 10);
        assert_eq!(timeline.wait(7, Duration::ZERO), TimelineWait::Reached);
    }
}
