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

//! Integration tests for the monotonic timeline shared by the emulated backends.

use prism_core::renderer::{Timeline, TimelineWait};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_completion_never_decreases_under_concurrent_signals() {
    // --- ARRANGE ---
    let timeline = Arc::new(Timeline::new("stress"));
    let signallers: Vec<_> = (0..4u64)
        .map(|lane| {
            let timeline = timeline.clone();
            thread::spawn(move || {
                for step in 0..500u64 {
                    // Lanes interleave high and low values on purpose.
                    timeline.signal(step * 4 + lane);
                }
            })
        })
        .collect();

    // --- ACT ---
    let mut observed = Vec::new();
    while signallers.iter().any(|s| !s.is_finished()) {
        observed.push(timeline.completed_value());
    }
    for s in signallers {
        s.join().unwrap();
    }
    observed.push(timeline.completed_value());

    // --- ASSERT ---
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(timeline.completed_value(), 499 * 4 + 3);
}

#[test]
fn test_losing_the_timeline_releases_every_waiter() {
    // --- ARRANGE ---
    let timeline = Arc::new(Timeline::new("device"));
    let target = timeline.schedule_next();
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let timeline = timeline.clone();
            thread::spawn(move || timeline.wait(target, Duration::MAX))
        })
        .collect();

    // --- ACT ---
    thread::sleep(Duration::from_millis(20));
    timeline.mark_lost();

    // --- ASSERT ---
    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), TimelineWait::Lost);
    }
    assert!(timeline.wait(target, Duration::ZERO).into_status().is_err());
}

#[test]
fn test_infinite_wait_does_not_overflow_the_deadline() {
    let timeline = Timeline::with_initial_value("done", 3);
    assert_eq!(timeline.wait(3, Duration::MAX), TimelineWait::Reached);
}
