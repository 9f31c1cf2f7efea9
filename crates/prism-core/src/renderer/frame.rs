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

//! N-buffered frame pacing on top of a [`GpuEvent`].

use crate::renderer::api::WaitStatus;
use crate::renderer::error::RenderError;
use crate::renderer::traits::GpuEvent;
use std::sync::Arc;
use std::time::Duration;

/// Keeps one sync value per frame slot so the CPU never runs more than
/// `frames_in_flight` frames ahead of the GPU.
///
/// A frame calls [`FrameSync::begin_frame`] before touching the slot's command buffer
/// or per-frame resources, submits its work with [`FrameSync::event`], then calls
/// [`FrameSync::end_frame`].
#[derive(Debug)]
pub struct FrameSync {
    event: Arc<dyn GpuEvent>,
    slot_values: Vec<u64>,
    current: usize,
    frame_index: u64,
}

impl FrameSync {
    /// Creates the pacing state for `frames_in_flight` slots (at least one).
    pub fn new(event: Arc<dyn GpuEvent>, frames_in_flight: usize) -> Self {
        Self {
            event,
            slot_values: vec![0; frames_in_flight.max(1)],
            current: 0,
            frame_index: 0,
        }
    }

    /// The event frames are submitted with.
    pub fn event(&self) -> &Arc<dyn GpuEvent> {
        &self.event
    }

    /// Number of slots.
    pub fn frames_in_flight(&self) -> usize {
        self.slot_values.len()
    }

    /// The slot the current frame uses.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Number of frames ended so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The sync value recorded for `slot` by the last frame that used it.
    pub fn slot_value(&self, slot: usize) -> Option<u64> {
        self.slot_values.get(slot).copied()
    }

    /// Waits until the previous frame of the current slot has retired.
    pub fn begin_frame(&self, timeout: Duration) -> Result<WaitStatus, RenderError> {
        let value = self.slot_values[self.current];
        if self.event.is_completed(value) {
            return Ok(WaitStatus::Signaled);
        }
        log::trace!(
            "FrameSync: slot {} waiting for value {} of '{}'",
            self.current,
            value,
            self.event.label()
        );
        self.event.wait(value, timeout)
    }

    /// Records the event's sync point in the current slot and moves to the next slot.
    ///
    /// Returns the recorded value.
    pub fn end_frame(&mut self) -> u64 {
        let value = self.event.sync_point();
        self.slot_values[self.current] = value;
        self.current = (self.current + 1) % self.slot_values.len();
        self.frame_index += 1;
        value
    }

    /// Waits for every slot, typically before tearing down per-frame resources.
    pub fn wait_all(&self, timeout: Duration) -> Result<WaitStatus, RenderError> {
        let highest = self.slot_values.iter().copied().max().unwrap_or(0);
        self.event.wait(highest, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::api::{BackendHandle, GraphicsBackendType};
    use crate::renderer::sync::Timeline;
    use std::any::Any;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// An event whose sync point is advanced by hand.
    #[derive(Debug)]
    struct ManualEvent {
        timeline: Timeline,
        next: AtomicU64,
    }

    impl ManualEvent {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                timeline: Timeline::new("manual"),
                next: AtomicU64::new(0),
            })
        }

        fn submit(&self) -> u64 {
            self.next.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    impl GpuEvent for ManualEvent {
        fn label(&self) -> &str {
            self.timeline.label()
        }
        fn backend(&self) -> GraphicsBackendType {
            GraphicsBackendType::Unknown
        }
        fn native_handle(&self) -> BackendHandle {
            BackendHandle::Dx12(0)
        }
        fn sync_point(&self) -> u64 {
            self.next.load(Ordering::SeqCst)
        }
        fn completion_value(&self) -> u64 {
            self.timeline.completed_value()
        }
        fn wait(&self, value: u64, timeout: Duration) -> Result<WaitStatus, RenderError> {
            self.timeline.wait(value, timeout).into_status()
        }
        fn signal(&self, value: u64) -> Result<(), RenderError> {
            self.timeline.signal(value);
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_slots_rotate_and_record_sync_points() {
        // --- ARRANGE ---
        let event = ManualEvent::new();
        let mut frames = FrameSync::new(event.clone(), 2);

        // --- ACT ---
        event.submit();
        let first = frames.end_frame();
        event.submit();
        let second = frames.end_frame();

        // --- ASSERT ---
        assert_eq!((first, second), (1, 2));
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.slot_value(0), Some(1));
        assert_eq!(frames.slot_value(1), Some(2));
        assert_eq!(frames.frame_index(), 2);
    }

    #[test]
    fn test_begin_frame_waits_for_slot_reuse() {
        // --- ARRANGE ---
        let event = ManualEvent::new();
        let mut frames = FrameSync::new(event.clone(), 2);
        event.submit();
        frames.end_frame();
        event.submit();
        frames.end_frame();

        // --- ACT ---
        let blocked = frames.begin_frame(Duration::from_millis(10)).unwrap();
        event.signal(1).unwrap();
        let released = frames.begin_frame(Duration::from_millis(10)).unwrap();

        // --- ASSERT ---
        assert_eq!(blocked, WaitStatus::Timeout);
        assert_eq!(released, WaitStatus::Signaled);
    }

    #[test]
    fn test_fresh_slots_never_block() {
        let frames = FrameSync::new(ManualEvent::new(), 0);
        assert_eq!(frames.frames_in_flight(), 1);
        assert_eq!(frames.begin_frame(Duration::ZERO).unwrap(), WaitStatus::Signaled);
        assert_eq!(frames.wait_all(Duration::ZERO).unwrap(), WaitStatus::Signaled);
    }
}
