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

use super::resources::WgpuDeviceShared;
use prism_core::renderer::api::{BackendHandle, GraphicsBackendType, SyncModel, WaitStatus};
use prism_core::renderer::{GpuEvent, RenderError, Timeline};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// A GPU event of the hardware driver.
///
/// Queue signals complete from `on_submitted_work_done` callbacks, which only run while
/// the device is polled, so waits poll in short slices.
#[derive(Debug)]
pub struct WgpuGpuEvent {
    label: String,
    native: BackendHandle,
    timeline: Arc<Timeline>,
    shared: Arc<WgpuDeviceShared>,
}

impl WgpuGpuEvent {
    pub(crate) fn new(shared: Arc<WgpuDeviceShared>, label: &str) -> Self {
        let timeline = Arc::new(Timeline::new(label));
        shared.register_timeline(&timeline);
        let native = shared.next_native_handle();
        log::info!(
            "WgpuDevice: Created {:?} event '{}' ({:?})",
            shared.backend.sync_model(),
            label,
            native
        );
        Self {
            label: label.to_string(),
            native,
            timeline,
            shared,
        }
    }

    pub(crate) fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Resolves a trait object to a hardware event of `shared`'s device.
    pub(crate) fn downcast<'a>(
        event: &'a dyn GpuEvent,
        shared: &Arc<WgpuDeviceShared>,
    ) -> Result<&'a WgpuGpuEvent, RenderError> {
        let hw = event
            .as_any()
            .downcast_ref::<WgpuGpuEvent>()
            .ok_or(RenderError::BackendMismatch {
                expected: shared.backend,
                found: event.backend(),
            })?;
        if !Arc::ptr_eq(&hw.shared, shared) {
            return Err(RenderError::InvalidState(format!(
                "event '{}' belongs to another device",
                hw.label
            )));
        }
        Ok(hw)
    }
}

impl GpuEvent for WgpuGpuEvent {
    fn label(&self) -> &str {
        &self.label
    }

    fn backend(&self) -> GraphicsBackendType {
        self.shared.backend
    }

    fn native_handle(&self) -> BackendHandle {
        self.native
    }

    fn sync_point(&self) -> u64 {
        self.timeline.scheduled_value()
    }

    fn completion_value(&self) -> u64 {
        self.shared.poll();
        self.timeline.completed_value()
    }

    fn wait(&self, value: u64, timeout: Duration) -> Result<WaitStatus, RenderError> {
        self.shared.wait_timeline(&self.timeline, value, timeout)
    }

    fn signal(&self, value: u64) -> Result<(), RenderError> {
        if self.shared.is_lost() {
            return Err(RenderError::DeviceLost);
        }
        let completed = self.timeline.completed_value();
        if value <= completed && self.shared.backend.sync_model() == SyncModel::TimelineSemaphore {
            let message = format!(
                "host signal of timeline semaphore '{}' to {} does not exceed its value {}",
                self.label, value, completed
            );
            self.shared.report_validation(&message);
            return Err(RenderError::Validation(message));
        }
        self.timeline.signal(value);
        log::trace!("WgpuGpuEvent '{}': host signalled {}", self.label, value);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
