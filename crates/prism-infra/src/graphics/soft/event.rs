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

use super::resources::SoftDeviceShared;
use prism_core::renderer::api::{BackendHandle, GraphicsBackendType, SyncModel, WaitStatus};
use prism_core::renderer::{GpuEvent, RenderError, Timeline};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// The emulated fence (D3D12), timeline semaphore (Vulkan) or CPU-signalled event
/// (D3D11, OpenGL), depending on the device backend.
#[derive(Debug)]
pub struct SoftGpuEvent {
    label: String,
    native: BackendHandle,
    timeline: Arc<Timeline>,
    shared: Arc<SoftDeviceShared>,
}

impl SoftGpuEvent {
    pub(crate) fn new(shared: Arc<SoftDeviceShared>, label: &str) -> Self {
        let timeline = Arc::new(Timeline::new(label));
        shared.register_timeline(&timeline);
        let native = shared.next_native_handle();
        log::info!(
            "SoftDevice: Created {:?} event '{}' ({:?})",
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

    pub(crate) fn is_from(&self, shared: &Arc<SoftDeviceShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// Resolves a trait object to the emulated event of `shared`'s device.
    pub(crate) fn downcast<'a>(
        event: &'a dyn GpuEvent,
        shared: &Arc<SoftDeviceShared>,
    ) -> Result<&'a SoftGpuEvent, RenderError> {
        let soft = event
            .as_any()
            .downcast_ref::<SoftGpuEvent>()
            .ok_or(RenderError::BackendMismatch {
                expected: shared.backend,
                found: event.backend(),
            })?;
        if !soft.is_from(shared) {
            return Err(RenderError::InvalidState(format!(
                "event '{}' belongs to another device",
                soft.label
            )));
        }
        Ok(soft)
    }
}

impl GpuEvent for SoftGpuEvent {
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
        self.timeline.completed_value()
    }

    fn wait(&self, value: u64, timeout: Duration) -> Result<WaitStatus, RenderError> {
        self.timeline.wait(value, timeout).into_status()
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
        log::trace!("SoftGpuEvent '{}': host signalled {}", self.label, value);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::soft::resources::SoftDriverSettings;
    use prism_core::renderer::api::{GraphicsAdapterInfo, INFINITE_TIMEOUT};

    fn event_on(backend: GraphicsBackendType) -> SoftGpuEvent {
        let shared = Arc::new(SoftDeviceShared::new(
            backend,
            GraphicsAdapterInfo::default(),
            SoftDriverSettings::default(),
        ));
        SoftGpuEvent::new(shared, "test")
    }

    #[test]
    fn test_fence_ignores_lower_host_signals() {
        let event = event_on(GraphicsBackendType::Dx12);
        event.signal(5).unwrap();
        event.signal(3).unwrap();
        assert_eq!(event.completion_value(), 5);
        assert_eq!(event.wait(5, INFINITE_TIMEOUT).unwrap(), WaitStatus::Signaled);
    }

    #[test]
    fn test_timeline_semaphore_rejects_non_increasing_host_signals() {
        let event = event_on(GraphicsBackendType::Vulkan);
        event.signal(2).unwrap();

        let err = event.signal(2).unwrap_err();

        assert!(matches!(err, RenderError::Validation(_)));
        assert_eq!(event.completion_value(), 2);
        assert_eq!(event.shared.stats().validation_messages, 1);
    }

    #[test]
    fn test_signal_after_loss_fails() {
        let event = event_on(GraphicsBackendType::OpenGL);
        event.shared.lose_device("test");
        assert!(matches!(event.signal(1), Err(RenderError::DeviceLost)));
        assert!(matches!(
            event.wait(1, Duration::from_millis(1)),
            Err(RenderError::DeviceLost)
        ));
    }
}
