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

use crate::renderer::api::{BackendHandle, GraphicsBackendType, WaitStatus};
use crate::renderer::error::RenderError;
use std::any::Any;
use std::fmt::Debug;
use std::time::Duration;

/// A GPU/CPU synchronization primitive with a monotonically increasing 64-bit value.
///
/// This is the one abstraction over a D3D12 fence, a Vulkan timeline semaphore, and the
/// CPU-signalled stand-in of implicitly synchronized APIs. Work submitted with an event
/// reserves the next value; the value is reached once that work has retired.
///
/// Events are created once and reused across frames.
pub trait GpuEvent: Send + Sync + Debug {
    /// The debug name given at creation.
    fn label(&self) -> &str;

    /// The backend that created this event.
    fn backend(&self) -> GraphicsBackendType;

    /// The native primitive behind the event.
    fn native_handle(&self) -> BackendHandle;

    /// The value reached once everything submitted so far with this event completes.
    ///
    /// Meaningful after a submission; read it right after `Queue::submit` to obtain the
    /// value that identifies that submission.
    fn sync_point(&self) -> u64;

    /// The highest value the GPU has completed. Never decreases.
    fn completion_value(&self) -> u64;

    /// Blocks until the completion value is at least `value` or `timeout` elapses.
    ///
    /// ## Returns
    ///
    /// * `Ok(WaitStatus::Signaled)` once the value is reached; never earlier.
    /// * `Ok(WaitStatus::Timeout)` when the timeout elapsed; the work may still be running.
    /// * `Err(RenderError::DeviceLost)` if the device was lost before the value was reached.
    fn wait(&self, value: u64, timeout: Duration) -> Result<WaitStatus, RenderError>;

    /// Signals `value` from the CPU.
    ///
    /// A value at or below the completion value leaves the event unchanged, except on
    /// Vulkan where it is a validation error.
    fn signal(&self, value: u64) -> Result<(), RenderError>;

    /// `true` once `value` has been completed.
    fn is_completed(&self, value: u64) -> bool {
        self.completion_value() >= value
    }

    /// Waits for the current [`GpuEvent::sync_point`].
    fn wait_for_sync_point(&self, timeout: Duration) -> Result<WaitStatus, RenderError> {
        self.wait(self.sync_point(), timeout)
    }

    /// Allows downcasting to the backend's concrete event type.
    fn as_any(&self) -> &dyn Any;
}
