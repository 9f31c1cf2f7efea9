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

use crate::renderer::api::{
    BackendHandle, GraphicsBackendType, QueuePriority, QueueType, WaitStatus,
};
use crate::renderer::error::RenderError;
use crate::renderer::traits::{CommandBuffer, GpuEvent, Swapchain};
use std::any::Any;
use std::fmt::Debug;
use std::time::Duration;

/// An ordered submission channel to the GPU.
///
/// Command buffers submitted to one queue complete in submission order. There is no
/// ordering between queues unless one waits on an event the other signals.
///
/// A failed submission is fatal: the error is returned and the queue refuses all later
/// work with [`RenderError::QueueLost`].
pub trait Queue: Send + Sync + Debug {
    /// The backend that created this queue.
    fn backend(&self) -> GraphicsBackendType;

    /// The capability class of the queue.
    fn queue_type(&self) -> QueueType;

    /// The priority the queue was created with.
    fn priority(&self) -> QueuePriority;

    /// The native queue object.
    fn native_handle(&self) -> BackendHandle;

    /// Submits command buffers in order and signals each event once they complete.
    ///
    /// Buffers still recording are closed first. When `swapchain` is given the work
    /// targets its current back buffer: it waits for the image to be acquired and the
    /// back buffer is not handed out again before this submission retires.
    ///
    /// ## Arguments
    ///
    /// * `command_buffers`: Buffers to execute, in order.
    /// * `signal_events`: Events whose next value is signalled after the buffers complete.
    /// * `swapchain`: The swapchain whose current back buffer the buffers render to.
    fn submit(
        &self,
        command_buffers: &mut [&mut dyn CommandBuffer],
        signal_events: &[&dyn GpuEvent],
        swapchain: Option<&dyn Swapchain>,
    ) -> Result<(), RenderError>;

    /// Submits a single command buffer.
    fn submit_one(
        &self,
        command_buffer: &mut dyn CommandBuffer,
        event: Option<&dyn GpuEvent>,
        swapchain: Option<&dyn Swapchain>,
    ) -> Result<(), RenderError> {
        let events: Vec<&dyn GpuEvent> = event.into_iter().collect();
        self.submit(&mut [command_buffer], &events, swapchain)
    }

    /// Presents the swapchain's current back buffer and moves to the next one.
    ///
    /// The back buffer must be in the `Present` state, which the end of a render target
    /// scope on it guarantees.
    fn present(
        &self,
        swapchain: &dyn Swapchain,
        signal_events: &[&dyn GpuEvent],
    ) -> Result<(), RenderError>;

    /// Makes later work on this queue wait on the GPU until `event` reaches `value`.
    fn wait(&self, event: &dyn GpuEvent, value: u64) -> Result<(), RenderError>;

    /// Signals the next value of `event` once all prior work on this queue completes.
    /// Returns that value.
    fn signal(&self, event: &dyn GpuEvent) -> Result<u64, RenderError>;

    /// Blocks until everything submitted to this queue so far has completed.
    fn wait_idle(&self, timeout: Duration) -> Result<WaitStatus, RenderError>;

    /// Allows downcasting to the backend's concrete type.
    fn as_any(&self) -> &dyn Any;
}
