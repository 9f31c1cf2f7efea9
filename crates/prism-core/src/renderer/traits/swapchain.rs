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

use crate::math::Extent2D;
use crate::renderer::api::{
    AcquireStatus, BackendHandle, GraphicsBackendType, RenderTargetId, SwapchainMode,
    TextureFormat, INFINITE_TIMEOUT,
};
use crate::renderer::error::RenderError;
use std::any::Any;
use std::fmt::Debug;
use std::time::Duration;

/// A ring of presentable render targets bound to a window surface.
///
/// The frame protocol is:
///
/// 1. [`Swapchain::prepare_next_frame`] makes the next back buffer current, waiting
///    until the frame that last used it has retired;
/// 2. command buffers render into [`Swapchain::current_render_target`] and are
///    submitted with this swapchain;
/// 3. `Queue::present` shows the image and advances the index modulo the buffer count.
pub trait Swapchain: Send + Sync + Debug {
    /// The backend that created this swapchain.
    fn backend(&self) -> GraphicsBackendType;

    /// The native swapchain object.
    fn native_handle(&self) -> BackendHandle;

    /// Number of back buffers in the ring.
    fn buffer_count(&self) -> u32;

    /// Back buffer format.
    fn format(&self) -> TextureFormat;

    /// Presentation pacing.
    fn mode(&self) -> SwapchainMode;

    /// Current back buffer extent.
    fn extent(&self) -> Extent2D;

    /// Acquires the current back buffer, blocking up to `timeout` for the previous
    /// frame on it to retire. Calling it again before presenting returns the same index.
    fn prepare_next_frame(&mut self, timeout: Duration) -> Result<AcquireStatus, RenderError>;

    /// Acquires the current back buffer without a timeout and returns its index.
    fn acquire_current_back_buffer_index(&mut self) -> Result<u32, RenderError> {
        match self.prepare_next_frame(INFINITE_TIMEOUT)? {
            AcquireStatus::Acquired(index) => Ok(index),
            AcquireStatus::Timeout => Err(RenderError::SurfaceAcquisitionFailed(
                "unbounded acquire reported a timeout".to_string(),
            )),
        }
    }

    /// Index of the current back buffer, without waiting.
    fn current_back_buffer_index(&self) -> u32;

    /// The render target of back buffer `index`.
    fn render_target(&self, index: u32) -> Option<RenderTargetId>;

    /// The render target of the current back buffer.
    fn current_render_target(&self) -> Result<RenderTargetId, RenderError>;

    /// Resizes the back buffers.
    ///
    /// Waits for the owning queue to go idle, releases every back buffer view, resizes,
    /// recreates the views and resets the current index. A resize to the current extent
    /// does nothing; an empty extent is rejected.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    /// Allows downcasting to the backend's concrete type.
    fn as_any(&self) -> &dyn Any;
}
