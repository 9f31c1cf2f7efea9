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

use super::queue::SoftQueue;
use super::resources::SoftDeviceShared;
use prism_core::math::Extent2D;
use prism_core::renderer::api::{
    AcquireStatus, BackendHandle, GraphicsBackendType, RenderTargetDescriptor, RenderTargetId,
    ResourceState, SwapchainDescriptor, SwapchainMode, TextureFormat, TextureId, WaitStatus,
    INFINITE_TIMEOUT,
};
use prism_core::renderer::{Queue, RenderError, Swapchain, Timeline};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Formats a Vulkan surface is guaranteed to offer.
const VULKAN_SURFACE_FORMATS: [TextureFormat; 5] = [
    TextureFormat::Bgra8Unorm,
    TextureFormat::Bgra8UnormSrgb,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba8UnormSrgb,
    TextureFormat::Rgba16Float,
];

#[derive(Debug)]
struct BackBuffer {
    render_target: RenderTargetId,
    color: TextureId,
    /// Serial value of the last queue work that used this image.
    in_flight: AtomicU64,
}

/// A ring of back buffers owned by one graphics queue.
#[derive(Debug)]
pub struct SoftSwapchain {
    shared: Arc<SoftDeviceShared>,
    // Keeps the owning queue, and so its GPU thread, alive while images are in flight.
    _queue: Arc<dyn Queue>,
    serial: Arc<Timeline>,
    native: BackendHandle,
    format: TextureFormat,
    mode: SwapchainMode,
    buffer_count: u32,
    extent: Extent2D,
    images: Vec<BackBuffer>,
    current: AtomicU32,
    acquired: AtomicBool,
}

impl SoftSwapchain {
    pub(crate) fn new(
        shared: Arc<SoftDeviceShared>,
        queue: &Arc<dyn Queue>,
        extent: Extent2D,
        descriptor: &SwapchainDescriptor,
    ) -> Result<Self, RenderError> {
        let soft_queue = queue.as_any().downcast_ref::<SoftQueue>().ok_or(
            RenderError::BackendMismatch {
                expected: shared.backend,
                found: queue.backend(),
            },
        )?;
        if !soft_queue.belongs_to(&shared) {
            return Err(RenderError::InvalidState(
                "swapchain queue belongs to another device".to_string(),
            ));
        }
        if !soft_queue.queue_type().supports_graphics() {
            return Err(RenderError::InvalidState(format!(
                "a {:?} queue cannot own a swapchain",
                soft_queue.queue_type()
            )));
        }
        if extent.is_empty() {
            return Err(RenderError::InitializationFailed(format!(
                "window size {}x{} cannot back a swapchain",
                extent.width, extent.height
            )));
        }
        if shared.backend == GraphicsBackendType::Vulkan
            && !VULKAN_SURFACE_FORMATS.contains(&descriptor.format)
        {
            return Err(RenderError::InitializationFailed(format!(
                "surface does not support {:?}",
                descriptor.format
            )));
        }

        let mut swapchain = Self {
            native: shared.next_native_handle(),
            serial: Arc::clone(soft_queue.serial()),
            _queue: Arc::clone(queue),
            shared,
            format: descriptor.format,
            mode: descriptor.mode,
            buffer_count: descriptor.clamped_buffer_count(),
            extent,
            images: Vec::new(),
            current: AtomicU32::new(0),
            acquired: AtomicBool::new(false),
        };
        swapchain.create_images()?;
        log::info!(
            "SoftDevice: Created swapchain {:?} with {} {:?} buffers, {}x{}, {:?}",
            swapchain.native,
            swapchain.buffer_count,
            swapchain.format,
            extent.width,
            extent.height,
            swapchain.mode
        );
        Ok(swapchain)
    }

    /// Resolves a trait object to the emulated swapchain of `shared`'s device.
    pub(crate) fn downcast<'a>(
        swapchain: &'a dyn Swapchain,
        shared: &Arc<SoftDeviceShared>,
    ) -> Result<&'a SoftSwapchain, RenderError> {
        let soft = swapchain
            .as_any()
            .downcast_ref::<SoftSwapchain>()
            .ok_or(RenderError::BackendMismatch {
                expected: shared.backend,
                found: swapchain.backend(),
            })?;
        if !Arc::ptr_eq(&soft.shared, shared) {
            return Err(RenderError::InvalidState(
                "swapchain belongs to another device".to_string(),
            ));
        }
        Ok(soft)
    }

    fn create_images(&mut self) -> Result<(), RenderError> {
        for index in 0..self.buffer_count {
            let label = format!("back buffer {index}");
            let descriptor = RenderTargetDescriptor::single_color(
                &label,
                self.extent.width,
                self.extent.height,
                self.format,
            );
            let render_target =
                match self
                    .shared
                    .create_render_target(&descriptor, true, ResourceState::Present)
                {
                    Ok(id) => id,
                    Err(err) => {
                        self.release_images();
                        return Err(RenderError::ResourceError(err));
                    }
                };
            let color = self
                .shared
                .lock_table()
                .render_targets
                .get(&render_target)
                .and_then(|entry| entry.info.color_attachments.first().copied());
            let Some(color) = color else {
                self.release_images();
                return Err(RenderError::Internal(format!(
                    "back buffer {index} has no color attachment"
                )));
            };
            self.images.push(BackBuffer {
                render_target,
                color,
                in_flight: AtomicU64::new(0),
            });
        }
        Ok(())
    }

    fn release_images(&mut self) {
        for image in self.images.drain(..) {
            if let Err(err) = self.shared.destroy_render_target(image.render_target, true) {
                log::warn!(
                    "SoftSwapchain: failed to release back buffer {:?}: {}",
                    image.render_target,
                    err
                );
            }
        }
    }

    fn current_image(&self) -> Option<&BackBuffer> {
        self.images
            .get(self.current.load(Ordering::Acquire) as usize)
    }

    /// Rejects queue work that targets a back buffer before it was acquired.
    pub(crate) fn check_acquired_for_submit(&self) -> Result<(), RenderError> {
        if self.acquired.load(Ordering::Acquire) {
            if self.shared.backend == GraphicsBackendType::Vulkan {
                log::trace!(
                    "SoftSwapchain: submission waits on the acquire semaphore of image {}",
                    self.current.load(Ordering::Acquire)
                );
            }
            return Ok(());
        }
        let message = format!(
            "submission targets back buffer {} before it was acquired",
            self.current.load(Ordering::Acquire)
        );
        self.shared.report_validation(&message);
        Err(RenderError::Validation(message))
    }

    /// Records that the current back buffer is used by queue work `serial`.
    /// Rejects queue work from any queue but the one that owns the back buffers.
    pub(crate) fn check_owner(&self, serial: &Arc<Timeline>) -> Result<(), RenderError> {
        if Arc::ptr_eq(&self.serial, serial) {
            return Ok(());
        }
        let message = format!(
            "swapchain {:?} is used from a queue that does not own it",
            self.native
        );
        self.shared.report_validation(&message);
        Err(RenderError::InvalidState(message))
    }

    pub(crate) fn mark_image_in_flight(&self, serial: u64) {
        if let Some(image) = self.current_image() {
            image.in_flight.fetch_max(serial, Ordering::AcqRel);
        }
    }

    /// The color texture of the current back buffer, which must have been acquired.
    pub(crate) fn image_for_present(&self) -> Result<TextureId, RenderError> {
        if !self.acquired.load(Ordering::Acquire) {
            let message = format!(
                "back buffer {} is presented without being acquired",
                self.current.load(Ordering::Acquire)
            );
            self.shared.report_validation(&message);
            return Err(RenderError::Validation(message));
        }
        self.current_image()
            .map(|image| image.color)
            .ok_or_else(|| RenderError::Internal("swapchain has no back buffers".to_string()))
    }

    /// Moves to the next back buffer after a present.
    pub(crate) fn advance(&self) {
        let next = (self.current.load(Ordering::Acquire) + 1) % self.buffer_count.max(1);
        self.current.store(next, Ordering::Release);
        self.acquired.store(false, Ordering::Release);
    }
}

impl Swapchain for SoftSwapchain {
    fn backend(&self) -> GraphicsBackendType {
        self.shared.backend
    }

    fn native_handle(&self) -> BackendHandle {
        self.native
    }

    fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn mode(&self) -> SwapchainMode {
        self.mode
    }

    fn extent(&self) -> Extent2D {
        self.extent
    }

    fn prepare_next_frame(&mut self, timeout: Duration) -> Result<AcquireStatus, RenderError> {
        if self.shared.is_lost() {
            return Err(RenderError::DeviceLost);
        }
        let index = self.current.load(Ordering::Acquire);
        if self.acquired.load(Ordering::Acquire) {
            return Ok(AcquireStatus::Acquired(index));
        }
        let in_flight = self
            .current_image()
            .map(|image| image.in_flight.load(Ordering::Acquire))
            .ok_or_else(|| RenderError::Internal("swapchain has no back buffers".to_string()))?;
        match self.serial.wait(in_flight, timeout).into_status()? {
            WaitStatus::Signaled => {
                self.acquired.store(true, Ordering::Release);
                Ok(AcquireStatus::Acquired(index))
            }
            WaitStatus::Timeout => {
                log::debug!(
                    "SoftSwapchain: back buffer {} still in flight (serial {})",
                    index,
                    in_flight
                );
                Ok(AcquireStatus::Timeout)
            }
        }
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    fn render_target(&self, index: u32) -> Option<RenderTargetId> {
        self.images
            .get(index as usize)
            .map(|image| image.render_target)
    }

    fn current_render_target(&self) -> Result<RenderTargetId, RenderError> {
        self.current_image()
            .map(|image| image.render_target)
            .ok_or_else(|| RenderError::Internal("swapchain has no back buffers".to_string()))
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let extent = Extent2D::new(width, height);
        if extent.is_empty() {
            return Err(RenderError::InvalidState(format!(
                "cannot resize a swapchain to {width}x{height}"
            )));
        }
        if extent == self.extent {
            return Ok(());
        }
        self.serial
            .wait(self.serial.scheduled_value(), INFINITE_TIMEOUT)
            .into_status()?;

        self.release_images();
        self.extent = extent;
        self.current.store(0, Ordering::Release);
        self.acquired.store(false, Ordering::Release);
        self.create_images()?;
        log::info!(
            "SoftSwapchain {:?}: resized to {}x{}",
            self.native,
            width,
            height
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for SoftSwapchain {
    fn drop(&mut self) {
        let idle = self
            .serial
            .wait(self.serial.scheduled_value(), Duration::from_secs(5))
            .into_status();
        if !matches!(idle, Ok(WaitStatus::Signaled)) {
            log::warn!(
                "SoftSwapchain {:?}: released while back buffers may still be in flight",
                self.native
            );
        }
        self.release_images();
        log::debug!("SoftSwapchain {:?}: released.", self.native);
    }
}
