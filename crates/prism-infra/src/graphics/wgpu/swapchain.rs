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

//! Window swapchains of the hardware driver, backed by a `wgpu::Surface`.
//!
//! The surface hands out one texture per acquire. Each Prism back buffer is a render
//! target whose color view is filled in at acquire and cleared again at present.

use super::conversions::IntoWgpu;
use super::queue::WgpuQueue;
use super::resources::WgpuDeviceShared;
use prism_core::math::Extent2D;
use prism_core::platform::{PrismWindow, PrismWindowHandle};
use prism_core::renderer::api::{
    AcquireStatus, BackendHandle, GraphicsBackendType, RenderTargetDescriptor, RenderTargetId,
    SwapchainDescriptor, SwapchainMode, TextureFormat, TextureId, WaitStatus, INFINITE_TIMEOUT,
};
use prism_core::renderer::{Queue, RenderError, Swapchain, Timeline};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use wgpu::SurfaceTargetUnsafe;

#[derive(Debug)]
struct BackBuffer {
    render_target: RenderTargetId,
    color: TextureId,
    in_flight: AtomicU64,
}

/// A window swapchain of the hardware driver.
#[derive(Debug)]
pub struct WgpuSwapchain {
    shared: Arc<WgpuDeviceShared>,
    _queue: Arc<dyn Queue>,
    serial: Arc<Timeline>,
    native: BackendHandle,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    format: TextureFormat,
    mode: SwapchainMode,
    buffer_count: u32,
    extent: Extent2D,
    images: Vec<BackBuffer>,
    current: AtomicU32,
    acquired: AtomicBool,
    frame: Mutex<Option<wgpu::SurfaceTexture>>,
    // Dropped after the surface that points into it.
    _window: PrismWindowHandle,
}

impl WgpuSwapchain {
    pub(crate) fn new(
        shared: Arc<WgpuDeviceShared>,
        queue: &Arc<dyn Queue>,
        window: &dyn PrismWindow,
        descriptor: &SwapchainDescriptor,
    ) -> Result<Self, RenderError> {
        let hw_queue = queue.as_any().downcast_ref::<WgpuQueue>().ok_or(
            RenderError::BackendMismatch {
                expected: shared.backend,
                found: queue.backend(),
            },
        )?;
        if !hw_queue.belongs_to(&shared) {
            return Err(RenderError::InvalidState(
                "swapchain queue belongs to another device".to_string(),
            ));
        }
        if !hw_queue.queue_type().supports_graphics() {
            return Err(RenderError::InvalidState(format!(
                "a {:?} queue cannot own a swapchain",
                hw_queue.queue_type()
            )));
        }
        let (width, height) = window.inner_size();
        let extent = Extent2D::new(width, height);
        if extent.is_empty() {
            return Err(RenderError::InitializationFailed(format!(
                "window size {width}x{height} cannot back a swapchain"
            )));
        }

        let window_handle = window.clone_handle_arc();
        let surface_target = unsafe {
            SurfaceTargetUnsafe::from_window(&window_handle).map_err(|e| {
                RenderError::InitializationFailed(format!("Failed to create surface target: {e}"))
            })?
        };
        let surface = unsafe { shared.instance.create_surface_unsafe(surface_target) }
            .map_err(|e| {
                RenderError::InitializationFailed(format!("Failed to create surface: {e}"))
            })?;
        log::debug!("WGPU surface created for window {}.", window.id());

        let caps = surface.get_capabilities(&shared.adapter);
        let wgpu_format: wgpu::TextureFormat = descriptor.format.into_wgpu();
        if !caps.formats.contains(&wgpu_format) {
            return Err(RenderError::InitializationFailed(format!(
                "surface does not support {:?}, it offers {:?}",
                descriptor.format, caps.formats
            )));
        }
        let buffer_count = descriptor.clamped_buffer_count();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: wgpu_format,
            width,
            height,
            present_mode: descriptor.mode.into_wgpu(),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: buffer_count.saturating_sub(1).max(1),
        };
        surface.configure(&shared.device, &config);

        let mut swapchain = Self {
            native: shared.next_native_handle(),
            serial: Arc::clone(hw_queue.serial()),
            _queue: Arc::clone(queue),
            shared,
            surface,
            config,
            format: descriptor.format,
            mode: descriptor.mode,
            buffer_count,
            extent,
            images: Vec::new(),
            current: AtomicU32::new(0),
            acquired: AtomicBool::new(false),
            frame: Mutex::new(None),
            _window: window_handle,
        };
        swapchain.create_images()?;
        log::info!(
            "WgpuDevice: Created swapchain {:?} with {} {:?} buffers, {}x{}, {:?}",
            swapchain.native,
            buffer_count,
            swapchain.format,
            width,
            height,
            swapchain.mode
        );
        Ok(swapchain)
    }

    pub(crate) fn downcast<'a>(
        swapchain: &'a dyn Swapchain,
        shared: &Arc<WgpuDeviceShared>,
    ) -> Result<&'a WgpuSwapchain, RenderError> {
        let hw = swapchain
            .as_any()
            .downcast_ref::<WgpuSwapchain>()
            .ok_or(RenderError::BackendMismatch {
                expected: shared.backend,
                found: swapchain.backend(),
            })?;
        if !Arc::ptr_eq(&hw.shared, shared) {
            return Err(RenderError::InvalidState(
                "swapchain belongs to another device".to_string(),
            ));
        }
        Ok(hw)
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
            let render_target = match self.shared.create_render_target(&descriptor, true) {
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
                    "WgpuSwapchain: failed to release back buffer {:?}: {}",
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

    fn lock_frame(&self) -> std::sync::MutexGuard<'_, Option<wgpu::SurfaceTexture>> {
        self.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current_view(&self, view: Option<Arc<wgpu::TextureView>>) {
        let Some(image) = self.current_image() else {
            return;
        };
        if let Some(entry) = self.shared.lock_table().textures.get_mut(&image.color) {
            entry.view = view;
        }
    }

    pub(crate) fn check_acquired_for_submit(&self) -> Result<(), RenderError> {
        if self.acquired.load(Ordering::Acquire) {
            return Ok(());
        }
        let message = format!(
            "submission targets back buffer {} before it was acquired",
            self.current.load(Ordering::Acquire)
        );
        self.shared.report_validation(&message);
        Err(RenderError::Validation(message))
    }

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

    /// Hands the acquired surface texture back to the compositor.
    pub(crate) fn present_current(&self) -> Result<(), RenderError> {
        let frame = self.lock_frame().take();
        let Some(frame) = frame.filter(|_| self.acquired.load(Ordering::Acquire)) else {
            let message = format!(
                "back buffer {} is presented without being acquired",
                self.current.load(Ordering::Acquire)
            );
            self.shared.report_validation(&message);
            return Err(RenderError::Validation(message));
        };
        self.set_current_view(None);
        frame.present();
        Ok(())
    }

    pub(crate) fn advance(&self) {
        let next = (self.current.load(Ordering::Acquire) + 1) % self.buffer_count.max(1);
        self.current.store(next, Ordering::Release);
        self.acquired.store(false, Ordering::Release);
    }

    fn acquire_surface_texture(&mut self) -> Result<Option<wgpu::SurfaceTexture>, RenderError> {
        let mut reconfigured = false;
        loop {
            match self.surface.get_current_texture() {
                Ok(texture) => return Ok(Some(texture)),
                Err(e @ wgpu::SurfaceError::Lost) | Err(e @ wgpu::SurfaceError::Outdated)
                    if !reconfigured =>
                {
                    log::warn!(
                        "WgpuSwapchain: surface lost or outdated ({e:?}), reconfiguring at {}x{}",
                        self.config.width,
                        self.config.height
                    );
                    self.surface.configure(&self.shared.device, &self.config);
                    reconfigured = true;
                }
                Err(wgpu::SurfaceError::Timeout) => return Ok(None),
                Err(e) => {
                    log::error!("WgpuSwapchain: unexpected surface error: {e:?}");
                    return Err(RenderError::SurfaceAcquisitionFailed(format!("{e:?}")));
                }
            }
        }
    }
}

impl Swapchain for WgpuSwapchain {
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
        if self.shared.wait_timeline(&self.serial, in_flight, timeout)? == WaitStatus::Timeout {
            log::debug!(
                "WgpuSwapchain: back buffer {} still in flight (serial {})",
                index,
                in_flight
            );
            return Ok(AcquireStatus::Timeout);
        }
        let Some(texture) = self.acquire_surface_texture()? else {
            return Ok(AcquireStatus::Timeout);
        };
        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.set_current_view(Some(Arc::new(view)));
        *self.lock_frame() = Some(texture);
        self.acquired.store(true, Ordering::Release);
        Ok(AcquireStatus::Acquired(index))
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
        self.shared
            .wait_timeline(&self.serial, self.serial.scheduled_value(), INFINITE_TIMEOUT)?;

        self.set_current_view(None);
        self.lock_frame().take();
        self.release_images();
        self.extent = extent;
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.shared.device, &self.config);
        self.current.store(0, Ordering::Release);
        self.acquired.store(false, Ordering::Release);
        self.create_images()?;
        log::info!(
            "WgpuSwapchain {:?}: resized to {}x{}",
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

impl Drop for WgpuSwapchain {
    fn drop(&mut self) {
        let idle = self.shared.wait_timeline(
            &self.serial,
            self.serial.scheduled_value(),
            Duration::from_secs(5),
        );
        if !matches!(idle, Ok(WaitStatus::Signaled)) {
            log::warn!(
                "WgpuSwapchain {:?}: released while back buffers may still be in flight",
                self.native
            );
        }
        self.lock_frame().take();
        self.release_images();
        log::debug!("WgpuSwapchain {:?}: released.", self.native);
    }
}
