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

//! Queues of the hardware driver.
//!
//! wgpu exposes a single queue per device, so every Prism queue of a device feeds the
//! same `wgpu::Queue` under the device's submission lock. Each queue still owns its
//! serial timeline, completed from `on_submitted_work_done` callbacks.

use super::command::WgpuCommandBuffer;
use super::encode;
use super::event::WgpuGpuEvent;
use super::resources::{WgpuCounters, WgpuDeviceShared};
use super::swapchain::WgpuSwapchain;
use crate::graphics::health::QueueHealth;
use prism_core::renderer::api::{
    BackendHandle, CommandBufferState, GraphicsBackendType, QueuePriority, QueueType, WaitStatus,
    INFINITE_TIMEOUT,
};
use prism_core::renderer::{CommandBuffer, GpuEvent, Queue, RenderError, Swapchain, Timeline};
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type Signals = Vec<(Arc<Timeline>, u64)>;

/// A queue of the hardware driver.
#[derive(Debug)]
pub struct WgpuQueue {
    shared: Arc<WgpuDeviceShared>,
    label: String,
    queue_type: QueueType,
    priority: QueuePriority,
    native: BackendHandle,
    serial: Arc<Timeline>,
    health: QueueHealth,
    /// Host-signalled values the next piece of work must wait for.
    pending_waits: Mutex<Signals>,
}

impl WgpuQueue {
    pub(crate) fn new(
        shared: Arc<WgpuDeviceShared>,
        queue_type: QueueType,
        priority: QueuePriority,
    ) -> Self {
        let label = format!("{:?} {:?}", shared.backend, queue_type);
        let serial = Arc::new(Timeline::new(format!("{label} serial")));
        shared.register_timeline(&serial);
        let native = shared.next_native_handle();
        log::info!(
            "WgpuDevice: Created {:?} queue ({:?} priority, {:?})",
            queue_type,
            priority,
            native
        );
        Self {
            shared,
            label,
            queue_type,
            priority,
            native,
            serial,
            health: QueueHealth::default(),
            pending_waits: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn serial(&self) -> &Arc<Timeline> {
        &self.serial
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<WgpuDeviceShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// `true` once a submission on this queue failed.
    pub fn is_poisoned(&self) -> bool {
        self.health.is_poisoned()
    }

    fn check_usable(&self) -> Result<(), RenderError> {
        self.health.check(self.shared.is_lost())
    }

    fn downcast_events<'a>(
        &self,
        events: &[&'a dyn GpuEvent],
    ) -> Result<Vec<&'a WgpuGpuEvent>, RenderError> {
        events
            .iter()
            .map(|event| WgpuGpuEvent::downcast(*event, &self.shared))
            .collect()
    }

    /// Blocks on host-signalled values before any later work reaches the wgpu queue.
    fn drain_pending_waits(&self) -> Result<(), RenderError> {
        let waits = std::mem::take(
            &mut *self
                .pending_waits
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (timeline, value) in waits {
            log::trace!(
                "WgpuQueue ({}): waiting for '{}' to reach {}",
                self.label,
                timeline.label(),
                value
            );
            self.shared
                .wait_timeline(&timeline, value, INFINITE_TIMEOUT)?;
        }
        Ok(())
    }

    /// Reserves event values and the next serial value, completed together once the
    /// work submitted so far has finished.
    fn schedule_completion(&self, events: &[&WgpuGpuEvent]) -> u64 {
        let mut signals: Signals = events
            .iter()
            .map(|event| {
                let timeline = Arc::clone(event.timeline());
                let value = timeline.schedule_next();
                (timeline, value)
            })
            .collect();
        let serial = self.serial.schedule_next();
        // The serial first, command buffers retire before event waiters wake.
        signals.insert(0, (Arc::clone(&self.serial), serial));
        self.shared.queue.on_submitted_work_done(move || {
            for (timeline, value) in &signals {
                timeline.signal(*value);
            }
        });
        serial
    }
}

impl Queue for WgpuQueue {
    fn backend(&self) -> GraphicsBackendType {
        self.shared.backend
    }

    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn priority(&self) -> QueuePriority {
        self.priority
    }

    fn native_handle(&self) -> BackendHandle {
        self.native
    }

    fn submit(
        &self,
        command_buffers: &mut [&mut dyn CommandBuffer],
        signal_events: &[&dyn GpuEvent],
        swapchain: Option<&dyn Swapchain>,
    ) -> Result<(), RenderError> {
        self.check_usable()?;
        for command_buffer in command_buffers.iter_mut() {
            if command_buffer.state() == CommandBufferState::Recording {
                command_buffer.end()?;
            }
        }

        let mut batches = Vec::with_capacity(command_buffers.len());
        for command_buffer in command_buffers.iter() {
            let hw = command_buffer
                .as_any()
                .downcast_ref::<WgpuCommandBuffer>()
                .ok_or(RenderError::BackendMismatch {
                    expected: self.backend(),
                    found: command_buffer.backend(),
                })?;
            if !hw.belongs_to(&self.shared) {
                return Err(RenderError::InvalidState(
                    "command buffer belongs to another device".to_string(),
                ));
            }
            if hw.queue_type() != self.queue_type {
                return Err(RenderError::InvalidState(format!(
                    "{:?} command buffer submitted to a {:?} queue",
                    hw.queue_type(),
                    self.queue_type
                )));
            }
            batches.push(hw.submittable()?);
        }
        let events = self.downcast_events(signal_events)?;
        let target = swapchain
            .map(|swapchain| WgpuSwapchain::downcast(swapchain, &self.shared))
            .transpose()?;
        if let Some(target) = target {
            target.check_owner(&self.serial)?;
            target.check_acquired_for_submit()?;
        }

        let _order = self.shared.lock_submit();
        self.health.guard(&self.label, self.drain_pending_waits())?;
        let (encoded, counts) = self.health.guard(
            &self.label,
            encode::encode_submission(&self.shared, &self.label, &batches),
        )?;
        self.shared.queue.submit(Some(encoded));
        let serial = self.schedule_completion(&events);

        for command_buffer in command_buffers.iter_mut() {
            if let Some(hw) = command_buffer
                .as_any_mut()
                .downcast_mut::<WgpuCommandBuffer>()
            {
                hw.mark_submitted(Arc::clone(&self.serial), serial);
            }
        }
        if let Some(target) = target {
            target.mark_image_in_flight(serial);
        }
        let counters = &self.shared.counters;
        WgpuCounters::add(&counters.submissions, 1);
        WgpuCounters::add(&counters.draw_calls, counts.draws);
        WgpuCounters::add(&counters.dispatches, counts.dispatches);
        log::trace!(
            "WgpuQueue ({}): submission {} with {} buffer(s)",
            self.label,
            serial,
            batches.len()
        );
        self.shared.poll();
        Ok(())
    }

    fn present(
        &self,
        swapchain: &dyn Swapchain,
        signal_events: &[&dyn GpuEvent],
    ) -> Result<(), RenderError> {
        self.check_usable()?;
        if !self.queue_type.supports_graphics() {
            return Err(RenderError::InvalidState(format!(
                "{:?} queues cannot present",
                self.queue_type
            )));
        }
        let target = WgpuSwapchain::downcast(swapchain, &self.shared)?;
        target.check_owner(&self.serial)?;
        let events = self.downcast_events(signal_events)?;

        let _order = self.shared.lock_submit();
        self.health.guard(&self.label, self.drain_pending_waits())?;
        target.present_current()?;
        let serial = self.schedule_completion(&events);
        target.mark_image_in_flight(serial);
        target.advance();
        WgpuCounters::add(&self.shared.counters.presents, 1);
        Ok(())
    }

    fn wait(&self, event: &dyn GpuEvent, value: u64) -> Result<(), RenderError> {
        self.check_usable()?;
        let event = WgpuGpuEvent::downcast(event, &self.shared)?;
        let timeline = event.timeline();
        // Scheduled values come from work already handed to the single wgpu queue.
        if value <= timeline.scheduled_value() || timeline.is_reached(value) {
            return Ok(());
        }
        self.pending_waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Arc::clone(timeline), value));
        Ok(())
    }

    fn signal(&self, event: &dyn GpuEvent) -> Result<u64, RenderError> {
        self.check_usable()?;
        let event = WgpuGpuEvent::downcast(event, &self.shared)?;
        let _order = self.shared.lock_submit();
        self.health.guard(&self.label, self.drain_pending_waits())?;
        self.schedule_completion(&[event]);
        // Values are reserved under the submission lock.
        Ok(event.timeline().scheduled_value())
    }

    fn wait_idle(&self, timeout: Duration) -> Result<WaitStatus, RenderError> {
        if self.is_poisoned() {
            return Err(RenderError::QueueLost);
        }
        self.shared
            .wait_timeline(&self.serial, self.serial.scheduled_value(), timeout)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
