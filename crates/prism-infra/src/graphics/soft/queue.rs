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

//! Queues of the emulated driver.
//!
//! Explicit backends (D3D12, Vulkan) give every queue its own GPU thread fed through a
//! channel: submissions return as soon as the work is enqueued and complete in FIFO
//! order. Implicit backends (D3D11, OpenGL) run everything inline on the calling thread,
//! serialized through the device's immediate context.
//!
//! Every piece of queue work reserves a value on the queue's serial timeline. The serial
//! drives `wait_idle`, command buffer retirement and swapchain image reuse.

use super::command::SoftCommandBuffer;
use super::event::SoftGpuEvent;
use super::executor;
use super::resources::{SoftCounters, SoftDeviceShared};
use super::swapchain::SoftSwapchain;
use crate::graphics::health::QueueHealth;
use crate::graphics::recorded::RecordedCommand;
use prism_core::renderer::api::{
    BackendHandle, CommandBufferState, GraphicsBackendType, QueuePriority, QueueType,
    ResourceState, SwapchainMode, TextureId, WaitStatus,
};
use prism_core::renderer::{
    CommandBuffer, GpuEvent, Queue, RenderError, ResourceError, Swapchain, Timeline, TimelineWait,
};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll interval of GPU-side waits, so that a shutting-down worker is never stuck.
const GPU_WAIT_SLICE: Duration = Duration::from_millis(10);

type Signals = Vec<(Arc<Timeline>, u64)>;

/// A unit of work for the emulated GPU.
#[derive(Debug)]
enum GpuWork {
    Execute {
        batches: Vec<Arc<[RecordedCommand]>>,
        signals: Signals,
        serial: u64,
    },
    Wait {
        timeline: Arc<Timeline>,
        value: u64,
        serial: u64,
    },
    Signal {
        timeline: Arc<Timeline>,
        value: u64,
        serial: u64,
    },
    Present {
        image: TextureId,
        vsync: bool,
        signals: Signals,
        serial: u64,
    },
    Shutdown,
}

/// Spaces `VerticalSync` presents one refresh interval apart.
#[derive(Debug)]
struct PresentPacer {
    interval: Option<Duration>,
    last: Option<Instant>,
}

impl PresentPacer {
    fn new(refresh_hz: u32) -> Self {
        Self {
            interval: (refresh_hz > 0)
                .then(|| Duration::from_secs_f64(1.0 / f64::from(refresh_hz))),
            last: None,
        }
    }

    fn pace(&mut self, vsync: bool) {
        if let (true, Some(interval), Some(last)) = (vsync, self.interval, self.last) {
            let next = last + interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Everything the GPU side of a queue needs, shared by the worker thread and the
/// inline path.
#[derive(Debug, Clone)]
struct GpuContext {
    shared: Arc<SoftDeviceShared>,
    label: String,
    shutdown: Arc<AtomicBool>,
    pacer: Arc<Mutex<PresentPacer>>,
}

impl GpuContext {
    /// Runs one piece of work and returns what it retires.
    fn run(&self, work: GpuWork) -> Result<Option<Retired>, String> {
        match work {
            GpuWork::Execute {
                batches,
                signals,
                serial,
            } => {
                for batch in &batches {
                    executor::execute(&self.shared, batch)?;
                }
                Ok(Some(Retired { serial, signals }))
            }
            GpuWork::Wait {
                timeline,
                value,
                serial,
            } => loop {
                match timeline.wait(value, GPU_WAIT_SLICE) {
                    TimelineWait::Reached => return Ok(Some(Retired::serial(serial))),
                    TimelineWait::Lost => {
                        return Err(format!("awaited event '{}' was lost", timeline.label()))
                    }
                    TimelineWait::TimedOut if self.shutdown.load(Ordering::Acquire) => {
                        log::warn!(
                            "SoftQueue ({}): abandoning wait on '{}' for {} at shutdown",
                            self.label,
                            timeline.label(),
                            value
                        );
                        return Ok(Some(Retired::serial(serial)));
                    }
                    TimelineWait::TimedOut => {}
                }
            },
            GpuWork::Signal {
                timeline,
                value,
                serial,
            } => Ok(Some(Retired {
                serial,
                signals: vec![(timeline, value)],
            })),
            GpuWork::Present {
                image,
                vsync,
                signals,
                serial,
            } => {
                self.present(image, vsync)?;
                Ok(Some(Retired { serial, signals }))
            }
            GpuWork::Shutdown => Ok(None),
        }
    }

    fn present(&self, image: TextureId, vsync: bool) -> Result<(), String> {
        {
            let table = self.shared.lock_table();
            let entry = table
                .textures
                .get(&image)
                .ok_or_else(|| table.missing("swapchain image", image.0))?;
            if entry.state != ResourceState::Present {
                self.shared.report_validation(&format!(
                    "swapchain image '{}' presented in the {:?} state",
                    entry.label, entry.state
                ));
            }
        }
        self.pacer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pace(vsync);
        SoftCounters::bump(&self.shared.counters.presents);
        Ok(())
    }
}

/// Timeline values reached once a piece of work has finished.
#[derive(Debug)]
struct Retired {
    serial: u64,
    signals: Signals,
}

impl Retired {
    fn serial(serial: u64) -> Self {
        Self {
            serial,
            signals: Vec::new(),
        }
    }

    /// The serial first, command buffers retire before event waiters wake.
    fn publish(self, serial: &Timeline) {
        serial.signal(self.serial);
        for (timeline, value) in &self.signals {
            timeline.signal(*value);
        }
    }
}

#[derive(Debug)]
struct GpuWorker {
    sender: flume::Sender<GpuWork>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn run_gpu_thread(
    context: GpuContext,
    serial: Arc<Timeline>,
    health: Arc<QueueHealth>,
    receiver: flume::Receiver<GpuWork>,
) {
    log::info!("SoftQueue ({}): GPU thread started.", context.label);
    while let Ok(work) = receiver.recv() {
        if matches!(work, GpuWork::Shutdown) {
            break;
        }
        context.shared.wait_gpu_gate(&context.shutdown);
        // Waiters of a lost device have already been released.
        if context.shared.is_lost() {
            continue;
        }
        match context.run(work) {
            Ok(Some(retired)) => retired.publish(&serial),
            Ok(None) => {}
            Err(reason) => {
                health.poison();
                context.shared.lose_device(&reason);
            }
        }
    }
    log::info!("SoftQueue ({}): GPU thread stopped.", context.label);
}

/// A queue of the emulated driver.
#[derive(Debug)]
pub struct SoftQueue {
    context: GpuContext,
    queue_type: QueueType,
    priority: QueuePriority,
    native: BackendHandle,
    serial: Arc<Timeline>,
    health: Arc<QueueHealth>,
    /// Keeps serial and event values in the order work is enqueued.
    submit_lock: Mutex<()>,
    worker: Option<GpuWorker>,
}

impl SoftQueue {
    pub(crate) fn new(
        shared: Arc<SoftDeviceShared>,
        queue_type: QueueType,
        priority: QueuePriority,
    ) -> Result<Self, RenderError> {
        let label = format!("{:?} {:?}", shared.backend, queue_type);
        let serial = Arc::new(Timeline::new(format!("{label} serial")));
        shared.register_timeline(&serial);
        let native = shared.next_native_handle();
        let context = GpuContext {
            pacer: Arc::new(Mutex::new(PresentPacer::new(shared.settings.refresh_hz))),
            shared,
            label,
            shutdown: Arc::new(AtomicBool::new(false)),
        };
        let health = Arc::new(QueueHealth::default());

        let worker = if context.shared.backend.is_explicit() {
            let (sender, receiver) = flume::unbounded();
            let thread_context = context.clone();
            let thread_serial = Arc::clone(&serial);
            let thread_health = Arc::clone(&health);
            let handle = thread::Builder::new()
                .name(format!("prism-gpu-{queue_type:?}").to_lowercase())
                .spawn(move || {
                    run_gpu_thread(thread_context, thread_serial, thread_health, receiver)
                })
                .map_err(|e| {
                    RenderError::InitializationFailed(format!("failed to start GPU thread: {e}"))
                })?;
            Some(GpuWorker {
                sender,
                handle: Mutex::new(Some(handle)),
            })
        } else {
            None
        };

        log::info!(
            "SoftDevice: Created {:?} queue ({:?} priority, {:?})",
            queue_type,
            priority,
            native
        );
        Ok(Self {
            context,
            queue_type,
            priority,
            native,
            serial,
            health,
            submit_lock: Mutex::new(()),
            worker,
        })
    }

    /// The queue-internal timeline completed by every piece of work in order.
    pub(crate) fn serial(&self) -> &Arc<Timeline> {
        &self.serial
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<SoftDeviceShared>) -> bool {
        Arc::ptr_eq(&self.context.shared, shared)
    }

    /// `true` once a submission on this queue failed.
    pub fn is_poisoned(&self) -> bool {
        self.health.is_poisoned()
    }

    fn shared(&self) -> &Arc<SoftDeviceShared> {
        &self.context.shared
    }

    fn check_usable(&self) -> Result<(), RenderError> {
        self.health.check(self.shared().is_lost())
    }

    fn lock_submission(&self) -> std::sync::MutexGuard<'_, ()> {
        self.submit_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve_signals(events: &[&SoftGpuEvent]) -> Signals {
        events
            .iter()
            .map(|event| {
                let timeline = Arc::clone(event.timeline());
                let value = timeline.schedule_next();
                (timeline, value)
            })
            .collect()
    }

    /// Hands work to the GPU thread, or runs it inline on implicit backends.
    fn enqueue(&self, work: GpuWork) -> Result<(), RenderError> {
        match &self.worker {
            Some(worker) => worker.sender.send(work).map_err(|_| {
                self.health.poison();
                RenderError::SubmissionFailed("the GPU thread is gone".to_string())
            }),
            None => {
                let _context = self
                    .shared()
                    .immediate_context
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                match self.context.run(work) {
                    Ok(Some(retired)) => {
                        retired.publish(&self.serial);
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(reason) => {
                        self.health.poison();
                        self.shared().lose_device(&reason);
                        Err(RenderError::SubmissionFailed(reason))
                    }
                }
            }
        }
    }

    fn downcast_events<'a>(
        &self,
        events: &[&'a dyn GpuEvent],
    ) -> Result<Vec<&'a SoftGpuEvent>, RenderError> {
        events
            .iter()
            .map(|event| SoftGpuEvent::downcast(*event, self.shared()))
            .collect()
    }
}

impl Queue for SoftQueue {
    fn backend(&self) -> GraphicsBackendType {
        self.shared().backend
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
            let soft = command_buffer
                .as_any()
                .downcast_ref::<SoftCommandBuffer>()
                .ok_or(RenderError::BackendMismatch {
                    expected: self.backend(),
                    found: command_buffer.backend(),
                })?;
            if !soft.belongs_to(self.shared()) {
                return Err(RenderError::InvalidState(
                    "command buffer belongs to another device".to_string(),
                ));
            }
            if soft.queue_type() != self.queue_type {
                return Err(RenderError::InvalidState(format!(
                    "{:?} command buffer submitted to a {:?} queue",
                    soft.queue_type(),
                    self.queue_type
                )));
            }
            batches.push(soft.submittable()?);
        }
        let events = self.downcast_events(signal_events)?;
        let target = swapchain
            .map(|swapchain| SoftSwapchain::downcast(swapchain, self.shared()))
            .transpose()?;
        if let Some(target) = target {
            target.check_owner(&self.serial)?;
            target.check_acquired_for_submit()?;
        }

        let _order = self.lock_submission();
        {
            let mut table = self.shared().lock_table();
            for command_buffer in command_buffers.iter() {
                let Some(soft) = command_buffer.as_any().downcast_ref::<SoftCommandBuffer>() else {
                    continue;
                };
                for (texture, state) in soft.final_states() {
                    if let Some(entry) = table.textures.get_mut(texture) {
                        entry.submitted_state = *state;
                    }
                }
            }
        }
        let signals = Self::reserve_signals(&events);
        let serial = self.serial.schedule_next();
        for command_buffer in command_buffers.iter_mut() {
            if let Some(soft) = command_buffer
                .as_any_mut()
                .downcast_mut::<SoftCommandBuffer>()
            {
                soft.mark_submitted(Arc::clone(&self.serial), serial);
            }
        }
        if let Some(target) = target {
            target.mark_image_in_flight(serial);
        }
        SoftCounters::bump(&self.shared().counters.submissions);
        log::trace!(
            "SoftQueue ({}): submission {} with {} buffer(s)",
            self.context.label,
            serial,
            batches.len()
        );
        self.enqueue(GpuWork::Execute {
            batches,
            signals,
            serial,
        })
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
        let target = SoftSwapchain::downcast(swapchain, self.shared())?;
        target.check_owner(&self.serial)?;
        let events = self.downcast_events(signal_events)?;
        let image = target.image_for_present()?;
        {
            let table = self.shared().lock_table();
            let entry = table
                .textures
                .get(&image)
                .ok_or(RenderError::ResourceError(ResourceError::NotFound))?;
            if entry.submitted_state != ResourceState::Present {
                let message = format!(
                    "back buffer {} is presented in the {:?} state, end its render target first",
                    target.current_back_buffer_index(),
                    entry.submitted_state
                );
                self.shared().report_validation(&message);
                return Err(RenderError::Validation(message));
            }
        }

        let _order = self.lock_submission();
        let signals = Self::reserve_signals(&events);
        let serial = self.serial.schedule_next();
        target.mark_image_in_flight(serial);
        self.enqueue(GpuWork::Present {
            image,
            vsync: target.mode() == SwapchainMode::VerticalSync,
            signals,
            serial,
        })?;
        target.advance();
        Ok(())
    }

    fn wait(&self, event: &dyn GpuEvent, value: u64) -> Result<(), RenderError> {
        self.check_usable()?;
        let event = SoftGpuEvent::downcast(event, self.shared())?;
        // The immediate context already serializes everything.
        if self.worker.is_none() {
            return Ok(());
        }
        let _order = self.lock_submission();
        let serial = self.serial.schedule_next();
        self.enqueue(GpuWork::Wait {
            timeline: Arc::clone(event.timeline()),
            value,
            serial,
        })
    }

    fn signal(&self, event: &dyn GpuEvent) -> Result<u64, RenderError> {
        self.check_usable()?;
        let event = SoftGpuEvent::downcast(event, self.shared())?;
        let _order = self.lock_submission();
        let timeline = Arc::clone(event.timeline());
        let value = timeline.schedule_next();
        let serial = self.serial.schedule_next();
        self.enqueue(GpuWork::Signal {
            timeline,
            value,
            serial,
        })?;
        Ok(value)
    }

    fn wait_idle(&self, timeout: Duration) -> Result<WaitStatus, RenderError> {
        if self.is_poisoned() {
            return Err(RenderError::QueueLost);
        }
        self.serial
            .wait(self.serial.scheduled_value(), timeout)
            .into_status()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for SoftQueue {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.context.shutdown.store(true, Ordering::Release);
        let _ = worker.sender.send(GpuWork::Shutdown);
        let handle = worker
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("SoftQueue ({}): GPU thread panicked.", self.context.label);
            }
        }
        log::info!("SoftQueue ({}): released.", self.context.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vsync_pacing_spaces_presents() {
        let mut pacer = PresentPacer::new(100);
        let start = Instant::now();
        pacer.pace(true);
        pacer.pace(true);
        pacer.pace(true);
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn test_immediate_mode_is_not_paced() {
        let mut pacer = PresentPacer::new(1);
        let start = Instant::now();
        pacer.pace(false);
        pacer.pace(false);
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
