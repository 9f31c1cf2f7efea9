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

//! A dedicated thread that records and submits work on a secondary queue.
//!
//! The worker owns its command buffers and its completion event. Callers feed it
//! [`AsyncComputeTask`]s through a channel; completion callbacks run on the worker
//! thread once the GPU has reached the sync value of the work they follow.
//!
//! A failed recording, submission or queue operation stops the worker from issuing
//! more GPU work. Every pending and later completion callback then receives the error
//! instead of a sync value.

use crate::renderer::api::{
    CommandBufferLevel, QueuePriority, QueueType, WaitStatus, INFINITE_TIMEOUT,
};
use crate::renderer::error::RenderError;
use crate::renderer::recycler::CommandBufferRecycler;
use crate::renderer::traits::{CommandBuffer, GpuEvent, GraphicsDevice, Queue};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Records into the worker's open command buffer.
pub type RecordFn = Box<dyn FnOnce(&mut dyn CommandBuffer) + Send>;
/// Runs against the worker's queue, e.g. a cross-queue wait.
pub type QueueFn = Box<dyn FnOnce(&dyn Queue) -> Result<(), RenderError> + Send>;
/// Receives the sync value that completed, or the error that stopped the worker.
pub type CompletionFn = Box<dyn FnOnce(Result<u64, RenderError>) + Send>;

/// A unit of work for the worker thread.
pub enum AsyncComputeTask {
    /// Records commands, opening a command buffer if none is open.
    Record(RecordFn),
    /// Closes and submits the open command buffer, signalling the worker's event.
    Submit,
    /// Runs a closure against the queue.
    QueueOperation(QueueFn),
    /// Runs a callback once everything submitted so far has completed.
    ExecutionCompleted(CompletionFn),
    /// Drains pending callbacks and stops the thread.
    Terminate,
}

impl std::fmt::Debug for AsyncComputeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AsyncComputeTask::Record(_) => "Record",
            AsyncComputeTask::Submit => "Submit",
            AsyncComputeTask::QueueOperation(_) => "QueueOperation",
            AsyncComputeTask::ExecutionCompleted(_) => "ExecutionCompleted",
            AsyncComputeTask::Terminate => "Terminate",
        };
        f.write_str(name)
    }
}

const CALLBACK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to the worker thread. Dropping it terminates the worker.
#[derive(Debug)]
pub struct AsyncComputeWorker {
    sender: flume::Sender<AsyncComputeTask>,
    event: Arc<dyn GpuEvent>,
    queue: Arc<dyn Queue>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AsyncComputeWorker {
    /// Starts a worker submitting to the device's `queue_type` queue at high priority.
    pub fn spawn(
        device: Arc<dyn GraphicsDevice>,
        queue_type: QueueType,
    ) -> Result<Self, RenderError> {
        let queue = device.create_queue(queue_type, QueuePriority::High)?;
        let event = device.create_gpu_event("async-compute")?;
        let (sender, receiver) = flume::unbounded();

        let mut state = WorkerState {
            device,
            queue: queue.clone(),
            event: event.clone(),
            recycler: CommandBufferRecycler::new(queue_type, CommandBufferLevel::Primary),
            open: None,
            last_submitted: 0,
            callbacks: Vec::new(),
            failure: None,
        };
        let handle = thread::Builder::new()
            .name(format!("prism-async-{:?}", queue_type).to_lowercase())
            .spawn(move || state.run(receiver))
            .map_err(|e| RenderError::InitializationFailed(format!("async worker thread: {e}")))?;

        log::info!("AsyncComputeWorker: started on the {:?} queue", queue_type);
        Ok(Self {
            sender,
            event,
            queue,
            handle: Some(handle),
        })
    }

    /// The event signalled by every submission of the worker.
    pub fn event(&self) -> &Arc<dyn GpuEvent> {
        &self.event
    }

    /// The queue the worker submits to.
    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    /// Sends a task to the worker.
    pub fn send(&self, task: AsyncComputeTask) -> Result<(), RenderError> {
        self.sender
            .send(task)
            .map_err(|_| RenderError::Internal("async compute worker has stopped".to_string()))
    }

    /// Queues recording work.
    pub fn record(
        &self,
        f: impl FnOnce(&mut dyn CommandBuffer) + Send + 'static,
    ) -> Result<(), RenderError> {
        self.send(AsyncComputeTask::Record(Box::new(f)))
    }

    /// Queues a submission of everything recorded so far.
    pub fn submit(&self) -> Result<(), RenderError> {
        self.send(AsyncComputeTask::Submit)
    }

    /// Queues a closure run against the worker's queue.
    pub fn queue_operation(
        &self,
        f: impl FnOnce(&dyn Queue) -> Result<(), RenderError> + Send + 'static,
    ) -> Result<(), RenderError> {
        self.send(AsyncComputeTask::QueueOperation(Box::new(f)))
    }

    /// Queues a callback for the completion of everything submitted before it.
    pub fn on_completed(
        &self,
        f: impl FnOnce(Result<u64, RenderError>) + Send + 'static,
    ) -> Result<(), RenderError> {
        self.send(AsyncComputeTask::ExecutionCompleted(Box::new(f)))
    }

    /// Stops the worker after its pending callbacks have run.
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(AsyncComputeTask::Terminate);
            if handle.join().is_err() {
                log::error!("AsyncComputeWorker: worker thread panicked");
            }
            log::info!("AsyncComputeWorker: stopped");
        }
    }
}

impl Drop for AsyncComputeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Rebuilds the stored failure for one more callback.
fn replay(failure: &RenderError) -> RenderError {
    match failure {
        RenderError::DeviceLost => RenderError::DeviceLost,
        RenderError::QueueLost => RenderError::QueueLost,
        other => RenderError::SubmissionFailed(other.to_string()),
    }
}

struct WorkerState {
    device: Arc<dyn GraphicsDevice>,
    queue: Arc<dyn Queue>,
    event: Arc<dyn GpuEvent>,
    recycler: CommandBufferRecycler,
    open: Option<Box<dyn CommandBuffer>>,
    last_submitted: u64,
    callbacks: Vec<(u64, CompletionFn)>,
    /// The first error, after which no GPU work is issued.
    failure: Option<RenderError>,
}

impl WorkerState {
    fn run(&mut self, receiver: flume::Receiver<AsyncComputeTask>) {
        loop {
            let task = if self.callbacks.is_empty() {
                receiver.recv().ok()
            } else {
                match receiver.recv_timeout(CALLBACK_POLL_INTERVAL) {
                    Ok(task) => Some(task),
                    Err(flume::RecvTimeoutError::Timeout) => {
                        self.fire_completed();
                        continue;
                    }
                    Err(flume::RecvTimeoutError::Disconnected) => None,
                }
            };

            match task {
                Some(AsyncComputeTask::Record(f)) => self.record(f),
                Some(AsyncComputeTask::Submit) => self.submit(),
                Some(AsyncComputeTask::QueueOperation(f)) => self.queue_operation(f),
                Some(AsyncComputeTask::ExecutionCompleted(f)) => {
                    self.callbacks.push((self.last_submitted, f));
                }
                Some(AsyncComputeTask::Terminate) | None => break,
            }
            self.fire_completed();
        }

        self.drain();
    }

    fn fail(&mut self, what: &str, error: RenderError) {
        log::error!("AsyncComputeWorker: {} failed: {}", what, error);
        self.open = None;
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    /// Skips GPU work once the worker has failed.
    fn is_failed(&self, what: &str) -> bool {
        if self.failure.is_some() {
            log::warn!("AsyncComputeWorker: {} skipped after an earlier failure", what);
            return true;
        }
        false
    }

    fn record(&mut self, f: RecordFn) {
        if self.is_failed("recording") {
            return;
        }
        if self.open.is_none() {
            let opened = self
                .recycler
                .acquire(self.device.as_ref(), self.event.as_ref())
                .and_then(|mut command_buffer| {
                    command_buffer.begin()?;
                    Ok(command_buffer)
                });
            match opened {
                Ok(command_buffer) => self.open = Some(command_buffer),
                Err(e) => {
                    self.fail("opening a command buffer", e);
                    return;
                }
            }
        }
        if let Some(command_buffer) = self.open.as_mut() {
            f(command_buffer.as_mut());
        }
    }

    fn submit(&mut self) {
        if self.is_failed("submission") {
            return;
        }
        let Some(mut command_buffer) = self.open.take() else {
            return;
        };
        match self
            .queue
            .submit_one(command_buffer.as_mut(), Some(self.event.as_ref()), None)
        {
            Ok(()) => {
                self.last_submitted = self.event.sync_point();
                self.recycler.release(command_buffer, self.last_submitted);
            }
            Err(e) => self.fail("submission", e),
        }
    }

    fn queue_operation(&mut self, f: QueueFn) {
        if self.is_failed("queue operation") {
            return;
        }
        if let Err(e) = f(self.queue.as_ref()) {
            self.fail("queue operation", e);
        }
    }

    fn fire_completed(&mut self) {
        if let Some(failure) = &self.failure {
            for (_, callback) in self.callbacks.drain(..) {
                callback(Err(replay(failure)));
            }
            return;
        }
        let mut index = 0;
        while index < self.callbacks.len() {
            let value = self.callbacks[index].0;
            match self.event.wait(value, Duration::ZERO) {
                Ok(WaitStatus::Signaled) => {
                    let (value, callback) = self.callbacks.remove(index);
                    callback(Ok(value));
                }
                Ok(WaitStatus::Timeout) => index += 1,
                Err(e) => {
                    self.fail("waiting for completion", e);
                    self.fire_completed();
                    return;
                }
            }
        }
    }

    fn drain(&mut self) {
        if self.failure.is_none() {
            if let Some(max) = self.callbacks.iter().map(|(value, _)| *value).max() {
                if let Err(e) = self.event.wait(max, INFINITE_TIMEOUT) {
                    self.fail("draining pending callbacks", e);
                }
            }
        }
        self.fire_completed();
    }
}
