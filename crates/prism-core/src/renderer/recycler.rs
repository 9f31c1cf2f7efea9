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

use crate::renderer::api::{CommandBufferLevel, QueueType};
use crate::renderer::error::RenderError;
use crate::renderer::traits::{CommandBuffer, GpuEvent, GraphicsDevice};
use std::collections::VecDeque;

/// Reuses command buffers once the submission that last used them has retired.
///
/// Released buffers are parked with the sync value of their submission. Sync values of
/// one event only grow, so the oldest parked buffer is always the first to become free
/// and the parking list is a FIFO.
#[derive(Debug)]
pub struct CommandBufferRecycler {
    queue_type: QueueType,
    level: CommandBufferLevel,
    parked: VecDeque<(u64, Box<dyn CommandBuffer>)>,
    allocated: usize,
}

impl CommandBufferRecycler {
    /// Creates an empty recycler handing out buffers for `queue_type`.
    pub fn new(queue_type: QueueType, level: CommandBufferLevel) -> Self {
        Self {
            queue_type,
            level,
            parked: VecDeque::new(),
            allocated: 0,
        }
    }

    /// The queue class of the buffers handed out.
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Returns a buffer ready for `begin`.
    ///
    /// The oldest parked buffer is reused if `event` has completed its sync value;
    /// otherwise a new buffer is created on `device`.
    pub fn acquire(
        &mut self,
        device: &dyn GraphicsDevice,
        event: &dyn GpuEvent,
    ) -> Result<Box<dyn CommandBuffer>, RenderError> {
        let reusable = self
            .parked
            .front()
            .is_some_and(|(value, _)| event.is_completed(*value));
        if reusable {
            if let Some((value, mut command_buffer)) = self.parked.pop_front() {
                command_buffer.reset()?;
                log::trace!("CommandBufferRecycler: reusing buffer retired at {}", value);
                return Ok(command_buffer);
            }
        }

        let command_buffer = device.create_command_buffer(self.queue_type, self.level)?;
        self.allocated += 1;
        log::debug!(
            "CommandBufferRecycler: allocated {:?} buffer #{}",
            self.queue_type,
            self.allocated
        );
        Ok(command_buffer)
    }

    /// Parks a submitted buffer until `sync_value` completes.
    pub fn release(&mut self, command_buffer: Box<dyn CommandBuffer>, sync_value: u64) {
        self.parked.push_back((sync_value, command_buffer));
    }

    /// Number of buffers waiting for their submission to retire.
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Number of buffers created since the recycler was made.
    pub fn allocated_count(&self) -> usize {
        self.allocated
    }
}
