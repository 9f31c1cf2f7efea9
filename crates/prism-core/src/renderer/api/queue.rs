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

//! Queue capability classes and priorities.

/// The capability class of a queue. A device keeps one queue per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueType {
    /// Graphics, compute and transfer work; the only class that can present.
    Graphics,
    /// Compute and transfer work.
    Compute,
    /// Transfer (copy) work only.
    Transfer,
    /// Video decode sessions.
    VideoDecode,
    /// Video encode sessions.
    VideoEncode,
}

impl QueueType {
    /// Every queue class, in pool order.
    pub const ALL: [QueueType; 5] = [
        QueueType::Graphics,
        QueueType::Compute,
        QueueType::Transfer,
        QueueType::VideoDecode,
        QueueType::VideoEncode,
    ];

    /// `true` if draw and render target commands are legal on this class.
    pub fn supports_graphics(&self) -> bool {
        matches!(self, QueueType::Graphics)
    }

    /// `true` if dispatches are legal on this class.
    pub fn supports_compute(&self) -> bool {
        matches!(self, QueueType::Graphics | QueueType::Compute)
    }
}

/// Scheduling priority requested for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueuePriority {
    /// Default priority.
    #[default]
    Normal,
    /// Preferred over normal queues.
    High,
    /// System-wide realtime priority; may require elevated privileges.
    GlobalRealTime,
}
