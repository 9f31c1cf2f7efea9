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

//! Value types used while recording command buffers.

use crate::math::LinearRgba;

/// Lifecycle of a command buffer.
///
/// ```text
/// Initial -> Recording -> Closed -> Submitted -> Completed -> Recording ...
/// ```
///
/// `Completed` is never stored: a `Submitted` buffer is reported as completed once the
/// queue has retired its submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    /// Freshly created, nothing recorded.
    Initial,
    /// Between `begin` and `end`.
    Recording,
    /// Recorded and ready to submit.
    Closed,
    /// Handed to a queue, possibly still executing.
    Submitted,
    /// The submission has retired; the buffer may be reset.
    Completed,
}

/// Whether a command buffer is submitted directly or replayed from another buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandBufferLevel {
    /// Submitted to a queue.
    #[default]
    Primary,
    /// Replayed through `CommandBuffer::execute_bundle`. Explicit backends only.
    Bundle,
}

/// Specifies the data type of indices in an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices.
    Uint16,
    /// 32-bit indices.
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// An integer rectangle, used for scissors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect2D {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// What to clear when a render target scope begins. `None` fields load existing contents.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearValue {
    /// Clear color for every color attachment.
    pub color: Option<LinearRgba>,
    /// Clear depth for the depth attachment.
    pub depth: Option<f32>,
    /// Clear stencil, used together with `depth`.
    pub stencil: u8,
}

impl ClearValue {
    /// Loads every attachment.
    pub const LOAD: Self = Self {
        color: None,
        depth: None,
        stencil: 0,
    };

    /// Clears color attachments, loads depth.
    pub const fn color(color: LinearRgba) -> Self {
        Self {
            color: Some(color),
            depth: None,
            stencil: 0,
        }
    }

    /// Also clears the depth attachment.
    #[must_use]
    pub const fn with_depth(mut self, depth: f32) -> Self {
        self.depth = Some(depth);
        self
    }
}
