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

//! Swapchain creation parameters.

use crate::renderer::api::TextureFormat;
use serde::{Deserialize, Serialize};

/// Fewest back buffers a swapchain may have.
pub const MIN_SWAPCHAIN_BUFFERS: u32 = 2;
/// Most back buffers a swapchain may have.
pub const MAX_SWAPCHAIN_BUFFERS: u32 = 8;

/// Presentation pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SwapchainMode {
    /// Presents as soon as possible.
    Immediate,
    /// Presents on the next vertical blank.
    #[default]
    VerticalSync,
}

/// Parameters of `GraphicsDevice::create_swapchain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    /// Back buffer format.
    pub format: TextureFormat,
    /// Requested number of back buffers.
    pub buffer_count: u32,
    /// Presentation pacing.
    pub mode: SwapchainMode,
}

impl SwapchainDescriptor {
    /// The buffer count the device will actually create.
    pub fn clamped_buffer_count(&self) -> u32 {
        self.buffer_count
            .clamp(MIN_SWAPCHAIN_BUFFERS, MAX_SWAPCHAIN_BUFFERS)
    }
}

impl Default for SwapchainDescriptor {
    fn default() -> Self {
        Self {
            format: TextureFormat::Bgra8Unorm,
            buffer_count: 3,
            mode: SwapchainMode::VerticalSync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_count_is_clamped() {
        let mut desc = SwapchainDescriptor::default();
        desc.buffer_count = 1;
        assert_eq!(desc.clamped_buffer_count(), 2);
        desc.buffer_count = 16;
        assert_eq!(desc.clamped_buffer_count(), 8);
    }
}
