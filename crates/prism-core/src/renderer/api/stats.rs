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

//! Device-wide counters.

/// A snapshot of a device's resource and activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Live buffers.
    pub buffers: usize,
    /// Live textures, render target and swapchain attachments included.
    pub textures: usize,
    /// Live render targets.
    pub render_targets: usize,
    /// Live pipelines.
    pub pipelines: usize,
    /// Bytes of device memory currently allocated.
    pub vram_allocated_bytes: u64,
    /// Highest value `vram_allocated_bytes` has reached.
    pub vram_peak_bytes: u64,
    /// Command buffers executed.
    pub submissions: u64,
    /// Draw calls executed.
    pub draw_calls: u64,
    /// Dispatches executed.
    pub dispatches: u64,
    /// Images presented.
    pub presents: u64,
    /// Validation messages emitted.
    pub validation_messages: u64,
}
