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

//! The abstract contracts every graphics backend implements.
//!
//! - [`GraphicsInstance`]: adapter enumeration and device creation.
//! - [`GraphicsDevice`]: the factory of queues, command buffers, events and resources.
//! - [`Queue`]: ordered submission, presentation and cross-queue synchronization.
//! - [`CommandBuffer`]: recording of GPU work.
//! - [`GpuEvent`]: the monotonic 64-bit synchronization primitive.
//! - [`Swapchain`]: the presentable back buffer ring.
//! - [`GraphicsBackendSelector`]: picks an adapter from a preference list.

mod backend_selector;
mod command_buffer;
mod gpu_event;
mod graphics_device;
mod instance;
mod queue;
mod swapchain;

pub use self::backend_selector::GraphicsBackendSelector;
pub use self::command_buffer::CommandBuffer;
pub use self::gpu_event::GpuEvent;
pub use self::graphics_device::GraphicsDevice;
pub use self::instance::GraphicsInstance;
pub use self::queue::Queue;
pub use self::swapchain::Swapchain;
