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

//! The hardware driver, on top of wgpu.
//!
//! wgpu hides the native synchronization primitives, so every backend tag served here
//! completes its GPU events from `on_submitted_work_done` callbacks. Command streams are
//! recorded in the same form the emulated driver uses and encoded at submission.

mod backend;
mod command;
mod conversions;
mod device;
mod encode;
mod event;
mod instance;
mod queue;
mod resources;
mod swapchain;

pub use self::backend::{backend_name, WgpuAdapter, WgpuBackendSelector};
pub use self::command::WgpuCommandBuffer;
pub use self::conversions::IntoWgpu;
pub use self::device::{WgpuDevice, MAX_ANISOTROPY};
pub use self::event::WgpuGpuEvent;
pub use self::instance::WgpuInstance;
pub use self::queue::WgpuQueue;
pub use self::swapchain::WgpuSwapchain;
