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

//! The emulated driver: a software GPU reproducing the synchronization model of each
//! backend tag.
//!
//! | Backend  | GPU events          | Queues                          |
//! |----------|---------------------|---------------------------------|
//! | `Dx12`   | fences              | one GPU thread per queue        |
//! | `Vulkan` | timeline semaphores | one GPU thread per queue        |
//! | `Dx11`   | CPU-signalled       | inline, one immediate context   |
//! | `OpenGL` | CPU-signalled       | inline, one immediate context   |

mod backend;
mod command;
mod device;
mod event;
mod executor;
mod instance;
mod queue;
mod resources;
mod swapchain;

pub use self::backend::{SoftAdapter, SoftBackendSelector};
pub use self::command::{
    SoftCommandBuffer, MAX_CONSTANT_BUFFER_SLOTS, MAX_DISPATCH_GROUPS, MAX_SCISSOR_RECTS,
};
pub use self::device::{SoftDevice, MAX_ANISOTROPY, MAX_PUSH_CONSTANT_SIZE};
pub use self::event::SoftGpuEvent;
pub use self::instance::SoftInstance;
pub use self::queue::SoftQueue;
pub use self::resources::SoftDriverSettings;
pub use self::swapchain::SoftSwapchain;
