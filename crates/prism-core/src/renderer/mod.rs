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

//! The public, backend-agnostic rendering contracts.
//!
//! This module holds the abstract `traits` (such as [`GraphicsDevice`] and [`Queue`]),
//! the descriptors and handles of the `api` module, the error types, and the pieces of
//! frame orchestration that only depend on the traits: [`FrameSync`],
//! [`CommandBufferRecycler`] and the [`AsyncComputeWorker`].
//!
//! Concrete backends live in the `prism-infra` crate.

pub mod api;
pub mod async_compute;
pub mod error;
pub mod frame;
pub mod recycler;
pub mod sync;
pub mod traits;

// Re-export the most important traits and types for easier use.
pub use self::api::*;
pub use self::async_compute::{AsyncComputeTask, AsyncComputeWorker};
pub use self::error::{PipelineError, RenderError, ResourceError, ShaderError};
pub use self::frame::FrameSync;
pub use self::recycler::CommandBufferRecycler;
pub use self::sync::{Timeline, TimelineWait};
pub use self::traits::{
    CommandBuffer, GpuEvent, GraphicsBackendSelector, GraphicsDevice, GraphicsInstance, Queue,
    Swapchain,
};
