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

//! Backend-agnostic descriptors, handles and value types.

pub mod backend;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod format;
pub mod pipeline;
pub mod queue;
pub mod render_target;
pub mod shader;
pub mod stats;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use self::backend::*;
pub use self::buffer::*;
pub use self::command::*;
pub use self::descriptor::*;
pub use self::format::*;
pub use self::pipeline::*;
pub use self::queue::*;
pub use self::render_target::*;
pub use self::shader::*;
pub use self::stats::*;
pub use self::swapchain::*;
pub use self::sync::*;
pub use self::texture::*;
