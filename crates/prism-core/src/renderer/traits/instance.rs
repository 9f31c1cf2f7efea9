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

use crate::renderer::api::{GraphicsAdapterInfo, GraphicsBackendType};
use crate::renderer::error::RenderError;
use crate::renderer::traits::GraphicsDevice;
use std::fmt::Debug;
use std::sync::Arc;

/// Backend bootstrap: enumerates adapters and creates devices on them.
pub trait GraphicsInstance: Send + Sync + Debug {
    /// The backend this instance drives.
    fn backend(&self) -> GraphicsBackendType;

    /// The adapters available to this instance, in index order.
    fn adapters(&self) -> Vec<GraphicsAdapterInfo>;

    /// Creates a device on adapter `adapter_index`.
    ///
    /// Fails with `RenderError::InitializationFailed` for an unknown index.
    fn create_device(&self, adapter_index: usize) -> Result<Arc<dyn GraphicsDevice>, RenderError>;
}
