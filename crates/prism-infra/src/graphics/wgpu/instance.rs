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

use super::backend::{WgpuAdapter, WgpuBackendSelector};
use super::device::WgpuDevice;
use prism_core::renderer::api::{GraphicsAdapterInfo, GraphicsBackendType};
use prism_core::renderer::{GraphicsBackendSelector, GraphicsDevice, GraphicsInstance, RenderError};
use prism_core::GraphicsSettings;
use std::sync::Arc;

/// Entry point of the hardware driver, bound to the adapter selection settled on.
#[derive(Debug, Clone)]
pub struct WgpuInstance {
    adapter: WgpuAdapter,
    validation: bool,
}

impl WgpuInstance {
    /// An instance over an already selected adapter.
    pub fn new(adapter: WgpuAdapter, validation: bool) -> Self {
        log::info!(
            "WgpuInstance: {:?} instance ready with adapter \"{}\"",
            adapter.backend,
            adapter.info().name
        );
        Self {
            adapter,
            validation,
        }
    }

    /// Runs adapter selection over the settings' backend order.
    pub fn from_settings(settings: &GraphicsSettings) -> Result<Self, RenderError> {
        let selector = WgpuBackendSelector::new();
        let selection = pollster::block_on(selector.select_backend(&settings.selection_config()))
            .map_err(RenderError::InitializationFailed)?;
        log::info!(
            "WgpuInstance: selected {:?} in {} ms after trying {:?}",
            selection.adapter_info.backend_type,
            selection.selection_time_ms,
            selection.attempted_backends
        );
        Ok(Self::new(selection.adapter, settings.validation))
    }
}

impl GraphicsInstance for WgpuInstance {
    fn backend(&self) -> GraphicsBackendType {
        self.adapter.backend
    }

    fn adapters(&self) -> Vec<GraphicsAdapterInfo> {
        vec![self.adapter.info()]
    }

    fn create_device(&self, adapter_index: usize) -> Result<Arc<dyn GraphicsDevice>, RenderError> {
        if adapter_index != 0 {
            return Err(RenderError::InitializationFailed(format!(
                "adapter index {adapter_index} out of range (1 adapter)"
            )));
        }
        Ok(Arc::new(WgpuDevice::new(&self.adapter, self.validation)?))
    }
}
