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

use super::backend::SoftAdapter;
use super::device::SoftDevice;
use super::resources::SoftDriverSettings;
use prism_core::renderer::api::{GraphicsAdapterInfo, GraphicsBackendType};
use prism_core::renderer::{GraphicsDevice, GraphicsInstance, RenderError};
use prism_core::GraphicsSettings;
use std::sync::Arc;

impl From<&GraphicsSettings> for SoftDriverSettings {
    fn from(settings: &GraphicsSettings) -> Self {
        Self {
            validation: settings.validation,
            vram_budget: settings.emulated_vram_bytes,
            refresh_hz: settings.emulated_refresh_hz,
        }
    }
}

/// Entry point of the emulated driver for one backend tag.
#[derive(Debug, Clone)]
pub struct SoftInstance {
    adapter: SoftAdapter,
    settings: SoftDriverSettings,
}

impl SoftInstance {
    /// An instance exposing the selected emulated adapter.
    pub fn new(adapter: SoftAdapter, settings: SoftDriverSettings) -> Self {
        log::info!(
            "SoftInstance: {:?} instance ready with adapter \"{}\"",
            adapter.backend,
            adapter.info.name
        );
        Self { adapter, settings }
    }

    /// An instance for `backend`, configured from application settings.
    pub fn from_settings(backend: GraphicsBackendType, settings: &GraphicsSettings) -> Self {
        let driver = SoftDriverSettings::from(settings);
        Self::new(SoftAdapter::new(backend, driver.vram_budget), driver)
    }
}

impl GraphicsInstance for SoftInstance {
    fn backend(&self) -> GraphicsBackendType {
        self.adapter.backend
    }

    fn adapters(&self) -> Vec<GraphicsAdapterInfo> {
        vec![self.adapter.info.clone()]
    }

    fn create_device(&self, adapter_index: usize) -> Result<Arc<dyn GraphicsDevice>, RenderError> {
        if adapter_index != 0 {
            return Err(RenderError::InitializationFailed(format!(
                "adapter index {adapter_index} out of range (1 adapter)"
            )));
        }
        let device = SoftDevice::new(
            self.adapter.backend,
            self.adapter.info.clone(),
            self.settings.clone(),
        );
        Ok(Arc::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_flow_into_the_adapter() {
        let settings = GraphicsSettings {
            emulated_vram_bytes: 4096,
            ..GraphicsSettings::default()
        };
        let instance = SoftInstance::from_settings(GraphicsBackendType::Dx11, &settings);

        let adapters = instance.adapters();

        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].dedicated_memory_bytes, Some(4096));
        assert_eq!(adapters[0].backend_type, GraphicsBackendType::Dx11);
    }

    #[test]
    fn test_unknown_adapter_index_fails() {
        let instance =
            SoftInstance::from_settings(GraphicsBackendType::Vulkan, &GraphicsSettings::default());
        assert!(matches!(
            instance.create_device(1),
            Err(RenderError::InitializationFailed(_))
        ));
        assert_eq!(
            instance.create_device(0).unwrap().backend(),
            GraphicsBackendType::Vulkan
        );
    }
}
