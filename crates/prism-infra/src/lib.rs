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

//! # Prism Infra
//!
//! Concrete implementations of the `prism-core` graphics contracts. The emulated driver
//! reproduces the D3D11, D3D12, Vulkan and OpenGL synchronization models on a software
//! GPU; the optional `wgpu` feature adds a hardware driver.

#![warn(missing_docs)]

pub mod graphics;

use graphics::soft::{SoftBackendSelector, SoftDriverSettings, SoftInstance};
use prism_core::renderer::api::DriverKind;
use prism_core::renderer::{GraphicsBackendSelector, GraphicsInstance, RenderError};
use prism_core::GraphicsSettings;
use std::sync::Arc;

/// Creates the graphics instance the settings ask for.
///
/// The backend is picked from [`GraphicsSettings::backend_order`], first success wins.
pub fn create_instance(
    settings: &GraphicsSettings,
) -> Result<Arc<dyn GraphicsInstance>, RenderError> {
    match settings.driver {
        DriverKind::Emulated => {
            let selector = SoftBackendSelector::new().with_vram(settings.emulated_vram_bytes);
            let selection =
                pollster::block_on(selector.select_backend(&settings.selection_config()))
                    .map_err(RenderError::InitializationFailed)?;
            log::info!(
                "Selected emulated {:?} backend in {} ms",
                selection.adapter.backend,
                selection.selection_time_ms
            );
            Ok(Arc::new(SoftInstance::new(
                selection.adapter,
                SoftDriverSettings::from(settings),
            )))
        }
        #[cfg(feature = "wgpu")]
        DriverKind::Hardware => Ok(Arc::new(graphics::wgpu::WgpuInstance::from_settings(
            settings,
        )?)),
        #[cfg(not(feature = "wgpu"))]
        DriverKind::Hardware => Err(RenderError::InitializationFailed(
            "the hardware driver needs the `wgpu` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::renderer::api::GraphicsBackendType;

    #[test]
    fn test_forced_backend_is_honored() {
        let settings = GraphicsSettings {
            backend: Some(GraphicsBackendType::Dx11),
            ..GraphicsSettings::default()
        };

        let instance = create_instance(&settings).unwrap();

        assert_eq!(instance.backend(), GraphicsBackendType::Dx11);
        assert_eq!(instance.adapters().len(), 1);
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn test_hardware_driver_requires_the_feature() {
        let settings = GraphicsSettings {
            driver: DriverKind::Hardware,
            ..GraphicsSettings::default()
        };
        assert!(matches!(
            create_instance(&settings),
            Err(RenderError::InitializationFailed(_))
        ));
    }
}
