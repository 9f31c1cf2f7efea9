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

//! Backend selection for the emulated driver.
//!
//! Every backend tag maps onto the same software GPU, so selection normally succeeds on
//! the first preference. The set of available backends can be narrowed to exercise the
//! fallback path the hardware driver goes through.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Instant;

use prism_core::renderer::{
    api::{
        BackendSelectionConfig, BackendSelectionResult, GraphicsAdapterInfo,
        GraphicsBackendType, RendererDeviceType,
    },
    GraphicsBackendSelector,
};

/// VRAM the emulated adapter reports when no budget is configured.
const DEFAULT_EMULATED_VRAM: u64 = 2 * 1024 * 1024 * 1024;

/// An adapter of the emulated driver: one backend tag on the software GPU.
#[derive(Debug, Clone)]
pub struct SoftAdapter {
    /// The sync model this adapter reproduces.
    pub backend: GraphicsBackendType,
    /// Description reported to the application.
    pub info: GraphicsAdapterInfo,
}

impl SoftAdapter {
    /// The software adapter for `backend` with `vram_bytes` of memory.
    pub fn new(backend: GraphicsBackendType, vram_bytes: u64) -> Self {
        Self {
            backend,
            info: GraphicsAdapterInfo {
                name: format!("Prism Soft Renderer ({backend:?})"),
                backend_type: backend,
                device_type: RendererDeviceType::Cpu,
                dedicated_memory_bytes: Some(vram_bytes),
            },
        }
    }
}

/// Emulated implementation of the GraphicsBackendSelector trait.
#[derive(Debug, Clone)]
pub struct SoftBackendSelector {
    available: Vec<GraphicsBackendType>,
    vram_bytes: u64,
}

impl Default for SoftBackendSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftBackendSelector {
    /// A selector offering the four emulated backends.
    pub fn new() -> Self {
        Self::with_available(vec![
            GraphicsBackendType::Dx12,
            GraphicsBackendType::Vulkan,
            GraphicsBackendType::Dx11,
            GraphicsBackendType::OpenGL,
        ])
    }

    /// A selector offering only `available`.
    pub fn with_available(available: Vec<GraphicsBackendType>) -> Self {
        Self {
            available,
            vram_bytes: DEFAULT_EMULATED_VRAM,
        }
    }

    /// Sets the memory reported by the adapters.
    pub fn with_vram(mut self, vram_bytes: u64) -> Self {
        self.vram_bytes = vram_bytes;
        self
    }

    async fn try_backend(&self, backend_type: GraphicsBackendType) -> Result<SoftAdapter> {
        if !self.is_backend_supported(backend_type) {
            return Err(anyhow!(
                "{:?} is not offered by the emulated driver",
                backend_type
            ));
        }
        let adapter = SoftAdapter::new(backend_type, self.vram_bytes);
        log::info!(
            "{:?} backend succeeded with adapter: \"{}\"",
            backend_type,
            adapter.info.name
        );
        Ok(adapter)
    }
}

#[async_trait]
impl GraphicsBackendSelector<SoftAdapter> for SoftBackendSelector {
    type Error = String;

    async fn select_backend(
        &self,
        config: &BackendSelectionConfig,
    ) -> Result<BackendSelectionResult<SoftAdapter>, Self::Error> {
        let start_time = Instant::now();
        let mut attempted_backends = Vec::new();

        log::info!("Starting emulated backend selection process...");

        for &backend_type in &config.preferred_backends {
            if start_time.elapsed() > config.timeout {
                log::warn!("Backend selection timed out after {:?}", config.timeout);
                break;
            }
            attempted_backends.push(backend_type);

            log::info!("Attempting to initialize {backend_type:?} backend...");

            match self.try_backend(backend_type).await {
                Ok(adapter) => {
                    let adapter_info = adapter.info.clone();
                    let selection_time_ms = start_time.elapsed().as_millis() as u64;

                    log::info!(
                        "Successfully selected {:?} backend with adapter: \"{}\" (Device: {:?})",
                        backend_type,
                        adapter_info.name,
                        adapter_info.device_type,
                    );

                    return Ok(BackendSelectionResult {
                        adapter,
                        adapter_info,
                        selection_time_ms,
                        attempted_backends,
                    });
                }
                Err(e) => {
                    log::warn!("Failed to initialize {:?} backend: {}", backend_type, e);
                    continue;
                }
            }
        }

        Err(format!(
            "All backend attempts failed. Attempted: {attempted_backends:?}"
        ))
    }

    async fn list_adapters(
        &self,
        backend_type: GraphicsBackendType,
    ) -> Result<Vec<GraphicsAdapterInfo>, Self::Error> {
        if !self.is_backend_supported(backend_type) {
            return Ok(Vec::new());
        }
        Ok(vec![SoftAdapter::new(backend_type, self.vram_bytes).info])
    }

    fn is_backend_supported(&self, backend_type: GraphicsBackendType) -> bool {
        backend_type != GraphicsBackendType::Unknown && self.available.contains(&backend_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(preferred: Vec<GraphicsBackendType>) -> BackendSelectionConfig {
        BackendSelectionConfig {
            preferred_backends: preferred,
            timeout: Duration::from_secs(5),
            prefer_discrete_gpu: false,
        }
    }

    #[test]
    fn test_first_available_preference_wins() {
        let selector = SoftBackendSelector::with_available(vec![GraphicsBackendType::OpenGL]);
        let result = pollster::block_on(selector.select_backend(&config(vec![
            GraphicsBackendType::Dx12,
            GraphicsBackendType::Vulkan,
            GraphicsBackendType::OpenGL,
        ])))
        .unwrap();

        assert_eq!(result.adapter.backend, GraphicsBackendType::OpenGL);
        assert_eq!(result.adapter_info.device_type, RendererDeviceType::Cpu);
        assert_eq!(
            result.attempted_backends,
            vec![
                GraphicsBackendType::Dx12,
                GraphicsBackendType::Vulkan,
                GraphicsBackendType::OpenGL
            ]
        );
    }

    #[test]
    fn test_selection_fails_when_nothing_matches() {
        let selector = SoftBackendSelector::with_available(vec![GraphicsBackendType::Dx11]);
        let result =
            pollster::block_on(selector.select_backend(&config(vec![GraphicsBackendType::Vulkan])));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_is_never_supported() {
        let selector = SoftBackendSelector::new();
        assert!(!selector.is_backend_supported(GraphicsBackendType::Unknown));
        let adapters =
            pollster::block_on(selector.list_adapters(GraphicsBackendType::Vulkan)).unwrap();
        assert_eq!(adapters.len(), 1);
    }
}
