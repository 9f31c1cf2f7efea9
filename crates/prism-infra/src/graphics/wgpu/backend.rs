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

//! Hardware adapter selection with fallback support.
//!
//! Each preferred backend gets its own `wgpu::Instance` restricted to that backend, so
//! the adapter returned is guaranteed to speak the requested API. The first backend
//! that yields an adapter wins.

use super::conversions::{backend_from_wgpu, backend_to_wgpu, device_type_from_wgpu};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use prism_core::renderer::api::{
    BackendSelectionConfig, BackendSelectionResult, GraphicsAdapterInfo, GraphicsBackendType,
    RendererDeviceType,
};
use prism_core::renderer::GraphicsBackendSelector;
use std::time::Instant;
use wgpu::{Backend, Backends, RequestAdapterOptions};

/// Returns a human-readable name for a wgpu backend.
pub fn backend_name(backend: Backend) -> &'static str {
    match backend {
        Backend::Vulkan => "Vulkan",
        Backend::Metal => "Metal",
        Backend::Dx12 => "DirectX 12",
        Backend::Gl => "OpenGL",
        Backend::BrowserWebGpu => "WebGPU",
        Backend::Noop => "No-op",
    }
}

/// A hardware adapter together with the instance that found it.
#[derive(Debug, Clone)]
pub struct WgpuAdapter {
    /// The instance, restricted to the adapter's backend. Surfaces are created from it.
    pub instance: wgpu::Instance,
    /// The adapter.
    pub adapter: wgpu::Adapter,
    /// The Prism backend tag of the adapter.
    pub backend: GraphicsBackendType,
}

impl WgpuAdapter {
    /// The adapter description in Prism terms.
    pub fn info(&self) -> GraphicsAdapterInfo {
        let info = self.adapter.get_info();
        GraphicsAdapterInfo {
            name: info.name,
            backend_type: backend_from_wgpu(info.backend),
            device_type: device_type_from_wgpu(info.device_type),
            dedicated_memory_bytes: None,
        }
    }
}

/// Picks a hardware adapter through wgpu.
#[derive(Debug, Default)]
pub struct WgpuBackendSelector;

impl WgpuBackendSelector {
    /// Creates a selector.
    pub fn new() -> Self {
        Self
    }

    fn instance_for(backend: Backend) -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: Backends::from(backend),
            ..Default::default()
        })
    }

    /// Try to get an adapter for a specific backend type.
    async fn try_backend(
        &self,
        backend_type: GraphicsBackendType,
        prefer_discrete_gpu: bool,
    ) -> Result<WgpuAdapter> {
        let backend = backend_to_wgpu(backend_type)
            .ok_or_else(|| anyhow!("{backend_type:?} has no hardware driver"))?;
        let instance = Self::instance_for(backend);

        let power_preference = if prefer_discrete_gpu {
            wgpu::PowerPreference::HighPerformance
        } else {
            wgpu::PowerPreference::LowPower
        };
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| anyhow!("Failed to find an adapter for {backend_type:?}: {e}"))?;

        let adapter_info = adapter.get_info();
        if adapter_info.backend != backend {
            return Err(anyhow!(
                "Adapter returned wrong backend: requested {:?}, got {:?}",
                backend,
                adapter_info.backend
            ));
        }

        log::info!(
            "{} backend succeeded with adapter: \"{}\"",
            backend_name(backend),
            adapter_info.name
        );
        Ok(WgpuAdapter {
            instance,
            adapter,
            backend: backend_type,
        })
    }
}

#[async_trait]
impl GraphicsBackendSelector<WgpuAdapter> for WgpuBackendSelector {
    type Error = String;

    async fn select_backend(
        &self,
        config: &BackendSelectionConfig,
    ) -> Result<BackendSelectionResult<WgpuAdapter>, Self::Error> {
        let start_time = Instant::now();
        let mut attempted_backends = Vec::new();

        log::info!("Starting wgpu backend selection process...");

        for &backend_type in &config.preferred_backends {
            if start_time.elapsed() > config.timeout {
                log::warn!("Backend selection timed out after {:?}", config.timeout);
                break;
            }
            attempted_backends.push(backend_type);
            if !self.is_backend_supported(backend_type) {
                log::info!("Skipping {backend_type:?}: no hardware driver on this platform.");
                continue;
            }

            log::info!("Attempting to initialize {backend_type:?} backend...");
            match self
                .try_backend(backend_type, config.prefer_discrete_gpu)
                .await
            {
                Ok(adapter) => {
                    let adapter_info = adapter.info();
                    let selection_time_ms = start_time.elapsed().as_millis() as u64;
                    if config.prefer_discrete_gpu
                        && adapter_info.device_type != RendererDeviceType::DiscreteGpu
                    {
                        log::info!(
                            "No discrete GPU behind {backend_type:?}, using a {:?} adapter",
                            adapter_info.device_type
                        );
                    }

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
                    log::warn!("Failed to initialize {backend_type:?} backend: {e}");
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
        match self.try_backend(backend_type, true).await {
            Ok(adapter) => Ok(vec![adapter.info()]),
            Err(_) => Ok(Vec::new()),
        }
    }

    fn is_backend_supported(&self, backend_type: GraphicsBackendType) -> bool {
        match backend_type {
            GraphicsBackendType::Vulkan => cfg!(any(target_os = "windows", target_os = "linux")),
            GraphicsBackendType::Dx12 => cfg!(target_os = "windows"),
            GraphicsBackendType::OpenGL => true,
            GraphicsBackendType::Dx11 | GraphicsBackendType::Unknown => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_function() {
        assert_eq!(backend_name(Backend::Vulkan), "Vulkan");
        assert_eq!(backend_name(Backend::Dx12), "DirectX 12");
        assert_eq!(backend_name(Backend::Gl), "OpenGL");
    }

    #[test]
    fn test_dx11_is_never_supported() {
        let selector = WgpuBackendSelector::new();
        assert!(!selector.is_backend_supported(GraphicsBackendType::Dx11));
        assert!(selector.is_backend_supported(GraphicsBackendType::OpenGL));
    }

    #[test]
    fn test_selection_over_unsupported_backends_fails() {
        // --- ARRANGE ---
        let selector = WgpuBackendSelector::new();
        let config = BackendSelectionConfig {
            preferred_backends: vec![GraphicsBackendType::Dx11],
            ..BackendSelectionConfig::default()
        };

        // --- ACT ---
        let result = pollster::block_on(selector.select_backend(&config));

        // --- ASSERT ---
        let err = result.unwrap_err();
        assert!(err.contains("Dx11"));
    }
}
