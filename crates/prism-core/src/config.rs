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

//! Startup settings of the graphics layer, loadable from JSON.

use crate::renderer::api::{
    default_backend_preference, BackendSelectionConfig, DriverKind, GraphicsBackendType,
    SwapchainDescriptor, SwapchainMode, TextureFormat,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Error raised while loading or saving [`GraphicsSettings`].
#[derive(Debug)]
pub enum ConfigError {
    /// The settings file could not be read or written.
    Io(std::io::Error),
    /// The settings text is not valid JSON for [`GraphicsSettings`].
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Settings I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Settings parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Settings read once at startup to pick and configure the graphics backend.
///
/// Every field has a default, so a JSON file only needs the fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    /// Forces one backend. When `None`, `preferred_backends` is tried in order.
    pub backend: Option<GraphicsBackendType>,
    /// Backend preference order.
    pub preferred_backends: Vec<GraphicsBackendType>,
    /// Emulated driver or hardware driver.
    pub driver: DriverKind,
    /// Adapter to create the device on.
    pub adapter_index: usize,
    /// Prefer a discrete GPU when several adapters match.
    pub prefer_discrete_gpu: bool,
    /// Back buffer count, clamped to the supported range.
    pub swapchain_buffer_count: u32,
    /// Presentation pacing.
    pub swapchain_mode: SwapchainMode,
    /// Back buffer format.
    pub swapchain_format: TextureFormat,
    /// Reports API misuse as validation messages.
    pub validation: bool,
    /// Upper bound for a per-frame wait, in milliseconds.
    pub frame_timeout_ms: u64,
    /// Video memory budget of the emulated adapter, in bytes.
    pub emulated_vram_bytes: u64,
    /// Refresh rate the emulated display paces vertical sync at.
    pub emulated_refresh_hz: u32,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            backend: None,
            preferred_backends: default_backend_preference(),
            driver: DriverKind::default(),
            adapter_index: 0,
            prefer_discrete_gpu: true,
            swapchain_buffer_count: 3,
            swapchain_mode: SwapchainMode::default(),
            swapchain_format: TextureFormat::Bgra8Unorm,
            validation: cfg!(debug_assertions),
            frame_timeout_ms: 5_000,
            emulated_vram_bytes: 2 * 1024 * 1024 * 1024,
            emulated_refresh_hz: 60,
        }
    }
}

impl GraphicsSettings {
    /// Parses settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Saves settings as pretty-printed JSON.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The backends to try, in order: the forced backend alone, or the preference list.
    pub fn backend_order(&self) -> Vec<GraphicsBackendType> {
        match self.backend {
            Some(backend) => vec![backend],
            None if self.preferred_backends.is_empty() => default_backend_preference(),
            None => self.preferred_backends.clone(),
        }
    }

    /// The per-frame wait bound.
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// The swapchain description these settings ask for.
    pub fn swapchain_descriptor(&self) -> SwapchainDescriptor {
        SwapchainDescriptor {
            format: self.swapchain_format,
            buffer_count: self.swapchain_buffer_count,
            mode: self.swapchain_mode,
        }
    }

    /// The adapter selection request these settings describe.
    pub fn selection_config(&self) -> BackendSelectionConfig {
        BackendSelectionConfig {
            preferred_backends: self.backend_order(),
            prefer_discrete_gpu: self.prefer_discrete_gpu,
            ..BackendSelectionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_yields_defaults() {
        let settings = GraphicsSettings::from_json("{}").unwrap();
        assert_eq!(settings, GraphicsSettings::default());
    }

    #[test]
    fn test_partial_json_overrides_fields() {
        // --- ARRANGE ---
        let json = r#"{
            "backend": "Vulkan",
            "swapchain_buffer_count": 2,
            "swapchain_mode": "Immediate",
            "emulated_refresh_hz": 144
        }"#;

        // --- ACT ---
        let settings = GraphicsSettings::from_json(json).unwrap();

        // --- ASSERT ---
        assert_eq!(settings.backend, Some(GraphicsBackendType::Vulkan));
        assert_eq!(settings.backend_order(), vec![GraphicsBackendType::Vulkan]);
        assert_eq!(settings.swapchain_descriptor().buffer_count, 2);
        assert_eq!(settings.swapchain_mode, SwapchainMode::Immediate);
        assert_eq!(settings.emulated_refresh_hz, 144);
        assert_eq!(settings.adapter_index, 0);
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let err = GraphicsSettings::from_json("{ \"backend\": 12 }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("Settings parse error"));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = GraphicsSettings::from_file("/nonexistent/prism/settings.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_empty_preference_list_falls_back_to_platform_order() {
        let settings = GraphicsSettings {
            preferred_backends: Vec::new(),
            ..GraphicsSettings::default()
        };
        assert_eq!(settings.backend_order(), default_backend_preference());
        assert_eq!(settings.frame_timeout(), Duration::from_secs(5));
    }
}
