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

//! Backend identification, adapter information and backend selection types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A backend-agnostic representation of a graphics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GraphicsBackendType {
    /// Vulkan API.
    Vulkan,
    /// Microsoft's DirectX 12 API.
    Dx12,
    /// Microsoft's DirectX 11 API.
    Dx11,
    /// OpenGL API.
    OpenGL,
    /// An unknown or unsupported backend.
    #[default]
    Unknown,
}

impl GraphicsBackendType {
    /// The native synchronization model of the API.
    pub fn sync_model(&self) -> SyncModel {
        match self {
            GraphicsBackendType::Dx12 => SyncModel::Fence,
            GraphicsBackendType::Vulkan => SyncModel::TimelineSemaphore,
            GraphicsBackendType::Dx11
            | GraphicsBackendType::OpenGL
            | GraphicsBackendType::Unknown => {
                SyncModel::Implicit
            }
        }
    }

    /// `true` for APIs where the application records barriers and owns queue ordering.
    pub fn is_explicit(&self) -> bool {
        !matches!(self.sync_model(), SyncModel::Implicit)
    }
}

/// How a backend exposes GPU completion to the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncModel {
    /// A monotonic 64-bit fence signalled by the queue (Direct3D 12).
    Fence,
    /// Timeline semaphores for events and binary semaphores for swapchain images (Vulkan).
    TimelineSemaphore,
    /// The driver serializes all work; events are signalled from the CPU (Direct3D 11, OpenGL).
    Implicit,
}

/// Which family of drivers implements the selected backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DriverKind {
    /// The software GPU that reproduces each backend's synchronization model.
    #[default]
    Emulated,
    /// A real adapter through the hardware driver.
    Hardware,
}

/// The physical type of a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RendererDeviceType {
    /// A GPU integrated into the CPU.
    IntegratedGpu,
    /// A discrete, dedicated GPU.
    DiscreteGpu,
    /// A virtualized GPU.
    VirtualGpu,
    /// A software renderer running on the CPU.
    Cpu,
    /// Unknown device type.
    #[default]
    Unknown,
}

/// Standardized, backend-agnostic information about a graphics adapter.
#[derive(Debug, Clone, Default)]
pub struct GraphicsAdapterInfo {
    /// The name of the adapter.
    pub name: String,
    /// The graphics API this adapter is exposed through.
    pub backend_type: GraphicsBackendType,
    /// The physical type of the adapter.
    pub device_type: RendererDeviceType,
    /// Bytes of device-local memory, when known.
    pub dedicated_memory_bytes: Option<u64>,
}

/// A native backend object, tagged by the API it belongs to.
///
/// Handles of one API can never be read as another's: each accessor only answers
/// for its own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendHandle {
    /// A Direct3D 11 interface pointer.
    Dx11(usize),
    /// A Direct3D 12 interface pointer.
    Dx12(usize),
    /// A Vulkan handle.
    Vulkan(u64),
    /// An OpenGL object name.
    OpenGL(u32),
    /// An object owned by the hardware driver, identified by its table index.
    Wgpu(usize),
}

impl BackendHandle {
    /// The backend the handle belongs to. Hardware handles report `Unknown`.
    pub fn backend(&self) -> GraphicsBackendType {
        match self {
            BackendHandle::Dx11(_) => GraphicsBackendType::Dx11,
            BackendHandle::Dx12(_) => GraphicsBackendType::Dx12,
            BackendHandle::Vulkan(_) => GraphicsBackendType::Vulkan,
            BackendHandle::OpenGL(_) => GraphicsBackendType::OpenGL,
            BackendHandle::Wgpu(_) => GraphicsBackendType::Unknown,
        }
    }

    /// The raw Vulkan handle, if this is one.
    pub fn as_vulkan(&self) -> Option<u64> {
        match self {
            BackendHandle::Vulkan(h) => Some(*h),
            _ => None,
        }
    }

    /// The raw Direct3D 12 pointer value, if this is one.
    pub fn as_dx12(&self) -> Option<usize> {
        match self {
            BackendHandle::Dx12(h) => Some(*h),
            _ => None,
        }
    }

    /// The raw Direct3D 11 pointer value, if this is one.
    pub fn as_dx11(&self) -> Option<usize> {
        match self {
            BackendHandle::Dx11(h) => Some(*h),
            _ => None,
        }
    }

    /// The OpenGL object name, if this is one.
    pub fn as_opengl(&self) -> Option<u32> {
        match self {
            BackendHandle::OpenGL(h) => Some(*h),
            _ => None,
        }
    }

    /// Wraps a driver object ID into the handle variant of `backend`.
    pub fn for_backend(backend: GraphicsBackendType, id: u64) -> Self {
        match backend {
            GraphicsBackendType::Dx11 => BackendHandle::Dx11(id as usize),
            GraphicsBackendType::Dx12 => BackendHandle::Dx12(id as usize),
            GraphicsBackendType::Vulkan => BackendHandle::Vulkan(id),
            GraphicsBackendType::OpenGL => BackendHandle::OpenGL(id as u32),
            GraphicsBackendType::Unknown => BackendHandle::Wgpu(id as usize),
        }
    }
}

/// Backend preference order for the current platform.
pub fn default_backend_preference() -> Vec<GraphicsBackendType> {
    #[cfg(target_os = "windows")]
    {
        vec![
            GraphicsBackendType::Dx12,
            GraphicsBackendType::Vulkan,
            GraphicsBackendType::Dx11,
            GraphicsBackendType::OpenGL,
        ]
    }
    #[cfg(not(target_os = "windows"))]
    {
        vec![GraphicsBackendType::Vulkan, GraphicsBackendType::OpenGL]
    }
}

/// Configuration for backend selection.
#[derive(Debug, Clone)]
pub struct BackendSelectionConfig {
    /// Preferred backends in order of preference.
    pub preferred_backends: Vec<GraphicsBackendType>,
    /// Maximum time to spend on backend selection.
    pub timeout: Duration,
    /// Whether to prefer discrete GPUs over integrated ones.
    pub prefer_discrete_gpu: bool,
}

impl Default for BackendSelectionConfig {
    fn default() -> Self {
        Self {
            preferred_backends: default_backend_preference(),
            timeout: Duration::from_secs(5),
            prefer_discrete_gpu: true,
        }
    }
}

/// Result of a backend selection operation.
#[derive(Debug)]
pub struct BackendSelectionResult<TAdapter> {
    /// The selected adapter.
    pub adapter: TAdapter,
    /// Information about the selected adapter.
    pub adapter_info: GraphicsAdapterInfo,
    /// Time taken for the selection process.
    pub selection_time_ms: u64,
    /// All backends that were attempted during selection.
    pub attempted_backends: Vec<GraphicsBackendType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_models() {
        assert_eq!(GraphicsBackendType::Dx12.sync_model(), SyncModel::Fence);
        assert_eq!(
            GraphicsBackendType::Vulkan.sync_model(),
            SyncModel::TimelineSemaphore
        );
        assert_eq!(GraphicsBackendType::Dx11.sync_model(), SyncModel::Implicit);
        assert!(!GraphicsBackendType::OpenGL.is_explicit());
    }

    #[test]
    fn test_handles_do_not_cross_backends() {
        let handle = BackendHandle::for_backend(GraphicsBackendType::Vulkan, 42);
        assert_eq!(handle.as_vulkan(), Some(42));
        assert_eq!(handle.as_dx12(), None);
        assert_eq!(handle.as_opengl(), None);
        assert_eq!(handle.backend(), GraphicsBackendType::Vulkan);
    }

    #[test]
    fn test_default_preference_is_not_empty() {
        let config = BackendSelectionConfig::default();
        assert!(config.preferred_backends.contains(&GraphicsBackendType::Vulkan));
    }
}
