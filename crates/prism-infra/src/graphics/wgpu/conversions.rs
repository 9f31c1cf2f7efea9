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

use prism_core::math::{Extent3D, LinearRgba};
use prism_core::renderer::api::{
    AddressMode, BlendMode, BufferUsage, CompareFunction, FilterMode, GraphicsBackendType,
    IndexFormat, PrimitiveTopology, RendererDeviceType, SwapchainMode, TextureFormat,
    TextureUsage, VertexFormat, VertexStepMode,
};

/// A local extension trait to convert Prism types into wgpu types.
/// This avoids Rust's orphan rules while keeping an idiomatic `.into_wgpu()` syntax.
pub trait IntoWgpu<T> {
    /// Consumes self and converts it into a wgpu type.
    fn into_wgpu(self) -> T;
}

impl IntoWgpu<wgpu::Extent3d> for Extent3D {
    fn into_wgpu(self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: self.depth_or_array_layers,
        }
    }
}

impl IntoWgpu<wgpu::Color> for LinearRgba {
    fn into_wgpu(self) -> wgpu::Color {
        wgpu::Color {
            r: self.r as f64,
            g: self.g as f64,
            b: self.b as f64,
            a: self.a as f64,
        }
    }
}

// --- Formats ---

impl IntoWgpu<wgpu::TextureFormat> for TextureFormat {
    fn into_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::R16Unorm => wgpu::TextureFormat::R16Unorm,
            TextureFormat::Rg16Unorm => wgpu::TextureFormat::Rg16Unorm,
            TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth16Unorm => wgpu::TextureFormat::Depth16Unorm,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }
}

/// Converts a wgpu texture format back to a Prism format, when Prism has one.
pub fn from_wgpu_texture_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    let format = match format {
        wgpu::TextureFormat::R8Unorm => TextureFormat::R8Unorm,
        wgpu::TextureFormat::Rg8Unorm => TextureFormat::Rg8Unorm,
        wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::R16Unorm => TextureFormat::R16Unorm,
        wgpu::TextureFormat::Rg16Unorm => TextureFormat::Rg16Unorm,
        wgpu::TextureFormat::R16Float => TextureFormat::R16Float,
        wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
        wgpu::TextureFormat::R32Float => TextureFormat::R32Float,
        wgpu::TextureFormat::Rgba32Float => TextureFormat::Rgba32Float,
        wgpu::TextureFormat::Depth16Unorm => TextureFormat::Depth16Unorm,
        wgpu::TextureFormat::Depth24PlusStencil8 => TextureFormat::Depth24PlusStencil8,
        wgpu::TextureFormat::Depth32Float => TextureFormat::Depth32Float,
        _ => return None,
    };
    Some(format)
}

impl IntoWgpu<wgpu::VertexFormat> for VertexFormat {
    fn into_wgpu(self) -> wgpu::VertexFormat {
        match self {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
            VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
            VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
        }
    }
}

impl IntoWgpu<wgpu::VertexStepMode> for VertexStepMode {
    fn into_wgpu(self) -> wgpu::VertexStepMode {
        match self {
            VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
            VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
        }
    }
}

impl IntoWgpu<wgpu::IndexFormat> for IndexFormat {
    fn into_wgpu(self) -> wgpu::IndexFormat {
        match self {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }
}

// --- Pipeline state ---

impl IntoWgpu<wgpu::PrimitiveTopology> for PrimitiveTopology {
    fn into_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
            PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
            PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

impl IntoWgpu<Option<wgpu::BlendState>> for BlendMode {
    fn into_wgpu(self) -> Option<wgpu::BlendState> {
        match self {
            BlendMode::Opaque => None,
            BlendMode::AlphaBlend => Some(wgpu::BlendState::ALPHA_BLENDING),
            BlendMode::Additive => {
                let add = wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                };
                Some(wgpu::BlendState {
                    color: add,
                    alpha: add,
                })
            }
            BlendMode::ConstantFactor => {
                let constant = wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::Constant,
                    dst_factor: wgpu::BlendFactor::OneMinusConstant,
                    operation: wgpu::BlendOperation::Add,
                };
                Some(wgpu::BlendState {
                    color: constant,
                    alpha: constant,
                })
            }
        }
    }
}

impl IntoWgpu<wgpu::CompareFunction> for CompareFunction {
    fn into_wgpu(self) -> wgpu::CompareFunction {
        match self {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }
}

// --- Samplers ---

impl IntoWgpu<wgpu::FilterMode> for FilterMode {
    fn into_wgpu(self) -> wgpu::FilterMode {
        match self {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }
}

impl IntoWgpu<wgpu::AddressMode> for AddressMode {
    fn into_wgpu(self) -> wgpu::AddressMode {
        match self {
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::ClampToBorder => wgpu::AddressMode::ClampToBorder,
        }
    }
}

// --- Usages ---

impl IntoWgpu<wgpu::BufferUsages> for BufferUsage {
    fn into_wgpu(self) -> wgpu::BufferUsages {
        // Every buffer can be read back and updated from the host.
        let mut usages = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        if self.contains(BufferUsage::VERTEX) {
            usages |= wgpu::BufferUsages::VERTEX;
        }
        if self.contains(BufferUsage::INDEX) {
            usages |= wgpu::BufferUsages::INDEX;
        }
        if self.contains(BufferUsage::CONSTANT) || self.contains(BufferUsage::PUSH_CONSTANT) {
            usages |= wgpu::BufferUsages::UNIFORM;
        }
        if self.contains(BufferUsage::STORAGE) {
            usages |= wgpu::BufferUsages::STORAGE;
        }
        usages
    }
}

impl IntoWgpu<wgpu::TextureUsages> for TextureUsage {
    fn into_wgpu(self) -> wgpu::TextureUsages {
        let mut usages = wgpu::TextureUsages::empty();
        if self.contains(TextureUsage::SAMPLED) {
            usages |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if self.contains(TextureUsage::STORAGE) {
            usages |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if self.contains(TextureUsage::RENDER_TARGET) || self.contains(TextureUsage::DEPTH_STENCIL)
        {
            usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        if self.contains(TextureUsage::TRANSFER_SRC) {
            usages |= wgpu::TextureUsages::COPY_SRC;
        }
        // Decoded pictures reach the hardware driver through uploads.
        if self.contains(TextureUsage::TRANSFER_DST) || self.contains(TextureUsage::VIDEO_DECODE) {
            usages |= wgpu::TextureUsages::COPY_DST;
        }
        usages
    }
}

impl IntoWgpu<wgpu::PresentMode> for SwapchainMode {
    fn into_wgpu(self) -> wgpu::PresentMode {
        match self {
            SwapchainMode::Immediate => wgpu::PresentMode::AutoNoVsync,
            SwapchainMode::VerticalSync => wgpu::PresentMode::AutoVsync,
        }
    }
}

// --- Backends ---

/// The wgpu backend behind a Prism backend tag. Direct3D 11 has none.
pub fn backend_to_wgpu(backend: GraphicsBackendType) -> Option<wgpu::Backend> {
    match backend {
        GraphicsBackendType::Vulkan => Some(wgpu::Backend::Vulkan),
        GraphicsBackendType::Dx12 => Some(wgpu::Backend::Dx12),
        GraphicsBackendType::OpenGL => Some(wgpu::Backend::Gl),
        GraphicsBackendType::Dx11 | GraphicsBackendType::Unknown => None,
    }
}

/// The Prism backend tag of a wgpu backend.
pub fn backend_from_wgpu(backend: wgpu::Backend) -> GraphicsBackendType {
    match backend {
        wgpu::Backend::Vulkan => GraphicsBackendType::Vulkan,
        wgpu::Backend::Dx12 => GraphicsBackendType::Dx12,
        wgpu::Backend::Gl => GraphicsBackendType::OpenGL,
        _ => GraphicsBackendType::Unknown,
    }
}

/// Converts a wgpu device type to the Prism device type.
pub fn device_type_from_wgpu(device_type: wgpu::DeviceType) -> RendererDeviceType {
    match device_type {
        wgpu::DeviceType::IntegratedGpu => RendererDeviceType::IntegratedGpu,
        wgpu::DeviceType::DiscreteGpu => RendererDeviceType::DiscreteGpu,
        wgpu::DeviceType::VirtualGpu => RendererDeviceType::VirtualGpu,
        wgpu::DeviceType::Cpu => RendererDeviceType::Cpu,
        _ => RendererDeviceType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_formats_round_trip_through_wgpu() {
        for format in [
            TextureFormat::Bgra8Unorm,
            TextureFormat::Rg16Unorm,
            TextureFormat::Depth24PlusStencil8,
        ] {
            let wgpu_format: wgpu::TextureFormat = format.into_wgpu();
            assert_eq!(from_wgpu_texture_format(wgpu_format), Some(format));
        }
        assert_eq!(from_wgpu_texture_format(wgpu::TextureFormat::Rgb10a2Unorm), None);
    }

    #[test]
    fn test_dx11_has_no_wgpu_backend() {
        assert_eq!(backend_to_wgpu(GraphicsBackendType::Dx11), None);
        assert_eq!(
            backend_to_wgpu(GraphicsBackendType::OpenGL),
            Some(wgpu::Backend::Gl)
        );
        assert_eq!(
            backend_from_wgpu(wgpu::Backend::Dx12),
            GraphicsBackendType::Dx12
        );
    }

    #[test]
    fn test_buffer_usages_always_allow_copies() {
        let usages: wgpu::BufferUsages = BufferUsage::CONSTANT.into_wgpu();
        assert!(usages.contains(wgpu::BufferUsages::UNIFORM));
        assert!(usages.contains(wgpu::BufferUsages::COPY_DST));
        assert!(!usages.contains(wgpu::BufferUsages::VERTEX));
    }

    #[test]
    fn test_opaque_blend_disables_blending() {
        let blend: Option<wgpu::BlendState> = BlendMode::Opaque.into_wgpu();
        assert!(blend.is_none());
        let blend: Option<wgpu::BlendState> = BlendMode::ConstantFactor.into_wgpu();
        assert_eq!(
            blend.map(|b| b.color.src_factor),
            Some(wgpu::BlendFactor::Constant)
        );
    }
}
