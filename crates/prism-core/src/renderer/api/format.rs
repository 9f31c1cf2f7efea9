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

//! Pixel formats.

use crate::math::LinearRgba;
use serde::{Deserialize, Serialize};

/// Defines the memory format of pixels in a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    /// One 8-bit unsigned normalized component.
    R8Unorm,
    /// Two 8-bit unsigned normalized components.
    Rg8Unorm,
    /// Four 8-bit unsigned normalized components (RGBA).
    Rgba8Unorm,
    /// Four 8-bit unsigned normalized components (RGBA) in sRGB space.
    Rgba8UnormSrgb,
    /// Four 8-bit unsigned normalized components (BGRA). Common swapchain format.
    Bgra8Unorm,
    /// Four 8-bit unsigned normalized components (BGRA) in sRGB space.
    Bgra8UnormSrgb,
    /// One 16-bit unsigned normalized component (high bit-depth luma planes).
    R16Unorm,
    /// Two 16-bit unsigned normalized components (high bit-depth chroma planes).
    Rg16Unorm,
    /// One 16-bit float component.
    R16Float,
    /// Four 16-bit float components.
    Rgba16Float,
    /// One 32-bit float component.
    R32Float,
    /// Four 32-bit float components.
    Rgba32Float,
    /// A 16-bit unsigned normalized depth format.
    Depth16Unorm,
    /// A 24-bit depth format with an 8-bit stencil component.
    Depth24PlusStencil8,
    /// A 32-bit float depth format.
    Depth32Float,
}

impl TextureFormat {
    /// Returns the size in bytes of a single pixel for this format.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rg8Unorm
            | TextureFormat::R16Unorm
            | TextureFormat::R16Float
            | TextureFormat::Depth16Unorm => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rg16Unorm
            | TextureFormat::R32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// `true` for depth (and depth/stencil) formats.
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth16Unorm
                | TextureFormat::Depth24PlusStencil8
                | TextureFormat::Depth32Float
        )
    }

    /// `true` when the format carries a stencil aspect.
    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8)
    }

    /// `true` for sRGB-encoded formats.
    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb
        )
    }

    /// Encodes a clear color as the bytes of one pixel.
    ///
    /// Returns `None` for depth formats; see [`TextureFormat::encode_depth_clear`].
    pub fn encode_color_clear(&self, color: LinearRgba) -> Option<Vec<u8>> {
        let [r, g, b, a] = color.to_unorm8();
        let unorm16 = |c: f32| ((c.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16).to_le_bytes();
        let pixel = match self {
            TextureFormat::R8Unorm => vec![r],
            TextureFormat::Rg8Unorm => vec![r, g],
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => vec![r, g, b, a],
            TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => vec![b, g, r, a],
            TextureFormat::R16Unorm => unorm16(color.r).to_vec(),
            TextureFormat::Rg16Unorm => [unorm16(color.r), unorm16(color.g)].concat(),
            TextureFormat::R16Float => f32_to_f16_bits(color.r).to_le_bytes().to_vec(),
            TextureFormat::Rgba16Float => color
                .to_array()
                .iter()
                .flat_map(|c| f32_to_f16_bits(*c).to_le_bytes())
                .collect(),
            TextureFormat::R32Float => color.r.to_le_bytes().to_vec(),
            TextureFormat::Rgba32Float => bytemuck::bytes_of(&color).to_vec(),
            TextureFormat::Depth16Unorm
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::Depth32Float => return None,
        };
        Some(pixel)
    }

    /// Encodes a depth/stencil clear value as the bytes of one pixel.
    ///
    /// Returns `None` for color formats.
    pub fn encode_depth_clear(&self, depth: f32, stencil: u8) -> Option<Vec<u8>> {
        let depth = depth.clamp(0.0, 1.0);
        match self {
            TextureFormat::Depth16Unorm => {
                Some(((depth * 65535.0 + 0.5) as u16).to_le_bytes().to_vec())
            }
            TextureFormat::Depth24PlusStencil8 => {
                let d = (depth * 16_777_215.0 + 0.5) as u32;
                Some((d | (u32::from(stencil) << 24)).to_le_bytes().to_vec())
            }
            TextureFormat::Depth32Float => Some(depth.to_le_bytes().to_vec()),
            _ => None,
        }
    }
}

/// Converts to IEEE half precision, flushing subnormals to zero.
fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xff) as i32 - 127 + 15;
    let mantissa = bits & 0x7f_ffff;
    if value.is_nan() {
        return sign | 0x7e00;
    }
    if exponent >= 0x1f {
        return sign | 0x7c00;
    }
    if exponent <= 0 {
        return sign;
    }
    sign | ((exponent as u16) << 10) | (mantissa >> 13) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(TextureFormat::Rgba8Unorm.bytes_per_pixel(), 4);
        assert_eq!(TextureFormat::Rgba16Float.bytes_per_pixel(), 8);
        assert_eq!(TextureFormat::R8Unorm.bytes_per_pixel(), 1);
    }

    #[test]
    fn test_bgra_clear_swizzles() {
        let pixel = TextureFormat::Bgra8Unorm
            .encode_color_clear(LinearRgba::rgb(1.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(pixel, vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_depth_formats_reject_color_clear() {
        assert!(TextureFormat::Depth32Float
            .encode_color_clear(LinearRgba::BLACK)
            .is_none());
        assert_eq!(
            TextureFormat::Depth32Float.encode_depth_clear(1.0, 0),
            Some(1.0f32.to_le_bytes().to_vec())
        );
        assert_eq!(
            TextureFormat::Depth24PlusStencil8.encode_depth_clear(1.0, 0xff),
            Some(vec![0xff, 0xff, 0xff, 0xff])
        );
    }

    #[test]
    fn test_half_float_encoding() {
        assert_eq!(f32_to_f16_bits(1.0), 0x3c00);
        assert_eq!(f32_to_f16_bits(-2.0), 0xc000);
        assert_eq!(f32_to_f16_bits(0.0), 0);
        assert_eq!(f32_to_f16_bits(f32::INFINITY), 0x7c00);
    }
}
