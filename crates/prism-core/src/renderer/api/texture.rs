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

//! Defines data structures related to GPU texture and sampler resources.

use crate::math::Extent3D;
use crate::prism_bitflags;
use crate::renderer::api::TextureFormat;
use std::borrow::Cow;

prism_bitflags! {
    /// A set of flags describing how a texture will be used.
    pub struct TextureUsage: u32 {
        /// Sampled from shaders.
        const SAMPLED = 1 << 0;
        /// Read/write access from shaders.
        const STORAGE = 1 << 1;
        /// Color attachment of a render target.
        const RENDER_TARGET = 1 << 2;
        /// Depth/stencil attachment of a render target.
        const DEPTH_STENCIL = 1 << 3;
        /// Source of a copy operation.
        const TRANSFER_SRC = 1 << 4;
        /// Destination of a copy or upload.
        const TRANSFER_DST = 1 << 5;
        /// Output picture of a video decode session.
        const VIDEO_DECODE = 1 << 6;
    }
}

/// The state a texture is in, for the purpose of barriers.
///
/// Transitions are recorded explicitly with `CommandBuffer::transition`, except for
/// swapchain images which render target scopes move between `Present` and `RenderTarget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Contents undefined, as after creation.
    #[default]
    Undefined,
    /// Generic state usable by any queue.
    Common,
    /// Written as a color attachment.
    RenderTarget,
    /// Written as a depth/stencil attachment.
    DepthWrite,
    /// Read by shaders.
    ShaderResource,
    /// Source of a copy.
    CopySrc,
    /// Destination of a copy.
    CopyDst,
    /// Handed to the presentation engine.
    Present,
}

/// A descriptor used to create a texture.
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Width, height and array layer count.
    pub size: Extent3D,
    /// Number of mip levels. Must be at least 1.
    pub mip_level_count: u32,
    /// The pixel format.
    pub format: TextureFormat,
    /// How the texture will be used.
    pub usage: TextureUsage,
}

impl<'a> TextureDescriptor<'a> {
    /// A single-mip, single-layer 2D texture.
    pub fn new_2d(
        label: &'a str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            size: Extent3D {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            format,
            usage,
        }
    }

    /// Bytes of the whole image, all mips and layers included.
    pub fn byte_size(&self) -> u64 {
        (0..self.mip_level_count)
            .map(|level| {
                let mip = self.size.mip_level_size(level);
                u64::from(mip.width)
                    * u64::from(mip.height)
                    * u64::from(mip.depth_or_array_layers)
                    * u64::from(self.format.bytes_per_pixel())
            })
            .sum()
    }
}

/// An opaque handle to a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub usize);

/// Immutable metadata of a live texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    /// Width, height and array layer count.
    pub size: Extent3D,
    /// Number of mip levels.
    pub mip_level_count: u32,
    /// The pixel format.
    pub format: TextureFormat,
    /// How the texture may be used.
    pub usage: TextureUsage,
}

/// Texture filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest texel.
    Nearest,
    /// Weighted average of the nearest texels.
    #[default]
    Linear,
}

/// Behavior outside the `[0, 1]` texture coordinate range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Coordinates wrap around.
    Repeat,
    /// Coordinates wrap around, mirroring at each boundary.
    MirrorRepeat,
    /// Coordinates are clamped to the edge.
    #[default]
    ClampToEdge,
    /// Coordinates outside the range read a border color.
    ClampToBorder,
}

/// Comparison function for depth tests and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    /// Never passes.
    Never,
    /// Passes if the new value is less than the stored value.
    #[default]
    Less,
    /// Passes if the values are equal.
    Equal,
    /// Passes if the new value is less than or equal to the stored value.
    LessEqual,
    /// Passes if the new value is greater.
    Greater,
    /// Passes if the values differ.
    NotEqual,
    /// Passes if the new value is greater than or equal.
    GreaterEqual,
    /// Always passes.
    Always,
}

/// A descriptor used to create a sampler.
#[derive(Debug, Clone, Default)]
pub struct SamplerDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Filter for magnification and minification.
    pub filter: FilterMode,
    /// Filter between mip levels.
    pub mipmap_filter: FilterMode,
    /// Address mode on all three axes.
    pub address_mode: AddressMode,
    /// Makes this a comparison sampler.
    pub compare: Option<CompareFunction>,
    /// Maximum anisotropy, 1 disables it.
    pub anisotropy_clamp: u16,
}

/// An opaque handle to a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerId(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size_includes_mips() {
        let mut desc = TextureDescriptor::new_2d(
            "t",
            4,
            4,
            TextureFormat::Rgba8Unorm,
            TextureUsage::SAMPLED,
        );
        assert_eq!(desc.byte_size(), 64);
        desc.mip_level_count = 3;
        assert_eq!(desc.byte_size(), 64 + 16 + 4);
    }
}
