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

//! Pixel-space extents and origins.
//!
//! These describe texture, render target and swapchain sizes. Components are `u32`.

use serde::{Deserialize, Serialize};

/// A two-dimensional extent (width, height) in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2D {
    /// The width in pixels.
    pub width: u32,
    /// The height in pixels.
    pub height: u32,
}

impl Extent2D {
    /// Creates a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `true` when either side is zero (a minimized window, for instance).
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The number of pixels covered by the extent.
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Promotes this extent to a single-layer 3D extent.
    pub const fn to_3d(self) -> Extent3D {
        Extent3D {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

/// A three-dimensional extent: width, height and depth (or array layer count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3D {
    /// The width in pixels.
    pub width: u32,
    /// The height in pixels.
    pub height: u32,
    /// The depth, or the number of array layers.
    pub depth_or_array_layers: u32,
}

impl Extent3D {
    /// Drops the third dimension.
    pub const fn to_2d(self) -> Extent2D {
        Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Extent of a given mip level, each side clamped to at least one pixel.
    pub fn mip_level_size(&self, level: u32) -> Extent3D {
        Extent3D {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth_or_array_layers: self.depth_or_array_layers,
        }
    }

    /// Number of mip levels of a full chain for this extent.
    pub fn max_mip_levels(&self) -> u32 {
        let largest = self.width.max(self.height).max(1);
        32 - largest.leading_zeros()
    }
}

/// A three-dimensional offset, used for copy regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Origin3D {
    /// The x offset.
    pub x: u32,
    /// The y offset.
    pub y: u32,
    /// The z offset or array layer.
    pub z: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_chain_length() {
        let extent = Extent2D::new(1920, 1080).to_3d();
        assert_eq!(extent.max_mip_levels(), 11);
        assert_eq!(extent.mip_level_size(10).width, 1);
        assert_eq!(extent.mip_level_size(1).height, 540);
    }

    #[test]
    fn test_empty_extent() {
        assert!(Extent2D::new(0, 720).is_empty());
        assert!(!Extent2D::new(1, 1).is_empty());
        assert_eq!(Extent2D::new(1920, 1080).area(), 2_073_600);
    }
}
