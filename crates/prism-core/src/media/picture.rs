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

//! The `Picture` frame handed from decoders to the graphics layer.

use crate::memory::{MemoryResource, PooledBlock};
use crate::renderer::api::TextureFormat;
use crate::renderer::error::ResourceError;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Maximum number of planes a picture can carry.
pub const MAX_PICTURE_PLANES: usize = 4;

/// Pixel layout of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureFormat {
    /// Packed 8-bit RGBA.
    Rgba8,
    /// Packed 8-bit BGRA.
    Bgra8,
    /// 8-bit luma plane plus interleaved half-resolution chroma plane.
    Nv12,
    /// 8-bit luma plus two half-resolution chroma planes.
    Yuv420p,
    /// 10-bit in 16-bit containers, NV12 layout.
    P010,
}

impl PictureFormat {
    /// Number of planes.
    pub fn plane_count(&self) -> usize {
        match self {
            PictureFormat::Rgba8 | PictureFormat::Bgra8 => 1,
            PictureFormat::Nv12 | PictureFormat::P010 => 2,
            PictureFormat::Yuv420p => 3,
        }
    }

    /// The texture format one plane is uploaded into.
    pub fn plane_texture_format(&self, plane: usize) -> Option<TextureFormat> {
        let format = match (self, plane) {
            (PictureFormat::Rgba8, 0) => TextureFormat::Rgba8Unorm,
            (PictureFormat::Bgra8, 0) => TextureFormat::Bgra8Unorm,
            (PictureFormat::Nv12, 0) | (PictureFormat::Yuv420p, 0..=2) => TextureFormat::R8Unorm,
            (PictureFormat::Nv12, 1) => TextureFormat::Rg8Unorm,
            (PictureFormat::P010, 0) => TextureFormat::R16Unorm,
            (PictureFormat::P010, 1) => TextureFormat::Rg16Unorm,
            _ => return None,
        };
        Some(format)
    }

    /// Pixel extent of one plane for a frame of `width` x `height`.
    pub fn plane_extent(&self, plane: usize, width: u32, height: u32) -> (u32, u32) {
        let subsampled = plane > 0
            && matches!(
                self,
                PictureFormat::Nv12 | PictureFormat::Yuv420p | PictureFormat::P010
            );
        if subsampled {
            (width.div_ceil(2), height.div_ceil(2))
        } else {
            (width, height)
        }
    }
}

/// Where the picture's pixels live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// CPU memory.
    #[default]
    System,
    /// Device memory written by a hardware decoder.
    Device,
}

/// Placement of one plane inside the picture storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PicturePlane {
    /// Byte offset of the first row.
    pub offset: usize,
    /// Bytes between the starts of two rows.
    pub stride: usize,
    /// Plane width in pixels.
    pub width: u32,
    /// Plane height in rows.
    pub height: u32,
}

impl PicturePlane {
    fn end(&self) -> usize {
        self.offset + self.stride * self.height as usize
    }
}

/// Backing memory of a picture.
#[derive(Debug)]
pub enum PictureStorage {
    /// A plain heap allocation.
    Owned(Vec<u8>),
    /// A block borrowed from a [`MemoryResource`]; it returns to the pool with the picture.
    Pooled(PooledBlock),
}

impl PictureStorage {
    fn as_slice(&self) -> &[u8] {
        match self {
            PictureStorage::Owned(v) => v,
            PictureStorage::Pooled(b) => b,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            PictureStorage::Owned(v) => v,
            PictureStorage::Pooled(b) => b,
        }
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

struct PictureInner {
    width: u32,
    height: u32,
    format: PictureFormat,
    timestamp: i64,
    location: MemoryLocation,
    planes: Vec<PicturePlane>,
    storage: PictureStorage,
    on_release: Mutex<Option<ReleaseFn>>,
}

impl Drop for PictureInner {
    fn drop(&mut self) {
        let release = self
            .on_release
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(release) = release {
            release();
        }
    }
}

/// A reference-counted decoded frame.
///
/// Cloning shares the frame. The release callback runs exactly once, when the last
/// clone is dropped, after which pooled storage returns to its pool.
#[derive(Clone)]
pub struct Picture {
    inner: Arc<PictureInner>,
}

impl fmt::Debug for Picture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Picture")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("format", &self.inner.format)
            .field("timestamp", &self.inner.timestamp)
            .field("planes", &self.inner.planes)
            .finish()
    }
}

fn tight_layout(format: PictureFormat, width: u32, height: u32) -> (Vec<PicturePlane>, usize) {
    let mut offset = 0;
    let planes = (0..format.plane_count())
        .map(|plane| {
            let (w, h) = format.plane_extent(plane, width, height);
            let bpp = format
                .plane_texture_format(plane)
                .map_or(1, |f| f.bytes_per_pixel()) as usize;
            let layout = PicturePlane {
                offset,
                stride: w as usize * bpp,
                width: w,
                height: h,
            };
            offset = layout.end();
            layout
        })
        .collect();
    (planes, offset)
}

impl Picture {
    /// Wraps decoder output with explicit plane placement (strides may include padding).
    pub fn from_planes(
        width: u32,
        height: u32,
        format: PictureFormat,
        planes: Vec<PicturePlane>,
        storage: PictureStorage,
    ) -> Result<Self, ResourceError> {
        if planes.len() != format.plane_count() || planes.len() > MAX_PICTURE_PLANES {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{format:?} needs {} planes, got {}",
                format.plane_count(),
                planes.len()
            )));
        }
        let available = storage.as_slice().len();
        for (index, plane) in planes.iter().enumerate() {
            let bpp = format
                .plane_texture_format(index)
                .map_or(1, |f| f.bytes_per_pixel()) as usize;
            if plane.stride < plane.width as usize * bpp || plane.end() > available {
                return Err(ResourceError::OutOfBounds);
            }
        }
        Ok(Self {
            inner: Arc::new(PictureInner {
                width,
                height,
                format,
                timestamp: 0,
                location: MemoryLocation::System,
                planes,
                storage,
                on_release: Mutex::new(None),
            }),
        })
    }

    /// Allocates a zeroed picture with tightly packed planes.
    pub fn new(width: u32, height: u32, format: PictureFormat) -> Self {
        let (planes, size) = tight_layout(format, width, height);
        Self {
            inner: Arc::new(PictureInner {
                width,
                height,
                format,
                timestamp: 0,
                location: MemoryLocation::System,
                planes,
                storage: PictureStorage::Owned(vec![0; size]),
                on_release: Mutex::new(None),
            }),
        }
    }

    /// Takes the storage from `pool`, which must have blocks large enough for the frame.
    pub fn from_pool(
        pool: &MemoryResource,
        width: u32,
        height: u32,
        format: PictureFormat,
    ) -> Result<Self, ResourceError> {
        let (planes, size) = tight_layout(format, width, height);
        if size > pool.block_size() {
            return Err(ResourceError::OutOfMemory {
                requested: size as u64,
                available: pool.block_size() as u64,
            });
        }
        Self::from_planes(
            width,
            height,
            format,
            planes,
            PictureStorage::Pooled(pool.allocate()),
        )
    }

    /// Sets the callback run when the last reference drops, replacing any previous one.
    #[must_use]
    pub fn with_release(self, release: impl FnOnce() + Send + 'static) -> Self {
        *self
            .inner
            .on_release
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(release));
        self
    }

    /// Sets the presentation timestamp. Only possible while the picture is not shared.
    pub fn set_timestamp(&mut self, timestamp: i64) -> bool {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                inner.timestamp = timestamp;
                true
            }
            None => false,
        }
    }

    /// Marks the frame as living in device memory. Only possible while not shared.
    pub fn set_location(&mut self, location: MemoryLocation) -> bool {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                inner.location = location;
                true
            }
            None => false,
        }
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.inner.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// Pixel layout.
    pub fn format(&self) -> PictureFormat {
        self.inner.format
    }

    /// Presentation timestamp.
    pub fn timestamp(&self) -> i64 {
        self.inner.timestamp
    }

    /// Where the pixels live.
    pub fn location(&self) -> MemoryLocation {
        self.inner.location
    }

    /// Number of planes.
    pub fn plane_count(&self) -> usize {
        self.inner.planes.len()
    }

    /// Placement of plane `index`.
    pub fn plane(&self, index: usize) -> Option<&PicturePlane> {
        self.inner.planes.get(index)
    }

    /// Row pitch of plane `index`.
    pub fn stride(&self, index: usize) -> Option<usize> {
        self.plane(index).map(|p| p.stride)
    }

    /// Bytes of plane `index`, `stride * height` long.
    pub fn plane_data(&self, index: usize) -> Option<&[u8]> {
        let plane = self.plane(index)?;
        self.inner.storage.as_slice().get(plane.offset..plane.end())
    }

    /// Mutable bytes of plane `index`. Only available while the picture is not shared.
    pub fn plane_data_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let inner = Arc::get_mut(&mut self.inner)?;
        let plane = *inner.planes.get(index)?;
        inner
            .storage
            .as_mut_slice()
            .get_mut(plane.offset..plane.end())
    }

    /// Number of live references to this frame.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_nv12_layout() {
        let picture = Picture::new(5, 3, PictureFormat::Nv12);
        assert_eq!(picture.plane_count(), 2);
        let luma = *picture.plane(0).unwrap();
        let chroma = *picture.plane(1).unwrap();
        assert_eq!((luma.stride, luma.height), (5, 3));
        assert_eq!((chroma.width, chroma.height, chroma.stride), (3, 2, 6));
        assert_eq!(chroma.offset, 15);
        assert_eq!(picture.plane_data(1).unwrap().len(), 12);
    }

    #[test]
    fn test_release_runs_once_on_last_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let picture = Picture::new(4, 4, PictureFormat::Rgba8).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let shared = picture.clone();
        assert_eq!(picture.ref_count(), 2);

        drop(picture);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(shared);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pooled_picture_returns_block() {
        let pool = MemoryResource::new(64 * 64 * 4);
        let mut picture = Picture::from_pool(&pool, 64, 64, PictureFormat::Rgba8).unwrap();
        assert_eq!(pool.allocated_blocks(), 1);
        picture.plane_data_mut(0).unwrap()[0] = 9;
        assert!(picture.set_timestamp(42));

        let shared = picture.clone();
        assert!(picture.plane_data_mut(0).is_none(), "shared pictures are read-only");
        drop(shared);
        drop(picture);
        assert_eq!(pool.allocated_blocks(), 0);
    }

    #[test]
    fn test_pool_too_small_is_rejected() {
        let pool = MemoryResource::new(16);
        assert!(matches!(
            Picture::from_pool(&pool, 64, 64, PictureFormat::Rgba8),
            Err(ResourceError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_from_planes_checks_strides() {
        let plane = PicturePlane {
            offset: 0,
            stride: 8,
            width: 4,
            height: 2,
        };
        let err = Picture::from_planes(
            4,
            2,
            PictureFormat::Rgba8,
            vec![plane],
            PictureStorage::Owned(vec![0; 16]),
        );
        assert!(matches!(err, Err(ResourceError::OutOfBounds)));

        let padded = PicturePlane { stride: 20, ..plane };
        let ok = Picture::from_planes(
            4,
            2,
            PictureFormat::Rgba8,
            vec![padded],
            PictureStorage::Owned(vec![0; 40]),
        )
        .unwrap();
        assert_eq!(ok.stride(0), Some(20));
    }
}
