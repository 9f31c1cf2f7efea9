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

//! Defines data structures related to GPU buffer resources.

use crate::prism_bitflags;
use crate::renderer::error::ResourceError;
use std::borrow::Cow;
use std::ops::{Deref, DerefMut};

/// Allocation granularity of constant buffers, in bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Rounds `size` up to the next multiple of `alignment` (a power of two).
///
/// Returns `None` when the rounded size does not fit in a `u64`.
pub const fn align_up(size: u64, alignment: u64) -> Option<u64> {
    match size.checked_add(alignment - 1) {
        Some(padded) => Some(padded & !(alignment - 1)),
        None => None,
    }
}

prism_bitflags! {
    /// A set of flags describing the allowed usages of a buffer.
    pub struct BufferUsage: u32 {
        /// Bound as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Bound as an index buffer.
        const INDEX = 1 << 1;
        /// Bound as a constant (uniform) buffer. Sizes are rounded up to 256 bytes.
        const CONSTANT = 1 << 2;
        /// Backing store for push constants on backends that emulate them.
        const PUSH_CONSTANT = 1 << 3;
        /// Read/write access from shaders.
        const STORAGE = 1 << 4;
        /// Source of a copy operation.
        const TRANSFER_SRC = 1 << 5;
        /// Destination of a copy operation.
        const TRANSFER_DST = 1 << 6;
        /// Bitstream input of a video decode session.
        const VIDEO_DECODE = 1 << 7;
        /// Bitstream output of a video encode session.
        const VIDEO_ENCODE = 1 << 8;
    }
}

/// A descriptor used to create a buffer.
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    /// An optional debug label for the buffer.
    pub label: Option<Cow<'a, str>>,
    /// The requested size of the buffer in bytes.
    pub size: u64,
    /// How the buffer will be used.
    pub usage: BufferUsage,
    /// Initial contents, copied at creation. Must not be longer than `size`.
    pub contents: Option<&'a [u8]>,
}

impl<'a> BufferDescriptor<'a> {
    /// A descriptor without initial contents.
    pub fn new(label: &'a str, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            size,
            usage,
            contents: None,
        }
    }

    /// A descriptor sized to and initialized from `contents`.
    pub fn with_contents(label: &'a str, usage: BufferUsage, contents: &'a [u8]) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            size: contents.len() as u64,
            usage,
            contents: Some(contents),
        }
    }

    /// The number of bytes the device actually allocates for this descriptor.
    pub fn allocation_size(&self) -> Result<u64, ResourceError> {
        if !self.usage.contains(BufferUsage::CONSTANT) {
            return Ok(self.size);
        }
        align_up(self.size, CONSTANT_BUFFER_ALIGNMENT).ok_or_else(|| {
            ResourceError::InvalidDescriptor(format!(
                "constant buffer of {} bytes cannot be padded to {CONSTANT_BUFFER_ALIGNMENT}",
                self.size
            ))
        })
    }
}

/// An opaque handle to a GPU buffer resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

/// Metadata of a live buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// The size the buffer was requested with.
    pub requested_size: u64,
    /// The allocated size, after alignment.
    pub size: u64,
    /// The usages declared at creation.
    pub usage: BufferUsage,
}

/// A CPU-side window over a mapped buffer range.
///
/// Obtained from `GraphicsDevice::map_buffer` and handed back through
/// `GraphicsDevice::unmap_buffer`, which publishes the bytes to the GPU. The buffer stays
/// mapped until then. Writing a range the GPU is still reading is a caller error.
#[derive(Debug)]
pub struct BufferMapping {
    buffer: BufferId,
    offset: u64,
    bytes: Vec<u8>,
}

impl BufferMapping {
    /// Wraps the bytes of a mapped range. Used by backends.
    pub fn new(buffer: BufferId, offset: u64, bytes: Vec<u8>) -> Self {
        Self {
            buffer,
            offset,
            bytes,
        }
    }

    /// The mapped buffer.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Offset of the mapped range in the buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Copies `data` to the start of the mapped range.
    ///
    /// Returns `false` (and writes nothing) if `data` does not fit.
    pub fn write(&mut self, data: &[u8]) -> bool {
        match self.bytes.get_mut(..data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Consumes the mapping, returning its parts. Used by backends on unmap.
    pub fn into_parts(self) -> (BufferId, u64, Vec<u8>) {
        (self.buffer, self.offset, self.bytes)
    }
}

impl Deref for BufferMapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for BufferMapping {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_buffers_round_to_256() {
        for (requested, expected) in [(1, 256), (256, 256), (257, 512), (1000, 1024)] {
            let desc = BufferDescriptor::new("cb", requested, BufferUsage::CONSTANT);
            assert_eq!(desc.allocation_size().unwrap(), expected, "requested {requested}");
        }
    }

    #[test]
    fn test_other_buffers_keep_their_size() {
        let desc = BufferDescriptor::new("vb", 100, BufferUsage::VERTEX);
        assert_eq!(desc.allocation_size().unwrap(), 100);
    }

    #[test]
    fn test_constant_padding_overflow_is_an_error() {
        let desc = BufferDescriptor::new("cb", u64::MAX - 10, BufferUsage::CONSTANT);

        assert!(matches!(
            desc.allocation_size(),
            Err(ResourceError::InvalidDescriptor(_))
        ));
        assert_eq!(align_up(u64::MAX, 4), None);
        assert_eq!(align_up(5, 4), Some(8));
    }

    #[test]
    fn test_mapping_write_bounds() {
        let mut mapping = BufferMapping::new(BufferId(3), 16, vec![0; 4]);
        assert!(mapping.write(&[1, 2]));
        assert!(!mapping.write(&[0; 5]));
        assert_eq!(&mapping[..], &[1, 2, 0, 0]);
        let (id, offset, bytes) = mapping.into_parts();
        assert_eq!((id, offset, bytes.len()), (BufferId(3), 16, 4));
    }
}
