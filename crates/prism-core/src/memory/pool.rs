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

//! Fixed-size block pools for frame buffers.
//!
//! A [`MarkBuffer`] tracks 64 equally sized slots with one `u64`: a set bit marks a
//! free slot, so allocation is a trailing-zero count and release is a single `or`.
//! A [`MemoryResource`] chains mark buffers and grows by one when all are full.
//! Blocks keep their backing allocation while they sit in the pool, so a decode loop
//! that keeps requesting frames of one size stops allocating after warm-up.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Number of slots tracked by one [`MarkBuffer`].
pub const MARK_BUFFER_SLOTS: usize = u64::BITS as usize;

/// 64 fixed-size slots and the bitmap that tracks which are free.
#[derive(Debug)]
pub struct MarkBuffer {
    block_size: usize,
    mark: u64,
    slots: Vec<Option<Box<[u8]>>>,
}

impl MarkBuffer {
    /// Creates an empty mark buffer. Slot memory is allocated on first use.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            mark: u64::MAX,
            slots: (0..MARK_BUFFER_SLOTS).map(|_| None).collect(),
        }
    }

    /// Size of each slot in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Claims the lowest free slot.
    pub fn allocate(&mut self) -> Option<usize> {
        if self.mark == 0 {
            return None;
        }
        let slot = self.mark.trailing_zeros() as usize;
        self.mark &= !(1u64 << slot);
        Some(slot)
    }

    /// Returns a slot. Releasing a free or out-of-range slot is refused.
    pub fn release(&mut self, slot: usize) -> bool {
        if slot >= MARK_BUFFER_SLOTS || self.mark & (1u64 << slot) != 0 {
            return false;
        }
        self.mark |= 1u64 << slot;
        true
    }

    /// `true` when no slot is free.
    pub fn is_full(&self) -> bool {
        self.mark == 0
    }

    /// Number of free slots.
    pub fn free_slots(&self) -> usize {
        self.mark.count_ones() as usize
    }

    fn take_storage(&mut self, slot: usize) -> Box<[u8]> {
        self.slots[slot]
            .take()
            .unwrap_or_else(|| vec![0u8; self.block_size].into_boxed_slice())
    }

    fn restore_storage(&mut self, slot: usize, storage: Box<[u8]>) {
        self.slots[slot] = Some(storage);
    }
}

#[derive(Debug)]
struct PoolInner {
    block_size: usize,
    buffers: Vec<MarkBuffer>,
}

/// A growable pool of fixed-size blocks. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    inner: Arc<Mutex<PoolInner>>,
}

impl MemoryResource {
    /// Creates a pool of blocks of at least `block_size` bytes (rounded up to a power
    /// of two) with room for 64 blocks.
    pub fn new(block_size: usize) -> Self {
        Self::with_capacity(block_size, MARK_BUFFER_SLOTS)
    }

    /// Creates a pool pre-sized for `blocks` blocks.
    pub fn with_capacity(block_size: usize, blocks: usize) -> Self {
        let block_size = block_size.max(1).next_power_of_two();
        let buffer_count = blocks.div_ceil(MARK_BUFFER_SLOTS).max(1);
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                block_size,
                buffers: (0..buffer_count).map(|_| MarkBuffer::new(block_size)).collect(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Size of every block in bytes.
    pub fn block_size(&self) -> usize {
        self.lock().block_size
    }

    /// Total slots across all mark buffers.
    pub fn capacity(&self) -> usize {
        self.lock().buffers.len() * MARK_BUFFER_SLOTS
    }

    /// Blocks currently handed out.
    pub fn allocated_blocks(&self) -> usize {
        self.lock()
            .buffers
            .iter()
            .map(|b| MARK_BUFFER_SLOTS - b.free_slots())
            .sum()
    }

    /// Hands out a block, growing the pool if every slot is taken.
    pub fn allocate(&self) -> PooledBlock {
        let mut inner = self.lock();
        let found = inner
            .buffers
            .iter_mut()
            .enumerate()
            .find_map(|(index, buffer)| buffer.allocate().map(|slot| (index, slot)));
        let (buffer_index, slot) = match found {
            Some(location) => location,
            None => {
                let block_size = inner.block_size;
                let mut buffer = MarkBuffer::new(block_size);
                let slot = buffer.allocate().unwrap_or(0);
                inner.buffers.push(buffer);
                log::debug!(
                    "MemoryResource: grew to {} mark buffers of {} byte blocks",
                    inner.buffers.len(),
                    block_size
                );
                (inner.buffers.len() - 1, slot)
            }
        };
        let data = inner.buffers[buffer_index].take_storage(slot);
        PooledBlock {
            data: Some(data),
            buffer_index,
            slot,
            pool: Arc::downgrade(&self.inner),
        }
    }
}

/// A block borrowed from a [`MemoryResource`]. Returns to its slot when dropped.
#[derive(Debug)]
pub struct PooledBlock {
    data: Option<Box<[u8]>>,
    buffer_index: usize,
    slot: usize,
    pool: Weak<Mutex<PoolInner>>,
}

impl PooledBlock {
    /// Index of the slot inside its mark buffer.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Deref for PooledBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        let (Some(pool), Some(data)) = (self.pool.upgrade(), self.data.take()) else {
            return;
        };
        let mut inner = pool.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(buffer) = inner.buffers.get_mut(self.buffer_index) {
            buffer.restore_storage(self.slot, data);
            buffer.release(self.slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_buffer_allocates_lowest_free_slot() {
        let mut marks = MarkBuffer::new(16);
        assert_eq!(marks.allocate(), Some(0));
        assert_eq!(marks.allocate(), Some(1));
        assert_eq!(marks.allocate(), Some(2));
        assert!(marks.release(1));
        assert_eq!(marks.allocate(), Some(1));
        assert_eq!(marks.free_slots(), 61);
    }

    #[test]
    fn test_mark_buffer_refuses_double_release() {
        let mut marks = MarkBuffer::new(16);
        let slot = marks.allocate().unwrap();
        assert!(marks.release(slot));
        assert!(!marks.release(slot));
        assert!(!marks.release(64));
    }

    #[test]
    fn test_mark_buffer_fills_up() {
        let mut marks = MarkBuffer::new(1);
        for expected in 0..MARK_BUFFER_SLOTS {
            assert_eq!(marks.allocate(), Some(expected));
        }
        assert!(marks.is_full());
        assert_eq!(marks.allocate(), None);
    }

    #[test]
    fn test_pool_rounds_block_size_and_grows() {
        let pool = MemoryResource::new(1000);
        assert_eq!(pool.block_size(), 1024);
        assert_eq!(pool.capacity(), 64);

        let blocks: Vec<_> = (0..65).map(|_| pool.allocate()).collect();
        assert_eq!(pool.capacity(), 128);
        assert_eq!(pool.allocated_blocks(), 65);
        assert!(blocks.iter().all(|b| b.len() == 1024));

        drop(blocks);
        assert_eq!(pool.allocated_blocks(), 0);
    }

    #[test]
    fn test_released_block_memory_is_reused() {
        let pool = MemoryResource::new(64);
        let mut block = pool.allocate();
        block[0] = 0xAB;
        let slot = block.slot();
        drop(block);

        let again = pool.allocate();
        assert_eq!(again.slot(), slot);
        assert_eq!(again[0], 0xAB, "pooled memory is recycled, not reallocated");
    }

    #[test]
    fn test_block_outliving_pool_is_harmless() {
        let pool = MemoryResource::new(8);
        let block = pool.allocate();
        drop(pool);
        assert_eq!(block.len(), 8);
        drop(block);
    }
}
