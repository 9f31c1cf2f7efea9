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

//! Integration tests for pooled picture storage crossing threads.

use prism_core::media::{Picture, PictureFormat};
use prism_core::memory::MemoryResource;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_decode_loop_reuses_pooled_blocks() {
    // --- ARRANGE ---
    let pool = MemoryResource::with_capacity(64 * 64 * 4, 4);
    let released = Arc::new(AtomicUsize::new(0));

    // --- ACT ---
    for frame in 0..200i64 {
        let counter = released.clone();
        let mut picture = Picture::from_pool(&pool, 64, 64, PictureFormat::Rgba8)
            .unwrap()
            .with_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert!(picture.set_timestamp(frame));
        picture.plane_data_mut(0).unwrap()[0] = frame as u8;
        // The consumer holds the frame on another thread, then lets it go.
        let consumer = picture.clone();
        thread::spawn(move || assert_eq!(consumer.plane_data(0).unwrap()[0], frame as u8))
            .join()
            .unwrap();
    }

    // --- ASSERT ---
    assert_eq!(released.load(Ordering::SeqCst), 200);
    assert_eq!(pool.allocated_blocks(), 0);
    assert_eq!(pool.capacity(), 64);
}

#[test]
fn test_last_reference_runs_release_exactly_once() {
    // --- ARRANGE ---
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let picture = Picture::new(32, 16, PictureFormat::Nv12).with_release(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let handles: Vec<Picture> = (0..8).map(|_| picture.clone()).collect();

    // --- ACT ---
    drop(picture);
    let workers: Vec<_> = handles
        .into_iter()
        .map(|p| thread::spawn(move || drop(p)))
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // --- ASSERT ---
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_frames_larger_than_blocks_are_refused() {
    let pool = MemoryResource::new(1024);
    assert!(Picture::from_pool(&pool, 1920, 1080, PictureFormat::Rgba8).is_err());
    assert_eq!(pool.allocated_blocks(), 0);
}
