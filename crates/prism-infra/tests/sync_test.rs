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

//! Integration tests for GPU events and queue ordering on the emulated driver.

mod common;

use common::{command_buffer, device, graphics_queue, soft, BACKENDS, LONG, SHORT};
use prism_core::renderer::api::{
    BufferDescriptor, BufferUsage, GraphicsBackendType, QueuePriority, QueueType, WaitStatus,
};
use prism_core::renderer::RenderError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_sync_points_increase_by_one_per_submission() {
    for backend in BACKENDS {
        // --- ARRANGE ---
        let device = device(backend);
        let queue = graphics_queue(&device);
        let event = device.create_gpu_event("frame").unwrap();

        // --- ACT ---
        let mut points = Vec::new();
        for _ in 0..5 {
            let mut cb = command_buffer(&device);
            cb.end().unwrap();
            queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();
            points.push(event.sync_point());
        }
        let status = event.wait(5, LONG).unwrap();

        // --- ASSERT ---
        assert_eq!(points, vec![1, 2, 3, 4, 5], "{backend:?}");
        assert_eq!(status, WaitStatus::Signaled);
        assert!(event.completion_value() >= 5);
        // Already reached values return at once.
        assert_eq!(event.wait(2, Duration::ZERO).unwrap(), WaitStatus::Signaled);
    }
}

#[test]
fn test_queue_signal_returns_the_scheduled_value() {
    for backend in BACKENDS {
        let device = device(backend);
        let queue = graphics_queue(&device);
        let event = device.create_gpu_event("marker").unwrap();

        let first = queue.signal(event.as_ref()).unwrap();
        let second = queue.signal(event.as_ref()).unwrap();

        assert_eq!((first, second), (1, 2));
        assert_eq!(event.wait(second, LONG).unwrap(), WaitStatus::Signaled);
    }
}

#[test]
fn test_paused_gpu_times_out_then_completes() {
    for backend in [GraphicsBackendType::Dx12, GraphicsBackendType::Vulkan] {
        // --- ARRANGE ---
        let device = device(backend);
        let queue = graphics_queue(&device);
        let event = device.create_gpu_event("paused").unwrap();
        soft(&device).pause_gpu();

        // --- ACT ---
        let mut cb = command_buffer(&device);
        queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();
        let while_paused = event.wait(1, SHORT).unwrap();
        let completed_while_paused = event.completion_value();
        soft(&device).resume_gpu();
        let after_resume = event.wait(1, LONG).unwrap();

        // --- ASSERT ---
        assert_eq!(while_paused, WaitStatus::Timeout, "{backend:?}");
        assert_eq!(completed_while_paused, 0);
        assert_eq!(after_resume, WaitStatus::Signaled);
    }
}

#[test]
fn test_submissions_execute_in_order() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let queue = graphics_queue(&device);
    let event = device.create_gpu_event("copies").unwrap();
    let staging = device
        .create_buffer(&BufferDescriptor::new(
            "staging",
            16,
            BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
        ))
        .unwrap();
    let target = device
        .create_buffer(&BufferDescriptor::new("target", 16, BufferUsage::TRANSFER_DST))
        .unwrap();
    soft(&device).pause_gpu();

    // --- ACT ---
    let mut fill = command_buffer(&device);
    fill.update_buffer(staging, 0, &[7; 16]);
    queue.submit_one(fill.as_mut(), Some(event.as_ref()), None).unwrap();
    let mut copy = command_buffer(&device);
    copy.copy_buffer(staging, 0, target, 0, 16);
    queue.submit_one(copy.as_mut(), Some(event.as_ref()), None).unwrap();
    soft(&device).resume_gpu();
    let status = event.wait(2, LONG).unwrap();

    // --- ASSERT ---
    assert_eq!(status, WaitStatus::Signaled);
    assert_eq!(soft(&device).read_buffer(target).unwrap(), vec![7; 16]);
}

#[test]
fn test_queue_wait_holds_back_later_work() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let graphics = graphics_queue(&device);
    let compute = device
        .create_queue(QueueType::Compute, QueuePriority::High)
        .unwrap();
    let upstream = device.create_gpu_event("upstream").unwrap();
    let downstream = device.create_gpu_event("downstream").unwrap();

    // --- ACT ---
    graphics.wait(upstream.as_ref(), 1).unwrap();
    let mut cb = command_buffer(&device);
    graphics
        .submit_one(cb.as_mut(), Some(downstream.as_ref()), None)
        .unwrap();
    let before = downstream.wait(1, SHORT).unwrap();
    let value = compute.signal(upstream.as_ref()).unwrap();
    let after = downstream.wait(1, LONG).unwrap();

    // --- ASSERT ---
    assert_eq!(before, WaitStatus::Timeout);
    assert_eq!(value, 1);
    assert_eq!(after, WaitStatus::Signaled);
}

#[test]
fn test_host_signal_releases_a_waiting_thread() {
    let device = device(GraphicsBackendType::Dx12);
    let event = device.create_gpu_event("host").unwrap();
    let waiter = {
        let event = event.clone();
        thread::spawn(move || event.wait(3, LONG))
    };

    thread::sleep(Duration::from_millis(10));
    event.signal(3).unwrap();

    assert_eq!(waiter.join().unwrap().unwrap(), WaitStatus::Signaled);
    assert!(event.is_completed(2));
}

#[test]
fn test_timeline_semaphore_host_signal_must_increase() {
    let device = device(GraphicsBackendType::Vulkan);
    let event = device.create_gpu_event("timeline").unwrap();

    event.signal(2).unwrap();

    assert!(matches!(event.signal(2), Err(RenderError::Validation(_))));
    assert!(matches!(event.signal(1), Err(RenderError::Validation(_))));
    assert_eq!(event.completion_value(), 2);
    assert!(device.stats().validation_messages >= 2);
}

#[test]
fn test_use_after_free_loses_the_device() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let queue = graphics_queue(&device);
    let event = device.create_gpu_event("doomed").unwrap();
    let src = device
        .create_buffer(&BufferDescriptor::new("src", 64, BufferUsage::TRANSFER_SRC))
        .unwrap();
    let dst = device
        .create_buffer(&BufferDescriptor::new("dst", 64, BufferUsage::TRANSFER_DST))
        .unwrap();
    soft(&device).pause_gpu();
    let mut cb = command_buffer(&device);
    cb.copy_buffer(src, 0, dst, 0, 64);
    queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();
    let mut next = command_buffer(&device);
    next.end().unwrap();

    // --- ACT ---
    device.destroy_buffer(src).unwrap();
    soft(&device).resume_gpu();
    let waited = event.wait(1, LONG);

    // --- ASSERT ---
    assert!(matches!(waited, Err(RenderError::DeviceLost)));
    assert!(soft(&device).is_lost());
    assert!(matches!(
        device.create_gpu_event("late"),
        Err(RenderError::DeviceLost)
    ));
    let submitted = queue.submit_one(next.as_mut(), None, None);
    assert!(matches!(
        submitted,
        Err(RenderError::QueueLost | RenderError::DeviceLost)
    ));
}

#[test]
fn test_concurrent_submissions_keep_sync_points_monotonic() {
    const THREADS: u64 = 4;
    const ROUNDS: u64 = 25;

    for backend in BACKENDS {
        // --- ARRANGE ---
        let device = device(backend);
        let queue = graphics_queue(&device);
        let event = device.create_gpu_event("shared").unwrap();

        // --- ACT ---
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let device = Arc::clone(&device);
                let queue = Arc::clone(&queue);
                let event = Arc::clone(&event);
                thread::spawn(move || {
                    let mut values = Vec::new();
                    for _ in 0..ROUNDS {
                        let mut cb = command_buffer(&device);
                        cb.end().unwrap();
                        queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();
                        values.push(queue.signal(event.as_ref()).unwrap());
                    }
                    values
                })
            })
            .collect();
        let mut observed = Vec::new();
        while workers.iter().any(|worker| !worker.is_finished()) {
            observed.push(event.completion_value());
            thread::yield_now();
        }
        let per_thread: Vec<Vec<u64>> = workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect();
        let total = THREADS * ROUNDS * 2;
        let status = event.wait(total, LONG).unwrap();

        // --- ASSERT ---
        for values in &per_thread {
            assert!(values.windows(2).all(|w| w[0] < w[1]), "{backend:?}: {values:?}");
        }
        let mut all: Vec<u64> = per_thread.into_iter().flatten().collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len() as u64, THREADS * ROUNDS);
        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(status, WaitStatus::Signaled);
        assert_eq!(event.sync_point(), total);
        assert_eq!(event.completion_value(), total);
        assert_eq!(device.stats().submissions, THREADS * ROUNDS);
    }
}
