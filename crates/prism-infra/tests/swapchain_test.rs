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

//! Integration tests for swapchain acquisition, presentation and resizing.

mod common;

use common::{
    command_buffer, device, graphics_queue, soft, swapchain_descriptor, BACKENDS, LONG, SHORT,
};
use prism_core::math::{Extent2D, LinearRgba};
use prism_core::platform::HeadlessWindow;
use prism_core::renderer::api::{
    AcquireStatus, ClearValue, CommandBufferLevel, GraphicsBackendType, QueuePriority, QueueType,
    ResourceState, TextureFormat, TextureId, WaitStatus,
};
use prism_core::renderer::{GraphicsDevice, Queue, RenderError, Swapchain};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn acquire(swapchain: &mut Box<dyn Swapchain>) -> u32 {
    match swapchain.prepare_next_frame(LONG).unwrap() {
        AcquireStatus::Acquired(index) => index,
        AcquireStatus::Timeout => panic!("back buffer was not released in time"),
    }
}

/// Clears the current back buffer and presents it.
fn render_frame(
    device: &Arc<dyn GraphicsDevice>,
    queue: &Arc<dyn Queue>,
    swapchain: &mut Box<dyn Swapchain>,
    color: LinearRgba,
) -> u32 {
    let index = acquire(swapchain);
    let mut cb = command_buffer(device);
    cb.begin_render_target(swapchain.current_render_target().unwrap(), ClearValue::color(color));
    cb.end_render_target();
    queue
        .submit_one(cb.as_mut(), None, Some(swapchain.as_ref()))
        .unwrap();
    queue.present(swapchain.as_ref(), &[]).unwrap();
    index
}

fn back_buffer_texture(
    device: &Arc<dyn GraphicsDevice>,
    swapchain: &dyn Swapchain,
    index: u32,
) -> TextureId {
    let target = swapchain.render_target(index).unwrap();
    device.render_target_info(target).unwrap().color_attachments[0]
}

#[test]
fn test_back_buffers_cycle_in_order() {
    for backend in BACKENDS {
        // --- ARRANGE ---
        let device = device(backend);
        let queue = graphics_queue(&device);
        let window = HeadlessWindow::new(320, 240);
        let mut swapchain = device
            .create_swapchain(&queue, &window, &swapchain_descriptor(3))
            .unwrap();
        let red = LinearRgba::rgb(1.0, 0.0, 0.0);

        // --- ACT ---
        let indices: Vec<u32> = (0..7)
            .map(|_| render_frame(&device, &queue, &mut swapchain, red))
            .collect();
        let idle = device.wait_idle(LONG).unwrap();

        // --- ASSERT ---
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0], "{backend:?}");
        assert_eq!(idle, WaitStatus::Signaled);
        let stats = device.stats();
        assert_eq!(stats.presents, 7);
        assert_eq!(stats.validation_messages, 0);
        let texture = back_buffer_texture(&device, swapchain.as_ref(), 0);
        let pixels = soft(&device).read_texture(texture, 0).unwrap();
        // Bgra8Unorm
        assert_eq!(&pixels[..4], &[0, 0, 255, 255]);
        assert_eq!(pixels.len(), 320 * 240 * 4);
        assert_eq!(
            soft(&device).texture_state(texture).unwrap(),
            ResourceState::Present
        );
    }
}

#[test]
fn test_busy_back_buffer_times_out() {
    for backend in [GraphicsBackendType::Dx12, GraphicsBackendType::Vulkan] {
        // --- ARRANGE ---
        let device = device(backend);
        let queue = graphics_queue(&device);
        let window = HeadlessWindow::new(64, 64);
        let mut swapchain = device
            .create_swapchain(&queue, &window, &swapchain_descriptor(2))
            .unwrap();
        soft(&device).pause_gpu();
        render_frame(&device, &queue, &mut swapchain, LinearRgba::BLACK);
        render_frame(&device, &queue, &mut swapchain, LinearRgba::BLACK);

        // --- ACT ---
        let while_busy = swapchain.prepare_next_frame(SHORT).unwrap();
        soft(&device).resume_gpu();
        let after_resume = swapchain.prepare_next_frame(LONG).unwrap();

        // --- ASSERT ---
        assert_eq!(while_busy, AcquireStatus::Timeout, "{backend:?}");
        assert_eq!(after_resume, AcquireStatus::Acquired(0));
        assert_eq!(swapchain.current_back_buffer_index(), 0);
    }
}

#[test]
fn test_present_requires_the_present_state() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let queue = graphics_queue(&device);
    let window = HeadlessWindow::new(64, 64);
    let mut swapchain = device
        .create_swapchain(&queue, &window, &swapchain_descriptor(2))
        .unwrap();
    acquire(&mut swapchain);
    let texture = back_buffer_texture(&device, swapchain.as_ref(), 0);

    // --- ACT ---
    let mut cb = command_buffer(&device);
    cb.begin_render_target(swapchain.current_render_target().unwrap(), ClearValue::LOAD);
    cb.end_render_target();
    cb.transition(texture, ResourceState::Present, ResourceState::CopySrc);
    queue
        .submit_one(cb.as_mut(), None, Some(swapchain.as_ref()))
        .unwrap();
    let presented = queue.present(swapchain.as_ref(), &[]);

    // --- ASSERT ---
    assert!(matches!(presented, Err(RenderError::Validation(_))));
    assert!(device.stats().validation_messages >= 1);
    assert_eq!(swapchain.current_back_buffer_index(), 0);
}

#[test]
fn test_back_buffer_must_be_acquired_first() {
    let device = device(GraphicsBackendType::Vulkan);
    let queue = graphics_queue(&device);
    let window = HeadlessWindow::new(64, 64);
    let swapchain = device
        .create_swapchain(&queue, &window, &swapchain_descriptor(2))
        .unwrap();
    let mut cb = command_buffer(&device);
    cb.end().unwrap();

    let submitted = queue.submit_one(cb.as_mut(), None, Some(swapchain.as_ref()));
    let presented = queue.present(swapchain.as_ref(), &[]);

    assert!(matches!(submitted, Err(RenderError::Validation(_))));
    assert!(matches!(presented, Err(RenderError::Validation(_))));
}

#[test]
fn test_resize_recreates_back_buffers() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let queue = graphics_queue(&device);
    let window = HeadlessWindow::new(1280, 720);
    let mut swapchain = device
        .create_swapchain(&queue, &window, &swapchain_descriptor(3))
        .unwrap();
    render_frame(&device, &queue, &mut swapchain, LinearRgba::WHITE);
    render_frame(&device, &queue, &mut swapchain, LinearRgba::WHITE);

    // --- ACT ---
    window.set_inner_size(800, 600);
    let (width, height) = (800, 600);
    swapchain.resize(width, height).unwrap();
    let targets: Vec<_> = (0..3).map(|i| swapchain.render_target(i).unwrap()).collect();
    swapchain.resize(width, height).unwrap();
    let zero = swapchain.resize(0, 600);

    // --- ASSERT ---
    assert_eq!(swapchain.extent(), Extent2D::new(800, 600));
    assert_eq!(swapchain.current_back_buffer_index(), 0);
    let info = device.render_target_info(targets[0]).unwrap();
    assert_eq!(info.extent, Extent2D::new(800, 600));
    // Resizing to the same extent keeps the images.
    let unchanged: Vec<_> = (0..3).map(|i| swapchain.render_target(i).unwrap()).collect();
    assert_eq!(targets, unchanged);
    assert!(matches!(zero, Err(RenderError::InvalidState(_))));
    assert_eq!(render_frame(&device, &queue, &mut swapchain, LinearRgba::WHITE), 0);
}

#[test]
fn test_resize_while_a_frame_is_in_flight() {
    for backend in [GraphicsBackendType::Dx12, GraphicsBackendType::Vulkan] {
        // --- ARRANGE ---
        let device = device(backend);
        let queue = graphics_queue(&device);
        let window = HeadlessWindow::new(640, 480);
        let mut swapchain = device
            .create_swapchain(&queue, &window, &swapchain_descriptor(2))
            .unwrap();
        soft(&device).pause_gpu();
        acquire(&mut swapchain);
        let mut cb = command_buffer(&device);
        cb.begin_render_target(
            swapchain.current_render_target().unwrap(),
            ClearValue::color(LinearRgba::BLACK),
        );
        cb.end_render_target();
        queue
            .submit_one(cb.as_mut(), None, Some(swapchain.as_ref()))
            .unwrap();
        let resumer = {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                soft(&device).resume_gpu();
            })
        };

        // --- ACT ---
        window.set_inner_size(320, 240);
        swapchain.resize(320, 240).unwrap();
        let index = render_frame(&device, &queue, &mut swapchain, LinearRgba::WHITE);
        let idle = device.wait_idle(LONG).unwrap();
        resumer.join().unwrap();

        // --- ASSERT ---
        assert!(!soft(&device).is_lost(), "{backend:?}");
        assert_eq!(index, 0);
        assert_eq!(idle, WaitStatus::Signaled);
        assert_eq!(device.stats().validation_messages, 0);
        let texture = back_buffer_texture(&device, swapchain.as_ref(), 0);
        let pixels = soft(&device).read_texture(texture, 0).unwrap();
        assert_eq!(pixels.len(), 320 * 240 * 4);
        assert_eq!(&pixels[..4], &[255, 255, 255, 255]);
    }
}

#[test]
fn test_swapchain_work_from_another_queue_is_rejected() {
    for backend in BACKENDS {
        // --- ARRANGE ---
        let device = device(backend);
        let queue = graphics_queue(&device);
        let compute = device
            .create_queue(QueueType::Compute, QueuePriority::Normal)
            .unwrap();
        let window = HeadlessWindow::new(64, 64);
        let mut swapchain = device
            .create_swapchain(&queue, &window, &swapchain_descriptor(2))
            .unwrap();
        acquire(&mut swapchain);

        // --- ACT ---
        let mut foreign = Vec::new();
        for _ in 0..5 {
            let mut cb = device
                .create_command_buffer(QueueType::Compute, CommandBufferLevel::Primary)
                .unwrap();
            cb.begin().unwrap();
            foreign.push(compute.submit_one(cb.as_mut(), None, Some(swapchain.as_ref())));
        }
        let mut cb = command_buffer(&device);
        cb.begin_render_target(swapchain.current_render_target().unwrap(), ClearValue::LOAD);
        cb.end_render_target();
        queue
            .submit_one(cb.as_mut(), None, Some(swapchain.as_ref()))
            .unwrap();
        queue.present(swapchain.as_ref(), &[]).unwrap();
        render_frame(&device, &queue, &mut swapchain, LinearRgba::BLACK);
        let wrapped = swapchain.prepare_next_frame(LONG).unwrap();

        // --- ASSERT ---
        assert!(
            foreign
                .iter()
                .all(|result| matches!(result, Err(RenderError::InvalidState(_)))),
            "{backend:?}"
        );
        assert_eq!(wrapped, AcquireStatus::Acquired(0));
        assert_eq!(device.stats().validation_messages, 5);
    }
}

#[test]
fn test_swapchain_creation_checks() {
    let vulkan = device(GraphicsBackendType::Vulkan);
    let queue = graphics_queue(&vulkan);
    let window = HeadlessWindow::new(64, 64);
    let mut descriptor = swapchain_descriptor(2);
    descriptor.format = TextureFormat::R8Unorm;
    assert!(matches!(
        vulkan.create_swapchain(&queue, &window, &descriptor),
        Err(RenderError::InitializationFailed(_))
    ));

    let dx12 = device(GraphicsBackendType::Dx12);
    let compute = dx12
        .create_queue(QueueType::Compute, QueuePriority::Normal)
        .unwrap();
    assert!(matches!(
        dx12.create_swapchain(&compute, &window, &swapchain_descriptor(2)),
        Err(RenderError::InvalidState(_))
    ));

    let empty = HeadlessWindow::new(0, 0);
    let graphics = graphics_queue(&dx12);
    assert!(matches!(
        dx12.create_swapchain(&graphics, &empty, &swapchain_descriptor(2)),
        Err(RenderError::InitializationFailed(_))
    ));
}

#[test]
fn test_buffer_count_is_clamped() {
    let device = device(GraphicsBackendType::OpenGL);
    let queue = graphics_queue(&device);
    let window = HeadlessWindow::new(64, 64);

    let single = device
        .create_swapchain(&queue, &window, &swapchain_descriptor(1))
        .unwrap();

    assert_eq!(single.buffer_count(), 2);
    assert_eq!(single.format(), TextureFormat::Bgra8Unorm);
}
