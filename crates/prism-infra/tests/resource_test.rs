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

//! Integration tests for resources and command recording on the emulated driver.

mod common;

use common::{command_buffer, device, graphics_queue, soft, BACKENDS, LONG};
use prism_core::renderer::api::{
    BufferDescriptor, BufferUsage, ClearValue, CommandBufferLevel, CommandBufferState,
    GraphicsBackendType, QueuePriority, QueueType, RenderTargetDescriptor, TextureDescriptor,
    TextureFormat, TextureUsage, CONSTANT_BUFFER_ALIGNMENT,
};
use prism_core::renderer::{RenderError, ResourceError};

#[test]
fn test_constant_buffers_are_padded_to_256_bytes() {
    for backend in BACKENDS {
        let device = device(backend);
        for (requested, allocated) in [(1, 256), (100, 256), (256, 256), (257, 512)] {
            let id = device
                .create_buffer(&BufferDescriptor::new(
                    "constants",
                    requested,
                    BufferUsage::CONSTANT,
                ))
                .unwrap();
            let info = device.buffer_info(id).unwrap();

            assert_eq!(info.requested_size, requested);
            assert_eq!(info.size, allocated, "{backend:?}");
            assert_eq!(info.size % CONSTANT_BUFFER_ALIGNMENT, 0);
        }
    }
}

#[test]
fn test_vertex_buffers_keep_their_size() {
    let device = device(GraphicsBackendType::Vulkan);
    let id = device
        .create_buffer(&BufferDescriptor::new("vertices", 100, BufferUsage::VERTEX))
        .unwrap();
    assert_eq!(device.buffer_info(id).unwrap().size, 100);
}

#[test]
fn test_buffer_maps_once_at_a_time() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx11);
    let id = device
        .create_buffer(&BufferDescriptor::new("upload", 16, BufferUsage::VERTEX))
        .unwrap();

    // --- ACT ---
    let mut mapping = device.map_buffer(id, 0, None).unwrap();
    let second = device.map_buffer(id, 0, None);
    assert!(mapping.write(&[1, 2, 3, 4]));
    device.unmap_buffer(mapping).unwrap();
    let remapped = device.map_buffer(id, 4, Some(4));

    // --- ASSERT ---
    assert!(matches!(second, Err(ResourceError::AlreadyMapped)));
    let remapped = remapped.unwrap();
    assert_eq!(remapped.offset(), 4);
    assert_eq!(remapped.len(), 4);
    let bytes = soft(&device).read_buffer(id).unwrap();
    assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
}

#[test]
fn test_buffer_contents_are_uploaded_at_creation() {
    let device = device(GraphicsBackendType::OpenGL);
    let data = [9u8; 32];
    let id = device
        .create_buffer(&BufferDescriptor::with_contents("indices", BufferUsage::INDEX, &data))
        .unwrap();

    assert_eq!(soft(&device).read_buffer(id).unwrap(), data.to_vec());
    assert!(matches!(
        device.update_buffer(id, 30, &[0; 4]),
        Err(ResourceError::OutOfBounds)
    ));
}

#[test]
fn test_write_texture_needs_transfer_destination() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let sampled = device
        .create_texture(&TextureDescriptor::new_2d(
            "sampled",
            2,
            2,
            TextureFormat::Rgba8Unorm,
            TextureUsage::SAMPLED,
        ))
        .unwrap();
    let uploadable = device
        .create_texture(&TextureDescriptor::new_2d(
            "uploadable",
            2,
            2,
            TextureFormat::Rgba8Unorm,
            TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
        ))
        .unwrap();
    let pixels: Vec<u8> = (0..16).collect();

    // --- ACT ---
    let rejected = device.write_texture(sampled, 0, &pixels, 8);
    let accepted = device.write_texture(uploadable, 0, &pixels, 8);

    // --- ASSERT ---
    assert!(matches!(rejected, Err(ResourceError::InvalidDescriptor(_))));
    assert!(accepted.is_ok());
    assert_eq!(soft(&device).read_texture(uploadable, 0).unwrap(), pixels);
}

#[test]
fn test_destroyed_handles_are_not_found() {
    let device = device(GraphicsBackendType::Vulkan);
    let id = device
        .create_buffer(&BufferDescriptor::new("scratch", 64, BufferUsage::STORAGE))
        .unwrap();

    device.destroy_buffer(id).unwrap();

    assert!(matches!(device.buffer_info(id), Err(ResourceError::NotFound)));
    assert!(matches!(device.destroy_buffer(id), Err(ResourceError::NotFound)));
}

#[test]
fn test_queue_class_is_created_once() {
    for backend in BACKENDS {
        let device = device(backend);

        let first = device
            .create_queue(QueueType::Compute, QueuePriority::High)
            .unwrap();
        let second = device
            .create_queue(QueueType::Compute, QueuePriority::Normal)
            .unwrap();
        let graphics = graphics_queue(&device);

        assert_eq!(first.native_handle(), second.native_handle());
        assert_eq!(second.priority(), QueuePriority::High);
        assert_ne!(first.native_handle(), graphics.native_handle());
    }
}

#[test]
fn test_recording_error_surfaces_at_end() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let queue = graphics_queue(&device);
    let mut cb = command_buffer(&device);

    // --- ACT ---
    // No render target is open.
    cb.draw(3, 1, 0, 0);
    cb.dispatch(1, 1, 1);
    let ended = cb.end();
    let submitted = queue.submit_one(cb.as_mut(), None, None);

    // --- ASSERT ---
    assert!(matches!(ended, Err(RenderError::InvalidState(_))));
    assert!(matches!(submitted, Err(RenderError::InvalidState(_))));
    assert_eq!(device.stats().submissions, 0);
}

#[test]
fn test_in_flight_command_buffer_cannot_be_rerecorded() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Vulkan);
    let queue = graphics_queue(&device);
    let event = device.create_gpu_event("retire").unwrap();
    let mut cb = command_buffer(&device);
    soft(&device).pause_gpu();
    queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();

    // --- ACT ---
    let while_in_flight = cb.begin();
    let reset_in_flight = cb.reset();
    soft(&device).resume_gpu();
    event.wait(1, LONG).unwrap();
    let after_retire = cb.begin();

    // --- ASSERT ---
    assert!(matches!(while_in_flight, Err(RenderError::CommandBufferInFlight)));
    assert!(matches!(reset_in_flight, Err(RenderError::CommandBufferInFlight)));
    assert!(after_retire.is_ok());
    assert_eq!(cb.state(), CommandBufferState::Recording);
}

#[test]
fn test_transfer_queue_cannot_open_a_render_target() {
    let device = device(GraphicsBackendType::Dx12);
    let target = device
        .create_render_target(&RenderTargetDescriptor::single_color(
            "offscreen",
            64,
            64,
            TextureFormat::Rgba8Unorm,
        ))
        .unwrap();
    let mut cb = device
        .create_command_buffer(QueueType::Transfer, CommandBufferLevel::Primary)
        .unwrap();
    cb.begin().unwrap();

    cb.begin_render_target(target, ClearValue::LOAD);

    assert!(cb.end().is_err());
}
