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

//! End-to-end frame tests: offscreen draws, frame pacing, command buffer reuse,
//! async compute and picture uploads.

mod common;

use common::{command_buffer, device, graphics_queue, shaders, soft, BACKENDS, LONG, SHORT};
use prism_core::math::LinearRgba;
use prism_core::media::{Picture, PictureFormat};
use prism_core::renderer::api::{
    BindingLayoutEntry, BindingType, BlendMode, BufferDescriptor, BufferUsage, ClearValue,
    CommandBufferLevel, CommandBufferState, ComputePipelineDescriptor, DescriptorBinding,
    DescriptorResource, DescriptorSetDescriptor, FilterMode, GraphicsBackendType,
    GraphicsPipelineDescriptor, PipelineId, PrimitiveTopology, QueueType, RenderTargetDescriptor,
    ResourceState, SamplerDescriptor, SamplerId, ShaderDescriptor, ShaderSource, ShaderStage,
    TextureDescriptor, TextureFormat, TextureId, TextureUsage, WaitStatus,
};
use prism_core::renderer::{
    AsyncComputeWorker, CommandBufferRecycler, FrameSync, GraphicsDevice, PipelineError,
    RenderError, ResourceError,
};
use std::borrow::Cow;
use std::sync::Arc;

#[test]
fn test_full_hd_draw_on_every_backend() {
    for backend in BACKENDS {
        // --- ARRANGE ---
        let device = device(backend);
        let queue = graphics_queue(&device);
        let event = device.create_gpu_event("scene").unwrap();
        let target = device
            .create_render_target(&RenderTargetDescriptor::single_color(
                "scene",
                1920,
                1080,
                TextureFormat::Rgba8Unorm,
            ))
            .unwrap();
        let color = device.render_target_info(target).unwrap().color_attachments[0];
        let (vertex, fragment) = shaders(&device, backend);
        let pipeline = device
            .create_graphics_pipeline(&GraphicsPipelineDescriptor {
                label: Some(Cow::Borrowed("fullscreen")),
                vertex_shader: vertex,
                fragment_shader: Some(fragment),
                vertex_layouts: Vec::new(),
                topology: PrimitiveTopology::TriangleList,
                blend: BlendMode::Opaque,
                depth: None,
                color_formats: vec![TextureFormat::Rgba8Unorm],
                depth_format: None,
                push_constant_size: 0,
                bindings: Vec::new(),
            })
            .unwrap();

        // --- ACT ---
        let mut cb = command_buffer(&device);
        cb.begin_event("scene");
        cb.transition(color, ResourceState::Undefined, ResourceState::RenderTarget);
        cb.begin_render_target(target, ClearValue::color(LinearRgba::new(0.0, 0.5, 1.0, 1.0)));
        cb.set_pipeline(pipeline);
        cb.draw(3, 1, 0, 0);
        cb.end_render_target();
        cb.transition(color, ResourceState::RenderTarget, ResourceState::ShaderResource);
        cb.end_event();
        queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();
        let status = event.wait_for_sync_point(LONG).unwrap();

        // --- ASSERT ---
        assert_eq!(status, WaitStatus::Signaled, "{backend:?}");
        let stats = device.stats();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.validation_messages, 0);
        assert!(stats.vram_allocated_bytes >= 1920 * 1080 * 4);
        let pixels = soft(&device).read_texture(color, 0).unwrap();
        assert_eq!(pixels.len(), 1920 * 1080 * 4);
        assert_eq!(&pixels[..4], &[0, 128, 255, 255]);
        assert_eq!(&pixels[pixels.len() - 4..], &[0, 128, 255, 255]);
        assert_eq!(
            soft(&device).texture_state(color).unwrap(),
            ResourceState::ShaderResource
        );
    }
}

#[test]
fn test_pipeline_format_must_match_the_render_target() {
    let device = device(GraphicsBackendType::Vulkan);
    let target = device
        .create_render_target(&RenderTargetDescriptor::single_color(
            "hdr",
            64,
            64,
            TextureFormat::Rgba16Float,
        ))
        .unwrap();
    let (vertex, fragment) = shaders(&device, GraphicsBackendType::Vulkan);
    let pipeline = device
        .create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: None,
            vertex_shader: vertex,
            fragment_shader: Some(fragment),
            vertex_layouts: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            blend: BlendMode::AlphaBlend,
            depth: None,
            color_formats: vec![TextureFormat::Rgba8Unorm],
            depth_format: None,
            push_constant_size: 0,
            bindings: Vec::new(),
        })
        .unwrap();
    let mut cb = command_buffer(&device);

    cb.begin_render_target(target, ClearValue::LOAD);
    cb.set_pipeline(pipeline);
    cb.draw(3, 1, 0, 0);
    cb.end_render_target();

    assert!(cb.end().is_err());
}

#[test]
fn test_compute_dispatch_on_the_compute_queue() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let queue = device
        .create_queue(QueueType::Compute, Default::default())
        .unwrap();
    let event = device.create_gpu_event("compute").unwrap();
    let shader = device
        .create_shader(&ShaderDescriptor {
            name: Cow::Borrowed("histogram"),
            stage: ShaderStage::Compute,
            source: ShaderSource::Hlsl(Cow::Borrowed(
                "[numthreads(64, 1, 1)] void main(uint3 id : SV_DispatchThreadID) { }",
            )),
            entry_point: Cow::Borrowed("main"),
        })
        .unwrap();
    let pipeline = device
        .create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(Cow::Borrowed("histogram")),
            shader,
            push_constant_size: 0,
            bindings: Vec::new(),
        })
        .unwrap();

    // --- ACT ---
    let mut cb = device
        .create_command_buffer(QueueType::Compute, CommandBufferLevel::Primary)
        .unwrap();
    cb.begin().unwrap();
    cb.set_pipeline(pipeline);
    cb.dispatch(16, 1, 1);
    queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();
    event.wait_for_sync_point(LONG).unwrap();

    // --- ASSERT ---
    assert_eq!(device.stats().dispatches, 1);
    assert_eq!(cb.state(), CommandBufferState::Completed);
}

#[test]
fn test_frame_sync_blocks_on_the_oldest_slot() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let queue = graphics_queue(&device);
    let event = device.create_gpu_event("frames").unwrap();
    let mut frames = FrameSync::new(event.clone(), 2);
    soft(&device).pause_gpu();

    // --- ACT ---
    for _ in 0..2 {
        assert_eq!(frames.begin_frame(SHORT).unwrap(), WaitStatus::Signaled);
        let mut cb = command_buffer(&device);
        queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();
        frames.end_frame();
    }
    let third_while_paused = frames.begin_frame(SHORT).unwrap();
    soft(&device).resume_gpu();
    let third = frames.begin_frame(LONG).unwrap();

    // --- ASSERT ---
    assert_eq!(third_while_paused, WaitStatus::Timeout);
    assert_eq!(third, WaitStatus::Signaled);
    assert_eq!(frames.current_slot(), 0);
    assert_eq!(frames.frame_index(), 2);
    assert_eq!(frames.slot_value(0), Some(1));
    assert_eq!(frames.slot_value(1), Some(2));
    assert_eq!(frames.wait_all(LONG).unwrap(), WaitStatus::Signaled);
}

#[test]
fn test_recycler_reuses_retired_command_buffers() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Vulkan);
    let queue = graphics_queue(&device);
    let event = device.create_gpu_event("recycle").unwrap();
    let mut recycler = CommandBufferRecycler::new(QueueType::Graphics, CommandBufferLevel::Primary);
    soft(&device).pause_gpu();

    // --- ACT ---
    let mut first = recycler.acquire(device.as_ref(), event.as_ref()).unwrap();
    first.begin().unwrap();
    queue.submit_one(first.as_mut(), Some(event.as_ref()), None).unwrap();
    recycler.release(first, event.sync_point());
    let second = recycler.acquire(device.as_ref(), event.as_ref()).unwrap();
    let allocated_while_busy = recycler.allocated_count();
    soft(&device).resume_gpu();
    event.wait_for_sync_point(LONG).unwrap();
    let reused = recycler.acquire(device.as_ref(), event.as_ref()).unwrap();

    // --- ASSERT ---
    assert_eq!(allocated_while_busy, 2);
    assert_eq!(recycler.allocated_count(), 2);
    assert_eq!(recycler.parked_count(), 0);
    assert_eq!(second.state(), CommandBufferState::Initial);
    assert_eq!(reused.state(), CommandBufferState::Initial);
}

#[test]
fn test_async_compute_reports_completion() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let results = device
        .create_buffer(&BufferDescriptor::new(
            "results",
            64,
            BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
        ))
        .unwrap();
    let worker = AsyncComputeWorker::spawn(device.clone(), QueueType::Compute).unwrap();
    let (sender, receiver) = flume::bounded(1);

    // --- ACT ---
    worker
        .record(move |cb| cb.update_buffer(results, 0, &[42; 64]))
        .unwrap();
    worker.submit().unwrap();
    worker
        .on_completed(move |value| {
            let _ = sender.send(value);
        })
        .unwrap();
    let completed = receiver.recv_timeout(LONG).unwrap();

    // --- ASSERT ---
    assert_eq!(completed.unwrap(), 1);
    assert!(worker.event().completion_value() >= 1);
    assert_eq!(worker.queue().queue_type(), QueueType::Compute);
    assert_eq!(soft(&device).read_buffer(results).unwrap(), vec![42; 64]);
    worker.terminate();
}

#[test]
fn test_async_compute_reports_failed_submissions() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Vulkan);
    let results = device
        .create_buffer(&BufferDescriptor::new(
            "results",
            16,
            BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
        ))
        .unwrap();
    let worker = AsyncComputeWorker::spawn(device.clone(), QueueType::Compute).unwrap();
    let (sender, receiver) = flume::unbounded();

    // --- ACT ---
    // A dispatch without a pipeline fails when the command buffer is closed.
    worker.record(|cb| cb.dispatch(1, 1, 1)).unwrap();
    worker.submit().unwrap();
    let first = sender.clone();
    worker
        .on_completed(move |result| {
            let _ = first.send(result);
        })
        .unwrap();
    worker
        .record(move |cb| cb.update_buffer(results, 0, &[9; 16]))
        .unwrap();
    worker.submit().unwrap();
    worker
        .on_completed(move |result| {
            let _ = sender.send(result);
        })
        .unwrap();
    let failed = receiver.recv_timeout(LONG).unwrap();
    let later = receiver.recv_timeout(LONG).unwrap();
    worker.terminate();

    // --- ASSERT ---
    assert!(matches!(failed, Err(RenderError::SubmissionFailed(_))));
    assert!(matches!(later, Err(RenderError::SubmissionFailed(_))));
    assert_eq!(soft(&device).read_buffer(results).unwrap(), vec![0; 16]);
    assert_eq!(device.stats().submissions, 0);
}

#[test]
fn test_picture_planes_upload_into_matching_textures() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::OpenGL);
    let mut picture = Picture::new(4, 4, PictureFormat::Nv12);
    for (i, byte) in picture.plane_data_mut(0).unwrap().iter_mut().enumerate() {
        *byte = i as u8;
    }
    picture.plane_data_mut(1).unwrap().fill(200);
    let upload = TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST;
    let luma = device
        .create_texture(&TextureDescriptor::new_2d("luma", 4, 4, TextureFormat::R8Unorm, upload))
        .unwrap();
    let chroma = device
        .create_texture(&TextureDescriptor::new_2d("chroma", 2, 2, TextureFormat::Rg8Unorm, upload))
        .unwrap();

    // --- ACT ---
    device.upload_picture(luma, &picture, 0).unwrap();
    device.upload_picture(chroma, &picture, 1).unwrap();
    let swapped = device.upload_picture(luma, &picture, 1);
    let missing = device.upload_picture(luma, &picture, 2);

    // --- ASSERT ---
    assert_eq!(
        soft(&device).read_texture(luma, 0).unwrap(),
        (0..16).collect::<Vec<u8>>()
    );
    assert_eq!(soft(&device).read_texture(chroma, 0).unwrap(), vec![200; 8]);
    assert!(matches!(swapped, Err(ResourceError::InvalidDescriptor(_))));
    assert!(matches!(missing, Err(ResourceError::OutOfBounds)));
}

#[test]
fn test_rgba_picture_round_trips_through_a_texture() {
    let device = device(GraphicsBackendType::Dx11);
    let mut picture = Picture::new(3, 2, PictureFormat::Rgba8);
    picture.plane_data_mut(0).unwrap().fill(77);
    let texture = device
        .create_texture(&TextureDescriptor::new_2d(
            "frame",
            3,
            2,
            TextureFormat::Rgba8Unorm,
            TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
        ))
        .unwrap();

    device.upload_picture(texture, &picture, 0).unwrap();

    assert_eq!(soft(&device).read_texture(texture, 0).unwrap(), vec![77; 24]);
}

fn picture_pipeline(device: &Arc<dyn GraphicsDevice>, backend: GraphicsBackendType) -> PipelineId {
    let (vertex, fragment) = shaders(device, backend);
    device
        .create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: Some(Cow::Borrowed("picture blit")),
            vertex_shader: vertex,
            fragment_shader: Some(fragment),
            vertex_layouts: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            blend: BlendMode::Opaque,
            depth: None,
            color_formats: vec![TextureFormat::Rgba8Unorm],
            depth_format: None,
            push_constant_size: 0,
            bindings: vec![
                BindingLayoutEntry::new(0, BindingType::SampledTexture),
                BindingLayoutEntry::new(1, BindingType::Sampler),
            ],
        })
        .unwrap()
}

fn picture_set(
    pipeline: PipelineId,
    texture: TextureId,
    sampler: SamplerId,
) -> DescriptorSetDescriptor<'static> {
    DescriptorSetDescriptor {
        label: Some(Cow::Borrowed("picture")),
        pipeline,
        bindings: vec![
            DescriptorBinding {
                binding: 0,
                resource: DescriptorResource::Texture(texture),
            },
            DescriptorBinding {
                binding: 1,
                resource: DescriptorResource::Sampler(sampler),
            },
        ],
    }
}

#[test]
fn test_picture_is_sampled_through_a_descriptor_set() {
    for backend in BACKENDS {
        // --- ARRANGE ---
        let device = device(backend);
        let queue = graphics_queue(&device);
        let event = device.create_gpu_event("blit").unwrap();
        let mut picture = Picture::new(4, 4, PictureFormat::Rgba8);
        picture.plane_data_mut(0).unwrap().fill(90);
        let texture = device
            .create_texture(&TextureDescriptor::new_2d(
                "frame",
                4,
                4,
                TextureFormat::Rgba8Unorm,
                TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
            ))
            .unwrap();
        device.upload_picture(texture, &picture, 0).unwrap();
        let sampler = device
            .create_sampler(&SamplerDescriptor {
                label: Some(Cow::Borrowed("linear")),
                filter: FilterMode::Linear,
                ..Default::default()
            })
            .unwrap();
        let target = device
            .create_render_target(&RenderTargetDescriptor::single_color(
                "screen",
                4,
                4,
                TextureFormat::Rgba8Unorm,
            ))
            .unwrap();
        let color = device.render_target_info(target).unwrap().color_attachments[0];
        let pipeline = picture_pipeline(&device, backend);
        let set = device
            .create_descriptor_set(&picture_set(pipeline, texture, sampler))
            .unwrap();

        // --- ACT ---
        let mut unbound = command_buffer(&device);
        unbound.begin_render_target(target, ClearValue::LOAD);
        unbound.set_pipeline(pipeline);
        unbound.draw(3, 1, 0, 0);
        unbound.end_render_target();
        let unbound_result = unbound.end();
        let mut cb = command_buffer(&device);
        cb.transition(color, ResourceState::Undefined, ResourceState::RenderTarget);
        cb.begin_render_target(target, ClearValue::color(LinearRgba::BLACK));
        cb.set_pipeline(pipeline);
        cb.set_descriptor_set(set);
        cb.draw(3, 1, 0, 0);
        cb.end_render_target();
        queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();
        let status = event.wait_for_sync_point(LONG).unwrap();

        // --- ASSERT ---
        assert!(
            matches!(unbound_result, Err(RenderError::InvalidState(_))),
            "{backend:?}"
        );
        assert_eq!(status, WaitStatus::Signaled, "{backend:?}");
        let stats = device.stats();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.validation_messages, 0);
        device.destroy_descriptor_set(set).unwrap();
        assert!(matches!(
            device.destroy_descriptor_set(set),
            Err(ResourceError::NotFound)
        ));
    }
}

#[test]
fn test_descriptor_sets_follow_the_pipeline_layout() {
    // --- ARRANGE ---
    let backend = GraphicsBackendType::Vulkan;
    let device = device(backend);
    let pipeline = picture_pipeline(&device, backend);
    let sampler = device.create_sampler(&SamplerDescriptor::default()).unwrap();
    let sampled = device
        .create_texture(&TextureDescriptor::new_2d(
            "sampled",
            8,
            8,
            TextureFormat::Rgba8Unorm,
            TextureUsage::SAMPLED,
        ))
        .unwrap();
    let upload_only = device
        .create_texture(&TextureDescriptor::new_2d(
            "upload only",
            8,
            8,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TRANSFER_DST,
        ))
        .unwrap();
    let mut partial = picture_set(pipeline, sampled, sampler);
    partial.bindings.pop();
    let mut unknown_pipeline = picture_set(pipeline, sampled, sampler);
    unknown_pipeline.pipeline = PipelineId(usize::MAX);

    // --- ACT ---
    let unsampleable = device.create_descriptor_set(&picture_set(pipeline, upload_only, sampler));
    let incomplete = device.create_descriptor_set(&partial);
    let orphan = device.create_descriptor_set(&unknown_pipeline);
    let valid = device.create_descriptor_set(&picture_set(pipeline, sampled, sampler));

    // --- ASSERT ---
    assert!(matches!(unsampleable, Err(ResourceError::InvalidDescriptor(_))));
    assert!(matches!(incomplete, Err(ResourceError::InvalidDescriptor(_))));
    assert!(matches!(
        orphan,
        Err(ResourceError::Pipeline(PipelineError::InvalidPipeline { .. }))
    ));
    assert!(valid.is_ok());
}

#[test]
fn test_freed_descriptor_resource_loses_the_device() {
    // --- ARRANGE ---
    let device = device(GraphicsBackendType::Dx12);
    let queue = device
        .create_queue(QueueType::Compute, Default::default())
        .unwrap();
    let event = device.create_gpu_event("reduce").unwrap();
    let shader = device
        .create_shader(&ShaderDescriptor {
            name: Cow::Borrowed("reduce"),
            stage: ShaderStage::Compute,
            source: ShaderSource::Hlsl(Cow::Borrowed(
                "RWStructuredBuffer<uint> data : register(u0);\n\
                 [numthreads(64, 1, 1)] void main(uint3 id : SV_DispatchThreadID) { }",
            )),
            entry_point: Cow::Borrowed("main"),
        })
        .unwrap();
    let pipeline = device
        .create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(Cow::Borrowed("reduce")),
            shader,
            push_constant_size: 0,
            bindings: vec![BindingLayoutEntry::new(0, BindingType::StorageBuffer)],
        })
        .unwrap();
    let data = device
        .create_buffer(&BufferDescriptor::new("data", 256, BufferUsage::STORAGE))
        .unwrap();
    let set = device
        .create_descriptor_set(&DescriptorSetDescriptor {
            label: Some(Cow::Borrowed("reduce")),
            pipeline,
            bindings: vec![DescriptorBinding {
                binding: 0,
                resource: DescriptorResource::StorageBuffer(data),
            }],
        })
        .unwrap();
    soft(&device).pause_gpu();
    let mut cb = device
        .create_command_buffer(QueueType::Compute, CommandBufferLevel::Primary)
        .unwrap();
    cb.begin().unwrap();
    cb.set_pipeline(pipeline);
    cb.set_descriptor_set(set);
    cb.dispatch(4, 1, 1);
    queue.submit_one(cb.as_mut(), Some(event.as_ref()), None).unwrap();

    // --- ACT ---
    device.destroy_buffer(data).unwrap();
    soft(&device).resume_gpu();
    let waited = event.wait(1, LONG);

    // --- ASSERT ---
    assert!(matches!(waited, Err(RenderError::DeviceLost)));
    assert!(soft(&device).is_lost());
    assert_eq!(device.stats().dispatches, 0);
}
