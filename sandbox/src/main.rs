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

// Prism Sandbox
// Renders a triangle through the full frame loop on a headless surface.

use std::borrow::Cow;
use std::mem;
use std::sync::Arc;

use anyhow::{Context, Result};
use prism_core::math::LinearRgba;
use prism_core::platform::{HeadlessWindow, PrismWindow};
use prism_core::renderer::api::*;
use prism_core::renderer::{
    CommandBuffer, CommandBufferRecycler, FrameSync, GraphicsDevice, GraphicsInstance, Swapchain,
};
use prism_core::GraphicsSettings;
use prism_infra::graphics::soft::SoftDevice;

const FRAME_COUNT: u64 = 180;
const RESIZE_AT: u64 = 90;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 3],
}

impl Vertex {
    fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            stride: mem::size_of::<Vertex>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x3,
                    offset: mem::size_of::<[f32; 3]>() as u64,
                },
            ],
        }
    }
}

const VERTICES: &[Vertex] = &[
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

const TRIANGLE_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec3<f32>,
};

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) color: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 1.0);
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(in.color, 1.0);
}
"#;

const TRIANGLE_HLSL: &str = r#"
struct VsOut {
    float4 position : SV_Position;
    float3 color : COLOR0;
};

VsOut vs_main(float3 position : POSITION, float3 color : COLOR) {
    VsOut o;
    o.position = float4(position, 1.0);
    o.color = color;
    return o;
}

float4 fs_main(VsOut i) : SV_Target {
    return float4(i.color, 1.0);
}
"#;

const TRIANGLE_VERT_GLSL: &str = r#"
#version 450
layout(location = 0) in vec3 position;
layout(location = 1) in vec3 color;
layout(location = 0) out vec3 v_color;
void main() {
    v_color = color;
    gl_Position = vec4(position, 1.0);
}
"#;

const TRIANGLE_FRAG_GLSL: &str = r#"
#version 450
layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(v_color, 1.0);
}
"#;

/// Vertex and fragment sources, each with its entry point.
fn triangle_sources(
    driver: DriverKind,
    backend: GraphicsBackendType,
) -> [(ShaderStage, ShaderSource<'static>, &'static str); 2] {
    match (driver, backend) {
        (DriverKind::Hardware, _) => [
            (ShaderStage::Vertex, ShaderSource::Wgsl(Cow::Borrowed(TRIANGLE_WGSL)), "vs_main"),
            (ShaderStage::Fragment, ShaderSource::Wgsl(Cow::Borrowed(TRIANGLE_WGSL)), "fs_main"),
        ],
        (DriverKind::Emulated, GraphicsBackendType::OpenGL) => [
            (ShaderStage::Vertex, ShaderSource::Glsl(Cow::Borrowed(TRIANGLE_VERT_GLSL)), "main"),
            (ShaderStage::Fragment, ShaderSource::Glsl(Cow::Borrowed(TRIANGLE_FRAG_GLSL)), "main"),
        ],
        (DriverKind::Emulated, _) => [
            (ShaderStage::Vertex, ShaderSource::Hlsl(Cow::Borrowed(TRIANGLE_HLSL)), "vs_main"),
            (ShaderStage::Fragment, ShaderSource::Hlsl(Cow::Borrowed(TRIANGLE_HLSL)), "fs_main"),
        ],
    }
}

struct Scene {
    vertex_buffer: BufferId,
    pipeline: PipelineId,
    shaders: Vec<ShaderId>,
}

impl Scene {
    fn new(
        device: &dyn GraphicsDevice,
        settings: &GraphicsSettings,
        format: TextureFormat,
    ) -> Result<Self> {
        log::info!("Sandbox: Initializing GPU resources...");

        let mut shaders = Vec::new();
        for (stage, source, entry_point) in triangle_sources(settings.driver, device.backend()) {
            let id = device
                .create_shader(&ShaderDescriptor {
                    name: Cow::Owned(format!("triangle {stage:?}")),
                    stage,
                    source,
                    entry_point: Cow::Borrowed(entry_point),
                })
                .context("Failed to create shader")?;
            shaders.push(id);
        }

        let vertex_buffer = device
            .create_buffer(&BufferDescriptor::with_contents(
                "Triangle Vertex Buffer",
                BufferUsage::VERTEX,
                bytemuck::cast_slice(VERTICES),
            ))
            .context("Failed to create vertex buffer")?;

        let pipeline = device
            .create_graphics_pipeline(&GraphicsPipelineDescriptor {
                label: Some(Cow::Borrowed("Triangle Pipeline")),
                vertex_shader: shaders[0],
                fragment_shader: Some(shaders[1]),
                vertex_layouts: vec![Vertex::layout()],
                topology: PrimitiveTopology::TriangleList,
                blend: BlendMode::Opaque,
                depth: None,
                color_formats: vec![format],
                depth_format: None,
                push_constant_size: 0,
                bindings: Vec::new(),
            })
            .context("Failed to create render pipeline")?;
        log::info!(" -> Render pipeline created: {:?}", pipeline);

        Ok(Self {
            vertex_buffer,
            pipeline,
            shaders,
        })
    }

    fn record(&self, cb: &mut dyn CommandBuffer, target: RenderTargetId, frame: u64) {
        let t = (frame % 60) as f32 / 60.0;
        cb.begin_event("triangle");
        cb.begin_render_target(target, ClearValue::color(LinearRgba::rgb(0.1 * t, 0.1, 0.2)));
        cb.set_pipeline(self.pipeline);
        cb.set_vertex_buffers(0, &[(self.vertex_buffer, 0)]);
        cb.draw(VERTICES.len() as u32, 1, 0, 0);
        cb.end_render_target();
        cb.end_event();
    }

    fn destroy(self, device: &dyn GraphicsDevice) {
        let results = [
            device.destroy_pipeline(self.pipeline),
            device.destroy_buffer(self.vertex_buffer),
        ];
        let shaders = self.shaders.iter().map(|id| device.destroy_shader(*id));
        for result in results.into_iter().chain(shaders) {
            if let Err(e) = result {
                log::warn!("Sandbox: failed to release a resource: {}", e);
            }
        }
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("wgpu_hal", log::LevelFilter::Error)
        .init();

    let settings = match std::env::args().nth(1) {
        Some(path) => GraphicsSettings::from_file(&path)
            .with_context(|| format!("Failed to load settings from {path}"))?,
        None => GraphicsSettings::default(),
    };
    let timeout = settings.frame_timeout();

    let instance = prism_infra::create_instance(&settings)?;
    let device: Arc<dyn GraphicsDevice> = instance.create_device(settings.adapter_index)?;
    let info = device.adapter_info();
    log::info!("Sandbox: running on \"{}\" ({:?})", info.name, info.backend_type);

    let queue = device.create_queue(QueueType::Graphics, QueuePriority::High)?;
    let window = HeadlessWindow::new(960, 540);
    let mut swapchain =
        match device.create_swapchain(&queue, &window, &settings.swapchain_descriptor()) {
            Ok(swapchain) => Some(swapchain),
            Err(e) => {
                log::warn!("Sandbox: presentation disabled, rendering offscreen: {}", e);
                None
            }
        };
    let format = swapchain
        .as_ref()
        .map_or(settings.swapchain_format, |swapchain| swapchain.format());
    // Without a swapchain, frames go to a fixed-size offscreen target.
    let offscreen = match swapchain {
        Some(_) => None,
        None => {
            let (width, height) = window.inner_size();
            let target = device.create_render_target(&RenderTargetDescriptor::single_color(
                "offscreen",
                width,
                height,
                format,
            ))?;
            let color = device.render_target_info(target)?.color_attachments[0];
            Some((target, color))
        }
    };

    let scene = Scene::new(device.as_ref(), &settings, format)?;
    let event = device.create_gpu_event("frame")?;
    let mut frames = FrameSync::new(event.clone(), settings.swapchain_buffer_count as usize);
    let mut recycler = CommandBufferRecycler::new(QueueType::Graphics, CommandBufferLevel::Primary);
    let mut last_target = None;

    for frame in 0..FRAME_COUNT {
        if frame == RESIZE_AT {
            window.set_inner_size(1280, 720);
            if let Some(swapchain) = swapchain.as_mut() {
                let (width, height) = window.inner_size();
                swapchain.resize(width, height)?;
            }
        }

        if frames.begin_frame(timeout)? == WaitStatus::Timeout {
            log::warn!("Sandbox: frame {} skipped, GPU is {:?} behind", frame, timeout);
            continue;
        }
        let target = match (swapchain.as_mut(), offscreen) {
            (Some(swapchain), _) => match swapchain.prepare_next_frame(timeout)? {
                AcquireStatus::Acquired(_) => swapchain.current_render_target()?,
                AcquireStatus::Timeout => {
                    log::warn!("Sandbox: frame {} skipped, no back buffer", frame);
                    continue;
                }
            },
            (None, Some((target, _))) => target,
            (None, None) => anyhow::bail!("no render target to draw into"),
        };

        let mut cb = recycler.acquire(device.as_ref(), event.as_ref())?;
        cb.begin()?;
        if let Some((_, color)) = offscreen {
            cb.transition(color, ResourceState::Undefined, ResourceState::RenderTarget);
        }
        scene.record(cb.as_mut(), target, frame);
        let present_to = swapchain.as_deref();
        queue.submit_one(cb.as_mut(), Some(event.as_ref()), present_to)?;
        if let Some(swapchain) = present_to {
            queue.present(swapchain, &[])?;
        }
        recycler.release(cb, frames.end_frame());
        last_target = Some(target);
    }

    frames.wait_all(timeout)?;
    device.wait_idle(timeout)?;

    let soft = device.as_any().downcast_ref::<SoftDevice>();
    if let (Some(soft), Some(target)) = (soft, last_target) {
        let color = device.render_target_info(target)?.color_attachments[0];
        let pixels = soft.read_texture(color, 0)?;
        log::info!(
            "Sandbox: last frame is {} bytes, first pixel {:?}",
            pixels.len(),
            pixels.get(..4)
        );
    }
    let stats = device.stats();
    log::info!(
        "Sandbox: {} frames, {} submissions, {} draws, {} presents, \
         {} validation message(s), peak VRAM {} KiB",
        frames.frame_index(),
        stats.submissions,
        stats.draw_calls,
        stats.presents,
        stats.validation_messages,
        stats.vram_peak_bytes / 1024
    );

    drop(swapchain);
    scene.destroy(device.as_ref());
    if let Some((target, _)) = offscreen {
        device.destroy_render_target(target)?;
    }
    Ok(())
}
