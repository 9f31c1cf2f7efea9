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

//! Helpers shared by the emulated driver integration tests.

#![allow(dead_code)]

use prism_core::renderer::api::{
    CommandBufferLevel, GraphicsBackendType, QueuePriority, QueueType, ShaderDescriptor, ShaderId,
    ShaderSource, ShaderStage, SwapchainDescriptor, SwapchainMode, TextureFormat,
};
use prism_core::renderer::{CommandBuffer, GraphicsDevice, GraphicsInstance, Queue};
use prism_core::GraphicsSettings;
use prism_infra::graphics::soft::{SoftDevice, SoftInstance};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

pub const BACKENDS: [GraphicsBackendType; 4] = [
    GraphicsBackendType::Vulkan,
    GraphicsBackendType::Dx12,
    GraphicsBackendType::Dx11,
    GraphicsBackendType::OpenGL,
];

pub const SHORT: Duration = Duration::from_millis(30);
pub const LONG: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn settings() -> GraphicsSettings {
    let mut settings = GraphicsSettings::default();
    settings.validation = true;
    settings.swapchain_mode = SwapchainMode::Immediate;
    settings
}

pub fn device(backend: GraphicsBackendType) -> Arc<dyn GraphicsDevice> {
    init_logging();
    SoftInstance::from_settings(backend, &settings())
        .create_device(0)
        .unwrap()
}

pub fn soft(device: &Arc<dyn GraphicsDevice>) -> &SoftDevice {
    device.as_any().downcast_ref::<SoftDevice>().unwrap()
}

pub fn graphics_queue(device: &Arc<dyn GraphicsDevice>) -> Arc<dyn Queue> {
    device
        .create_queue(QueueType::Graphics, QueuePriority::Normal)
        .unwrap()
}

pub fn command_buffer(device: &Arc<dyn GraphicsDevice>) -> Box<dyn CommandBuffer> {
    let mut cb = device
        .create_command_buffer(QueueType::Graphics, CommandBufferLevel::Primary)
        .unwrap();
    cb.begin().unwrap();
    cb
}

pub fn swapchain_descriptor(buffer_count: u32) -> SwapchainDescriptor {
    SwapchainDescriptor {
        format: TextureFormat::Bgra8Unorm,
        buffer_count,
        mode: SwapchainMode::Immediate,
    }
}

/// A vertex and a fragment shader in a source language `backend` accepts.
pub fn shaders(
    device: &Arc<dyn GraphicsDevice>,
    backend: GraphicsBackendType,
) -> (ShaderId, ShaderId) {
    let (vertex, fragment) = match backend {
        GraphicsBackendType::OpenGL => (
            ShaderSource::Glsl(Cow::Borrowed(
                "#version 450\nvoid main() { gl_Position = vec4(0.0, 0.0, 0.0, 1.0); }",
            )),
            ShaderSource::Glsl(Cow::Borrowed(
                "#version 450\nlayout(location = 0) out vec4 color;\n\
                 void main() { color = vec4(1.0); }",
            )),
        ),
        _ => (
            ShaderSource::Hlsl(Cow::Borrowed(
                "float4 main(uint id : SV_VertexID) : SV_Position { return float4(0, 0, 0, 1); }",
            )),
            ShaderSource::Hlsl(Cow::Borrowed(
                "float4 main() : SV_Target { return float4(1, 1, 1, 1); }",
            )),
        ),
    };
    let vertex = device
        .create_shader(&ShaderDescriptor {
            name: Cow::Borrowed("fullscreen_vs"),
            stage: ShaderStage::Vertex,
            source: vertex,
            entry_point: Cow::Borrowed("main"),
        })
        .unwrap();
    let fragment = device
        .create_shader(&ShaderDescriptor {
            name: Cow::Borrowed("solid_fs"),
            stage: ShaderStage::Fragment,
            source: fragment,
            entry_point: Cow::Borrowed("main"),
        })
        .unwrap();
    (vertex, fragment)
}
