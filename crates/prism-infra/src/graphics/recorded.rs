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

//! The driver-independent form of a recorded command stream.
//!
//! Command buffers validate each operation while it is recorded and store it as a
//! [`RecordedCommand`]. The emulated executor and the hardware encoder both replay this
//! list, so a stream means the same thing on every driver.

use prism_core::math::LinearRgba;
use prism_core::renderer::api::{
    BufferId, ClearValue, DescriptorSetId, IndexFormat, PipelineId, Rect2D, RenderTargetId,
    ResourceState, ShaderStage, TextureId,
};

/// One recorded operation, with handles already checked.
#[derive(Debug, Clone)]
pub(crate) enum RecordedCommand {
    BeginEvent(String),
    EndEvent,
    Transition {
        texture: TextureId,
        before: ResourceState,
        after: ResourceState,
    },
    BeginRenderTarget {
        target: RenderTargetId,
        clear: ClearValue,
    },
    EndRenderTarget {
        target: RenderTargetId,
    },
    SetPipeline(PipelineId),
    SetVertexBuffers {
        first_slot: u32,
        buffers: Vec<(BufferId, u64)>,
    },
    SetIndexBuffer {
        buffer: BufferId,
        offset: u64,
        format: IndexFormat,
    },
    BindConstantBuffer {
        slot: u32,
        buffer: BufferId,
    },
    SetDescriptorSet(DescriptorSetId),
    SetScissors(Vec<Rect2D>),
    SetBlendFactor(LinearRgba),
    PushConstants {
        stage: ShaderStage,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: BufferId,
        src_offset: u64,
        bytes_per_row: u32,
        dst: TextureId,
        mip_level: u32,
    },
    UpdateBuffer {
        buffer: BufferId,
        offset: u64,
        data: Vec<u8>,
    },
    GenerateMipmaps(TextureId),
}

