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

use crate::math::LinearRgba;
use crate::renderer::api::{
    BufferId, ClearValue, CommandBufferLevel, CommandBufferState, DescriptorSetId,
    GraphicsBackendType, IndexFormat, PipelineId, QueueType, Rect2D, RenderTargetId,
    ResourceState, ShaderStage, TextureId,
};
use crate::renderer::error::RenderError;
use std::any::Any;
use std::fmt::Debug;

/// A recorded sequence of GPU operations.
///
/// Operations are validated and translated to the backend's encoding as they are
/// recorded. Recording calls return nothing: the first misuse is remembered and
/// returned by [`CommandBuffer::end`] (and by the queue if the buffer is submitted
/// while still recording). Later operations are ignored once an error is pending.
///
/// A buffer submitted to a queue can only begin again after that submission retired;
/// applications keep one buffer per frame in flight.
pub trait CommandBuffer: Send + Debug {
    /// The backend that created this buffer.
    fn backend(&self) -> GraphicsBackendType;

    /// The queue class this buffer records for.
    fn queue_type(&self) -> QueueType;

    /// Primary buffer or bundle.
    fn level(&self) -> CommandBufferLevel;

    /// The current lifecycle state.
    fn state(&self) -> CommandBufferState;

    /// Starts recording, discarding previous contents.
    ///
    /// Fails with [`RenderError::CommandBufferInFlight`] if the previous submission of
    /// this buffer has not completed.
    fn begin(&mut self) -> Result<(), RenderError>;

    /// Discards the contents and returns to the initial state. Same restriction as `begin`.
    fn reset(&mut self) -> Result<(), RenderError>;

    /// Stops recording. Returns the first error raised while recording, if any.
    fn end(&mut self) -> Result<(), RenderError>;

    /// Opens a named debug region.
    fn begin_event(&mut self, label: &str);

    /// Closes the innermost debug region.
    fn end_event(&mut self);

    /// Records a state transition barrier.
    fn transition(&mut self, texture: TextureId, before: ResourceState, after: ResourceState);

    /// Binds `target` for drawing and applies `clear`.
    ///
    /// Swapchain targets are moved from `Present` to `RenderTarget` here, and back to
    /// `Present` by [`CommandBuffer::end_render_target`].
    fn begin_render_target(&mut self, target: RenderTargetId, clear: ClearValue);

    /// Unbinds the current render target.
    fn end_render_target(&mut self);

    /// Binds a graphics or compute pipeline.
    fn set_pipeline(&mut self, pipeline: PipelineId);

    /// Binds vertex buffers `(buffer, byte offset)` starting at `first_slot`.
    fn set_vertex_buffers(&mut self, first_slot: u32, buffers: &[(BufferId, u64)]);

    /// Binds an index buffer.
    fn set_index_buffer(&mut self, buffer: BufferId, offset: u64, format: IndexFormat);

    /// Binds a constant buffer to `slot`.
    fn bind_constant_buffer(&mut self, slot: u32, buffer: BufferId);

    /// Binds a descriptor set built for the current pipeline's binding layout.
    ///
    /// Draws and dispatches with a pipeline that declares bindings need one.
    fn set_descriptor_set(&mut self, set: DescriptorSetId);

    /// Sets the scissor rectangles.
    fn set_scissors(&mut self, rects: &[Rect2D]);

    /// Sets the constant used by `BlendMode::ConstantFactor`.
    fn set_blend_factor(&mut self, factor: LinearRgba);

    /// Writes push constants for `stage`.
    fn push_constants(&mut self, stage: ShaderStage, offset: u32, data: &[u8]);

    /// Draws non-indexed primitives.
    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    /// Draws indexed primitives.
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    );

    /// Dispatches compute work groups.
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    /// Copies `size` bytes between buffers.
    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    );

    /// Copies tightly addressed rows from a buffer into a texture mip level.
    fn copy_buffer_to_texture(
        &mut self,
        src: BufferId,
        src_offset: u64,
        bytes_per_row: u32,
        dst: TextureId,
        mip_level: u32,
    );

    /// Writes `data` into a buffer when this point of the stream executes.
    fn update_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);

    /// Fills mip levels 1.. from level 0.
    fn generate_mipmaps(&mut self, texture: TextureId);

    /// Replays a closed bundle. Only explicit backends (D3D12, Vulkan) support bundles.
    fn execute_bundle(&mut self, bundle: &dyn CommandBuffer);

    /// Allows downcasting to the backend's concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Allows mutable downcasting to the backend's concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
