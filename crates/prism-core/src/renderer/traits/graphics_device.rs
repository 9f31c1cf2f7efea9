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

use crate::media::Picture;
use crate::platform::PrismWindow;
use crate::renderer::api::{
    BackendHandle, BufferDescriptor, BufferId, BufferInfo, BufferMapping, CommandBufferLevel,
    ComputePipelineDescriptor, DescriptorSetDescriptor, DescriptorSetId, DeviceStats,
    GraphicsAdapterInfo, GraphicsBackendType, GraphicsPipelineDescriptor, PipelineId,
    QueuePriority, QueueType, RenderTargetDescriptor, RenderTargetId, RenderTargetInfo,
    SamplerDescriptor, SamplerId, ShaderDescriptor, ShaderId, SwapchainDescriptor,
    TextureDescriptor, TextureId, TextureInfo, WaitStatus,
};
use crate::renderer::error::{RenderError, ResourceError};
use crate::renderer::traits::{CommandBuffer, GpuEvent, Queue, Swapchain};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Defines the interface for a graphics device: the factory of every GPU object.
///
/// GPU resources are referenced through opaque IDs. Creation either returns a fully
/// built object or an error; nothing partially built is ever handed out. Objects created
/// by a device keep its internals alive, so the device cannot be torn down underneath
/// them.
pub trait GraphicsDevice: Send + Sync + Debug {
    /// The backend implementing this device.
    fn backend(&self) -> GraphicsBackendType;

    /// Information about the adapter the device was created on.
    fn adapter_info(&self) -> GraphicsAdapterInfo;

    /// The native logical device.
    fn native_handle(&self) -> BackendHandle;

    // --- Queues, commands, synchronization ---

    /// Returns the device's queue of class `queue_type`, creating it on first request.
    ///
    /// The device keeps one queue per class: asking twice returns the same queue, and the
    /// priority of the first request wins.
    fn create_queue(
        &self,
        queue_type: QueueType,
        priority: QueuePriority,
    ) -> Result<Arc<dyn Queue>, RenderError>;

    /// Creates a command buffer recording for queues of class `queue_type`.
    fn create_command_buffer(
        &self,
        queue_type: QueueType,
        level: CommandBufferLevel,
    ) -> Result<Box<dyn CommandBuffer>, RenderError>;

    /// Creates a GPU event starting at value zero.
    fn create_gpu_event(&self, label: &str) -> Result<Arc<dyn GpuEvent>, RenderError>;

    /// Creates a swapchain presenting through `queue` to `window`.
    ///
    /// ## Arguments
    ///
    /// * `queue`: The queue that renders to and presents the back buffers. It must be a
    ///   graphics queue; resizes wait on it.
    /// * `window`: The target window. Its inner size gives the initial extent.
    /// * `descriptor`: Format, buffer count and pacing.
    fn create_swapchain(
        &self,
        queue: &Arc<dyn Queue>,
        window: &dyn PrismWindow,
        descriptor: &SwapchainDescriptor,
    ) -> Result<Box<dyn Swapchain>, RenderError>;

    /// Blocks until every queue of the device is idle.
    fn wait_idle(&self, timeout: Duration) -> Result<WaitStatus, RenderError>;

    // --- Buffers ---

    /// Creates a buffer. Constant buffers are rounded up to 256 bytes.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Destroys a buffer. Work already submitted that uses it is a caller error.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Metadata of a buffer.
    fn buffer_info(&self, id: BufferId) -> Result<BufferInfo, ResourceError>;

    /// Maps `size` bytes (the rest of the buffer if `None`) at `offset` for CPU access.
    ///
    /// A buffer can only be mapped once at a time.
    fn map_buffer(
        &self,
        id: BufferId,
        offset: u64,
        size: Option<u64>,
    ) -> Result<BufferMapping, ResourceError>;

    /// Publishes the mapped bytes and ends the mapping.
    fn unmap_buffer(&self, mapping: BufferMapping) -> Result<(), ResourceError>;

    /// Writes `data` at `offset` immediately, outside of any command stream.
    fn update_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    // --- Textures and render targets ---

    /// Creates a texture.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError>;

    /// Destroys a texture.
    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError>;

    /// Metadata of a texture.
    fn texture_info(&self, id: TextureId) -> Result<TextureInfo, ResourceError>;

    /// Writes a full mip level from rows that are `bytes_per_row` apart in `data`.
    fn write_texture(
        &self,
        id: TextureId,
        mip_level: u32,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), ResourceError>;

    /// Uploads plane `plane` of a decoded picture into `texture`.
    ///
    /// The texture must match the plane's extent and texture format.
    fn upload_picture(
        &self,
        texture: TextureId,
        picture: &Picture,
        plane: usize,
    ) -> Result<(), ResourceError> {
        let layout = picture.plane(plane).ok_or(ResourceError::OutOfBounds)?;
        let data = picture.plane_data(plane).ok_or(ResourceError::OutOfBounds)?;
        let info = self.texture_info(texture)?;
        let expected = picture.format().plane_texture_format(plane);
        if info.size.width != layout.width
            || info.size.height != layout.height
            || Some(info.format) != expected
        {
            return Err(ResourceError::InvalidDescriptor(format!(
                "plane {plane} is {}x{} {:?}, texture is {}x{} {:?}",
                layout.width,
                layout.height,
                expected,
                info.size.width,
                info.size.height,
                info.format
            )));
        }
        let stride = u32::try_from(layout.stride).map_err(|_| ResourceError::OutOfBounds)?;
        self.write_texture(texture, 0, data, stride)
    }

    /// Creates a render target together with its attachment textures.
    fn create_render_target(
        &self,
        descriptor: &RenderTargetDescriptor,
    ) -> Result<RenderTargetId, ResourceError>;

    /// Destroys a render target, its views and its attachment textures.
    fn destroy_render_target(&self, id: RenderTargetId) -> Result<(), ResourceError>;

    /// Metadata of a render target.
    fn render_target_info(&self, id: RenderTargetId) -> Result<RenderTargetInfo, ResourceError>;

    /// Creates a sampler.
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerId, ResourceError>;

    /// Destroys a sampler.
    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError>;

    // --- Shaders and pipelines ---

    /// Compiles a shader. Compilation failure is reported as `ShaderError::CompilationError`.
    fn create_shader(&self, descriptor: &ShaderDescriptor) -> Result<ShaderId, ResourceError>;

    /// Destroys a shader. Pipelines built from it stay valid.
    fn destroy_shader(&self, id: ShaderId) -> Result<(), ResourceError>;

    /// Builds a graphics pipeline for an attachment format set.
    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineId, ResourceError>;

    /// Builds a compute pipeline.
    fn create_compute_pipeline(
        &self,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<PipelineId, ResourceError>;

    /// Destroys a pipeline.
    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError>;

    /// Builds a descriptor set filling the binding layout of `descriptor.pipeline`.
    ///
    /// Every binding must be provided once, with a resource of the declared type and
    /// usage. The set may be bound to any pipeline sharing that layout.
    fn create_descriptor_set(
        &self,
        descriptor: &DescriptorSetDescriptor,
    ) -> Result<DescriptorSetId, ResourceError>;

    /// Destroys a descriptor set. The resources it references stay alive.
    fn destroy_descriptor_set(&self, id: DescriptorSetId) -> Result<(), ResourceError>;

    // --- Introspection ---

    /// A snapshot of the device counters.
    fn stats(&self) -> DeviceStats;

    /// Allows downcasting to the backend's concrete type.
    fn as_any(&self) -> &dyn Any;
}
