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

use super::backend::WgpuAdapter;
use super::command::WgpuCommandBuffer;
use super::conversions::IntoWgpu;
use super::event::WgpuGpuEvent;
use super::queue::WgpuQueue;
use super::resources::{
    MappedRange, WgpuBufferEntry, WgpuDescriptorSetEntry, WgpuDeviceShared, WgpuPipelineEntry,
    WgpuResourceTable, WgpuShaderEntry,
};
use super::swapchain::WgpuSwapchain;
use prism_core::platform::PrismWindow;
use prism_core::renderer::api::{
    align_up, deadline_after, remaining_until, BackendHandle, BufferDescriptor, BufferId,
    BufferInfo, BufferMapping, BufferUsage, CommandBufferLevel, ComputePipelineDescriptor,
    DescriptorResource, DescriptorSetDescriptor, DescriptorSetId, DeviceStats, FilterMode,
    GraphicsAdapterInfo, GraphicsBackendType, GraphicsPipelineDescriptor, PipelineId,
    QueuePriority, QueueType, RenderTargetDescriptor, RenderTargetId, RenderTargetInfo,
    SamplerDescriptor, SamplerId, ShaderDescriptor, ShaderId, ShaderSource, ShaderStage,
    SwapchainDescriptor, TextureDescriptor, TextureId, TextureInfo, TextureUsage, WaitStatus,
    DESCRIPTOR_SET_GROUP,
};
use prism_core::renderer::{
    CommandBuffer, GpuEvent, GraphicsDevice, PipelineError, Queue, RenderError, ResourceError,
    ShaderError, Swapchain,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use wgpu::util::DeviceExt;

/// Copy granularity of wgpu buffer operations.
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;
/// Upper bound of sampler anisotropy.
pub const MAX_ANISOTROPY: u16 = 16;

/// The hardware graphics device, driving a real GPU through wgpu.
///
/// Cloning is cheap and yields a handle to the same device.
#[derive(Debug, Clone)]
pub struct WgpuDevice {
    shared: Arc<WgpuDeviceShared>,
    native: BackendHandle,
    queues: Arc<Mutex<HashMap<QueueType, Arc<WgpuQueue>>>>,
}

impl WgpuDevice {
    /// Opens a logical device on a selected adapter.
    pub fn new(adapter: &WgpuAdapter, validation: bool) -> Result<Self, RenderError> {
        let adapter_info = adapter.info();
        let required_features =
            adapter.adapter.features() & wgpu::Features::TEXTURE_FORMAT_16BIT_NORM;
        let (device, queue) =
            pollster::block_on(adapter.adapter.request_device(&wgpu::DeviceDescriptor {
                label: Some("Prism Logical Device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            }))
            .map_err(|e| {
                RenderError::InitializationFailed(format!("Failed to create logical device: {e}"))
            })?;
        log::info!(
            "WgpuDevice: Logical device and queue created on \"{}\" ({:?})",
            adapter_info.name,
            adapter_info.backend_type
        );

        let shared = Arc::new(WgpuDeviceShared::new(
            adapter_info,
            adapter.instance.clone(),
            adapter.adapter.clone(),
            device,
            queue,
            validation,
        ));

        let weak = Arc::downgrade(&shared);
        shared.device.on_uncaptured_error(Box::new(move |e| {
            log::error!("WGPU Uncaptured Error: {e:?}");
            if let Some(shared) = weak.upgrade() {
                shared.report_validation(&e.to_string());
            }
        }));
        let weak = Arc::downgrade(&shared);
        shared
            .device
            .set_device_lost_callback(move |reason, message| {
                if let Some(shared) = weak.upgrade() {
                    shared.lose_device(&format!("{reason:?}: {message}"));
                }
            });

        let native = shared.next_native_handle();
        Ok(Self {
            shared,
            native,
            queues: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// `true` once the device has been lost.
    pub fn is_lost(&self) -> bool {
        self.shared.is_lost()
    }

    fn queues_snapshot(&self) -> Vec<Arc<WgpuQueue>> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn shader_module(
        &self,
        id: ShaderId,
        stage: ShaderStage,
        pipeline_label: &Option<String>,
    ) -> Result<(Arc<wgpu::ShaderModule>, String), ResourceError> {
        let table = self.shared.lock_table();
        match table.shaders.get(&id) {
            Some(entry) if entry.stage == stage => {
                Ok((Arc::clone(&entry.module), entry.entry_point.clone()))
            }
            _ => Err(PipelineError::InvalidShader {
                id,
                pipeline_label: pipeline_label.clone(),
            }
            .into()),
        }
    }

    fn insert_pipeline(&self, entry: WgpuPipelineEntry) -> PipelineId {
        let label = entry.label().to_string();
        let mut table = self.shared.lock_table();
        let id = PipelineId(table.allocate_id());
        table.pipelines.insert(id, entry);
        drop(table);
        log::info!("WgpuDevice: Created pipeline '{}' with ID: {:?}", label, id);
        id
    }

    fn reject_push_constants(size: u32) -> Result<(), ResourceError> {
        if size > 0 {
            return Err(PipelineError::FeatureNotSupported(format!(
                "{size} bytes of push constants, use constant buffers on the hardware driver"
            ))
            .into());
        }
        Ok(())
    }

    /// Copies a 4-aligned buffer range into a mappable staging buffer and reads it back.
    fn read_back(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, ResourceError> {
        let staging = self.shared.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Prism Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .shared
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Prism Readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, size);
        {
            let _order = self.shared.lock_submit();
            self.shared.queue.submit(Some(encoder.finish()));
        }

        let (sender, receiver) = flume::bounded(1);
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        if let Err(e) = self.shared.device.poll(wgpu::PollType::Wait) {
            log::warn!("Failed to poll device during readback: {e:?}");
        }
        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ResourceError::BackendError(format!("map failed: {e}"))),
            Err(_) => {
                return Err(ResourceError::BackendError(
                    "map callback was dropped".to_string(),
                ))
            }
        }
        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }
}

/// A descriptor resource resolved to the wgpu object a bind group entry borrows.
enum BoundResource {
    Buffer(Arc<wgpu::Buffer>),
    View(Arc<wgpu::TextureView>),
    Sampler(Arc<wgpu::Sampler>),
}

fn resolve_descriptor(
    table: &WgpuResourceTable,
    label: &str,
    resource: DescriptorResource,
) -> Result<BoundResource, ResourceError> {
    let lacks = |usage: &str| {
        ResourceError::InvalidDescriptor(format!(
            "'{label}' binds {resource:?}, which lacks {usage} usage"
        ))
    };
    match resource {
        DescriptorResource::ConstantBuffer(id) | DescriptorResource::StorageBuffer(id) => {
            let entry = table.buffer(id)?;
            let (needed, name) = match resource {
                DescriptorResource::ConstantBuffer(_) => (BufferUsage::CONSTANT, "CONSTANT"),
                _ => (BufferUsage::STORAGE, "STORAGE"),
            };
            if !entry.info.usage.contains(needed) {
                return Err(lacks(name));
            }
            Ok(BoundResource::Buffer(Arc::clone(&entry.buffer)))
        }
        DescriptorResource::Texture(id) => {
            let entry = table.texture(id)?;
            if !entry.info.usage.contains(TextureUsage::SAMPLED) {
                return Err(lacks("SAMPLED"));
            }
            let view = entry.view.clone().ok_or_else(|| {
                ResourceError::InvalidDescriptor(format!(
                    "'{label}' binds swapchain image {id:?}, which cannot be sampled"
                ))
            })?;
            Ok(BoundResource::View(view))
        }
        DescriptorResource::Sampler(id) => table
            .samplers
            .get(&id)
            .map(|sampler| BoundResource::Sampler(Arc::clone(sampler)))
            .ok_or(ResourceError::NotFound),
    }
}

fn compile_wgsl(
    device: &wgpu::Device,
    descriptor: &ShaderDescriptor,
    backend: GraphicsBackendType,
) -> Result<wgpu::ShaderModule, ShaderError> {
    let label = descriptor.name.to_string();
    let ShaderSource::Wgsl(text) = &descriptor.source else {
        return Err(ShaderError::UnsupportedSource { label, backend });
    };
    if text.trim().is_empty() {
        return Err(ShaderError::CompilationError {
            label,
            details: "empty shader source".to_string(),
        });
    }
    if descriptor.entry_point.trim().is_empty() || !text.contains(&*descriptor.entry_point) {
        return Err(ShaderError::InvalidEntryPoint {
            label,
            entry_point: descriptor.entry_point.to_string(),
        });
    }
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&label),
        source: wgpu::ShaderSource::Wgsl(text.clone()),
    });
    let info = pollster::block_on(module.get_compilation_info());
    let errors: Vec<String> = info
        .messages
        .iter()
        .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
        .map(|m| m.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(ShaderError::CompilationError {
            label,
            details: errors.join("\n"),
        });
    }
    Ok(module)
}

impl GraphicsDevice for WgpuDevice {
    fn backend(&self) -> GraphicsBackendType {
        self.shared.backend
    }

    fn adapter_info(&self) -> GraphicsAdapterInfo {
        self.shared.adapter_info.clone()
    }

    fn native_handle(&self) -> BackendHandle {
        self.native
    }

    // --- Queues, commands, synchronization ---

    fn create_queue(
        &self,
        queue_type: QueueType,
        priority: QueuePriority,
    ) -> Result<Arc<dyn Queue>, RenderError> {
        if self.shared.is_lost() {
            return Err(RenderError::DeviceLost);
        }
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = queues.get(&queue_type) {
            return Ok(Arc::clone(queue) as Arc<dyn Queue>);
        }
        let queue = Arc::new(WgpuQueue::new(
            Arc::clone(&self.shared),
            queue_type,
            priority,
        ));
        queues.insert(queue_type, Arc::clone(&queue));
        Ok(queue as Arc<dyn Queue>)
    }

    fn create_command_buffer(
        &self,
        queue_type: QueueType,
        level: CommandBufferLevel,
    ) -> Result<Box<dyn CommandBuffer>, RenderError> {
        if self.shared.is_lost() {
            return Err(RenderError::DeviceLost);
        }
        if level == CommandBufferLevel::Bundle && !self.shared.backend.is_explicit() {
            return Err(RenderError::InvalidState(format!(
                "{:?} has no bundle command buffers",
                self.shared.backend
            )));
        }
        Ok(Box::new(WgpuCommandBuffer::new(
            Arc::clone(&self.shared),
            queue_type,
            level,
        )))
    }

    fn create_gpu_event(&self, label: &str) -> Result<Arc<dyn GpuEvent>, RenderError> {
        if self.shared.is_lost() {
            return Err(RenderError::DeviceLost);
        }
        Ok(Arc::new(WgpuGpuEvent::new(Arc::clone(&self.shared), label)))
    }

    fn create_swapchain(
        &self,
        queue: &Arc<dyn Queue>,
        window: &dyn PrismWindow,
        descriptor: &SwapchainDescriptor,
    ) -> Result<Box<dyn Swapchain>, RenderError> {
        if self.shared.is_lost() {
            return Err(RenderError::DeviceLost);
        }
        let swapchain =
            WgpuSwapchain::new(Arc::clone(&self.shared), queue, window, descriptor)?;
        Ok(Box::new(swapchain))
    }

    fn wait_idle(&self, timeout: Duration) -> Result<WaitStatus, RenderError> {
        let deadline = deadline_after(timeout);
        for queue in self.queues_snapshot() {
            let remaining = remaining_until(deadline).unwrap_or(Duration::MAX);
            if queue.wait_idle(remaining)? == WaitStatus::Timeout {
                return Ok(WaitStatus::Timeout);
            }
        }
        Ok(WaitStatus::Signaled)
    }

    // --- Buffers ---

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let label = descriptor.label.as_deref().unwrap_or("buffer").to_string();
        if descriptor.size == 0 || descriptor.usage.is_empty() {
            return Err(ResourceError::InvalidDescriptor(format!(
                "buffer '{label}' needs a size and a usage"
            )));
        }
        let contents = descriptor.contents.unwrap_or_default();
        if contents.len() as u64 > descriptor.size {
            return Err(ResourceError::InvalidDescriptor(format!(
                "buffer '{label}' is {} bytes, initial contents are {}",
                descriptor.size,
                contents.len()
            )));
        }
        let size = descriptor.allocation_size()?;
        let max = self.shared.device.limits().max_buffer_size;
        let padded = align_up(size, COPY_ALIGNMENT)
            .filter(|padded| *padded <= max)
            .ok_or(ResourceError::OutOfMemory {
                requested: size,
                available: max,
            })?;
        let buffer = self.shared.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&label),
            size: padded,
            usage: descriptor.usage.into_wgpu(),
            mapped_at_creation: !contents.is_empty(),
        });
        if !contents.is_empty() {
            buffer.slice(..).get_mapped_range_mut()[..contents.len()].copy_from_slice(contents);
            buffer.unmap();
        }
        self.shared.track_allocation(size);

        let mut table = self.shared.lock_table();
        let id = BufferId(table.allocate_id());
        table.buffers.insert(
            id,
            WgpuBufferEntry {
                label: label.clone(),
                buffer: Arc::new(buffer),
                info: BufferInfo {
                    requested_size: descriptor.size,
                    size,
                    usage: descriptor.usage,
                },
                mapping: None,
            },
        );
        drop(table);
        log::info!(
            "WgpuDevice: Created buffer '{}' with ID: {:?}, size: {} bytes",
            label,
            id,
            size
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let entry = self
            .shared
            .lock_table()
            .buffers
            .remove(&id)
            .ok_or(ResourceError::NotFound)?;
        self.shared.track_release(entry.info.size);
        log::debug!("WgpuDevice: Destroyed buffer '{}' with ID: {:?}", entry.label, id);
        Ok(())
    }

    fn buffer_info(&self, id: BufferId) -> Result<BufferInfo, ResourceError> {
        Ok(self.shared.lock_table().buffer(id)?.info)
    }

    fn map_buffer(
        &self,
        id: BufferId,
        offset: u64,
        size: Option<u64>,
    ) -> Result<BufferMapping, ResourceError> {
        let (buffer, end) = {
            let table = self.shared.lock_table();
            let entry = table.buffer(id)?;
            if entry.mapping.is_some() {
                return Err(ResourceError::AlreadyMapped);
            }
            let size = size.unwrap_or_else(|| entry.info.size.saturating_sub(offset));
            let end = offset
                .checked_add(size)
                .filter(|end| *end <= entry.info.size)
                .ok_or(ResourceError::OutOfBounds)?;
            (Arc::clone(&entry.buffer), end)
        };
        let aligned_offset = offset - offset % COPY_ALIGNMENT;
        let aligned_end = align_up(end, COPY_ALIGNMENT).ok_or(ResourceError::OutOfBounds)?;
        let window = self.read_back(&buffer, aligned_offset, aligned_end - aligned_offset)?;
        let head = (offset - aligned_offset) as usize;
        let tail = (end - aligned_offset) as usize;

        let mut table = self.shared.lock_table();
        let entry = table.buffers.get_mut(&id).ok_or(ResourceError::NotFound)?;
        if entry.mapping.is_some() {
            return Err(ResourceError::AlreadyMapped);
        }
        entry.mapping = Some(MappedRange {
            aligned_offset,
            head: window[..head].to_vec(),
            tail: window[tail..].to_vec(),
        });
        log::trace!(
            "WgpuDevice: Mapped buffer '{}' [{}..{}]",
            entry.label,
            offset,
            end
        );
        Ok(BufferMapping::new(id, offset, window[head..tail].to_vec()))
    }

    fn unmap_buffer(&self, mapping: BufferMapping) -> Result<(), ResourceError> {
        let (id, _, bytes) = mapping.into_parts();
        let (buffer, range) = {
            let mut table = self.shared.lock_table();
            let entry = table.buffers.get_mut(&id).ok_or(ResourceError::NotFound)?;
            let range = entry.mapping.take().ok_or(ResourceError::NotMapped)?;
            (Arc::clone(&entry.buffer), range)
        };
        let mut data = range.head;
        data.extend_from_slice(&bytes);
        data.extend_from_slice(&range.tail);
        self.shared
            .queue
            .write_buffer(&buffer, range.aligned_offset, &data);
        Ok(())
    }

    fn update_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let buffer = {
            let table = self.shared.lock_table();
            let entry = table.buffer(id)?;
            let end = offset
                .checked_add(data.len() as u64)
                .ok_or(ResourceError::OutOfBounds)?;
            if end > entry.info.size {
                return Err(ResourceError::OutOfBounds);
            }
            Arc::clone(&entry.buffer)
        };
        if offset % COPY_ALIGNMENT != 0 || data.len() as u64 % COPY_ALIGNMENT != 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "buffer update at {offset} of {} bytes is not {COPY_ALIGNMENT}-byte aligned",
                data.len()
            )));
        }
        self.shared.queue.write_buffer(&buffer, offset, data);
        Ok(())
    }

    // --- Textures and render targets ---

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError> {
        let mut table = self.shared.lock_table();
        let id = self.shared.insert_texture(&mut table, descriptor, None)?;
        drop(table);
        log::info!(
            "WgpuDevice: Created texture '{}' with ID: {:?}, {:?}",
            descriptor.label.as_deref().unwrap_or("texture"),
            id,
            descriptor.format
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        let mut table = self.shared.lock_table();
        if table.texture(id)?.owner.is_some() {
            return Err(ResourceError::InvalidHandle);
        }
        if let Some(entry) = self.shared.remove_texture(&mut table, id) {
            log::debug!("WgpuDevice: Destroyed texture '{}' with ID: {:?}", entry.label, id);
        }
        Ok(())
    }

    fn texture_info(&self, id: TextureId) -> Result<TextureInfo, ResourceError> {
        Ok(self.shared.lock_table().texture(id)?.info)
    }

    fn write_texture(
        &self,
        id: TextureId,
        mip_level: u32,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), ResourceError> {
        let (texture, info) = {
            let table = self.shared.lock_table();
            let entry = table.texture(id)?;
            if !entry.info.usage.contains(TextureUsage::TRANSFER_DST) {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "texture '{}' was not created with TRANSFER_DST usage",
                    entry.label
                )));
            }
            let texture = entry.texture.clone().ok_or(ResourceError::InvalidHandle)?;
            (texture, entry.info)
        };
        if mip_level >= info.mip_level_count {
            return Err(ResourceError::OutOfBounds);
        }
        let extent = info.size.mip_level_size(mip_level);
        let row_bytes = u64::from(extent.width) * u64::from(info.format.bytes_per_pixel());
        let rows = u64::from(extent.height) * u64::from(extent.depth_or_array_layers);
        let needed = u64::from(bytes_per_row) * (rows - 1) + row_bytes;
        if u64::from(bytes_per_row) < row_bytes || (data.len() as u64) < needed {
            return Err(ResourceError::OutOfBounds);
        }
        self.shared.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(extent.height),
            },
            extent.into_wgpu(),
        );
        Ok(())
    }

    fn create_render_target(
        &self,
        descriptor: &RenderTargetDescriptor,
    ) -> Result<RenderTargetId, ResourceError> {
        self.shared.create_render_target(descriptor, false)
    }

    fn destroy_render_target(&self, id: RenderTargetId) -> Result<(), ResourceError> {
        self.shared.destroy_render_target(id, false)
    }

    fn render_target_info(&self, id: RenderTargetId) -> Result<RenderTargetInfo, ResourceError> {
        Ok(self.shared.lock_table().render_target(id)?.info.clone())
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerId, ResourceError> {
        let label = descriptor
            .label
            .as_deref()
            .unwrap_or("sampler")
            .to_string();
        if descriptor.anisotropy_clamp > MAX_ANISOTROPY {
            return Err(ResourceError::InvalidDescriptor(format!(
                "sampler '{label}' anisotropy {} exceeds {MAX_ANISOTROPY}",
                descriptor.anisotropy_clamp
            )));
        }
        if descriptor.anisotropy_clamp > 1
            && (descriptor.filter != FilterMode::Linear
                || descriptor.mipmap_filter != FilterMode::Linear)
        {
            return Err(ResourceError::InvalidDescriptor(format!(
                "sampler '{label}' uses anisotropy without linear filtering"
            )));
        }
        let address_mode = descriptor.address_mode.into_wgpu();
        let sampler = self.shared.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&label),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: descriptor.filter.into_wgpu(),
            min_filter: descriptor.filter.into_wgpu(),
            mipmap_filter: descriptor.mipmap_filter.into_wgpu(),
            compare: descriptor.compare.map(IntoWgpu::into_wgpu),
            anisotropy_clamp: descriptor.anisotropy_clamp.max(1),
            ..Default::default()
        });
        let mut table = self.shared.lock_table();
        let id = SamplerId(table.allocate_id());
        table.samplers.insert(id, Arc::new(sampler));
        drop(table);
        log::info!("WgpuDevice: Created sampler '{}' with ID: {:?}", label, id);
        Ok(id)
    }

    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError> {
        self.shared
            .lock_table()
            .samplers
            .remove(&id)
            .ok_or(ResourceError::NotFound)?;
        log::debug!("WgpuDevice: Destroyed sampler with ID: {:?}", id);
        Ok(())
    }

    // --- Shaders and pipelines ---

    fn create_shader(&self, descriptor: &ShaderDescriptor) -> Result<ShaderId, ResourceError> {
        let module = match compile_wgsl(&self.shared.device, descriptor, self.shared.backend) {
            Ok(module) => module,
            Err(err) => {
                log::error!("WgpuDevice: {}", err);
                return Err(err.into());
            }
        };
        let mut table = self.shared.lock_table();
        let id = ShaderId(table.allocate_id());
        table.shaders.insert(
            id,
            WgpuShaderEntry {
                name: descriptor.name.to_string(),
                module: Arc::new(module),
                stage: descriptor.stage,
                entry_point: descriptor.entry_point.to_string(),
            },
        );
        drop(table);
        log::info!(
            "WgpuDevice: Created {:?} shader '{}' with ID: {:?}",
            descriptor.stage,
            descriptor.name,
            id
        );
        Ok(id)
    }

    fn destroy_shader(&self, id: ShaderId) -> Result<(), ResourceError> {
        let entry = self
            .shared
            .lock_table()
            .shaders
            .remove(&id)
            .ok_or(ShaderError::NotFound { id })?;
        log::debug!("WgpuDevice: Destroyed shader '{}' with ID: {:?}", entry.name, id);
        Ok(())
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineId, ResourceError> {
        let label = descriptor.label.as_deref().map(str::to_string);
        let (vertex_module, vertex_entry) =
            self.shader_module(descriptor.vertex_shader, ShaderStage::Vertex, &label)?;
        let fragment = descriptor
            .fragment_shader
            .map(|id| self.shader_module(id, ShaderStage::Fragment, &label))
            .transpose()?;
        descriptor.validate()?;
        Self::reject_push_constants(descriptor.push_constant_size)?;

        let attributes: Vec<Vec<wgpu::VertexAttribute>> = descriptor
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: a.format.into_wgpu(),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = descriptor
            .vertex_layouts
            .iter()
            .zip(&attributes)
            .map(|(layout, attributes)| wgpu::VertexBufferLayout {
                array_stride: layout.stride,
                step_mode: layout.step_mode.into_wgpu(),
                attributes,
            })
            .collect();
        let blend = descriptor.blend.into_wgpu();
        let targets: Vec<Option<wgpu::ColorTargetState>> = descriptor
            .color_formats
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: format.into_wgpu(),
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let depth_stencil = descriptor.depth_format.map(|format| wgpu::DepthStencilState {
            format: format.into_wgpu(),
            depth_write_enabled: descriptor.depth.is_some_and(|d| d.write_enabled),
            depth_compare: descriptor
                .depth
                .map(|d| d.compare.into_wgpu())
                .unwrap_or(wgpu::CompareFunction::Always),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self
            .shared
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: label.as_deref(),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some(&vertex_entry),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: fragment.as_ref().map(|(module, entry)| wgpu::FragmentState {
                    module,
                    entry_point: Some(entry),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: descriptor.topology.into_wgpu(),
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        Ok(self.insert_pipeline(WgpuPipelineEntry::Graphics {
            label: label.unwrap_or_else(|| "graphics pipeline".to_string()),
            pipeline: Arc::new(pipeline),
            color_formats: descriptor.color_formats.clone(),
            depth_format: descriptor.depth_format,
            vertex_layouts: descriptor.vertex_layouts.len(),
            bindings: descriptor.bindings.clone(),
        }))
    }

    fn create_compute_pipeline(
        &self,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<PipelineId, ResourceError> {
        let label = descriptor.label.as_deref().map(str::to_string);
        let (module, entry_point) =
            self.shader_module(descriptor.shader, ShaderStage::Compute, &label)?;
        descriptor.validate()?;
        Self::reject_push_constants(descriptor.push_constant_size)?;

        let pipeline = self
            .shared
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: label.as_deref(),
                layout: None,
                module: &module,
                entry_point: Some(&entry_point),
                compilation_options: Default::default(),
                cache: None,
            });
        Ok(self.insert_pipeline(WgpuPipelineEntry::Compute {
            label: label.unwrap_or_else(|| "compute pipeline".to_string()),
            pipeline: Arc::new(pipeline),
            bindings: descriptor.bindings.clone(),
        }))
    }

    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError> {
        let entry = self
            .shared
            .lock_table()
            .pipelines
            .remove(&id)
            .ok_or(PipelineError::InvalidPipeline { id })?;
        log::debug!(
            "WgpuDevice: Destroyed pipeline '{}' with ID: {:?}",
            entry.label(),
            id
        );
        Ok(())
    }

    fn create_descriptor_set(
        &self,
        descriptor: &DescriptorSetDescriptor,
    ) -> Result<DescriptorSetId, ResourceError> {
        let label = descriptor
            .label
            .as_deref()
            .unwrap_or("descriptor set")
            .to_string();
        let (layout, group_layout, resolved) = {
            let table = self.shared.lock_table();
            let pipeline = table.pipeline(descriptor.pipeline)?;
            let layout = pipeline.bindings().to_vec();
            descriptor.validate_against(&layout)?;
            let group_layout = match pipeline {
                WgpuPipelineEntry::Graphics { pipeline, .. } => {
                    pipeline.get_bind_group_layout(DESCRIPTOR_SET_GROUP)
                }
                WgpuPipelineEntry::Compute { pipeline, .. } => {
                    pipeline.get_bind_group_layout(DESCRIPTOR_SET_GROUP)
                }
            };
            let resolved = descriptor
                .bindings
                .iter()
                .map(|b| Ok((b.binding, resolve_descriptor(&table, &label, b.resource)?)))
                .collect::<Result<Vec<_>, ResourceError>>()?;
            (layout, group_layout, resolved)
        };
        let entries: Vec<wgpu::BindGroupEntry> = resolved
            .iter()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: match resource {
                    BoundResource::Buffer(buffer) => buffer.as_entire_binding(),
                    BoundResource::View(view) => wgpu::BindingResource::TextureView(view.as_ref()),
                    BoundResource::Sampler(sampler) => {
                        wgpu::BindingResource::Sampler(sampler.as_ref())
                    }
                },
            })
            .collect();
        let group = self
            .shared
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&label),
                layout: &group_layout,
                entries: &entries,
            });

        let mut table = self.shared.lock_table();
        let id = DescriptorSetId(table.allocate_id());
        table.descriptor_sets.insert(
            id,
            WgpuDescriptorSetEntry {
                label: label.clone(),
                layout,
                group: Arc::new(group),
            },
        );
        drop(table);
        log::info!(
            "WgpuDevice: Created descriptor set '{}' for pipeline {:?} with ID: {:?}",
            label,
            descriptor.pipeline,
            id
        );
        Ok(id)
    }

    fn destroy_descriptor_set(&self, id: DescriptorSetId) -> Result<(), ResourceError> {
        let entry = self
            .shared
            .lock_table()
            .descriptor_sets
            .remove(&id)
            .ok_or(ResourceError::NotFound)?;
        log::debug!(
            "WgpuDevice: Destroyed descriptor set '{}' with ID: {:?}",
            entry.label,
            id
        );
        Ok(())
    }

    // --- Introspection ---

    fn stats(&self) -> DeviceStats {
        self.shared.stats()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
