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

use super::command::SoftCommandBuffer;
use super::event::SoftGpuEvent;
use super::executor;
use super::queue::SoftQueue;
use super::resources::{
    DescriptorSetEntry, PipelineEntry, ResourceTable, SamplerEntry, ShaderEntry,
    SoftDeviceShared, SoftDriverSettings,
};
use super::swapchain::SoftSwapchain;
use prism_core::math::Extent2D;
use prism_core::platform::PrismWindow;
use prism_core::renderer::api::{
    deadline_after, remaining_until, BackendHandle, BufferDescriptor, BufferId, BufferInfo,
    BufferMapping, BufferUsage, CommandBufferLevel, ComputePipelineDescriptor,
    DescriptorResource, DescriptorSetDescriptor, DescriptorSetId, DeviceStats, FilterMode,
    GraphicsAdapterInfo, GraphicsBackendType, GraphicsPipelineDescriptor, PipelineId,
    PipelineKind, QueuePriority, QueueType, RenderTargetDescriptor, RenderTargetId,
    RenderTargetInfo, ResourceState, SamplerDescriptor, SamplerId, ShaderDescriptor, ShaderId,
    ShaderSource, ShaderStage, SwapchainDescriptor, TextureDescriptor, TextureId, TextureInfo,
    TextureUsage, WaitStatus, SPIRV_MAGIC,
};
use prism_core::renderer::{
    CommandBuffer, GpuEvent, GraphicsDevice, PipelineError, Queue, RenderError, ResourceError,
    ShaderError, Swapchain,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Upper bound of push constant data a pipeline may declare.
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 256;
/// Upper bound of sampler anisotropy.
pub const MAX_ANISOTROPY: u16 = 16;

/// The emulated graphics device.
///
/// Cloning is cheap and yields a handle to the same device.
#[derive(Debug, Clone)]
pub struct SoftDevice {
    shared: Arc<SoftDeviceShared>,
    native: BackendHandle,
    queues: Arc<Mutex<HashMap<QueueType, Arc<SoftQueue>>>>,
}

impl SoftDevice {
    /// Creates a device emulating `backend` on the adapter described by `adapter`.
    pub fn new(
        backend: GraphicsBackendType,
        adapter: GraphicsAdapterInfo,
        settings: SoftDriverSettings,
    ) -> Self {
        let shared = Arc::new(SoftDeviceShared::new(backend, adapter, settings));
        let native = shared.next_native_handle();
        log::info!(
            "SoftDevice: Created {:?} device on '{}' ({:?} sync, validation {})",
            backend,
            shared.adapter.name,
            backend.sync_model(),
            if shared.settings.validation { "on" } else { "off" }
        );
        Self {
            shared,
            native,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `true` once the device has been lost.
    pub fn is_lost(&self) -> bool {
        self.shared.is_lost()
    }

    /// Holds every GPU thread of the device before its next piece of work, as a stalled
    /// GPU would. Implicit backends execute inline and are not affected.
    pub fn pause_gpu(&self) {
        log::debug!("SoftDevice ({:?}): GPU paused", self.shared.backend);
        self.shared.set_gpu_paused(true);
    }

    /// Releases GPU threads held by [`SoftDevice::pause_gpu`].
    pub fn resume_gpu(&self) {
        log::debug!("SoftDevice ({:?}): GPU resumed", self.shared.backend);
        self.shared.set_gpu_paused(false);
    }

    /// Reads back the whole contents of a buffer as the GPU sees them.
    pub fn read_buffer(&self, id: BufferId) -> Result<Vec<u8>, ResourceError> {
        Ok(self.shared.lock_table().buffer(id)?.data.clone())
    }

    /// Reads back one mip level of a texture, rows tightly packed.
    pub fn read_texture(&self, id: TextureId, mip_level: u32) -> Result<Vec<u8>, ResourceError> {
        let table = self.shared.lock_table();
        table
            .texture(id)?
            .mips
            .get(mip_level as usize)
            .cloned()
            .ok_or(ResourceError::OutOfBounds)
    }

    /// The state a texture is in after everything executed so far.
    pub fn texture_state(&self, id: TextureId) -> Result<ResourceState, ResourceError> {
        Ok(self.shared.lock_table().texture(id)?.state)
    }

    fn queues_snapshot(&self) -> Vec<Arc<SoftQueue>> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    // --- Shader and pipeline validation ---

    /// Checks that the backend can consume `source` and that it looks well formed.
    fn compile(&self, descriptor: &ShaderDescriptor) -> Result<(), ShaderError> {
        let label = descriptor.name.to_string();
        let accepted = match (self.shared.backend, &descriptor.source) {
            (GraphicsBackendType::Vulkan, ShaderSource::SpirV(_))
            | (GraphicsBackendType::Vulkan, ShaderSource::Hlsl(_))
            | (GraphicsBackendType::Vulkan, ShaderSource::Glsl(_))
            | (GraphicsBackendType::Dx12, ShaderSource::Hlsl(_))
            | (GraphicsBackendType::Dx12, ShaderSource::Dxil(_))
            | (GraphicsBackendType::Dx11, ShaderSource::Hlsl(_))
            | (GraphicsBackendType::Dx11, ShaderSource::Dxil(_))
            | (GraphicsBackendType::OpenGL, ShaderSource::Glsl(_)) => true,
            _ => false,
        };
        if !accepted {
            return Err(ShaderError::UnsupportedSource {
                label,
                backend: self.shared.backend,
            });
        }
        if descriptor.source.is_empty() {
            return Err(ShaderError::CompilationError {
                label,
                details: "empty shader source".to_string(),
            });
        }
        if descriptor.entry_point.trim().is_empty() {
            return Err(ShaderError::InvalidEntryPoint {
                label,
                entry_point: descriptor.entry_point.to_string(),
            });
        }

        match &descriptor.source {
            ShaderSource::SpirV(words) => {
                if words.first() != Some(&SPIRV_MAGIC) {
                    return Err(ShaderError::CompilationError {
                        label,
                        details: "missing SPIR-V magic number".to_string(),
                    });
                }
            }
            ShaderSource::Dxil(bytes) => {
                if !bytes.starts_with(b"DXBC") {
                    return Err(ShaderError::CompilationError {
                        label,
                        details: "not a DXBC container".to_string(),
                    });
                }
            }
            source => {
                let text = source.as_text().unwrap_or_default();
                check_braces(text).map_err(|details| ShaderError::CompilationError {
                    label: label.clone(),
                    details,
                })?;
                if !text.contains(&*descriptor.entry_point) {
                    return Err(ShaderError::InvalidEntryPoint {
                        label,
                        entry_point: descriptor.entry_point.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn shader_stage_check(
        &self,
        id: ShaderId,
        stage: ShaderStage,
        pipeline_label: &Option<String>,
    ) -> Result<(), ResourceError> {
        let table = self.shared.lock_table();
        match table.shaders.get(&id) {
            Some(entry) if entry.stage == stage => Ok(()),
            Some(entry) => {
                log::warn!(
                    "SoftDevice: shader '{}' ({:?}) used as a {:?} shader",
                    entry.name,
                    entry.stage,
                    stage
                );
                Err(PipelineError::InvalidShader {
                    id,
                    pipeline_label: pipeline_label.clone(),
                }
                .into())
            }
            None => Err(PipelineError::InvalidShader {
                id,
                pipeline_label: pipeline_label.clone(),
            }
            .into()),
        }
    }

    fn check_push_constants(label: &Option<String>, size: u32) -> Result<(), ResourceError> {
        if size > MAX_PUSH_CONSTANT_SIZE {
            return Err(PipelineError::FeatureNotSupported(format!(
                "{size} bytes of push constants exceed {MAX_PUSH_CONSTANT_SIZE}"
            ))
            .into());
        }
        if size % 4 != 0 {
            return Err(PipelineError::CompilationFailed {
                label: label.clone(),
                details: format!("push constant size {size} is not a multiple of 4"),
            }
            .into());
        }
        Ok(())
    }

    fn insert_pipeline(&self, entry: PipelineEntry) -> PipelineId {
        let mut table = self.shared.lock_table();
        let id = PipelineId(table.allocate_id());
        table.pipelines.insert(id, entry);
        id
    }
}

/// Resolves one descriptor resource and checks the usage its binding type needs.
fn check_descriptor_resource(
    table: &ResourceTable,
    label: &str,
    resource: DescriptorResource,
) -> Result<(), ResourceError> {
    let missing_usage = match resource {
        DescriptorResource::ConstantBuffer(id) => {
            let usage = table.buffer(id)?.info.usage;
            (!usage.contains(BufferUsage::CONSTANT)).then_some("CONSTANT")
        }
        DescriptorResource::StorageBuffer(id) => {
            let usage = table.buffer(id)?.info.usage;
            (!usage.contains(BufferUsage::STORAGE)).then_some("STORAGE")
        }
        DescriptorResource::Texture(id) => {
            let usage = table.texture(id)?.info.usage;
            (!usage.contains(TextureUsage::SAMPLED)).then_some("SAMPLED")
        }
        DescriptorResource::Sampler(id) => {
            table.samplers.get(&id).ok_or(ResourceError::NotFound)?;
            None
        }
    };
    match missing_usage {
        Some(usage) => Err(ResourceError::InvalidDescriptor(format!(
            "'{label}' binds {resource:?}, which lacks {usage} usage"
        ))),
        None => Ok(()),
    }
}

/// Fails on unbalanced `{}`, `()` or `[]`, the one syntax error every front end catches.
fn check_braces(text: &str) -> Result<(), String> {
    let mut stack = Vec::new();
    for (line, content) in text.lines().enumerate() {
        for c in content.chars() {
            match c {
                '{' | '(' | '[' => stack.push(c),
                '}' | ')' | ']' => {
                    let open = match c {
                        '}' => '{',
                        ')' => '(',
                        _ => '[',
                    };
                    if stack.pop() != Some(open) {
                        return Err(format!("line {}: unexpected '{}'", line + 1, c));
                    }
                }
                _ => {}
            }
        }
    }
    match stack.last() {
        Some(open) => Err(format!("unclosed '{open}' at end of source")),
        None => Ok(()),
    }
}

impl GraphicsDevice for SoftDevice {
    fn backend(&self) -> GraphicsBackendType {
        self.shared.backend
    }

    fn adapter_info(&self) -> GraphicsAdapterInfo {
        self.shared.adapter.clone()
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
            if queue.priority() != priority {
                log::debug!(
                    "SoftDevice: {:?} queue already exists with {:?} priority, {:?} ignored",
                    queue_type,
                    queue.priority(),
                    priority
                );
            }
            return Ok(Arc::clone(queue) as Arc<dyn Queue>);
        }
        let queue = Arc::new(SoftQueue::new(
            Arc::clone(&self.shared),
            queue_type,
            priority,
        )?);
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
        Ok(Box::new(SoftCommandBuffer::new(
            Arc::clone(&self.shared),
            queue_type,
            level,
        )))
    }

    fn create_gpu_event(&self, label: &str) -> Result<Arc<dyn GpuEvent>, RenderError> {
        if self.shared.is_lost() {
            return Err(RenderError::DeviceLost);
        }
        Ok(Arc::new(SoftGpuEvent::new(Arc::clone(&self.shared), label)))
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
        let (width, height) = window.inner_size();
        let swapchain = SoftSwapchain::new(
            Arc::clone(&self.shared),
            queue,
            Extent2D::new(width, height),
            descriptor,
        )?;
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
        self.shared.create_buffer(descriptor)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        self.shared.destroy_buffer(id)
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
        let mut table = self.shared.lock_table();
        let entry = table.buffers.get_mut(&id).ok_or(ResourceError::NotFound)?;
        if entry.mapped {
            return Err(ResourceError::AlreadyMapped);
        }
        let size = size.unwrap_or_else(|| entry.info.size.saturating_sub(offset));
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= entry.info.size)
            .ok_or(ResourceError::OutOfBounds)?;
        let bytes = entry
            .data
            .get(offset as usize..end as usize)
            .ok_or(ResourceError::OutOfBounds)?
            .to_vec();
        entry.mapped = true;
        log::trace!(
            "SoftDevice: Mapped buffer '{}' [{}..{}]",
            entry.label,
            offset,
            end
        );
        Ok(BufferMapping::new(id, offset, bytes))
    }

    fn unmap_buffer(&self, mapping: BufferMapping) -> Result<(), ResourceError> {
        let (id, offset, bytes) = mapping.into_parts();
        let mut table = self.shared.lock_table();
        let entry = table.buffers.get_mut(&id).ok_or(ResourceError::NotFound)?;
        if !entry.mapped {
            return Err(ResourceError::NotMapped);
        }
        let start = offset as usize;
        entry
            .data
            .get_mut(start..start + bytes.len())
            .ok_or(ResourceError::OutOfBounds)?
            .copy_from_slice(&bytes);
        entry.mapped = false;
        Ok(())
    }

    fn update_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut table = self.shared.lock_table();
        let entry = table.buffers.get_mut(&id).ok_or(ResourceError::NotFound)?;
        let start = usize::try_from(offset).map_err(|_| ResourceError::OutOfBounds)?;
        entry
            .data
            .get_mut(start..)
            .and_then(|tail| tail.get_mut(..data.len()))
            .ok_or(ResourceError::OutOfBounds)?
            .copy_from_slice(data);
        Ok(())
    }

    // --- Textures and render targets ---

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError> {
        self.shared.create_texture(descriptor)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        self.shared.destroy_texture(id)
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
        let mut table = self.shared.lock_table();
        let entry = table.textures.get_mut(&id).ok_or(ResourceError::NotFound)?;
        if !entry.info.usage.contains(TextureUsage::TRANSFER_DST) {
            return Err(ResourceError::InvalidDescriptor(format!(
                "texture '{}' was not created with TRANSFER_DST usage",
                entry.label
            )));
        }
        executor::write_texture_rows(entry, mip_level, data, bytes_per_row)
    }

    fn create_render_target(
        &self,
        descriptor: &RenderTargetDescriptor,
    ) -> Result<RenderTargetId, ResourceError> {
        self.shared
            .create_render_target(descriptor, false, ResourceState::Undefined)
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
        let mut table = self.shared.lock_table();
        let id = SamplerId(table.allocate_id());
        table.samplers.insert(
            id,
            SamplerEntry {
                label: label.clone(),
            },
        );
        drop(table);
        log::info!("SoftDevice: Created sampler '{}' with ID: {:?}", label, id);
        Ok(id)
    }

    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError> {
        let mut table = self.shared.lock_table();
        let entry = table.samplers.remove(&id).ok_or(ResourceError::NotFound)?;
        table.retire(id.0);
        log::debug!("SoftDevice: Destroyed sampler '{}' with ID: {:?}", entry.label, id);
        Ok(())
    }

    // --- Shaders and pipelines ---

    fn create_shader(&self, descriptor: &ShaderDescriptor) -> Result<ShaderId, ResourceError> {
        if let Err(err) = self.compile(descriptor) {
            log::error!("SoftDevice: {}", err);
            return Err(err.into());
        }
        let mut table = self.shared.lock_table();
        let id = ShaderId(table.allocate_id());
        table.shaders.insert(
            id,
            ShaderEntry {
                name: descriptor.name.to_string(),
                stage: descriptor.stage,
                entry_point: descriptor.entry_point.to_string(),
            },
        );
        drop(table);
        log::info!(
            "SoftDevice: Created {:?} shader '{}' ({}) with ID: {:?}",
            descriptor.stage,
            descriptor.name,
            descriptor.source.kind_name(),
            id
        );
        Ok(id)
    }

    fn destroy_shader(&self, id: ShaderId) -> Result<(), ResourceError> {
        let mut table = self.shared.lock_table();
        let entry = table
            .shaders
            .remove(&id)
            .ok_or(ShaderError::NotFound { id })?;
        table.retire(id.0);
        log::debug!(
            "SoftDevice: Destroyed shader '{}' ({}) with ID: {:?}",
            entry.name,
            entry.entry_point,
            id
        );
        Ok(())
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineId, ResourceError> {
        let label = descriptor.label.as_deref().map(str::to_string);
        self.shader_stage_check(descriptor.vertex_shader, ShaderStage::Vertex, &label)?;
        if let Some(fragment) = descriptor.fragment_shader {
            self.shader_stage_check(fragment, ShaderStage::Fragment, &label)?;
        }
        descriptor.validate()?;
        Self::check_push_constants(&label, descriptor.push_constant_size)?;

        let display = label.clone().unwrap_or_else(|| "graphics pipeline".to_string());
        let id = self.insert_pipeline(PipelineEntry {
            label: display.clone(),
            kind: PipelineKind::Graphics,
            color_formats: descriptor.color_formats.clone(),
            depth_format: descriptor.depth_format,
            vertex_layouts: descriptor.vertex_layouts.clone(),
            blend: descriptor.blend,
            push_constant_size: descriptor.push_constant_size,
            bindings: descriptor.bindings.clone(),
        });
        log::info!(
            "SoftDevice: Created graphics pipeline '{}' with ID: {:?}",
            display,
            id
        );
        Ok(id)
    }

    fn create_compute_pipeline(
        &self,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<PipelineId, ResourceError> {
        let label = descriptor.label.as_deref().map(str::to_string);
        self.shader_stage_check(descriptor.shader, ShaderStage::Compute, &label)?;
        descriptor.validate()?;
        Self::check_push_constants(&label, descriptor.push_constant_size)?;

        let display = label.unwrap_or_else(|| "compute pipeline".to_string());
        let id = self.insert_pipeline(PipelineEntry {
            label: display.clone(),
            kind: PipelineKind::Compute,
            color_formats: Vec::new(),
            depth_format: None,
            vertex_layouts: Vec::new(),
            blend: Default::default(),
            push_constant_size: descriptor.push_constant_size,
            bindings: descriptor.bindings.clone(),
        });
        log::info!(
            "SoftDevice: Created compute pipeline '{}' with ID: {:?}",
            display,
            id
        );
        Ok(id)
    }

    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError> {
        let mut table = self.shared.lock_table();
        let entry = table
            .pipelines
            .remove(&id)
            .ok_or(PipelineError::InvalidPipeline { id })?;
        table.retire(id.0);
        log::debug!("SoftDevice: Destroyed pipeline '{}' with ID: {:?}", entry.label, id);
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
        let mut table = self.shared.lock_table();
        let layout = table
            .pipelines
            .get(&descriptor.pipeline)
            .ok_or(PipelineError::InvalidPipeline {
                id: descriptor.pipeline,
            })?
            .bindings
            .clone();
        descriptor.validate_against(&layout)?;
        for binding in &descriptor.bindings {
            check_descriptor_resource(&table, &label, binding.resource)?;
        }
        let id = DescriptorSetId(table.allocate_id());
        table.descriptor_sets.insert(
            id,
            DescriptorSetEntry {
                label: label.clone(),
                layout,
                bindings: descriptor.bindings.clone(),
            },
        );
        drop(table);
        log::info!(
            "SoftDevice: Created descriptor set '{}' for pipeline {:?} with ID: {:?}",
            label,
            descriptor.pipeline,
            id
        );
        Ok(id)
    }

    fn destroy_descriptor_set(&self, id: DescriptorSetId) -> Result<(), ResourceError> {
        let mut table = self.shared.lock_table();
        let entry = table
            .descriptor_sets
            .remove(&id)
            .ok_or(ResourceError::NotFound)?;
        table.retire(id.0);
        log::debug!("SoftDevice: Destroyed descriptor set '{}' with ID: {:?}", entry.label, id);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn device(backend: GraphicsBackendType) -> SoftDevice {
        SoftDevice::new(
            backend,
            GraphicsAdapterInfo::default(),
            SoftDriverSettings::default(),
        )
    }

    fn shader<'a>(stage: ShaderStage, source: ShaderSource<'a>) -> ShaderDescriptor<'a> {
        ShaderDescriptor {
            name: Cow::Borrowed("test"),
            stage,
            source,
            entry_point: Cow::Borrowed("main"),
        }
    }

    #[test]
    fn test_braces_must_balance() {
        assert!(check_braces("void main() { if (x) { y[0]; } }").is_ok());
        assert!(check_braces("void main() { ").is_err());
        assert!(check_braces("void main() }").is_err());
    }

    #[test]
    fn test_source_kinds_follow_the_backend() {
        let gl = device(GraphicsBackendType::OpenGL);
        let hlsl = shader(ShaderStage::Vertex, ShaderSource::Hlsl("float4 main() { }".into()));
        assert!(matches!(
            gl.create_shader(&hlsl),
            Err(ResourceError::Shader(ShaderError::UnsupportedSource { .. }))
        ));

        let dx11 = device(GraphicsBackendType::Dx11);
        assert!(dx11.create_shader(&hlsl).is_ok());
    }

    #[test]
    fn test_spirv_needs_its_magic_number() {
        let vk = device(GraphicsBackendType::Vulkan);
        let bad = shader(ShaderStage::Compute, ShaderSource::SpirV(vec![1, 2, 3].into()));
        let good = shader(
            ShaderStage::Compute,
            ShaderSource::SpirV(vec![SPIRV_MAGIC, 0x0001_0000].into()),
        );
        assert!(matches!(
            vk.create_shader(&bad),
            Err(ResourceError::Shader(ShaderError::CompilationError { .. }))
        ));
        assert!(vk.create_shader(&good).is_ok());
    }

    #[test]
    fn test_missing_entry_point_is_rejected() {
        let dx12 = device(GraphicsBackendType::Dx12);
        let mut desc = shader(ShaderStage::Fragment, ShaderSource::Hlsl("float4 ps() { }".into()));
        desc.entry_point = Cow::Borrowed("main");
        assert!(matches!(
            dx12.create_shader(&desc),
            Err(ResourceError::Shader(ShaderError::InvalidEntryPoint { .. }))
        ));
    }

    #[test]
    fn test_pipeline_rejects_wrong_shader_stage() {
        let vk = device(GraphicsBackendType::Vulkan);
        let fragment = vk
            .create_shader(&shader(
                ShaderStage::Fragment,
                ShaderSource::Glsl("void main() { }".into()),
            ))
            .unwrap();

        let result = vk.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(Cow::Borrowed("cs")),
            shader: fragment,
            push_constant_size: 0,
            bindings: Vec::new(),
        });

        assert!(matches!(
            result,
            Err(ResourceError::Pipeline(PipelineError::InvalidShader { .. }))
        ));
    }

    #[test]
    fn test_buffer_update_is_bounds_checked() {
        let dev = device(GraphicsBackendType::Dx12);
        let id = dev
            .create_buffer(&BufferDescriptor::new("b", 16, BufferUsage::VERTEX))
            .unwrap();

        dev.update_buffer(id, 12, &[1, 2, 3, 4]).unwrap();

        assert!(matches!(
            dev.update_buffer(id, 13, &[1, 2, 3, 4]),
            Err(ResourceError::OutOfBounds)
        ));
        assert_eq!(&dev.read_buffer(id).unwrap()[12..], &[1, 2, 3, 4]);
        dev.destroy_buffer(id).unwrap();
    }
}
