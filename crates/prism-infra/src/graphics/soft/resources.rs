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

//! Device-side state of the emulated driver.
//!
//! Every object created by a [`SoftDevice`](super::SoftDevice) holds an
//! `Arc<SoftDeviceShared>`, so the resource table, the VRAM counters and the loss flag
//! outlive the device handle for as long as any queue, event, swapchain or command
//! buffer still needs them.
//!
//! Resource IDs come from a single counter and are never reused. Destroyed IDs are
//! remembered so that the executor can tell a use-after-free apart from a bogus handle.

use prism_core::math::{Extent2D, Extent3D};
use prism_core::renderer::api::{
    BackendHandle, BindingLayoutEntry, BlendMode, BufferDescriptor, BufferId, BufferInfo,
    BufferUsage, DescriptorBinding, DescriptorSetId, DeviceStats, GraphicsAdapterInfo,
    GraphicsBackendType, PipelineId, PipelineKind, RenderTargetDescriptor, RenderTargetId,
    RenderTargetInfo, ResourceState, SamplerId, ShaderId, ShaderStage, TextureDescriptor,
    TextureFormat, TextureId, TextureInfo, TextureUsage, VertexBufferLayout,
};
use prism_core::renderer::{ResourceError, Timeline};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Driver knobs taken from `GraphicsSettings` when the device is created.
#[derive(Debug, Clone)]
pub struct SoftDriverSettings {
    /// Report (and count) non-fatal validation messages.
    pub validation: bool,
    /// Total bytes of emulated device memory.
    pub vram_budget: u64,
    /// Refresh rate used to pace `VerticalSync` presents.
    pub refresh_hz: u32,
}

impl Default for SoftDriverSettings {
    fn default() -> Self {
        Self {
            validation: true,
            vram_budget: 2 * 1024 * 1024 * 1024,
            refresh_hz: 60,
        }
    }
}

#[derive(Debug)]
pub(crate) struct BufferEntry {
    pub(crate) label: String,
    pub(crate) info: BufferInfo,
    pub(crate) data: Vec<u8>,
    pub(crate) mapped: bool,
}

#[derive(Debug)]
pub(crate) struct TextureEntry {
    pub(crate) label: String,
    pub(crate) info: TextureInfo,
    /// State the emulated GPU has reached, updated as commands execute.
    pub(crate) state: ResourceState,
    /// State the CPU has recorded and submitted so far.
    pub(crate) submitted_state: ResourceState,
    /// Tightly packed texels, one vector per mip level.
    pub(crate) mips: Vec<Vec<u8>>,
    /// Attachment textures belong to their render target.
    pub(crate) owner: Option<RenderTargetId>,
    pub(crate) bytes: u64,
}

impl TextureEntry {
    pub(crate) fn mip_extent(&self, level: u32) -> Extent3D {
        self.info.size.mip_level_size(level)
    }
}

#[derive(Debug)]
pub(crate) struct RenderTargetEntry {
    pub(crate) label: String,
    pub(crate) info: RenderTargetInfo,
    /// One view per attachment, colors first.
    pub(crate) views: Vec<usize>,
    pub(crate) swapchain_owned: bool,
}

#[derive(Debug)]
pub(crate) struct SamplerEntry {
    pub(crate) label: String,
}

#[derive(Debug)]
pub(crate) struct ShaderEntry {
    pub(crate) name: String,
    pub(crate) stage: ShaderStage,
    pub(crate) entry_point: String,
}

#[derive(Debug)]
pub(crate) struct PipelineEntry {
    pub(crate) label: String,
    pub(crate) kind: PipelineKind,
    pub(crate) color_formats: Vec<TextureFormat>,
    pub(crate) depth_format: Option<TextureFormat>,
    pub(crate) vertex_layouts: Vec<VertexBufferLayout>,
    pub(crate) blend: BlendMode,
    pub(crate) push_constant_size: u32,
    pub(crate) bindings: Vec<BindingLayoutEntry>,
}

#[derive(Debug)]
pub(crate) struct DescriptorSetEntry {
    pub(crate) label: String,
    /// The layout the set was validated against.
    pub(crate) layout: Vec<BindingLayoutEntry>,
    pub(crate) bindings: Vec<DescriptorBinding>,
}

/// Every live object of one device, keyed by handle.
#[derive(Debug, Default)]
pub(crate) struct ResourceTable {
    next_id: usize,
    freed: HashSet<usize>,
    pub(crate) buffers: HashMap<BufferId, BufferEntry>,
    pub(crate) textures: HashMap<TextureId, TextureEntry>,
    pub(crate) render_targets: HashMap<RenderTargetId, RenderTargetEntry>,
    /// Attachment views and the texture each one looks at.
    pub(crate) views: HashMap<usize, TextureId>,
    pub(crate) samplers: HashMap<SamplerId, SamplerEntry>,
    pub(crate) shaders: HashMap<ShaderId, ShaderEntry>,
    pub(crate) pipelines: HashMap<PipelineId, PipelineEntry>,
    pub(crate) descriptor_sets: HashMap<DescriptorSetId, DescriptorSetEntry>,
}

impl ResourceTable {
    pub(crate) fn allocate_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn retire(&mut self, raw: usize) {
        self.freed.insert(raw);
    }

    pub(crate) fn was_freed(&self, raw: usize) -> bool {
        self.freed.contains(&raw)
    }

    /// Describes why `raw` does not resolve, for fatal execution errors.
    pub(crate) fn missing(&self, kind: &str, raw: usize) -> String {
        if self.was_freed(raw) {
            format!("use after free of {kind} {raw}")
        } else {
            format!("unknown {kind} {raw}")
        }
    }

    pub(crate) fn buffer(&self, id: BufferId) -> Result<&BufferEntry, ResourceError> {
        self.buffers.get(&id).ok_or(ResourceError::NotFound)
    }

    pub(crate) fn texture(&self, id: TextureId) -> Result<&TextureEntry, ResourceError> {
        self.textures.get(&id).ok_or(ResourceError::NotFound)
    }

    pub(crate) fn render_target(
        &self,
        id: RenderTargetId,
    ) -> Result<&RenderTargetEntry, ResourceError> {
        self.render_targets.get(&id).ok_or(ResourceError::NotFound)
    }

    pub(crate) fn pipeline(&self, id: PipelineId) -> Result<&PipelineEntry, ResourceError> {
        self.pipelines.get(&id).ok_or(ResourceError::NotFound)
    }

    pub(crate) fn descriptor_set(
        &self,
        id: DescriptorSetId,
    ) -> Result<&DescriptorSetEntry, ResourceError> {
        self.descriptor_sets.get(&id).ok_or(ResourceError::NotFound)
    }
}

/// Monotonic counters reported through `DeviceStats`.
#[derive(Debug, Default)]
pub(crate) struct SoftCounters {
    pub(crate) submissions: AtomicU64,
    pub(crate) draw_calls: AtomicU64,
    pub(crate) dispatches: AtomicU64,
    pub(crate) presents: AtomicU64,
    pub(crate) validation_messages: AtomicU64,
}

impl SoftCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared by a device and everything it created.
#[derive(Debug)]
pub(crate) struct SoftDeviceShared {
    pub(crate) backend: GraphicsBackendType,
    pub(crate) adapter: GraphicsAdapterInfo,
    pub(crate) settings: SoftDriverSettings,
    pub(crate) counters: SoftCounters,
    /// The single context implicit backends serialize every submission through.
    pub(crate) immediate_context: Mutex<()>,
    table: Mutex<ResourceTable>,
    timelines: Mutex<Vec<Weak<Timeline>>>,
    lost: AtomicBool,
    next_native: AtomicU64,
    vram_allocated: AtomicU64,
    vram_peak: AtomicU64,
    gpu_paused: Mutex<bool>,
    gpu_gate: Condvar,
}

impl SoftDeviceShared {
    pub(crate) fn new(
        backend: GraphicsBackendType,
        adapter: GraphicsAdapterInfo,
        settings: SoftDriverSettings,
    ) -> Self {
        Self {
            backend,
            adapter,
            settings,
            counters: SoftCounters::default(),
            immediate_context: Mutex::new(()),
            table: Mutex::new(ResourceTable::default()),
            timelines: Mutex::new(Vec::new()),
            lost: AtomicBool::new(false),
            next_native: AtomicU64::new(0x1000),
            vram_allocated: AtomicU64::new(0),
            vram_peak: AtomicU64::new(0),
            gpu_paused: Mutex::new(false),
            gpu_gate: Condvar::new(),
        }
    }

    // Table mutations are applied whole before the guard drops, a poisoned lock still
    // holds a consistent table.
    pub(crate) fn lock_table(&self) -> MutexGuard<'_, ResourceTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands out a fresh native handle tagged with this device's backend.
    pub(crate) fn next_native_handle(&self) -> BackendHandle {
        let raw = self.next_native.fetch_add(1, Ordering::Relaxed);
        BackendHandle::for_backend(self.backend, raw)
    }

    // --- Loss propagation ---

    /// Registers a timeline so that device loss releases its waiters.
    pub(crate) fn register_timeline(&self, timeline: &Arc<Timeline>) {
        let mut timelines = self.timelines.lock().unwrap_or_else(PoisonError::into_inner);
        timelines.retain(|weak| weak.strong_count() > 0);
        timelines.push(Arc::downgrade(timeline));
        if self.is_lost() {
            timeline.mark_lost();
        }
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Marks the device lost and fails every pending wait on its timelines.
    pub(crate) fn lose_device(&self, reason: &str) {
        if self.lost.swap(true, Ordering::AcqRel) {
            return;
        }
        log::error!("SoftDevice ({:?}): device lost: {}", self.backend, reason);
        let timelines = self.timelines.lock().unwrap_or_else(PoisonError::into_inner);
        for timeline in timelines.iter().filter_map(Weak::upgrade) {
            timeline.mark_lost();
        }
    }

    /// Reports a non-fatal validation message. Returns `false` when validation is off.
    pub(crate) fn report_validation(&self, message: &str) -> bool {
        if !self.settings.validation {
            return false;
        }
        SoftCounters::bump(&self.counters.validation_messages);
        log::warn!("SoftDevice ({:?}) validation: {}", self.backend, message);
        true
    }

    // --- GPU pause gate ---

    pub(crate) fn set_gpu_paused(&self, paused: bool) {
        *self.gpu_paused.lock().unwrap_or_else(PoisonError::into_inner) = paused;
        self.gpu_gate.notify_all();
    }

    /// Blocks a GPU worker while the device is paused. A worker that is shutting down
    /// goes through so that it can drain.
    pub(crate) fn wait_gpu_gate(&self, shutdown: &AtomicBool) {
        let mut paused = self.gpu_paused.lock().unwrap_or_else(PoisonError::into_inner);
        while *paused && !shutdown.load(Ordering::Acquire) {
            paused = self
                .gpu_gate
                .wait_timeout(paused, Duration::from_millis(10))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    // --- VRAM accounting ---

    fn reserve_vram(&self, bytes: u64) -> Result<(), ResourceError> {
        let budget = self.settings.vram_budget;
        let previous = self
            .vram_allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(bytes).filter(|total| *total <= budget)
            })
            .map_err(|current| ResourceError::OutOfMemory {
                requested: bytes,
                available: budget.saturating_sub(current),
            })?;
        self.vram_peak.fetch_max(previous + bytes, Ordering::AcqRel);
        Ok(())
    }

    /// Zeroed host storage for `bytes` of emulated memory, failing instead of aborting.
    fn allocate_host(bytes: u64) -> Result<Vec<u8>, ResourceError> {
        let out_of_memory = || ResourceError::OutOfMemory {
            requested: bytes,
            available: 0,
        };
        let len = usize::try_from(bytes).map_err(|_| out_of_memory())?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| out_of_memory())?;
        data.resize(len, 0);
        Ok(data)
    }

    fn release_vram(&self, bytes: u64) {
        let _ = self
            .vram_allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub(crate) fn stats(&self) -> DeviceStats {
        let table = self.lock_table();
        DeviceStats {
            buffers: table.buffers.len(),
            textures: table.textures.len(),
            render_targets: table.render_targets.len(),
            pipelines: table.pipelines.len(),
            vram_allocated_bytes: self.vram_allocated.load(Ordering::Acquire),
            vram_peak_bytes: self.vram_peak.load(Ordering::Acquire),
            submissions: self.counters.submissions.load(Ordering::Relaxed),
            draw_calls: self.counters.draw_calls.load(Ordering::Relaxed),
            dispatches: self.counters.dispatches.load(Ordering::Relaxed),
            presents: self.counters.presents.load(Ordering::Relaxed),
            validation_messages: self.counters.validation_messages.load(Ordering::Relaxed),
        }
    }

    // --- Buffers ---

    pub(crate) fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
    ) -> Result<BufferId, ResourceError> {
        let label = descriptor.label.as_deref().unwrap_or("buffer").to_string();
        if descriptor.size == 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "buffer '{label}' has a size of zero"
            )));
        }
        if descriptor.usage.is_empty() {
            return Err(ResourceError::InvalidDescriptor(format!(
                "buffer '{label}' has no usage"
            )));
        }
        let size = descriptor.allocation_size()?;
        if let Some(contents) = descriptor.contents {
            if contents.len() as u64 > size {
                return Err(ResourceError::OutOfBounds);
            }
        }
        // Device memory is reserved before any host memory backs it.
        self.reserve_vram(size)?;
        let data = match Self::allocate_host(size) {
            Ok(mut data) => {
                if let Some(contents) = descriptor.contents {
                    data[..contents.len()].copy_from_slice(contents);
                }
                data
            }
            Err(err) => {
                self.release_vram(size);
                return Err(err);
            }
        };

        let mut table = self.lock_table();
        let id = BufferId(table.allocate_id());
        table.buffers.insert(
            id,
            BufferEntry {
                label: label.clone(),
                info: BufferInfo {
                    requested_size: descriptor.size,
                    size,
                    usage: descriptor.usage,
                },
                data,
                mapped: false,
            },
        );
        drop(table);

        log::info!(
            "SoftDevice: Created buffer '{}' with ID: {:?}, size: {} bytes",
            label,
            id,
            size
        );
        Ok(id)
    }

    pub(crate) fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let mut table = self.lock_table();
        let entry = table.buffers.remove(&id).ok_or(ResourceError::NotFound)?;
        table.retire(id.0);
        drop(table);
        self.release_vram(entry.info.size);
        log::debug!("SoftDevice: Destroyed buffer '{}' with ID: {:?}", entry.label, id);
        Ok(())
    }

    // --- Textures ---

    fn validate_texture(descriptor: &TextureDescriptor) -> Result<(), ResourceError> {
        let size = descriptor.size;
        if size.width == 0 || size.height == 0 || size.depth_or_array_layers == 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "texture extent {}x{}x{} is empty",
                size.width, size.height, size.depth_or_array_layers
            )));
        }
        if descriptor.mip_level_count == 0 || descriptor.mip_level_count > size.max_mip_levels() {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{} mip levels requested, 1..={} allowed",
                descriptor.mip_level_count,
                size.max_mip_levels()
            )));
        }
        if descriptor.usage.is_empty() {
            return Err(ResourceError::InvalidDescriptor(
                "texture has no usage".to_string(),
            ));
        }
        let depth = descriptor.format.is_depth();
        if depth && descriptor.usage.contains(TextureUsage::RENDER_TARGET) {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{:?} cannot be a color render target",
                descriptor.format
            )));
        }
        if !depth && descriptor.usage.contains(TextureUsage::DEPTH_STENCIL) {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{:?} cannot be a depth-stencil target",
                descriptor.format
            )));
        }
        Ok(())
    }

    fn insert_texture(
        &self,
        table: &mut ResourceTable,
        descriptor: &TextureDescriptor,
        initial_state: ResourceState,
        owner: Option<RenderTargetId>,
    ) -> Result<TextureId, ResourceError> {
        Self::validate_texture(descriptor)?;
        let bytes = descriptor.byte_size();
        self.reserve_vram(bytes)?;
        let bpp = u64::from(descriptor.format.bytes_per_pixel());
        let mips = (0..descriptor.mip_level_count)
            .map(|level| {
                let mip = descriptor.size.mip_level_size(level);
                Self::allocate_host(
                    u64::from(mip.width)
                        * u64::from(mip.height)
                        * u64::from(mip.depth_or_array_layers)
                        * bpp,
                )
            })
            .collect::<Result<Vec<_>, _>>();
        let mips = match mips {
            Ok(mips) => mips,
            Err(err) => {
                self.release_vram(bytes);
                return Err(err);
            }
        };
        let id = TextureId(table.allocate_id());
        table.textures.insert(
            id,
            TextureEntry {
                label: descriptor.label.as_deref().unwrap_or("texture").to_string(),
                info: TextureInfo {
                    size: descriptor.size,
                    mip_level_count: descriptor.mip_level_count,
                    format: descriptor.format,
                    usage: descriptor.usage,
                },
                state: initial_state,
                submitted_state: initial_state,
                mips,
                owner,
                bytes,
            },
        );
        Ok(id)
    }

    pub(crate) fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureId, ResourceError> {
        let mut table = self.lock_table();
        let id = self.insert_texture(&mut table, descriptor, ResourceState::Undefined, None)?;
        drop(table);
        log::info!(
            "SoftDevice: Created texture '{}' with ID: {:?}, {}x{} {:?}",
            descriptor.label.as_deref().unwrap_or("texture"),
            id,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.format
        );
        Ok(id)
    }

    fn remove_texture(&self, table: &mut ResourceTable, id: TextureId) -> Option<TextureEntry> {
        let entry = table.textures.remove(&id)?;
        table.retire(id.0);
        self.release_vram(entry.bytes);
        Some(entry)
    }

    pub(crate) fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        let mut table = self.lock_table();
        match table.textures.get(&id) {
            None => return Err(ResourceError::NotFound),
            // Attachments go away with their render target.
            Some(entry) if entry.owner.is_some() => return Err(ResourceError::InvalidHandle),
            Some(_) => {}
        }
        if let Some(entry) = self.remove_texture(&mut table, id) {
            log::debug!("SoftDevice: Destroyed texture '{}' with ID: {:?}", entry.label, id);
        }
        Ok(())
    }

    // --- Render targets ---

    /// Creates a render target, its attachment textures and one view per attachment.
    ///
    /// Nothing is left behind if any attachment fails to allocate.
    pub(crate) fn create_render_target(
        &self,
        descriptor: &RenderTargetDescriptor,
        swapchain_owned: bool,
        initial_state: ResourceState,
    ) -> Result<RenderTargetId, ResourceError> {
        descriptor.validate()?;
        let label = descriptor
            .label
            .as_deref()
            .unwrap_or("render target")
            .to_string();
        let mut table = self.lock_table();
        let id = RenderTargetId(table.allocate_id());

        let mut created: Vec<TextureId> = Vec::new();
        let result = self.create_attachments(
            &mut table,
            id,
            &label,
            descriptor.extent,
            &descriptor.color_formats,
            descriptor.depth_format,
            initial_state,
            &mut created,
        );
        let (color_attachments, depth_attachment) = match result {
            Ok(attachments) => attachments,
            Err(err) => {
                for texture in created {
                    self.remove_texture(&mut table, texture);
                }
                table.retire(id.0);
                return Err(err);
            }
        };

        let mut views = Vec::with_capacity(created.len());
        for texture in color_attachments.iter().chain(depth_attachment.iter()) {
            let view = table.allocate_id();
            table.views.insert(view, *texture);
            views.push(view);
        }
        table.render_targets.insert(
            id,
            RenderTargetEntry {
                label: label.clone(),
                info: RenderTargetInfo {
                    extent: descriptor.extent,
                    color_attachments,
                    depth_attachment,
                    color_formats: descriptor.color_formats.clone(),
                    depth_format: descriptor.depth_format,
                },
                views,
                swapchain_owned,
            },
        );
        drop(table);

        log::info!(
            "SoftDevice: Created render target '{}' with ID: {:?}, {}x{}",
            label,
            id,
            descriptor.extent.width,
            descriptor.extent.height
        );
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_attachments(
        &self,
        table: &mut ResourceTable,
        owner: RenderTargetId,
        label: &str,
        extent: Extent2D,
        color_formats: &[TextureFormat],
        depth_format: Option<TextureFormat>,
        initial_state: ResourceState,
        created: &mut Vec<TextureId>,
    ) -> Result<(Vec<TextureId>, Option<TextureId>), ResourceError> {
        let mut colors = Vec::with_capacity(color_formats.len());
        for (index, format) in color_formats.iter().enumerate() {
            let name = format!("{label} color {index}");
            let descriptor = TextureDescriptor::new_2d(
                &name,
                extent.width,
                extent.height,
                *format,
                TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED | TextureUsage::TRANSFER_SRC,
            );
            let texture = self.insert_texture(table, &descriptor, initial_state, Some(owner))?;
            created.push(texture);
            colors.push(texture);
        }
        let depth = match depth_format {
            Some(format) => {
                let name = format!("{label} depth");
                let descriptor = TextureDescriptor::new_2d(
                    &name,
                    extent.width,
                    extent.height,
                    format,
                    TextureUsage::DEPTH_STENCIL,
                );
                let texture =
                    self.insert_texture(table, &descriptor, ResourceState::Undefined, Some(owner))?;
                created.push(texture);
                Some(texture)
            }
            None => None,
        };
        Ok((colors, depth))
    }

    /// Removes a render target with its views and attachments.
    ///
    /// Swapchain images can only be released by their swapchain.
    pub(crate) fn destroy_render_target(
        &self,
        id: RenderTargetId,
        release_swapchain_images: bool,
    ) -> Result<(), ResourceError> {
        let mut table = self.lock_table();
        match table.render_targets.get(&id) {
            None => return Err(ResourceError::NotFound),
            Some(entry) if entry.swapchain_owned && !release_swapchain_images => {
                return Err(ResourceError::InvalidHandle)
            }
            Some(_) => {}
        }
        let Some(entry) = table.render_targets.remove(&id) else {
            return Err(ResourceError::NotFound);
        };
        table.retire(id.0);
        for view in &entry.views {
            table.views.remove(view);
            table.retire(*view);
        }
        for texture in entry
            .info
            .color_attachments
            .iter()
            .chain(entry.info.depth_attachment.iter())
        {
            self.remove_texture(&mut table, *texture);
        }
        drop(table);
        log::debug!(
            "SoftDevice: Destroyed render target '{}' with ID: {:?}",
            entry.label,
            id
        );
        Ok(())
    }
}

impl Drop for SoftDeviceShared {
    fn drop(&mut self) {
        let table = self.table.get_mut().unwrap_or_else(PoisonError::into_inner);
        let leaked = [
            ("buffers", table.buffers.len()),
            ("textures", table.textures.len()),
            ("render targets", table.render_targets.len()),
            ("samplers", table.samplers.len()),
            ("shaders", table.shaders.len()),
            ("pipelines", table.pipelines.len()),
            ("descriptor sets", table.descriptor_sets.len()),
        ];
        for (kind, count) in leaked.iter().filter(|(_, count)| *count > 0) {
            log::warn!(
                "SoftDevice ({:?}): {} {} still alive at device teardown",
                self.backend,
                count,
                kind
            );
        }
        log::info!("SoftDevice ({:?}): device internals released.", self.backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::renderer::api::RendererDeviceType;

    fn shared(budget: u64) -> SoftDeviceShared {
        SoftDeviceShared::new(
            GraphicsBackendType::Dx12,
            GraphicsAdapterInfo {
                name: "test".to_string(),
                backend_type: GraphicsBackendType::Dx12,
                device_type: RendererDeviceType::Cpu,
                dedicated_memory_bytes: Some(budget),
            },
            SoftDriverSettings {
                vram_budget: budget,
                ..SoftDriverSettings::default()
            },
        )
    }

    #[test]
    fn test_ids_are_never_reused() {
        let shared = shared(1 << 20);
        let desc = BufferDescriptor::new("a", 16, BufferUsage::VERTEX);
        let first = shared.create_buffer(&desc).unwrap();
        shared.destroy_buffer(first).unwrap();
        let second = shared.create_buffer(&desc).unwrap();

        assert_ne!(first, second);
        let table = shared.lock_table();
        assert!(table.was_freed(first.0));
        let expected = format!("use after free of buffer {}", first.0);
        assert_eq!(table.missing("buffer", first.0), expected);
    }

    #[test]
    fn test_vram_budget_is_enforced() {
        let shared = shared(1024);
        let ok = shared
            .create_buffer(&BufferDescriptor::new("fits", 1000, BufferUsage::STORAGE))
            .unwrap();
        let err = shared
            .create_buffer(&BufferDescriptor::new("too big", 100, BufferUsage::STORAGE))
            .unwrap_err();

        assert!(matches!(
            err,
            ResourceError::OutOfMemory {
                requested: 100,
                available: 24
            }
        ));
        shared.destroy_buffer(ok).unwrap();
        let stats = shared.stats();
        assert_eq!(stats.vram_allocated_bytes, 0);
        assert_eq!(stats.vram_peak_bytes, 1000);
    }

    #[test]
    fn test_oversized_buffer_fails_before_allocating() {
        let shared = shared(1 << 20);

        let huge = shared
            .create_buffer(&BufferDescriptor::new("huge", u64::MAX / 2, BufferUsage::VERTEX))
            .unwrap_err();
        let padded = shared
            .create_buffer(&BufferDescriptor::new("padded", u64::MAX - 1, BufferUsage::CONSTANT))
            .unwrap_err();

        assert!(matches!(
            huge,
            ResourceError::OutOfMemory { requested, .. } if requested == u64::MAX / 2
        ));
        assert!(matches!(padded, ResourceError::InvalidDescriptor(_)));
        assert_eq!(shared.stats().vram_allocated_bytes, 0);
        assert_eq!(shared.stats().buffers, 0);
    }

    #[test]
    fn test_render_target_creation_is_all_or_nothing() {
        // Room for the color attachment only.
        let shared = shared(64 * 64 * 4 + 16);
        let mut desc =
            RenderTargetDescriptor::single_color("rt", 64, 64, TextureFormat::Rgba8Unorm);
        desc.depth_format = Some(TextureFormat::Depth32Float);

        let err = shared
            .create_render_target(&desc, false, ResourceState::Undefined)
            .unwrap_err();

        assert!(matches!(err, ResourceError::OutOfMemory { .. }));
        let stats = shared.stats();
        assert_eq!(stats.textures, 0);
        assert_eq!(stats.render_targets, 0);
        assert_eq!(stats.vram_allocated_bytes, 0);
    }

    #[test]
    fn test_swapchain_images_are_protected() {
        let shared = shared(1 << 24);
        let desc = RenderTargetDescriptor::single_color("image", 8, 8, TextureFormat::Bgra8Unorm);
        let rt = shared
            .create_render_target(&desc, true, ResourceState::Present)
            .unwrap();
        let color = shared.lock_table().render_targets[&rt].info.color_attachments[0];

        assert!(matches!(
            shared.destroy_render_target(rt, false),
            Err(ResourceError::InvalidHandle)
        ));
        assert!(matches!(
            shared.destroy_texture(color),
            Err(ResourceError::InvalidHandle)
        ));
        shared.destroy_render_target(rt, true).unwrap();
        assert!(shared.lock_table().views.is_empty());
    }

    #[test]
    fn test_loss_releases_registered_timelines() {
        let shared = shared(1024);
        let timeline = Arc::new(Timeline::new("fence"));
        shared.register_timeline(&timeline);

        shared.lose_device("test");

        assert!(timeline.is_lost());
        let late = Arc::new(Timeline::new("late"));
        shared.register_timeline(&late);
        assert!(late.is_lost());
    }
}
