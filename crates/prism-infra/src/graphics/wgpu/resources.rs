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

//! Device-side state of the hardware driver.
//!
//! wgpu objects are kept behind `Arc`s in an ID-keyed table, the same way the emulated
//! driver keys its CPU-side resources, so both drivers hand out identical handles.

use super::conversions::IntoWgpu;
use prism_core::renderer::api::{
    deadline_after, remaining_until, BackendHandle, BindingLayoutEntry, BufferId, BufferInfo,
    DescriptorSetId, DeviceStats, GraphicsAdapterInfo, GraphicsBackendType, PipelineId,
    RenderTargetDescriptor, RenderTargetId, RenderTargetInfo, SamplerId, ShaderId, ShaderStage,
    TextureDescriptor, TextureFormat, TextureId, TextureInfo, TextureUsage, WaitStatus,
};
use prism_core::renderer::{RenderError, ResourceError, Timeline, TimelineWait};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Longest a CPU wait blocks before polling the device again.
const POLL_SLICE: Duration = Duration::from_millis(2);

/// Host bytes around a mapped range, kept so that unmap can write whole words.
#[derive(Debug)]
pub(crate) struct MappedRange {
    pub(crate) aligned_offset: u64,
    pub(crate) head: Vec<u8>,
    pub(crate) tail: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct WgpuBufferEntry {
    pub(crate) label: String,
    pub(crate) buffer: Arc<wgpu::Buffer>,
    pub(crate) info: BufferInfo,
    pub(crate) mapping: Option<MappedRange>,
}

#[derive(Debug)]
pub(crate) struct WgpuTextureEntry {
    pub(crate) label: String,
    /// `None` for swapchain images, which only exist as a view while acquired.
    pub(crate) texture: Option<Arc<wgpu::Texture>>,
    pub(crate) view: Option<Arc<wgpu::TextureView>>,
    pub(crate) info: TextureInfo,
    pub(crate) owner: Option<RenderTargetId>,
    pub(crate) bytes: u64,
}

#[derive(Debug)]
pub(crate) struct WgpuRenderTargetEntry {
    pub(crate) label: String,
    pub(crate) info: RenderTargetInfo,
    pub(crate) swapchain_owned: bool,
}

#[derive(Debug)]
pub(crate) struct WgpuShaderEntry {
    pub(crate) name: String,
    pub(crate) module: Arc<wgpu::ShaderModule>,
    pub(crate) stage: ShaderStage,
    pub(crate) entry_point: String,
}

#[derive(Debug)]
pub(crate) enum WgpuPipelineEntry {
    Graphics {
        label: String,
        pipeline: Arc<wgpu::RenderPipeline>,
        color_formats: Vec<TextureFormat>,
        depth_format: Option<TextureFormat>,
        vertex_layouts: usize,
        bindings: Vec<BindingLayoutEntry>,
    },
    Compute {
        label: String,
        pipeline: Arc<wgpu::ComputePipeline>,
        bindings: Vec<BindingLayoutEntry>,
    },
}

impl WgpuPipelineEntry {
    pub(crate) fn label(&self) -> &str {
        match self {
            WgpuPipelineEntry::Graphics { label, .. }
            | WgpuPipelineEntry::Compute { label, .. } => label,
        }
    }

    pub(crate) fn bindings(&self) -> &[BindingLayoutEntry] {
        match self {
            WgpuPipelineEntry::Graphics { bindings, .. }
            | WgpuPipelineEntry::Compute { bindings, .. } => bindings,
        }
    }
}

#[derive(Debug)]
pub(crate) struct WgpuDescriptorSetEntry {
    pub(crate) label: String,
    pub(crate) layout: Vec<BindingLayoutEntry>,
    pub(crate) group: Arc<wgpu::BindGroup>,
}

/// Every live object of one device, keyed by handle.
#[derive(Debug, Default)]
pub(crate) struct WgpuResourceTable {
    next_id: usize,
    pub(crate) buffers: HashMap<BufferId, WgpuBufferEntry>,
    pub(crate) textures: HashMap<TextureId, WgpuTextureEntry>,
    pub(crate) render_targets: HashMap<RenderTargetId, WgpuRenderTargetEntry>,
    pub(crate) samplers: HashMap<SamplerId, Arc<wgpu::Sampler>>,
    pub(crate) shaders: HashMap<ShaderId, WgpuShaderEntry>,
    pub(crate) pipelines: HashMap<PipelineId, WgpuPipelineEntry>,
    pub(crate) descriptor_sets: HashMap<DescriptorSetId, WgpuDescriptorSetEntry>,
    /// Mipmap blit pipelines, built on first use per format.
    pub(crate) mip_blitters: HashMap<TextureFormat, Arc<wgpu::RenderPipeline>>,
}

impl WgpuResourceTable {
    pub(crate) fn allocate_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn buffer(&self, id: BufferId) -> Result<&WgpuBufferEntry, ResourceError> {
        self.buffers.get(&id).ok_or(ResourceError::NotFound)
    }

    pub(crate) fn texture(&self, id: TextureId) -> Result<&WgpuTextureEntry, ResourceError> {
        self.textures.get(&id).ok_or(ResourceError::NotFound)
    }

    pub(crate) fn render_target(
        &self,
        id: RenderTargetId,
    ) -> Result<&WgpuRenderTargetEntry, ResourceError> {
        self.render_targets.get(&id).ok_or(ResourceError::NotFound)
    }

    pub(crate) fn pipeline(&self, id: PipelineId) -> Result<&WgpuPipelineEntry, ResourceError> {
        self.pipelines
            .get(&id)
            .ok_or(ResourceError::Pipeline(
                prism_core::renderer::PipelineError::InvalidPipeline { id },
            ))
    }

    pub(crate) fn descriptor_set(
        &self,
        id: DescriptorSetId,
    ) -> Result<&WgpuDescriptorSetEntry, ResourceError> {
        self.descriptor_sets.get(&id).ok_or(ResourceError::NotFound)
    }
}

#[derive(Debug, Default)]
pub(crate) struct WgpuCounters {
    pub(crate) submissions: AtomicU64,
    pub(crate) draw_calls: AtomicU64,
    pub(crate) dispatches: AtomicU64,
    pub(crate) presents: AtomicU64,
    pub(crate) validation_messages: AtomicU64,
}

impl WgpuCounters {
    pub(crate) fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

/// State shared by a hardware device and everything it created.
#[derive(Debug)]
pub(crate) struct WgpuDeviceShared {
    pub(crate) backend: GraphicsBackendType,
    pub(crate) adapter_info: GraphicsAdapterInfo,
    pub(crate) instance: wgpu::Instance,
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) counters: WgpuCounters,
    /// Serializes encoding and submission on the single wgpu queue.
    pub(crate) submit_lock: Mutex<()>,
    validation: bool,
    table: Mutex<WgpuResourceTable>,
    timelines: Mutex<Vec<Weak<Timeline>>>,
    lost: AtomicBool,
    next_native: AtomicU64,
    vram_allocated: AtomicU64,
    vram_peak: AtomicU64,
}

impl WgpuDeviceShared {
    pub(crate) fn new(
        adapter_info: GraphicsAdapterInfo,
        instance: wgpu::Instance,
        adapter: wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        validation: bool,
    ) -> Self {
        Self {
            backend: adapter_info.backend_type,
            adapter_info,
            instance,
            adapter,
            device,
            queue,
            counters: WgpuCounters::default(),
            submit_lock: Mutex::new(()),
            validation,
            table: Mutex::new(WgpuResourceTable::default()),
            timelines: Mutex::new(Vec::new()),
            lost: AtomicBool::new(false),
            next_native: AtomicU64::new(1),
            vram_allocated: AtomicU64::new(0),
            vram_peak: AtomicU64::new(0),
        }
    }

    pub(crate) fn lock_table(&self) -> MutexGuard<'_, WgpuResourceTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_submit(&self) -> MutexGuard<'_, ()> {
        self.submit_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Driver objects are only reachable through wgpu, so handles are table indices.
    pub(crate) fn next_native_handle(&self) -> BackendHandle {
        BackendHandle::Wgpu(self.next_native.fetch_add(1, Ordering::Relaxed) as usize)
    }

    // --- Loss propagation ---

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

    pub(crate) fn lose_device(&self, reason: &str) {
        if self.lost.swap(true, Ordering::AcqRel) {
            return;
        }
        log::error!("WgpuDevice ({:?}): device lost: {}", self.backend, reason);
        let timelines = self.timelines.lock().unwrap_or_else(PoisonError::into_inner);
        for timeline in timelines.iter().filter_map(Weak::upgrade) {
            timeline.mark_lost();
        }
    }

    pub(crate) fn report_validation(&self, message: &str) {
        if self.validation {
            WgpuCounters::add(&self.counters.validation_messages, 1);
            log::warn!("WgpuDevice ({:?}) validation: {}", self.backend, message);
        }
    }

    // --- Polling ---

    /// Runs completed-work callbacks without blocking.
    pub(crate) fn poll(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("Failed to poll device (non-blocking): {e:?}");
        }
    }

    /// Waits for a timeline driven by `on_submitted_work_done` callbacks, polling the
    /// device between slices so that the callbacks actually run.
    pub(crate) fn wait_timeline(
        &self,
        timeline: &Timeline,
        value: u64,
        timeout: Duration,
    ) -> Result<WaitStatus, RenderError> {
        let deadline = deadline_after(timeout);
        loop {
            self.poll();
            let slice = match remaining_until(deadline) {
                None => POLL_SLICE,
                Some(left) => left.min(POLL_SLICE),
            };
            match timeline.wait(value, slice) {
                TimelineWait::Reached => return Ok(WaitStatus::Signaled),
                TimelineWait::Lost => return Err(RenderError::DeviceLost),
                TimelineWait::TimedOut => {
                    if matches!(remaining_until(deadline), Some(left) if left.is_zero()) {
                        return Ok(WaitStatus::Timeout);
                    }
                }
            }
        }
    }

    // --- VRAM accounting ---

    pub(crate) fn track_allocation(&self, bytes: u64) {
        let total = self.vram_allocated.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.vram_peak.fetch_max(total, Ordering::AcqRel);
    }

    pub(crate) fn track_release(&self, bytes: u64) {
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

    // --- Textures ---

    /// Allocates a wgpu texture with its default view and registers it.
    pub(crate) fn insert_texture(
        &self,
        table: &mut WgpuResourceTable,
        descriptor: &TextureDescriptor,
        owner: Option<RenderTargetId>,
    ) -> Result<TextureId, ResourceError> {
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
        let mut usage: wgpu::TextureUsages = descriptor.usage.into_wgpu();
        // Mipmap generation renders into every level after the first.
        if descriptor.mip_level_count > 1 && !descriptor.format.is_depth() {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: size.into_wgpu(),
            mip_level_count: descriptor.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: descriptor.format.into_wgpu(),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bytes = descriptor.byte_size();
        self.track_allocation(bytes);

        let id = TextureId(table.allocate_id());
        table.textures.insert(
            id,
            WgpuTextureEntry {
                label: descriptor.label.as_deref().unwrap_or("texture").to_string(),
                texture: Some(Arc::new(texture)),
                view: Some(Arc::new(view)),
                info: TextureInfo {
                    size,
                    mip_level_count: descriptor.mip_level_count,
                    format: descriptor.format,
                    usage: descriptor.usage,
                },
                owner,
                bytes,
            },
        );
        Ok(id)
    }

    pub(crate) fn remove_texture(
        &self,
        table: &mut WgpuResourceTable,
        id: TextureId,
    ) -> Option<WgpuTextureEntry> {
        let entry = table.textures.remove(&id)?;
        self.track_release(entry.bytes);
        Some(entry)
    }

    // --- Render targets ---

    /// Creates a render target and its attachments. Swapchain-owned targets get color
    /// entries without storage; the swapchain fills them in on acquire.
    pub(crate) fn create_render_target(
        &self,
        descriptor: &RenderTargetDescriptor,
        swapchain_owned: bool,
    ) -> Result<RenderTargetId, ResourceError> {
        descriptor.validate()?;
        let label = descriptor
            .label
            .as_deref()
            .unwrap_or("render target")
            .to_string();
        let extent = descriptor.extent;
        let mut table = self.lock_table();
        let id = RenderTargetId(table.allocate_id());

        let mut colors = Vec::with_capacity(descriptor.color_formats.len());
        for (index, format) in descriptor.color_formats.iter().enumerate() {
            let name = format!("{label} color {index}");
            let texture_descriptor = TextureDescriptor::new_2d(
                &name,
                extent.width,
                extent.height,
                *format,
                TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED | TextureUsage::TRANSFER_SRC,
            );
            let texture = if swapchain_owned {
                let texture = TextureId(table.allocate_id());
                table.textures.insert(
                    texture,
                    WgpuTextureEntry {
                        label: name,
                        texture: None,
                        view: None,
                        info: TextureInfo {
                            size: texture_descriptor.size,
                            mip_level_count: 1,
                            format: *format,
                            usage: TextureUsage::RENDER_TARGET,
                        },
                        owner: Some(id),
                        bytes: 0,
                    },
                );
                texture
            } else {
                match self.insert_texture(&mut table, &texture_descriptor, Some(id)) {
                    Ok(texture) => texture,
                    Err(err) => {
                        for texture in colors {
                            self.remove_texture(&mut table, texture);
                        }
                        return Err(err);
                    }
                }
            };
            colors.push(texture);
        }
        let depth = match descriptor.depth_format {
            Some(format) => {
                let name = format!("{label} depth");
                let texture_descriptor = TextureDescriptor::new_2d(
                    &name,
                    extent.width,
                    extent.height,
                    format,
                    TextureUsage::DEPTH_STENCIL,
                );
                match self.insert_texture(&mut table, &texture_descriptor, Some(id)) {
                    Ok(texture) => Some(texture),
                    Err(err) => {
                        for texture in colors {
                            self.remove_texture(&mut table, texture);
                        }
                        return Err(err);
                    }
                }
            }
            None => None,
        };

        table.render_targets.insert(
            id,
            WgpuRenderTargetEntry {
                label: label.clone(),
                info: RenderTargetInfo {
                    extent,
                    color_attachments: colors,
                    depth_attachment: depth,
                    color_formats: descriptor.color_formats.clone(),
                    depth_format: descriptor.depth_format,
                },
                swapchain_owned,
            },
        );
        drop(table);

        log::info!(
            "WgpuDevice: Created render target '{}' with ID: {:?}, {}x{}",
            label,
            id,
            extent.width,
            extent.height
        );
        Ok(id)
    }

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
            "WgpuDevice: Destroyed render target '{}' with ID: {:?}",
            entry.label,
            id
        );
        Ok(())
    }
}

impl Drop for WgpuDeviceShared {
    fn drop(&mut self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Wait) {
            log::warn!("Failed to poll device during shutdown: {e:?}");
        }
        let table = self.table.get_mut().unwrap_or_else(PoisonError::into_inner);
        let leaked = [
            ("buffers", table.buffers.len()),
            ("textures", table.textures.len()),
            ("render targets", table.render_targets.len()),
            ("pipelines", table.pipelines.len()),
            ("descriptor sets", table.descriptor_sets.len()),
        ];
        for (kind, count) in leaked.iter().filter(|(_, count)| *count > 0) {
            log::warn!(
                "WgpuDevice ({:?}): {} {} still alive at device teardown",
                self.backend,
                count,
                kind
            );
        }
        log::info!("WgpuDevice ({:?}): device internals released.", self.backend);
    }
}
