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

//! Deferred command recording for the hardware driver.
//!
//! wgpu encoders borrow their resources for the lifetime of a pass, so operations are
//! recorded as [`RecordedCommand`]s first and replayed into an encoder at submission.
//! Recording checks what the replay cannot recover from; everything else is left to
//! wgpu validation.

use super::resources::{WgpuDeviceShared, WgpuPipelineEntry};
use crate::graphics::recorded::RecordedCommand;
use prism_core::math::LinearRgba;
use prism_core::renderer::api::{
    layouts_compatible, BackendHandle, BindingLayoutEntry, BufferId, BufferUsage, ClearValue,
    CommandBufferLevel, CommandBufferState, DescriptorSetId, GraphicsBackendType, IndexFormat,
    PipelineId, PipelineKind, QueueType, Rect2D, RenderTargetId, ResourceState, ShaderStage,
    TextureId,
};
use prism_core::renderer::{CommandBuffer, RenderError, ResourceError, Timeline};
use std::any::Any;
use std::sync::Arc;

/// Row pitch granularity of buffer to texture copies.
pub const COPY_BYTES_PER_ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

#[derive(Debug, Default)]
struct RecordState {
    render_target: Option<RenderTargetId>,
    pipeline: Option<(PipelineId, PipelineKind)>,
    pipeline_bindings: Vec<BindingLayoutEntry>,
    descriptor_set: Option<(DescriptorSetId, Vec<BindingLayoutEntry>)>,
    open_events: u32,
    has_draws: bool,
}

/// A command buffer of the hardware driver.
#[derive(Debug)]
pub struct WgpuCommandBuffer {
    shared: Arc<WgpuDeviceShared>,
    queue_type: QueueType,
    level: CommandBufferLevel,
    native: BackendHandle,
    state: CommandBufferState,
    commands: Vec<RecordedCommand>,
    recorded: Arc<[RecordedCommand]>,
    pending_error: Option<RenderError>,
    failed: bool,
    bound: RecordState,
    in_flight: Option<(Arc<Timeline>, u64)>,
}

impl WgpuCommandBuffer {
    pub(crate) fn new(
        shared: Arc<WgpuDeviceShared>,
        queue_type: QueueType,
        level: CommandBufferLevel,
    ) -> Self {
        let native = shared.next_native_handle();
        log::debug!(
            "WgpuDevice: Created {:?} command buffer for {:?} queues ({:?})",
            level,
            queue_type,
            native
        );
        Self {
            shared,
            queue_type,
            level,
            native,
            state: CommandBufferState::Initial,
            commands: Vec::new(),
            recorded: Arc::from(Vec::new()),
            pending_error: None,
            failed: false,
            bound: RecordState::default(),
            in_flight: None,
        }
    }

    /// Number of operations recorded (or frozen by `end`).
    pub fn command_count(&self) -> usize {
        if self.state == CommandBufferState::Recording {
            self.commands.len()
        } else {
            self.recorded.len()
        }
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<WgpuDeviceShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    pub(crate) fn submittable(&self) -> Result<Arc<[RecordedCommand]>, RenderError> {
        if self.level != CommandBufferLevel::Primary {
            return Err(RenderError::InvalidState(
                "bundles are executed through a primary command buffer".to_string(),
            ));
        }
        if self.failed {
            return Err(RenderError::InvalidState(
                "command buffer was recorded with errors".to_string(),
            ));
        }
        match self.state {
            CommandBufferState::Closed
            | CommandBufferState::Submitted
            | CommandBufferState::Completed => Ok(Arc::clone(&self.recorded)),
            other => Err(RenderError::InvalidState(format!(
                "cannot submit a command buffer in the {other:?} state"
            ))),
        }
    }

    pub(crate) fn mark_submitted(&mut self, serial: Arc<Timeline>, value: u64) {
        self.state = CommandBufferState::Submitted;
        self.in_flight = Some((serial, value));
    }

    fn ensure_retired(&mut self) -> Result<(), RenderError> {
        if let Some((serial, value)) = &self.in_flight {
            self.shared.poll();
            if !serial.is_reached(*value) {
                if serial.is_lost() {
                    return Err(RenderError::DeviceLost);
                }
                return Err(RenderError::CommandBufferInFlight);
            }
        }
        self.in_flight = None;
        Ok(())
    }

    fn clear(&mut self) {
        self.commands.clear();
        self.recorded = Arc::from(Vec::new());
        self.pending_error = None;
        self.failed = false;
        self.bound = RecordState::default();
    }

    fn record(&mut self, op: &str, f: impl FnOnce(&mut Self) -> Result<(), RenderError>) {
        if self.pending_error.is_some() {
            return;
        }
        let result = if self.state == CommandBufferState::Recording {
            f(self)
        } else {
            Err(RenderError::InvalidState(format!(
                "{op} recorded outside of begin/end"
            )))
        };
        if let Err(err) = result {
            log::debug!("WgpuCommandBuffer: {op} failed, deferring error: {err}");
            self.pending_error = Some(err);
        }
    }

    fn require_buffer(&self, id: BufferId, usage: BufferUsage) -> Result<u64, RenderError> {
        let table = self.shared.lock_table();
        let info = table.buffer(id)?.info;
        if !info.usage.contains(usage) {
            return Err(RenderError::InvalidState(format!(
                "buffer {id:?} lacks {usage:?} usage"
            )));
        }
        Ok(info.size)
    }

    fn require_outside_render_target(&self, op: &str) -> Result<(), RenderError> {
        match self.bound.render_target {
            Some(target) => Err(RenderError::InvalidState(format!(
                "{op} inside the scope of render target {target:?}"
            ))),
            None => Ok(()),
        }
    }

    fn check_descriptor_set(&self) -> Result<(), RenderError> {
        if self.bound.pipeline_bindings.is_empty() {
            return Ok(());
        }
        match &self.bound.descriptor_set {
            Some((_, layout)) if layouts_compatible(layout, &self.bound.pipeline_bindings) => {
                Ok(())
            }
            Some((id, _)) => Err(RenderError::InvalidState(format!(
                "descriptor set {id:?} does not match the binding layout of the bound pipeline"
            ))),
            None => Err(RenderError::InvalidState(format!(
                "the bound pipeline reads {} binding(s), no descriptor set is bound",
                self.bound.pipeline_bindings.len()
            ))),
        }
    }

    fn check_draw_state(&self) -> Result<(), RenderError> {
        if !self.queue_type.supports_graphics() {
            return Err(RenderError::InvalidState(format!(
                "draw on a {:?} command buffer",
                self.queue_type
            )));
        }
        match self.bound.pipeline {
            Some((_, PipelineKind::Graphics)) => {}
            Some((id, PipelineKind::Compute)) => {
                return Err(RenderError::InvalidState(format!(
                    "draw with compute pipeline {id:?} bound"
                )))
            }
            None => {
                return Err(RenderError::InvalidState(
                    "draw without a pipeline".to_string(),
                ))
            }
        }
        if self.bound.render_target.is_none() && self.level != CommandBufferLevel::Bundle {
            return Err(RenderError::InvalidState(
                "draw outside of a render target scope".to_string(),
            ));
        }
        self.check_descriptor_set()
    }
}

impl CommandBuffer for WgpuCommandBuffer {
    fn backend(&self) -> GraphicsBackendType {
        self.shared.backend
    }

    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn level(&self) -> CommandBufferLevel {
        self.level
    }

    fn state(&self) -> CommandBufferState {
        match (&self.state, &self.in_flight) {
            (CommandBufferState::Submitted, Some((serial, value))) if serial.is_reached(*value) => {
                CommandBufferState::Completed
            }
            (state, _) => *state,
        }
    }

    fn begin(&mut self) -> Result<(), RenderError> {
        self.ensure_retired()?;
        if self.state == CommandBufferState::Recording {
            return Err(RenderError::InvalidState(
                "begin called on a command buffer that is already recording".to_string(),
            ));
        }
        self.clear();
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), RenderError> {
        self.ensure_retired()?;
        self.clear();
        self.state = CommandBufferState::Initial;
        Ok(())
    }

    fn end(&mut self) -> Result<(), RenderError> {
        if self.state != CommandBufferState::Recording {
            return Err(RenderError::InvalidState(format!(
                "end called in the {:?} state",
                self.state
            )));
        }
        if self.pending_error.is_none() {
            if let Some(target) = self.bound.render_target {
                self.pending_error = Some(RenderError::InvalidState(format!(
                    "render target {target:?} is still open at end"
                )));
            } else if self.bound.open_events > 0 {
                self.pending_error = Some(RenderError::InvalidState(format!(
                    "{} debug region(s) still open at end",
                    self.bound.open_events
                )));
            }
        }
        self.state = CommandBufferState::Closed;
        self.recorded = Arc::from(std::mem::take(&mut self.commands));
        match self.pending_error.take() {
            Some(err) => {
                self.failed = true;
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn begin_event(&mut self, label: &str) {
        self.record("begin_event", |cb| {
            cb.bound.open_events += 1;
            cb.commands.push(RecordedCommand::BeginEvent(label.to_string()));
            Ok(())
        });
    }

    fn end_event(&mut self) {
        self.record("end_event", |cb| {
            if cb.bound.open_events == 0 {
                return Err(RenderError::InvalidState(
                    "end_event without a matching begin_event".to_string(),
                ));
            }
            cb.bound.open_events -= 1;
            cb.commands.push(RecordedCommand::EndEvent);
            Ok(())
        });
    }

    // wgpu tracks resource states itself.
    fn transition(&mut self, texture: TextureId, _before: ResourceState, after: ResourceState) {
        self.record("transition", |cb| {
            cb.shared.lock_table().texture(texture)?;
            if after == ResourceState::Undefined {
                return Err(RenderError::InvalidState(format!(
                    "texture {texture:?} cannot transition to Undefined"
                )));
            }
            Ok(())
        });
    }

    fn begin_render_target(&mut self, target: RenderTargetId, clear: ClearValue) {
        self.record("begin_render_target", |cb| {
            if cb.level == CommandBufferLevel::Bundle {
                return Err(RenderError::InvalidState(
                    "bundles inherit the render target of their primary".to_string(),
                ));
            }
            if !cb.queue_type.supports_graphics() {
                return Err(RenderError::InvalidState(format!(
                    "begin_render_target on a {:?} command buffer",
                    cb.queue_type
                )));
            }
            if let Some(open) = cb.bound.render_target {
                return Err(RenderError::InvalidState(format!(
                    "render target scopes cannot nest, {open:?} is still open"
                )));
            }
            cb.shared.lock_table().render_target(target)?;
            cb.bound.render_target = Some(target);
            cb.commands
                .push(RecordedCommand::BeginRenderTarget { target, clear });
            Ok(())
        });
    }

    fn end_render_target(&mut self) {
        self.record("end_render_target", |cb| {
            let target = cb.bound.render_target.take().ok_or_else(|| {
                RenderError::InvalidState("end_render_target without an open scope".to_string())
            })?;
            cb.commands.push(RecordedCommand::EndRenderTarget { target });
            Ok(())
        });
    }

    fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.record("set_pipeline", |cb| {
            let (kind, bindings) = {
                let table = cb.shared.lock_table();
                let entry = table.pipeline(pipeline)?;
                let kind = match entry {
                    WgpuPipelineEntry::Graphics { .. } => PipelineKind::Graphics,
                    WgpuPipelineEntry::Compute { .. } => PipelineKind::Compute,
                };
                (kind, entry.bindings().to_vec())
            };
            let allowed = match kind {
                PipelineKind::Graphics => cb.queue_type.supports_graphics(),
                PipelineKind::Compute => cb.queue_type.supports_compute(),
            };
            if !allowed {
                return Err(RenderError::InvalidState(format!(
                    "{:?} queues cannot run {kind:?} pipelines",
                    cb.queue_type
                )));
            }
            cb.bound.pipeline = Some((pipeline, kind));
            cb.bound.pipeline_bindings = bindings;
            cb.commands.push(RecordedCommand::SetPipeline(pipeline));
            Ok(())
        });
    }

    fn set_vertex_buffers(&mut self, first_slot: u32, buffers: &[(BufferId, u64)]) {
        self.record("set_vertex_buffers", |cb| {
            for (buffer, offset) in buffers {
                if *offset >= cb.require_buffer(*buffer, BufferUsage::VERTEX)? {
                    return Err(ResourceError::OutOfBounds.into());
                }
            }
            cb.commands.push(RecordedCommand::SetVertexBuffers {
                first_slot,
                buffers: buffers.to_vec(),
            });
            Ok(())
        });
    }

    fn set_index_buffer(&mut self, buffer: BufferId, offset: u64, format: IndexFormat) {
        self.record("set_index_buffer", |cb| {
            let size = cb.require_buffer(buffer, BufferUsage::INDEX)?;
            if offset > size || offset % format.size() != 0 {
                return Err(ResourceError::OutOfBounds.into());
            }
            cb.commands.push(RecordedCommand::SetIndexBuffer {
                buffer,
                offset,
                format,
            });
            Ok(())
        });
    }

    fn bind_constant_buffer(&mut self, slot: u32, buffer: BufferId) {
        self.record("bind_constant_buffer", |cb| {
            cb.require_buffer(buffer, BufferUsage::CONSTANT)?;
            cb.commands
                .push(RecordedCommand::BindConstantBuffer { slot, buffer });
            Ok(())
        });
    }

    fn set_descriptor_set(&mut self, set: DescriptorSetId) {
        self.record("set_descriptor_set", |cb| {
            let Some((pipeline, _)) = cb.bound.pipeline else {
                return Err(RenderError::InvalidState(
                    "set_descriptor_set without a pipeline".to_string(),
                ));
            };
            let layout = cb.shared.lock_table().descriptor_set(set)?.layout.clone();
            if !layouts_compatible(&layout, &cb.bound.pipeline_bindings) {
                return Err(RenderError::InvalidState(format!(
                    "descriptor set {set:?} does not match the binding layout of {pipeline:?}"
                )));
            }
            cb.bound.descriptor_set = Some((set, layout));
            cb.commands.push(RecordedCommand::SetDescriptorSet(set));
            Ok(())
        });
    }

    fn set_scissors(&mut self, rects: &[Rect2D]) {
        self.record("set_scissors", |cb| {
            if let Some(rect) = rects.iter().find(|r| r.x < 0 || r.y < 0) {
                return Err(RenderError::InvalidState(format!(
                    "scissor rectangle {rect:?} has a negative origin"
                )));
            }
            if rects.len() > 1 {
                log::debug!(
                    "WgpuCommandBuffer: {} scissor rectangles set, only the first applies",
                    rects.len()
                );
            }
            cb.commands.push(RecordedCommand::SetScissors(rects.to_vec()));
            Ok(())
        });
    }

    fn set_blend_factor(&mut self, factor: LinearRgba) {
        self.record("set_blend_factor", |cb| {
            cb.commands.push(RecordedCommand::SetBlendFactor(factor));
            Ok(())
        });
    }

    fn push_constants(&mut self, stage: ShaderStage, _offset: u32, _data: &[u8]) {
        self.record("push_constants", |_| {
            Err(RenderError::InvalidState(format!(
                "push constants ({stage:?}) are not available on the hardware driver"
            )))
        });
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.record("draw", |cb| {
            cb.check_draw_state()?;
            cb.bound.has_draws = true;
            cb.commands.push(RecordedCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            });
            Ok(())
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.record("draw_indexed", |cb| {
            cb.check_draw_state()?;
            cb.bound.has_draws = true;
            cb.commands.push(RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            });
            Ok(())
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record("dispatch", |cb| {
            cb.require_outside_render_target("dispatch")?;
            if !matches!(cb.bound.pipeline, Some((_, PipelineKind::Compute))) {
                return Err(RenderError::InvalidState(
                    "dispatch without a compute pipeline".to_string(),
                ));
            }
            cb.check_descriptor_set()?;
            cb.commands.push(RecordedCommand::Dispatch { x, y, z });
            Ok(())
        });
    }

    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        self.record("copy_buffer", |cb| {
            cb.require_outside_render_target("copy_buffer")?;
            let src_size = cb.require_buffer(src, BufferUsage::TRANSFER_SRC)?;
            let dst_size = cb.require_buffer(dst, BufferUsage::TRANSFER_DST)?;
            let fits = |offset: u64, len: u64| {
                offset.checked_add(size).is_some_and(|end| end <= len)
            };
            if !fits(src_offset, src_size) || !fits(dst_offset, dst_size) {
                return Err(ResourceError::OutOfBounds.into());
            }
            if [src_offset, dst_offset, size].iter().any(|v| v % 4 != 0) {
                return Err(RenderError::InvalidState(format!(
                    "buffer copy {src_offset}/{dst_offset}/{size} is not 4-byte aligned"
                )));
            }
            cb.commands.push(RecordedCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            });
            Ok(())
        });
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: BufferId,
        src_offset: u64,
        bytes_per_row: u32,
        dst: TextureId,
        mip_level: u32,
    ) {
        self.record("copy_buffer_to_texture", |cb| {
            cb.require_outside_render_target("copy_buffer_to_texture")?;
            cb.require_buffer(src, BufferUsage::TRANSFER_SRC)?;
            if bytes_per_row % COPY_BYTES_PER_ROW_ALIGNMENT != 0 {
                return Err(RenderError::InvalidState(format!(
                    "row pitch {bytes_per_row} is not a multiple of {COPY_BYTES_PER_ROW_ALIGNMENT}"
                )));
            }
            let levels = cb.shared.lock_table().texture(dst)?.info.mip_level_count;
            if mip_level >= levels {
                return Err(ResourceError::OutOfBounds.into());
            }
            cb.commands.push(RecordedCommand::CopyBufferToTexture {
                src,
                src_offset,
                bytes_per_row,
                dst,
                mip_level,
            });
            Ok(())
        });
    }

    fn update_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        self.record("update_buffer", |cb| {
            cb.require_outside_render_target("update_buffer")?;
            let size = cb.shared.lock_table().buffer(buffer)?.info.size;
            if offset + data.len() as u64 > size {
                return Err(ResourceError::OutOfBounds.into());
            }
            if offset % 4 != 0 || data.len() % 4 != 0 {
                return Err(RenderError::InvalidState(format!(
                    "buffer update at {offset} of {} bytes is not 4-byte aligned",
                    data.len()
                )));
            }
            cb.commands.push(RecordedCommand::UpdateBuffer {
                buffer,
                offset,
                data: data.to_vec(),
            });
            Ok(())
        });
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        self.record("generate_mipmaps", |cb| {
            cb.require_outside_render_target("generate_mipmaps")?;
            let info = cb.shared.lock_table().texture(texture)?.info;
            if info.format.is_depth() {
                return Err(RenderError::InvalidState(format!(
                    "cannot generate mipmaps for depth texture {texture:?}"
                )));
            }
            if info.mip_level_count > 1 {
                cb.commands.push(RecordedCommand::GenerateMipmaps(texture));
            }
            Ok(())
        });
    }

    fn execute_bundle(&mut self, bundle: &dyn CommandBuffer) {
        self.record("execute_bundle", |cb| {
            if !cb.shared.backend.is_explicit() {
                return Err(RenderError::InvalidState(format!(
                    "{:?} has no bundle support",
                    cb.shared.backend
                )));
            }
            if cb.level != CommandBufferLevel::Primary {
                return Err(RenderError::InvalidState(
                    "bundles cannot replay other bundles".to_string(),
                ));
            }
            let hw = bundle
                .as_any()
                .downcast_ref::<WgpuCommandBuffer>()
                .ok_or(RenderError::BackendMismatch {
                    expected: cb.shared.backend,
                    found: bundle.backend(),
                })?;
            if !hw.belongs_to(&cb.shared) || hw.level != CommandBufferLevel::Bundle {
                return Err(RenderError::InvalidState(
                    "execute_bundle needs a bundle of the same device".to_string(),
                ));
            }
            let open = matches!(
                hw.state,
                CommandBufferState::Initial | CommandBufferState::Recording
            );
            if hw.failed || open {
                return Err(RenderError::InvalidState(
                    "only closed bundles can be replayed".to_string(),
                ));
            }
            if hw.bound.has_draws && cb.bound.render_target.is_none() {
                return Err(RenderError::InvalidState(
                    "bundle draws need an open render target".to_string(),
                ));
            }
            cb.commands.extend(hw.recorded.iter().cloned());
            cb.bound.has_draws |= hw.bound.has_draws;
            Ok(())
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
