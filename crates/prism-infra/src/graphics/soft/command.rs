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

//! Command recording for the emulated driver.
//!
//! Operations are validated against the resource table while they are recorded and
//! stored as [`RecordedCommand`]s. `end` freezes them into a shared slice that queues hand to
//! the executor, so a recorded buffer can be submitted without copying.

use super::resources::SoftDeviceShared;
use crate::graphics::recorded::RecordedCommand;
use prism_core::math::LinearRgba;
use prism_core::renderer::api::{
    layouts_compatible, BackendHandle, BindingLayoutEntry, BufferId, BufferInfo, BufferUsage,
    ClearValue, CommandBufferLevel, CommandBufferState, DescriptorSetId, GraphicsBackendType,
    IndexFormat, PipelineId, PipelineKind, QueueType, Rect2D, RenderTargetId, ResourceState,
    ShaderStage, TextureFormat, TextureId, TextureUsage,
};
use prism_core::renderer::{CommandBuffer, RenderError, ResourceError, Timeline};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Constant buffer slots available to a pipeline.
pub const MAX_CONSTANT_BUFFER_SLOTS: u32 = 14;
/// Scissor rectangles settable at once.
pub const MAX_SCISSOR_RECTS: usize = 16;
/// Largest dispatch size along one axis.
pub const MAX_DISPATCH_GROUPS: u32 = 65_535;

#[derive(Debug)]
struct BoundTarget {
    id: RenderTargetId,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    swapchain_colors: Vec<TextureId>,
}

#[derive(Debug)]
struct BoundPipeline {
    id: PipelineId,
    kind: PipelineKind,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    vertex_layouts: usize,
    push_constant_size: u32,
    bindings: Vec<BindingLayoutEntry>,
}

#[derive(Debug)]
struct BoundSet {
    id: DescriptorSetId,
    layout: Vec<BindingLayoutEntry>,
}

#[derive(Debug)]
struct BoundIndex {
    format: IndexFormat,
    offset: u64,
    buffer_size: u64,
}

/// What is bound at the current point of the recording.
#[derive(Debug, Default)]
struct RecordState {
    render_target: Option<BoundTarget>,
    pipeline: Option<BoundPipeline>,
    vertex_slots: Vec<Option<BufferId>>,
    index: Option<BoundIndex>,
    descriptor_set: Option<BoundSet>,
    open_events: u32,
    has_draws: bool,
}

/// A command buffer of the emulated driver.
#[derive(Debug)]
pub struct SoftCommandBuffer {
    shared: Arc<SoftDeviceShared>,
    queue_type: QueueType,
    level: CommandBufferLevel,
    native: BackendHandle,
    state: CommandBufferState,
    commands: Vec<RecordedCommand>,
    recorded: Arc<[RecordedCommand]>,
    pending_error: Option<RenderError>,
    failed: bool,
    bound: RecordState,
    final_states: HashMap<TextureId, ResourceState>,
    in_flight: Option<(Arc<Timeline>, u64)>,
}

impl SoftCommandBuffer {
    pub(crate) fn new(
        shared: Arc<SoftDeviceShared>,
        queue_type: QueueType,
        level: CommandBufferLevel,
    ) -> Self {
        let native = shared.next_native_handle();
        log::debug!(
            "SoftDevice: Created {:?} command buffer for {:?} queues ({:?})",
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
            final_states: HashMap::new(),
            in_flight: None,
        }
    }

    /// The native command list handle.
    pub fn native_handle(&self) -> BackendHandle {
        self.native
    }

    /// Number of operations recorded (or frozen by `end`).
    pub fn command_count(&self) -> usize {
        if self.state == CommandBufferState::Recording {
            self.commands.len()
        } else {
            self.recorded.len()
        }
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<SoftDeviceShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// The frozen commands of a buffer ready for submission.
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

    /// Texture states this buffer leaves behind once it has executed.
    pub(crate) fn final_states(&self) -> &HashMap<TextureId, ResourceState> {
        &self.final_states
    }

    pub(crate) fn mark_submitted(&mut self, serial: Arc<Timeline>, value: u64) {
        self.state = CommandBufferState::Submitted;
        self.in_flight = Some((serial, value));
    }

    fn ensure_retired(&mut self) -> Result<(), RenderError> {
        if let Some((serial, value)) = &self.in_flight {
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
        self.final_states.clear();
    }

    /// Runs one recording operation, deferring its error to `end`.
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
            log::debug!("SoftCommandBuffer: {op} failed, deferring error: {err}");
            self.pending_error = Some(err);
        }
    }

    fn buffer_with_usage(
        &self,
        id: BufferId,
        usage: BufferUsage,
        role: &str,
    ) -> Result<BufferInfo, RenderError> {
        let table = self.shared.lock_table();
        let info = table.buffer(id)?.info;
        if !info.usage.contains(usage) {
            return Err(RenderError::InvalidState(format!(
                "buffer {id:?} used as {role} lacks {usage:?} usage"
            )));
        }
        Ok(info)
    }

    fn require_graphics_queue(&self, op: &str) -> Result<(), RenderError> {
        if self.queue_type.supports_graphics() {
            Ok(())
        } else {
            Err(RenderError::InvalidState(format!(
                "{op} needs a graphics queue, this buffer records for {:?}",
                self.queue_type
            )))
        }
    }

    fn require_outside_render_target(&self, op: &str) -> Result<(), RenderError> {
        match &self.bound.render_target {
            Some(target) => Err(RenderError::InvalidState(format!(
                "{op} inside the scope of render target {:?}",
                target.id
            ))),
            None => Ok(()),
        }
    }

    /// Checks that the bound descriptor set fills the layout of the bound pipeline.
    fn check_descriptor_set(&self, pipeline: &BoundPipeline) -> Result<(), RenderError> {
        match &self.bound.descriptor_set {
            _ if pipeline.bindings.is_empty() => Ok(()),
            Some(set) if layouts_compatible(&set.layout, &pipeline.bindings) => Ok(()),
            Some(set) => Err(RenderError::InvalidState(format!(
                "descriptor set {:?} does not match the binding layout of pipeline {:?}",
                set.id, pipeline.id
            ))),
            None => Err(RenderError::InvalidState(format!(
                "pipeline {:?} reads {} binding(s), no descriptor set is bound",
                pipeline.id,
                pipeline.bindings.len()
            ))),
        }
    }

    /// Checks everything a draw depends on.
    fn check_draw_state(&self) -> Result<(), RenderError> {
        self.require_graphics_queue("draw")?;
        let pipeline = match &self.bound.pipeline {
            Some(pipeline) if pipeline.kind == PipelineKind::Graphics => pipeline,
            Some(pipeline) => {
                return Err(RenderError::InvalidState(format!(
                    "draw with compute pipeline {:?} bound",
                    pipeline.id
                )))
            }
            None => {
                return Err(RenderError::InvalidState(
                    "draw without a pipeline".to_string(),
                ))
            }
        };
        match &self.bound.render_target {
            Some(target) => {
                if target.color_formats != pipeline.color_formats
                    || target.depth_format != pipeline.depth_format
                {
                    return Err(RenderError::InvalidState(format!(
                        "pipeline {:?} targets {:?}/{:?}, render target {:?} is {:?}/{:?}",
                        pipeline.id,
                        pipeline.color_formats,
                        pipeline.depth_format,
                        target.id,
                        target.color_formats,
                        target.depth_format
                    )));
                }
            }
            // Bundles draw into the render target of the primary that replays them.
            None if self.level == CommandBufferLevel::Bundle => {}
            None => {
                return Err(RenderError::InvalidState(
                    "draw outside of a render target scope".to_string(),
                ))
            }
        }
        for slot in 0..pipeline.vertex_layouts {
            if self.bound.vertex_slots.get(slot).copied().flatten().is_none() {
                return Err(RenderError::InvalidState(format!(
                    "pipeline {:?} reads vertex buffer slot {slot}, nothing is bound",
                    pipeline.id
                )));
            }
        }
        self.check_descriptor_set(pipeline)
    }
}

impl CommandBuffer for SoftCommandBuffer {
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
        log::trace!("SoftCommandBuffer {:?}: begin", self.native);
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
            if let Some(target) = &self.bound.render_target {
                self.pending_error = Some(RenderError::InvalidState(format!(
                    "render target {:?} is still open at end",
                    target.id
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
        log::trace!(
            "SoftCommandBuffer {:?}: end with {} command(s)",
            self.native,
            self.recorded.len()
        );
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

    fn transition(&mut self, texture: TextureId, before: ResourceState, after: ResourceState) {
        self.record("transition", |cb| {
            cb.shared.lock_table().texture(texture)?;
            if after == ResourceState::Undefined {
                return Err(RenderError::InvalidState(format!(
                    "texture {texture:?} cannot transition to Undefined"
                )));
            }
            if let Some(known) = cb.final_states.get(&texture) {
                if before != ResourceState::Undefined && before != *known {
                    return Err(RenderError::Validation(format!(
                        "barrier on {texture:?} expects {before:?}, it was left in {known:?}"
                    )));
                }
            }
            if before == after {
                return Ok(());
            }
            cb.final_states.insert(texture, after);
            cb.commands.push(RecordedCommand::Transition {
                texture,
                before,
                after,
            });
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
            cb.require_graphics_queue("begin_render_target")?;
            if let Some(open) = &cb.bound.render_target {
                return Err(RenderError::InvalidState(format!(
                    "render target scopes cannot nest, {:?} is still open",
                    open.id
                )));
            }
            let bound = {
                let table = cb.shared.lock_table();
                let entry = table.render_target(target)?;
                BoundTarget {
                    id: target,
                    color_formats: entry.info.color_formats.clone(),
                    depth_format: entry.info.depth_format,
                    swapchain_colors: if entry.swapchain_owned {
                        entry.info.color_attachments.clone()
                    } else {
                        Vec::new()
                    },
                }
            };
            for texture in &bound.swapchain_colors {
                cb.final_states.insert(*texture, ResourceState::RenderTarget);
                cb.commands.push(RecordedCommand::Transition {
                    texture: *texture,
                    before: ResourceState::Present,
                    after: ResourceState::RenderTarget,
                });
            }
            cb.commands
                .push(RecordedCommand::BeginRenderTarget { target, clear });
            cb.bound.render_target = Some(bound);
            Ok(())
        });
    }

    fn end_render_target(&mut self) {
        self.record("end_render_target", |cb| {
            let bound = cb.bound.render_target.take().ok_or_else(|| {
                RenderError::InvalidState("end_render_target without an open scope".to_string())
            })?;
            cb.commands
                .push(RecordedCommand::EndRenderTarget { target: bound.id });
            for texture in &bound.swapchain_colors {
                cb.final_states.insert(*texture, ResourceState::Present);
                cb.commands.push(RecordedCommand::Transition {
                    texture: *texture,
                    before: ResourceState::RenderTarget,
                    after: ResourceState::Present,
                });
            }
            Ok(())
        });
    }

    fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.record("set_pipeline", |cb| {
            let bound = {
                let table = cb.shared.lock_table();
                let entry = table.pipeline(pipeline)?;
                BoundPipeline {
                    id: pipeline,
                    kind: entry.kind,
                    color_formats: entry.color_formats.clone(),
                    depth_format: entry.depth_format,
                    vertex_layouts: entry.vertex_layouts.len(),
                    push_constant_size: entry.push_constant_size,
                    bindings: entry.bindings.clone(),
                }
            };
            match bound.kind {
                PipelineKind::Graphics => cb.require_graphics_queue("graphics pipeline")?,
                PipelineKind::Compute if !cb.queue_type.supports_compute() => {
                    return Err(RenderError::InvalidState(format!(
                        "{:?} queues cannot run compute pipelines",
                        cb.queue_type
                    )))
                }
                PipelineKind::Compute => {}
            }
            cb.bound.pipeline = Some(bound);
            cb.commands.push(RecordedCommand::SetPipeline(pipeline));
            Ok(())
        });
    }

    fn set_vertex_buffers(&mut self, first_slot: u32, buffers: &[(BufferId, u64)]) {
        self.record("set_vertex_buffers", |cb| {
            for (index, (buffer, offset)) in buffers.iter().enumerate() {
                let info = cb.buffer_with_usage(*buffer, BufferUsage::VERTEX, "vertex buffer")?;
                if *offset >= info.size {
                    return Err(ResourceError::OutOfBounds.into());
                }
                let slot = first_slot as usize + index;
                if cb.bound.vertex_slots.len() <= slot {
                    cb.bound.vertex_slots.resize(slot + 1, None);
                }
                cb.bound.vertex_slots[slot] = Some(*buffer);
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
            let info = cb.buffer_with_usage(buffer, BufferUsage::INDEX, "index buffer")?;
            if offset > info.size || offset % format.size() != 0 {
                return Err(ResourceError::OutOfBounds.into());
            }
            cb.bound.index = Some(BoundIndex {
                format,
                offset,
                buffer_size: info.size,
            });
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
            if slot >= MAX_CONSTANT_BUFFER_SLOTS {
                return Err(RenderError::InvalidState(format!(
                    "constant buffer slot {slot} exceeds the limit of {MAX_CONSTANT_BUFFER_SLOTS}"
                )));
            }
            cb.buffer_with_usage(buffer, BufferUsage::CONSTANT, "constant buffer")?;
            cb.commands
                .push(RecordedCommand::BindConstantBuffer { slot, buffer });
            Ok(())
        });
    }

    fn set_descriptor_set(&mut self, set: DescriptorSetId) {
        self.record("set_descriptor_set", |cb| {
            let Some(pipeline) = &cb.bound.pipeline else {
                return Err(RenderError::InvalidState(
                    "set_descriptor_set without a pipeline".to_string(),
                ));
            };
            let layout = cb.shared.lock_table().descriptor_set(set)?.layout.clone();
            if !layouts_compatible(&layout, &pipeline.bindings) {
                return Err(RenderError::InvalidState(format!(
                    "descriptor set {set:?} does not match the binding layout of pipeline {:?}",
                    pipeline.id
                )));
            }
            cb.bound.descriptor_set = Some(BoundSet { id: set, layout });
            cb.commands.push(RecordedCommand::SetDescriptorSet(set));
            Ok(())
        });
    }

    fn set_scissors(&mut self, rects: &[Rect2D]) {
        self.record("set_scissors", |cb| {
            if rects.len() > MAX_SCISSOR_RECTS {
                return Err(RenderError::InvalidState(format!(
                    "{} scissor rectangles exceed the limit of {MAX_SCISSOR_RECTS}",
                    rects.len()
                )));
            }
            if let Some(rect) = rects.iter().find(|r| r.x < 0 || r.y < 0) {
                return Err(RenderError::InvalidState(format!(
                    "scissor rectangle {rect:?} has a negative origin"
                )));
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

    fn push_constants(&mut self, stage: ShaderStage, offset: u32, data: &[u8]) {
        self.record("push_constants", |cb| {
            let Some(pipeline) = &cb.bound.pipeline else {
                return Err(RenderError::InvalidState(
                    "push_constants without a pipeline".to_string(),
                ));
            };
            let end = u64::from(offset) + data.len() as u64;
            let aligned = offset % 4 == 0 && data.len() % 4 == 0;
            if !aligned || end > u64::from(pipeline.push_constant_size) {
                return Err(RenderError::InvalidState(format!(
                    "push constants {offset}..{end} do not fit the {} bytes of pipeline {:?}",
                    pipeline.push_constant_size, pipeline.id
                )));
            }
            cb.commands.push(RecordedCommand::PushConstants {
                stage,
                offset,
                data: data.to_vec(),
            });
            Ok(())
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
            let index = cb.bound.index.as_ref().ok_or_else(|| {
                RenderError::InvalidState("draw_indexed without an index buffer".to_string())
            })?;
            let end = index.offset
                + (u64::from(first_index) + u64::from(index_count)) * index.format.size();
            if end > index.buffer_size {
                return Err(ResourceError::OutOfBounds.into());
            }
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
            match &cb.bound.pipeline {
                Some(pipeline) if pipeline.kind == PipelineKind::Compute => {
                    cb.check_descriptor_set(pipeline)?
                }
                _ => {
                    return Err(RenderError::InvalidState(
                        "dispatch without a compute pipeline".to_string(),
                    ))
                }
            }
            if [x, y, z].iter().any(|groups| *groups > MAX_DISPATCH_GROUPS) {
                return Err(RenderError::InvalidState(format!(
                    "dispatch {x}x{y}x{z} exceeds {MAX_DISPATCH_GROUPS} groups per axis"
                )));
            }
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
            let src_info = cb.buffer_with_usage(src, BufferUsage::TRANSFER_SRC, "copy source")?;
            let dst_info =
                cb.buffer_with_usage(dst, BufferUsage::TRANSFER_DST, "copy destination")?;
            let fits = |offset: u64, len: u64| {
                offset.checked_add(size).is_some_and(|end| end <= len)
            };
            if !fits(src_offset, src_info.size) || !fits(dst_offset, dst_info.size) {
                return Err(ResourceError::OutOfBounds.into());
            }
            if src == dst && src_offset < dst_offset + size && dst_offset < src_offset + size {
                return Err(RenderError::InvalidState(format!(
                    "copy ranges of buffer {src:?} overlap"
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
            let src_info = cb.buffer_with_usage(src, BufferUsage::TRANSFER_SRC, "copy source")?;
            let (row_bytes, rows) = {
                let table = cb.shared.lock_table();
                let texture = table.texture(dst)?;
                if !texture.info.usage.contains(TextureUsage::TRANSFER_DST) {
                    return Err(RenderError::InvalidState(format!(
                        "texture {dst:?} lacks TRANSFER_DST usage"
                    )));
                }
                if mip_level >= texture.info.mip_level_count {
                    return Err(ResourceError::OutOfBounds.into());
                }
                let mip = texture.mip_extent(mip_level);
                (
                    u64::from(mip.width) * u64::from(texture.info.format.bytes_per_pixel()),
                    u64::from(mip.height) * u64::from(mip.depth_or_array_layers),
                )
            };
            let needed = u64::from(bytes_per_row) * (rows - 1) + row_bytes;
            if u64::from(bytes_per_row) < row_bytes || src_offset + needed > src_info.size {
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
            let size = cb.shared.lock_table().buffer(buffer)?.info.size;
            if offset + data.len() as u64 > size {
                return Err(ResourceError::OutOfBounds.into());
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
            let levels = cb.shared.lock_table().texture(texture)?.info.mip_level_count;
            if levels > 1 {
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
            let soft = bundle
                .as_any()
                .downcast_ref::<SoftCommandBuffer>()
                .ok_or(RenderError::BackendMismatch {
                    expected: cb.shared.backend,
                    found: bundle.backend(),
                })?;
            if !soft.belongs_to(&cb.shared) || soft.level != CommandBufferLevel::Bundle {
                return Err(RenderError::InvalidState(
                    "execute_bundle needs a bundle of the same device".to_string(),
                ));
            }
            let replayable = matches!(
                soft.state(),
                CommandBufferState::Closed
                    | CommandBufferState::Completed
                    | CommandBufferState::Submitted
            );
            if soft.failed || !replayable {
                return Err(RenderError::InvalidState(
                    "only closed bundles can be replayed".to_string(),
                ));
            }
            if soft.bound.has_draws && cb.bound.render_target.is_none() {
                return Err(RenderError::InvalidState(
                    "bundle draws need an open render target".to_string(),
                ));
            }
            cb.commands.extend(soft.recorded.iter().cloned());
            for (texture, state) in &soft.final_states {
                cb.final_states.insert(*texture, *state);
            }
            cb.bound.has_draws |= soft.bound.has_draws;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::soft::resources::{DescriptorSetEntry, PipelineEntry, SoftDriverSettings};
    use prism_core::renderer::api::{
        BindingType, BufferDescriptor, GraphicsAdapterInfo, RenderTargetDescriptor,
    };

    fn shared(backend: GraphicsBackendType) -> Arc<SoftDeviceShared> {
        Arc::new(SoftDeviceShared::new(
            backend,
            GraphicsAdapterInfo::default(),
            SoftDriverSettings::default(),
        ))
    }

    fn primary(shared: &Arc<SoftDeviceShared>, queue_type: QueueType) -> SoftCommandBuffer {
        SoftCommandBuffer::new(Arc::clone(shared), queue_type, CommandBufferLevel::Primary)
    }

    #[test]
    fn test_first_error_is_deferred_to_end() {
        let shared = shared(GraphicsBackendType::Dx12);
        let mut cb = primary(&shared, QueueType::Graphics);
        cb.begin().unwrap();

        cb.draw(3, 1, 0, 0);
        cb.end_render_target();
        let result = cb.end();

        match result {
            Err(RenderError::InvalidState(msg)) => {
                assert!(msg.contains("without a pipeline"), "{msg}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(cb.submittable().is_err());
    }

    #[test]
    fn test_swapchain_targets_transition_automatically() {
        let shared = shared(GraphicsBackendType::Vulkan);
        let rt = shared
            .create_render_target(
                &RenderTargetDescriptor::single_color("image", 4, 4, TextureFormat::Bgra8Unorm),
                true,
                ResourceState::Present,
            )
            .unwrap();
        let color = shared.lock_table().render_targets[&rt].info.color_attachments[0];
        let mut cb = primary(&shared, QueueType::Graphics);

        cb.begin().unwrap();
        cb.begin_render_target(rt, ClearValue::color(LinearRgba::BLACK));
        cb.end_render_target();
        cb.end().unwrap();

        assert_eq!(cb.command_count(), 4);
        assert_eq!(cb.final_states().get(&color), Some(&ResourceState::Present));
    }

    #[test]
    fn test_copy_bounds_are_checked_at_record_time() {
        let shared = shared(GraphicsBackendType::OpenGL);
        let src = shared
            .create_buffer(&BufferDescriptor::new("src", 64, BufferUsage::TRANSFER_SRC))
            .unwrap();
        let dst = shared
            .create_buffer(&BufferDescriptor::new("dst", 32, BufferUsage::TRANSFER_DST))
            .unwrap();
        let mut cb = primary(&shared, QueueType::Transfer);

        cb.begin().unwrap();
        cb.copy_buffer(src, 0, dst, 0, 64);

        assert!(matches!(
            cb.end(),
            Err(RenderError::ResourceError(ResourceError::OutOfBounds))
        ));
    }

    #[test]
    fn test_pipeline_bindings_need_a_matching_descriptor_set() {
        // ARRANGE
        let shared = shared(GraphicsBackendType::Vulkan);
        let layout = vec![BindingLayoutEntry::new(0, BindingType::StorageBuffer)];
        let (pipeline, matching, foreign) = {
            let mut table = shared.lock_table();
            let pipeline = PipelineId(table.allocate_id());
            table.pipelines.insert(
                pipeline,
                PipelineEntry {
                    label: "reduce".to_string(),
                    kind: PipelineKind::Compute,
                    color_formats: Vec::new(),
                    depth_format: None,
                    vertex_layouts: Vec::new(),
                    blend: Default::default(),
                    push_constant_size: 0,
                    bindings: layout.clone(),
                },
            );
            let mut insert_set = |label: &str, layout: Vec<BindingLayoutEntry>| {
                let id = DescriptorSetId(table.allocate_id());
                let entry = DescriptorSetEntry {
                    label: label.to_string(),
                    layout,
                    bindings: Vec::new(),
                };
                table.descriptor_sets.insert(id, entry);
                id
            };
            let matching = insert_set("reduce", layout);
            let foreign = insert_set(
                "blit",
                vec![BindingLayoutEntry::new(0, BindingType::SampledTexture)],
            );
            (pipeline, matching, foreign)
        };
        let mut unbound = primary(&shared, QueueType::Compute);
        let mut mismatched = primary(&shared, QueueType::Compute);
        let mut bound = primary(&shared, QueueType::Compute);

        // ACT
        unbound.begin().unwrap();
        unbound.set_pipeline(pipeline);
        unbound.dispatch(1, 1, 1);
        mismatched.begin().unwrap();
        mismatched.set_pipeline(pipeline);
        mismatched.set_descriptor_set(foreign);
        bound.begin().unwrap();
        bound.set_pipeline(pipeline);
        bound.set_descriptor_set(matching);
        bound.dispatch(1, 1, 1);

        // ASSERT
        match unbound.end() {
            Err(RenderError::InvalidState(msg)) => {
                assert!(msg.contains("no descriptor set"), "{msg}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(mismatched.end(), Err(RenderError::InvalidState(_))));
        bound.end().unwrap();
        assert_eq!(bound.command_count(), 3);
    }

    #[test]
    fn test_bundles_need_an_explicit_backend() {
        let shared = shared(GraphicsBackendType::Dx11);
        let level = CommandBufferLevel::Bundle;
        let mut bundle = SoftCommandBuffer::new(Arc::clone(&shared), QueueType::Graphics, level);
        bundle.begin().unwrap();
        bundle.end().unwrap();
        let mut cb = primary(&shared, QueueType::Graphics);

        cb.begin().unwrap();
        cb.execute_bundle(&bundle);

        assert!(matches!(cb.end(), Err(RenderError::InvalidState(_))));
    }
}
