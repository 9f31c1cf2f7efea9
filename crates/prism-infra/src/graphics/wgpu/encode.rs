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

//! Replays recorded commands into a `wgpu::CommandEncoder`.
//!
//! Bound state (pipeline, vertex and index buffers, constant buffers, descriptor set,
//! scissor, blend constant) is kept on the CPU and flushed into the open pass right
//! before a draw or a dispatch, since every new pass starts from a blank state.

use super::conversions::IntoWgpu;
use super::resources::{WgpuDeviceShared, WgpuPipelineEntry, WgpuResourceTable};
use crate::graphics::recorded::RecordedCommand;
use prism_core::math::{Extent2D, LinearRgba};
use prism_core::renderer::api::{
    BufferId, ClearValue, DescriptorSetId, IndexFormat, PipelineId, Rect2D, RenderTargetId,
    TextureFormat, TextureId, DESCRIPTOR_SET_GROUP,
};
use prism_core::renderer::{RenderError, ResourceError};
use std::collections::BTreeMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

const MIP_BLIT_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}

@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(source, source_sampler, in.uv);
}
"#;

/// Work counted while replaying, folded into the device statistics after submission.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ReplayCounts {
    pub(crate) draws: u64,
    pub(crate) dispatches: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebugScope {
    Encoder,
    Pass,
    Dropped,
}

enum Pass {
    Idle,
    Render(wgpu::RenderPass<'static>),
    Compute(wgpu::ComputePass<'static>),
}

#[derive(Default)]
struct BoundState {
    pipeline: Option<PipelineId>,
    vertex_buffers: BTreeMap<u32, (BufferId, u64)>,
    index: Option<(BufferId, u64, IndexFormat)>,
    constants: BTreeMap<u32, BufferId>,
    descriptor_set: Option<DescriptorSetId>,
    scissor: Option<Rect2D>,
    blend: Option<LinearRgba>,
    target_extent: Option<Extent2D>,
    dirty: bool,
}

struct Replay<'a> {
    shared: &'a WgpuDeviceShared,
    encoder: wgpu::CommandEncoder,
    pass: Pass,
    bound: BoundState,
    events: Vec<DebugScope>,
    counts: ReplayCounts,
}

/// Encodes every command list of one submission into a single wgpu command buffer.
pub(crate) fn encode_submission(
    shared: &WgpuDeviceShared,
    label: &str,
    lists: &[Arc<[RecordedCommand]>],
) -> Result<(wgpu::CommandBuffer, ReplayCounts), RenderError> {
    let encoder = shared
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    let mut replay = Replay {
        shared,
        encoder,
        pass: Pass::Idle,
        bound: BoundState::default(),
        events: Vec::new(),
        counts: ReplayCounts::default(),
    };
    for list in lists {
        for command in list.iter() {
            replay.apply(command)?;
        }
        // Command buffers do not share bound state.
        replay.end_pass();
        replay.bound = BoundState::default();
    }
    while let Some(scope) = replay.events.pop() {
        if scope == DebugScope::Encoder {
            replay.encoder.pop_debug_group();
        }
    }
    let counts = replay.counts;
    Ok((replay.encoder.finish(), counts))
}

impl Replay<'_> {
    fn apply(&mut self, command: &RecordedCommand) -> Result<(), RenderError> {
        match command {
            RecordedCommand::BeginEvent(label) => self.begin_event(label),
            RecordedCommand::EndEvent => self.end_event(),
            RecordedCommand::Transition { .. } => {}
            RecordedCommand::BeginRenderTarget { target, clear } => {
                self.begin_render_target(*target, clear)?
            }
            RecordedCommand::EndRenderTarget { .. } => self.end_render_pass(),
            RecordedCommand::SetPipeline(id) => {
                self.bound.pipeline = Some(*id);
                self.bound.dirty = true;
            }
            RecordedCommand::SetVertexBuffers {
                first_slot,
                buffers,
            } => {
                for (index, binding) in buffers.iter().enumerate() {
                    self.bound
                        .vertex_buffers
                        .insert(first_slot + index as u32, *binding);
                }
                self.bound.dirty = true;
            }
            RecordedCommand::SetIndexBuffer {
                buffer,
                offset,
                format,
            } => {
                self.bound.index = Some((*buffer, *offset, *format));
                self.bound.dirty = true;
            }
            RecordedCommand::BindConstantBuffer { slot, buffer } => {
                self.bound.constants.insert(*slot, *buffer);
                self.bound.dirty = true;
            }
            RecordedCommand::SetDescriptorSet(set) => {
                self.bound.descriptor_set = Some(*set);
                self.bound.dirty = true;
            }
            RecordedCommand::SetScissors(rects) => {
                self.bound.scissor = rects.first().copied();
                self.bound.dirty = true;
            }
            RecordedCommand::SetBlendFactor(factor) => {
                self.bound.blend = Some(*factor);
                self.bound.dirty = true;
            }
            RecordedCommand::PushConstants { .. } => {
                return Err(RenderError::InvalidState(
                    "push constants reached the hardware encoder".to_string(),
                ))
            }
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                let pass = self.flush_render_state()?;
                pass.draw(
                    *first_vertex..first_vertex + vertex_count,
                    *first_instance..first_instance + instance_count,
                );
                self.counts.draws += 1;
            }
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                let pass = self.flush_render_state()?;
                pass.draw_indexed(
                    *first_index..first_index + index_count,
                    *base_vertex,
                    *first_instance..first_instance + instance_count,
                );
                self.counts.draws += 1;
            }
            RecordedCommand::Dispatch { x, y, z } => {
                let pass = self.flush_compute_state()?;
                pass.dispatch_workgroups(*x, *y, *z);
                self.counts.dispatches += 1;
            }
            RecordedCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                self.end_pass();
                let (src, dst) = {
                    let table = self.shared.lock_table();
                    (
                        Arc::clone(&table.buffer(*src)?.buffer),
                        Arc::clone(&table.buffer(*dst)?.buffer),
                    )
                };
                self.encoder
                    .copy_buffer_to_buffer(&src, *src_offset, &dst, *dst_offset, *size);
            }
            RecordedCommand::CopyBufferToTexture {
                src,
                src_offset,
                bytes_per_row,
                dst,
                mip_level,
            } => self.copy_buffer_to_texture(*src, *src_offset, *bytes_per_row, *dst, *mip_level)?,
            RecordedCommand::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                self.end_pass();
                let dst = Arc::clone(&self.shared.lock_table().buffer(*buffer)?.buffer);
                let staging =
                    self.shared
                        .device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("Prism Update Staging"),
                            contents: data,
                            usage: wgpu::BufferUsages::COPY_SRC,
                        });
                self.encoder
                    .copy_buffer_to_buffer(&staging, 0, &dst, *offset, data.len() as u64);
            }
            RecordedCommand::GenerateMipmaps(texture) => self.generate_mipmaps(*texture)?,
        }
        Ok(())
    }

    // --- Passes ---

    fn end_pass(&mut self) {
        if matches!(self.pass, Pass::Render(_)) {
            self.end_render_pass();
        }
        self.pass = Pass::Idle;
    }

    fn end_render_pass(&mut self) {
        if let Pass::Render(pass) = &mut self.pass {
            for scope in self.events.iter_mut().rev() {
                if *scope == DebugScope::Pass {
                    pass.pop_debug_group();
                    *scope = DebugScope::Dropped;
                }
            }
        }
        self.pass = Pass::Idle;
        self.bound.target_extent = None;
        self.bound.dirty = true;
    }

    fn begin_render_target(
        &mut self,
        target: RenderTargetId,
        clear: &ClearValue,
    ) -> Result<(), RenderError> {
        self.end_pass();
        let (extent, colors, depth) = {
            let table = self.shared.lock_table();
            let entry = table.render_target(target)?;
            let colors = entry
                .info
                .color_attachments
                .iter()
                .map(|id| attachment_view(&table, *id))
                .collect::<Result<Vec<_>, _>>()?;
            let depth = match entry.info.depth_attachment {
                Some(id) => Some((attachment_view(&table, id)?, entry.info.depth_format)),
                None => None,
            };
            (entry.info.extent, colors, depth)
        };

        let color_load = match clear.color {
            Some(color) => wgpu::LoadOp::Clear(color.into_wgpu()),
            None => wgpu::LoadOp::Load,
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();
        let depth_stencil_attachment =
            depth
                .as_ref()
                .map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: match clear.depth {
                            Some(depth) => wgpu::LoadOp::Clear(depth),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: format.filter(TextureFormat::has_stencil).map(|_| {
                        wgpu::Operations {
                            load: wgpu::LoadOp::Clear(u32::from(clear.stencil)),
                            store: wgpu::StoreOp::Store,
                        }
                    }),
                });

        let pass = self
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Prism Render Target"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            })
            .forget_lifetime();
        self.pass = Pass::Render(pass);
        self.bound.target_extent = Some(extent);
        self.bound.dirty = true;
        Ok(())
    }

    fn flush_render_state(&mut self) -> Result<&mut wgpu::RenderPass<'static>, RenderError> {
        let Pass::Render(pass) = &mut self.pass else {
            return Err(RenderError::InvalidState(
                "draw outside of a render pass".to_string(),
            ));
        };
        if self.bound.dirty {
            let table = self.shared.lock_table();
            let pipeline_id = self.bound.pipeline.ok_or_else(|| {
                RenderError::InvalidState("draw without a pipeline".to_string())
            })?;
            let WgpuPipelineEntry::Graphics { pipeline, .. } = table.pipeline(pipeline_id)? else {
                return Err(RenderError::InvalidState(format!(
                    "pipeline {pipeline_id:?} is not a graphics pipeline"
                )));
            };
            pass.set_pipeline(pipeline);
            if let Some(group) = constant_bind_group(
                self.shared,
                &table,
                &pipeline.get_bind_group_layout(0),
                &self.bound.constants,
            )? {
                pass.set_bind_group(0, &group, &[]);
            }
            if let Some(set) = self.bound.descriptor_set {
                pass.set_bind_group(DESCRIPTOR_SET_GROUP, &*table.descriptor_set(set)?.group, &[]);
            }
            for (slot, (buffer, offset)) in &self.bound.vertex_buffers {
                let buffer = &table.buffer(*buffer)?.buffer;
                pass.set_vertex_buffer(*slot, buffer.slice(*offset..));
            }
            if let Some((buffer, offset, format)) = self.bound.index {
                let buffer = &table.buffer(buffer)?.buffer;
                pass.set_index_buffer(buffer.slice(offset..), format.into_wgpu());
            }
            if let (Some(rect), Some(extent)) = (self.bound.scissor, self.bound.target_extent) {
                let x = (rect.x.max(0) as u32).min(extent.width);
                let y = (rect.y.max(0) as u32).min(extent.height);
                let width = rect.width.min(extent.width - x);
                let height = rect.height.min(extent.height - y);
                pass.set_scissor_rect(x, y, width, height);
            }
            if let Some(factor) = self.bound.blend {
                pass.set_blend_constant(factor.into_wgpu());
            }
            self.bound.dirty = false;
        }
        Ok(pass)
    }

    fn flush_compute_state(&mut self) -> Result<&mut wgpu::ComputePass<'static>, RenderError> {
        if !matches!(self.pass, Pass::Compute(_)) {
            self.end_pass();
            let pass = self
                .encoder
                .begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Prism Compute"),
                    timestamp_writes: None,
                })
                .forget_lifetime();
            self.pass = Pass::Compute(pass);
            self.bound.dirty = true;
        }
        let Pass::Compute(pass) = &mut self.pass else {
            return Err(RenderError::InvalidState(
                "dispatch outside of a compute pass".to_string(),
            ));
        };
        if self.bound.dirty {
            let table = self.shared.lock_table();
            let pipeline_id = self.bound.pipeline.ok_or_else(|| {
                RenderError::InvalidState("dispatch without a pipeline".to_string())
            })?;
            let WgpuPipelineEntry::Compute { pipeline, .. } = table.pipeline(pipeline_id)? else {
                return Err(RenderError::InvalidState(format!(
                    "pipeline {pipeline_id:?} is not a compute pipeline"
                )));
            };
            pass.set_pipeline(pipeline);
            if let Some(group) = constant_bind_group(
                self.shared,
                &table,
                &pipeline.get_bind_group_layout(0),
                &self.bound.constants,
            )? {
                pass.set_bind_group(0, &group, &[]);
            }
            if let Some(set) = self.bound.descriptor_set {
                pass.set_bind_group(DESCRIPTOR_SET_GROUP, &*table.descriptor_set(set)?.group, &[]);
            }
            self.bound.dirty = false;
        }
        Ok(pass)
    }

    // --- Debug regions ---

    fn begin_event(&mut self, label: &str) {
        if let Pass::Render(pass) = &mut self.pass {
            pass.push_debug_group(label);
            self.events.push(DebugScope::Pass);
            return;
        }
        self.end_pass();
        self.encoder.push_debug_group(label);
        self.events.push(DebugScope::Encoder);
    }

    fn end_event(&mut self) {
        let in_render_pass = matches!(self.pass, Pass::Render(_));
        match self.events.pop() {
            Some(DebugScope::Pass) => {
                if let Pass::Render(pass) = &mut self.pass {
                    pass.pop_debug_group();
                }
            }
            // The group closes after the render pass ends.
            Some(DebugScope::Encoder) if in_render_pass => {
                self.events.insert(0, DebugScope::Encoder);
            }
            Some(DebugScope::Encoder) => {
                self.end_pass();
                self.encoder.pop_debug_group();
            }
            Some(DebugScope::Dropped) | None => {}
        }
    }

    // --- Transfers ---

    fn copy_buffer_to_texture(
        &mut self,
        src: BufferId,
        src_offset: u64,
        bytes_per_row: u32,
        dst: TextureId,
        mip_level: u32,
    ) -> Result<(), RenderError> {
        self.end_pass();
        let (buffer, texture, extent) = {
            let table = self.shared.lock_table();
            let buffer = Arc::clone(&table.buffer(src)?.buffer);
            let entry = table.texture(dst)?;
            let texture = entry.texture.clone().ok_or_else(|| {
                RenderError::InvalidState(format!("texture {dst:?} is a swapchain image"))
            })?;
            (buffer, texture, entry.info.size.mip_level_size(mip_level))
        };
        self.encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: src_offset,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: None,
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent.into_wgpu(),
        );
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture_id: TextureId) -> Result<(), RenderError> {
        self.end_pass();
        let (texture, info) = {
            let table = self.shared.lock_table();
            let entry = table.texture(texture_id)?;
            let texture = entry.texture.clone().ok_or_else(|| {
                RenderError::InvalidState(format!("texture {texture_id:?} is a swapchain image"))
            })?;
            (texture, entry.info)
        };
        let pipeline = mip_blitter(self.shared, info.format);
        let sampler = self.shared.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Prism Mip Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let layout = pipeline.get_bind_group_layout(0);
        let level_view = |level: u32| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Prism Mip Level"),
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            })
        };

        for level in 1..info.mip_level_count {
            let source = level_view(level - 1);
            let target = level_view(level);
            let group = self
                .shared
                .device
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Prism Mip Bind Group"),
                    layout: &layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&source),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&sampler),
                        },
                    ],
                });
            let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Prism Mip Blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.draw(0..3, 0..1);
        }
        Ok(())
    }
}

fn attachment_view(
    table: &WgpuResourceTable,
    id: TextureId,
) -> Result<Arc<wgpu::TextureView>, RenderError> {
    table.texture(id)?.view.clone().ok_or_else(|| {
        RenderError::Validation(format!(
            "attachment {id:?} has no image, acquire the swapchain image first"
        ))
    })
}

/// Builds bind group 0 out of the bound constant buffers, binding number = slot.
fn constant_bind_group(
    shared: &WgpuDeviceShared,
    table: &WgpuResourceTable,
    layout: &wgpu::BindGroupLayout,
    constants: &BTreeMap<u32, BufferId>,
) -> Result<Option<wgpu::BindGroup>, ResourceError> {
    if constants.is_empty() {
        return Ok(None);
    }
    let buffers = constants
        .iter()
        .map(|(slot, id)| Ok((*slot, Arc::clone(&table.buffer(*id)?.buffer))))
        .collect::<Result<Vec<_>, ResourceError>>()?;
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .map(|(slot, buffer)| wgpu::BindGroupEntry {
            binding: *slot,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    Ok(Some(shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Prism Constant Buffers"),
        layout,
        entries: &entries,
    })))
}

fn mip_blitter(shared: &WgpuDeviceShared, format: TextureFormat) -> Arc<wgpu::RenderPipeline> {
    if let Some(pipeline) = shared.lock_table().mip_blitters.get(&format) {
        return Arc::clone(pipeline);
    }
    let module = shared
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Prism Mip Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(MIP_BLIT_SHADER.into()),
        });
    let pipeline = Arc::new(
        shared
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Prism Mip Blit Pipeline"),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: format.into_wgpu(),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            }),
    );
    shared
        .lock_table()
        .mip_blitters
        .insert(format, Arc::clone(&pipeline));
    pipeline
}
