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

//! The emulated GPU: replays recorded commands against the resource table.
//!
//! Clears, copies, updates and mipmap generation really touch the CPU-side memory.
//! Draws and dispatches check their bindings and are counted. A handle that no longer
//! resolves is fatal and returned as an error, which the caller turns into device loss.
//! Barrier mismatches only produce validation messages.

use super::resources::{ResourceTable, SoftCounters, SoftDeviceShared, TextureEntry};
use crate::graphics::recorded::RecordedCommand;
use prism_core::renderer::api::{
    BufferId, ClearValue, DescriptorResource, DescriptorSetId, IndexFormat, PipelineId,
    RenderTargetId, ResourceState, TextureFormat, TextureId, VertexStepMode,
};
use prism_core::renderer::ResourceError;

/// Bindings of the command stream being executed.
#[derive(Debug, Default)]
struct ExecState {
    debug_regions: Vec<String>,
    render_target: Option<RenderTargetId>,
    pipeline: Option<PipelineId>,
    vertex_buffers: Vec<Option<(BufferId, u64)>>,
    index_buffer: Option<(BufferId, u64, IndexFormat)>,
    descriptor_set: Option<DescriptorSetId>,
}

/// Executes `commands` in order. Returns the reason of the first fatal failure.
pub(crate) fn execute(
    shared: &SoftDeviceShared,
    commands: &[RecordedCommand],
) -> Result<(), String> {
    let mut table = shared.lock_table();
    let mut state = ExecState::default();
    for command in commands {
        execute_one(shared, &mut table, &mut state, command)?;
    }
    Ok(())
}

fn execute_one(
    shared: &SoftDeviceShared,
    table: &mut ResourceTable,
    state: &mut ExecState,
    command: &RecordedCommand,
) -> Result<(), String> {
    match command {
        RecordedCommand::BeginEvent(label) => {
            log::trace!("SoftGpu: begin region '{}'", label);
            state.debug_regions.push(label.clone());
        }
        RecordedCommand::EndEvent => {
            state.debug_regions.pop();
        }
        RecordedCommand::Transition {
            texture,
            before,
            after,
        } => {
            let entry = texture_mut(table, *texture)?;
            let actual = entry.state;
            entry.state = *after;
            if *before != ResourceState::Undefined && *before != actual {
                shared.report_validation(&format!(
                    "barrier on texture '{}' ({:?}) expects {:?}, it is in {:?}",
                    entry.label, texture, before, actual
                ));
            }
        }
        RecordedCommand::BeginRenderTarget { target, clear } => {
            begin_render_target(shared, table, *target, clear)?;
            state.render_target = Some(*target);
        }
        RecordedCommand::EndRenderTarget { target } => {
            require(table.render_targets.contains_key(target), table, "render target", target.0)?;
            state.render_target = None;
        }
        RecordedCommand::SetPipeline(id) => {
            require(table.pipelines.contains_key(id), table, "pipeline", id.0)?;
            state.pipeline = Some(*id);
        }
        RecordedCommand::SetVertexBuffers {
            first_slot,
            buffers,
        } => {
            for (index, (buffer, offset)) in buffers.iter().enumerate() {
                require(table.buffers.contains_key(buffer), table, "buffer", buffer.0)?;
                let slot = *first_slot as usize + index;
                if state.vertex_buffers.len() <= slot {
                    state.vertex_buffers.resize(slot + 1, None);
                }
                state.vertex_buffers[slot] = Some((*buffer, *offset));
            }
        }
        RecordedCommand::SetIndexBuffer {
            buffer,
            offset,
            format,
        } => {
            require(table.buffers.contains_key(buffer), table, "buffer", buffer.0)?;
            state.index_buffer = Some((*buffer, *offset, *format));
        }
        RecordedCommand::BindConstantBuffer { buffer, .. } => {
            require(table.buffers.contains_key(buffer), table, "buffer", buffer.0)?;
        }
        RecordedCommand::SetDescriptorSet(id) => {
            require(table.descriptor_sets.contains_key(id), table, "descriptor set", id.0)?;
            state.descriptor_set = Some(*id);
        }
        RecordedCommand::SetScissors(_) | RecordedCommand::SetBlendFactor(_) => {}
        RecordedCommand::PushConstants { .. } => {
            current_pipeline(table, state)?;
        }
        RecordedCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        } => {
            check_draw_bindings(table, state)?;
            let vertices = u64::from(*first_vertex) + u64::from(*vertex_count);
            let instances = u64::from(*first_instance) + u64::from(*instance_count);
            check_vertex_fetch(shared, table, state, vertices, instances)?;
            SoftCounters::bump(&shared.counters.draw_calls);
        }
        RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        } => {
            check_draw_bindings(table, state)?;
            let max_index = max_index(table, state, *first_index, *index_count)?;
            if let Some(max_index) = max_index {
                let vertices = (i64::from(max_index) + i64::from(*base_vertex) + 1).max(0) as u64;
                let instances = u64::from(*first_instance) + u64::from(*instance_count);
                check_vertex_fetch(shared, table, state, vertices, instances)?;
            }
            SoftCounters::bump(&shared.counters.draw_calls);
        }
        RecordedCommand::Dispatch { x, y, z } => {
            current_pipeline(table, state)?;
            check_descriptor_set(table, state)?;
            log::trace!("SoftGpu: dispatch {}x{}x{}", x, y, z);
            SoftCounters::bump(&shared.counters.dispatches);
        }
        RecordedCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        } => {
            let bytes = read_buffer_range(table, *src, *src_offset, *size)?;
            write_buffer_range(table, *dst, *dst_offset, &bytes)?;
        }
        RecordedCommand::CopyBufferToTexture {
            src,
            src_offset,
            bytes_per_row,
            dst,
            mip_level,
        } => {
            let src_len = table
                .buffers
                .get(src)
                .map(|entry| entry.data.len() as u64)
                .ok_or_else(|| table.missing("buffer", src.0))?;
            let bytes =
                read_buffer_range(table, *src, *src_offset, src_len.saturating_sub(*src_offset))?;
            let entry = texture_mut(table, *dst)?;
            write_texture_rows(entry, *mip_level, &bytes, *bytes_per_row)
                .map_err(|err| format!("copy into texture {}: {err}", dst.0))?;
        }
        RecordedCommand::UpdateBuffer {
            buffer,
            offset,
            data,
        } => {
            write_buffer_range(table, *buffer, *offset, data)?;
        }
        RecordedCommand::GenerateMipmaps(texture) => {
            generate_mipmaps(texture_mut(table, *texture)?);
        }
    }
    Ok(())
}

fn require(present: bool, table: &ResourceTable, kind: &str, raw: usize) -> Result<(), String> {
    if present {
        Ok(())
    } else {
        Err(table.missing(kind, raw))
    }
}

fn texture_mut(table: &mut ResourceTable, id: TextureId) -> Result<&mut TextureEntry, String> {
    if !table.textures.contains_key(&id) {
        return Err(table.missing("texture", id.0));
    }
    table
        .textures
        .get_mut(&id)
        .ok_or_else(|| format!("unknown texture {}", id.0))
}

fn current_pipeline(table: &ResourceTable, state: &ExecState) -> Result<PipelineId, String> {
    let id = state
        .pipeline
        .ok_or_else(|| "no pipeline bound at execution".to_string())?;
    require(table.pipelines.contains_key(&id), table, "pipeline", id.0)?;
    Ok(id)
}

fn begin_render_target(
    shared: &SoftDeviceShared,
    table: &mut ResourceTable,
    target: RenderTargetId,
    clear: &ClearValue,
) -> Result<(), String> {
    let (views, colors, depth, swapchain_owned) = match table.render_targets.get(&target) {
        Some(entry) => (
            entry.views.clone(),
            entry.info.color_attachments.clone(),
            entry.info.depth_attachment,
            entry.swapchain_owned,
        ),
        None => return Err(table.missing("render target", target.0)),
    };
    for view in &views {
        require(table.views.contains_key(view), table, "view", *view)?;
    }

    for texture in &colors {
        let entry = texture_mut(table, *texture)?;
        if entry.state != ResourceState::RenderTarget {
            let message = format!(
                "color attachment '{}' is bound in the {:?} state",
                entry.label, entry.state
            );
            // Swapchain images are moved by the recorded barriers, a mismatch there has
            // already been reported by the transition itself.
            if !swapchain_owned {
                shared.report_validation(&message);
            }
        }
        if let Some(color) = clear.color {
            if let Some(pixel) = entry.info.format.encode_color_clear(color) {
                fill(&mut entry.mips[0], &pixel);
            }
        }
    }

    if let Some(texture) = depth {
        let entry = texture_mut(table, texture)?;
        if let Some(depth) = clear.depth {
            if entry.state != ResourceState::DepthWrite {
                shared.report_validation(&format!(
                    "depth attachment '{}' is cleared in the {:?} state",
                    entry.label, entry.state
                ));
            }
            if let Some(pixel) = entry.info.format.encode_depth_clear(depth, clear.stencil) {
                fill(&mut entry.mips[0], &pixel);
            }
        }
    }
    Ok(())
}

fn fill(dst: &mut [u8], pixel: &[u8]) {
    for chunk in dst.chunks_exact_mut(pixel.len()) {
        chunk.copy_from_slice(pixel);
    }
}

fn check_draw_bindings(table: &ResourceTable, state: &ExecState) -> Result<(), String> {
    current_pipeline(table, state)?;
    if let Some(target) = state.render_target {
        require(table.render_targets.contains_key(&target), table, "render target", target.0)?;
    }
    for (buffer, _) in state.vertex_buffers.iter().flatten() {
        require(table.buffers.contains_key(buffer), table, "buffer", buffer.0)?;
    }
    if let Some((buffer, _, _)) = state.index_buffer {
        require(table.buffers.contains_key(&buffer), table, "buffer", buffer.0)?;
    }
    check_descriptor_set(table, state)
}

/// Every resource of the bound descriptor set must still be alive.
fn check_descriptor_set(table: &ResourceTable, state: &ExecState) -> Result<(), String> {
    let Some(id) = state.descriptor_set else {
        return Ok(());
    };
    let set = table
        .descriptor_sets
        .get(&id)
        .ok_or_else(|| table.missing("descriptor set", id.0))?;
    for binding in &set.bindings {
        match binding.resource {
            DescriptorResource::ConstantBuffer(buffer)
            | DescriptorResource::StorageBuffer(buffer) => {
                require(table.buffers.contains_key(&buffer), table, "buffer", buffer.0)?
            }
            DescriptorResource::Texture(texture) => {
                require(table.textures.contains_key(&texture), table, "texture", texture.0)?
            }
            DescriptorResource::Sampler(sampler) => {
                require(table.samplers.contains_key(&sampler), table, "sampler", sampler.0)?
            }
        }
    }
    Ok(())
}

/// Warns when a draw would fetch vertices past the end of a bound buffer.
fn check_vertex_fetch(
    shared: &SoftDeviceShared,
    table: &ResourceTable,
    state: &ExecState,
    vertices: u64,
    instances: u64,
) -> Result<(), String> {
    let pipeline = current_pipeline(table, state)?;
    let Some(entry) = table.pipelines.get(&pipeline) else {
        return Ok(());
    };
    for (slot, layout) in entry.vertex_layouts.iter().enumerate() {
        let Some((buffer, offset)) = state.vertex_buffers.get(slot).copied().flatten() else {
            continue;
        };
        let elements = match layout.step_mode {
            VertexStepMode::Vertex => vertices,
            VertexStepMode::Instance => instances,
        };
        let needed = offset + elements * layout.stride;
        let size = table
            .buffers
            .get(&buffer)
            .map(|b| b.info.size)
            .unwrap_or_default();
        if elements > 0 && needed > size {
            shared.report_validation(&format!(
                "draw reads {needed} bytes from {size}-byte vertex buffer {buffer:?} (slot {slot})"
            ));
        }
    }
    Ok(())
}

/// The largest index a draw reads, `None` for an empty draw.
fn max_index(
    table: &ResourceTable,
    state: &ExecState,
    first_index: u32,
    index_count: u32,
) -> Result<Option<u32>, String> {
    let (buffer, offset, format) = state
        .index_buffer
        .ok_or_else(|| "no index buffer bound at execution".to_string())?;
    let entry = table
        .buffers
        .get(&buffer)
        .ok_or_else(|| table.missing("buffer", buffer.0))?;
    let size = format.size() as usize;
    let start = offset as usize + first_index as usize * size;
    let end = start + index_count as usize * size;
    let bytes = entry
        .data
        .get(start..end)
        .ok_or_else(|| format!("index range {start}..{end} outside buffer {}", buffer.0))?;
    let max = match format {
        IndexFormat::Uint16 => bytes
            .chunks_exact(2)
            .map(|c| u32::from(bytemuck::pod_read_unaligned::<u16>(c)))
            .max(),
        IndexFormat::Uint32 => bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .max(),
    };
    Ok(max)
}

fn read_buffer_range(
    table: &ResourceTable,
    id: BufferId,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>, String> {
    let entry = table
        .buffers
        .get(&id)
        .ok_or_else(|| table.missing("buffer", id.0))?;
    let range = offset as usize..(offset + size) as usize;
    entry
        .data
        .get(range)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| format!("read outside buffer '{}'", entry.label))
}

fn write_buffer_range(
    table: &mut ResourceTable,
    id: BufferId,
    offset: u64,
    data: &[u8],
) -> Result<(), String> {
    if !table.buffers.contains_key(&id) {
        return Err(table.missing("buffer", id.0));
    }
    let entry = table
        .buffers
        .get_mut(&id)
        .ok_or_else(|| format!("unknown buffer {}", id.0))?;
    let start = offset as usize;
    let label = entry.label.clone();
    entry
        .data
        .get_mut(start..start + data.len())
        .ok_or_else(|| format!("write outside buffer '{label}'"))?
        .copy_from_slice(data);
    Ok(())
}

/// Writes a whole mip level from rows `bytes_per_row` apart in `data`.
pub(crate) fn write_texture_rows(
    entry: &mut TextureEntry,
    mip_level: u32,
    data: &[u8],
    bytes_per_row: u32,
) -> Result<(), ResourceError> {
    if mip_level >= entry.info.mip_level_count {
        return Err(ResourceError::OutOfBounds);
    }
    let mip = entry.mip_extent(mip_level);
    let row_bytes = mip.width as usize * entry.info.format.bytes_per_pixel() as usize;
    let rows = mip.height as usize * mip.depth_or_array_layers as usize;
    let pitch = bytes_per_row as usize;
    if pitch < row_bytes || data.len() < pitch * (rows - 1) + row_bytes {
        return Err(ResourceError::OutOfBounds);
    }
    let level = entry
        .mips
        .get_mut(mip_level as usize)
        .ok_or(ResourceError::OutOfBounds)?;
    for (row, dst) in level.chunks_exact_mut(row_bytes).enumerate() {
        let start = row * pitch;
        dst.copy_from_slice(&data[start..start + row_bytes]);
    }
    Ok(())
}

fn is_unorm8(format: TextureFormat) -> bool {
    matches!(
        format,
        TextureFormat::R8Unorm
            | TextureFormat::Rg8Unorm
            | TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
    )
}

/// Fills levels 1.. from level 0: a 2x2 box filter for 8-bit formats, nearest otherwise.
pub(crate) fn generate_mipmaps(entry: &mut TextureEntry) {
    let bpp = entry.info.format.bytes_per_pixel() as usize;
    let box_filter = is_unorm8(entry.info.format);
    for level in 1..entry.info.mip_level_count {
        let src_extent = entry.mip_extent(level - 1);
        let dst_extent = entry.mip_extent(level);
        let (sw, sh) = (src_extent.width as usize, src_extent.height as usize);
        let (dw, dh) = (dst_extent.width as usize, dst_extent.height as usize);
        let layers = dst_extent.depth_or_array_layers as usize;
        let src = &entry.mips[level as usize - 1];
        let mut out = vec![0u8; dw * dh * layers * bpp];

        for layer in 0..layers {
            for y in 0..dh {
                for x in 0..dw {
                    let dst = ((layer * dh + y) * dw + x) * bpp;
                    let texel = |sx: usize, sy: usize| ((layer * sh + sy) * sw + sx) * bpp;
                    if box_filter {
                        let (x0, y0) = (2 * x, 2 * y);
                        let corners = [(x0, y0), (x0 + 1, y0), (x0, y0 + 1), (x0 + 1, y0 + 1)];
                        let taps: Vec<usize> = corners
                            .into_iter()
                            .filter(|(sx, sy)| *sx < sw && *sy < sh)
                            .map(|(sx, sy)| texel(sx, sy))
                            .collect();
                        let n = taps.len() as u32;
                        for c in 0..bpp {
                            let sum: u32 = taps.iter().map(|t| u32::from(src[t + c])).sum();
                            out[dst + c] = ((sum + n / 2) / n) as u8;
                        }
                    } else {
                        let s = texel((2 * x).min(sw - 1), (2 * y).min(sh - 1));
                        out[dst..dst + bpp].copy_from_slice(&src[s..s + bpp]);
                    }
                }
            }
        }
        entry.mips[level as usize] = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::math::Extent3D;
    use prism_core::renderer::api::{TextureInfo, TextureUsage};

    fn texture(width: u32, height: u32, mips: u32, format: TextureFormat) -> TextureEntry {
        let size = Extent3D {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let bpp = format.bytes_per_pixel();
        TextureEntry {
            label: "t".to_string(),
            info: TextureInfo {
                size,
                mip_level_count: mips,
                format,
                usage: TextureUsage::SAMPLED,
            },
            state: ResourceState::Undefined,
            submitted_state: ResourceState::Undefined,
            mips: (0..mips)
                .map(|l| {
                    let m = size.mip_level_size(l);
                    vec![0u8; (m.width * m.height * bpp) as usize]
                })
                .collect(),
            owner: None,
            bytes: 0,
        }
    }

    #[test]
    fn test_box_filter_averages_quads() {
        let mut entry = texture(2, 2, 2, TextureFormat::R8Unorm);
        entry.mips[0] = vec![0, 100, 200, 100];

        generate_mipmaps(&mut entry);

        assert_eq!(entry.mips[1], vec![100]);
    }

    #[test]
    fn test_float_formats_use_nearest() {
        let mut entry = texture(2, 2, 2, TextureFormat::R32Float);
        let texels: Vec<u8> = [1.5f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        entry.mips[0] = texels;

        generate_mipmaps(&mut entry);

        let value = f32::from_le_bytes(entry.mips[1][..4].try_into().unwrap());
        approx::assert_relative_eq!(value, 1.5);
    }

    #[test]
    fn test_row_pitch_is_honoured() {
        let mut entry = texture(2, 2, 1, TextureFormat::Rg8Unorm);
        // Rows of 4 bytes padded to 8.
        let data = [1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8];

        write_texture_rows(&mut entry, 0, &data, 8).unwrap();

        assert_eq!(entry.mips[0], vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(matches!(
            write_texture_rows(&mut entry, 0, &data[..10], 8),
            Err(ResourceError::OutOfBounds)
        ));
    }
}
