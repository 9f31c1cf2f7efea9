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

//! Graphics and compute pipeline descriptors.

use crate::renderer::api::{
    validate_binding_layout, BindingLayoutEntry, CompareFunction, ShaderId, TextureFormat,
};
use crate::renderer::error::PipelineError;
use std::borrow::Cow;

/// The format of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// One 32-bit float.
    Float32,
    /// Two 32-bit floats.
    Float32x2,
    /// Three 32-bit floats.
    Float32x3,
    /// Four 32-bit floats.
    Float32x4,
    /// Four 8-bit unsigned normalized values.
    Unorm8x4,
    /// One 32-bit unsigned integer.
    Uint32,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32 | VertexFormat::Unorm8x4 | VertexFormat::Uint32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// One attribute inside a vertex buffer layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Attribute format.
    pub format: VertexFormat,
    /// Byte offset inside one vertex.
    pub offset: u64,
}

/// Whether a vertex buffer advances per vertex or per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    /// Advances once per vertex.
    #[default]
    Vertex,
    /// Advances once per instance.
    Instance,
}

/// The layout of one vertex buffer slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    /// Distance in bytes between two elements.
    pub stride: u64,
    /// Step rate.
    pub step_mode: VertexStepMode,
    /// The attributes read from this slot.
    pub attributes: Vec<VertexAttribute>,
}

/// Primitive assembly mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Every vertex is a point.
    PointList,
    /// Every two vertices form a line.
    LineList,
    /// Every three vertices form a triangle.
    #[default]
    TriangleList,
    /// Each vertex after the second forms a triangle with the previous two.
    TriangleStrip,
}

/// Color blending preset of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Overwrites the destination.
    #[default]
    Opaque,
    /// Standard `src * a + dst * (1 - a)`.
    AlphaBlend,
    /// `src + dst`.
    Additive,
    /// Blends with the constant set by `CommandBuffer::set_blend_factor`.
    ConstantFactor,
}

/// Depth testing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    /// Whether passing fragments write depth.
    pub write_enabled: bool,
    /// The depth test.
    pub compare: CompareFunction,
}

/// A descriptor used to create a graphics pipeline.
///
/// `color_formats` and `depth_format` form the attachment format set the pipeline is
/// bound to; drawing into a render target with a different set is an error.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// The vertex shader.
    pub vertex_shader: ShaderId,
    /// The fragment shader, if any.
    pub fragment_shader: Option<ShaderId>,
    /// Vertex buffer slots, by index.
    pub vertex_layouts: Vec<VertexBufferLayout>,
    /// Primitive assembly.
    pub topology: PrimitiveTopology,
    /// Blending applied to every color attachment.
    pub blend: BlendMode,
    /// Depth testing, `None` disables it.
    pub depth: Option<DepthState>,
    /// Color attachment formats.
    pub color_formats: Vec<TextureFormat>,
    /// Depth attachment format.
    pub depth_format: Option<TextureFormat>,
    /// Bytes of push constants the shaders read.
    pub push_constant_size: u32,
    /// Resources the shaders read through a descriptor set.
    pub bindings: Vec<BindingLayoutEntry>,
}

impl GraphicsPipelineDescriptor<'_> {
    /// Checks the attachment formats and vertex layouts, which every driver requires
    /// before compiling anything.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let label = self.label.as_deref().map(str::to_string);
        if self.color_formats.is_empty() && self.depth_format.is_none() {
            return Err(PipelineError::CompilationFailed {
                label,
                details: "no attachment format".to_string(),
            });
        }
        if let Some(format) = self.color_formats.iter().find(|f| f.is_depth()) {
            return Err(PipelineError::IncompatibleColorTarget(format!(
                "{format:?} is a depth format"
            )));
        }
        match self.depth_format {
            Some(format) if !format.is_depth() => {
                return Err(PipelineError::IncompatibleDepthStencilFormat(format!(
                    "{format:?} is not a depth format"
                )))
            }
            None if self.depth.is_some() => {
                return Err(PipelineError::IncompatibleDepthStencilFormat(
                    "depth testing needs a depth format".to_string(),
                ))
            }
            _ => {}
        }
        for (slot, layout) in self.vertex_layouts.iter().enumerate() {
            if let Some(attribute) = layout
                .attributes
                .iter()
                .find(|a| a.offset + a.format.size() > layout.stride)
            {
                return Err(PipelineError::CompilationFailed {
                    label,
                    details: format!(
                        "attribute at location {} overruns the {}-byte stride of slot {}",
                        attribute.location, layout.stride, slot
                    ),
                });
            }
        }
        validate_binding_layout(self.label.as_deref(), &self.bindings)
    }
}

/// A descriptor used to create a compute pipeline.
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// The compute shader.
    pub shader: ShaderId,
    /// Bytes of push constants the shader reads.
    pub push_constant_size: u32,
    /// Resources the shader reads through a descriptor set.
    pub bindings: Vec<BindingLayoutEntry>,
}

impl ComputePipelineDescriptor<'_> {
    /// Checks the binding layout.
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_binding_layout(self.label.as_deref(), &self.bindings)
    }
}

/// Whether a pipeline drives the graphics or the compute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Raster pipeline.
    Graphics,
    /// Compute pipeline.
    Compute,
}

/// An opaque handle to a graphics or compute pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> GraphicsPipelineDescriptor<'static> {
        GraphicsPipelineDescriptor {
            label: Some(Cow::Borrowed("test")),
            vertex_shader: ShaderId(1),
            fragment_shader: None,
            vertex_layouts: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            blend: BlendMode::Opaque,
            depth: None,
            color_formats: vec![TextureFormat::Rgba8Unorm],
            depth_format: None,
            push_constant_size: 0,
            bindings: Vec::new(),
        }
    }

    #[test]
    fn test_depth_test_needs_a_depth_format() {
        let mut desc = descriptor();
        assert!(desc.validate().is_ok());

        desc.depth = Some(DepthState {
            write_enabled: true,
            compare: CompareFunction::Less,
        });

        assert!(matches!(
            desc.validate(),
            Err(PipelineError::IncompatibleDepthStencilFormat(_))
        ));
    }

    #[test]
    fn test_attribute_must_fit_the_stride() {
        let mut desc = descriptor();
        desc.vertex_layouts.push(VertexBufferLayout {
            stride: 12,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![VertexAttribute {
                location: 0,
                format: VertexFormat::Float32x4,
                offset: 0,
            }],
        });

        assert!(matches!(
            desc.validate(),
            Err(PipelineError::CompilationFailed { .. })
        ));
    }
}
