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

//! Shader descriptors. Sources are opaque: no reflection or cross-compilation happens here.

use std::borrow::Cow;

/// Defines the programmable stage a shader is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// The vertex shader stage.
    Vertex,
    /// The fragment (or pixel) shader stage.
    Fragment,
    /// The compute shader stage.
    Compute,
}

/// Shader input handed to the backend compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource<'a> {
    /// HLSL text.
    Hlsl(Cow<'a, str>),
    /// GLSL text.
    Glsl(Cow<'a, str>),
    /// WGSL text.
    Wgsl(Cow<'a, str>),
    /// SPIR-V words.
    SpirV(Cow<'a, [u32]>),
    /// Compiled DXBC/DXIL container.
    Dxil(Cow<'a, [u8]>),
}

/// Magic number opening every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

impl ShaderSource<'_> {
    /// A short name of the source kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ShaderSource::Hlsl(_) => "HLSL",
            ShaderSource::Glsl(_) => "GLSL",
            ShaderSource::Wgsl(_) => "WGSL",
            ShaderSource::SpirV(_) => "SPIR-V",
            ShaderSource::Dxil(_) => "DXIL",
        }
    }

    /// The text of text-based sources.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ShaderSource::Hlsl(s) | ShaderSource::Glsl(s) | ShaderSource::Wgsl(s) => Some(s),
            ShaderSource::SpirV(_) | ShaderSource::Dxil(_) => None,
        }
    }

    /// `true` when the payload is empty.
    pub fn is_empty(&self) -> bool {
        match self {
            ShaderSource::Hlsl(s) | ShaderSource::Glsl(s) | ShaderSource::Wgsl(s) => {
                s.trim().is_empty()
            }
            ShaderSource::SpirV(words) => words.is_empty(),
            ShaderSource::Dxil(bytes) => bytes.is_empty(),
        }
    }
}

/// A descriptor used to create a shader.
#[derive(Debug, Clone)]
pub struct ShaderDescriptor<'a> {
    /// Name used in diagnostics.
    pub name: Cow<'a, str>,
    /// The stage the shader runs at.
    pub stage: ShaderStage,
    /// The shader input.
    pub source: ShaderSource<'a>,
    /// The entry point function.
    pub entry_point: Cow<'a, str>,
}

/// An opaque handle to a compiled shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_text_access() {
        let src = ShaderSource::Hlsl(Cow::Borrowed("float4 main() : SV_Target { return 1; }"));
        assert_eq!(src.kind_name(), "HLSL");
        assert!(src.as_text().unwrap().contains("main"));
        assert!(ShaderSource::SpirV(Cow::Owned(vec![])).is_empty());
        assert!(ShaderSource::Glsl(Cow::Borrowed("   ")).is_empty());
    }
}
