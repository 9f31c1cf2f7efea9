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

//! Render targets: ordered color attachments plus at most one depth attachment.

use crate::math::Extent2D;
use crate::renderer::api::{TextureFormat, TextureId};
use crate::renderer::error::ResourceError;
use std::borrow::Cow;

/// Upper bound on simultaneously bound color attachments.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// A descriptor used to create a render target and the textures behind it.
#[derive(Debug, Clone)]
pub struct RenderTargetDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Extent shared by every attachment.
    pub extent: Extent2D,
    /// Formats of the color attachments, in binding order.
    pub color_formats: Vec<TextureFormat>,
    /// Format of the depth attachment, if any.
    pub depth_format: Option<TextureFormat>,
}

impl<'a> RenderTargetDescriptor<'a> {
    /// A render target with one color attachment and no depth.
    pub fn single_color(label: &'a str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            extent: Extent2D::new(width, height),
            color_formats: vec![format],
            depth_format: None,
        }
    }

    /// Checks the attachment set before any texture is allocated.
    pub fn validate(&self) -> Result<(), ResourceError> {
        if self.extent.is_empty() {
            return Err(ResourceError::InvalidDescriptor(format!(
                "render target extent {}x{} is empty",
                self.extent.width, self.extent.height
            )));
        }
        if self.color_formats.is_empty() && self.depth_format.is_none() {
            return Err(ResourceError::InvalidDescriptor(
                "render target has no attachment".to_string(),
            ));
        }
        if self.color_formats.len() > MAX_COLOR_ATTACHMENTS {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{} color attachments exceed the limit of {MAX_COLOR_ATTACHMENTS}",
                self.color_formats.len()
            )));
        }
        if let Some(format) = self.color_formats.iter().find(|f| f.is_depth()) {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{format:?} cannot be used as a color attachment"
            )));
        }
        match self.depth_format {
            Some(format) if !format.is_depth() => Err(ResourceError::InvalidDescriptor(format!(
                "{format:?} cannot be used as a depth attachment"
            ))),
            _ => Ok(()),
        }
    }
}

/// An opaque handle to a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetId(pub usize);

/// Metadata of a live render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetInfo {
    /// Extent shared by every attachment.
    pub extent: Extent2D,
    /// The color textures, in binding order.
    pub color_attachments: Vec<TextureId>,
    /// The depth texture, if any.
    pub depth_attachment: Option<TextureId>,
    /// Formats of the color attachments.
    pub color_formats: Vec<TextureFormat>,
    /// Format of the depth attachment.
    pub depth_format: Option<TextureFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_misplaced_formats() {
        let mut desc =
            RenderTargetDescriptor::single_color("rt", 64, 64, TextureFormat::Depth32Float);
        assert!(matches!(
            desc.validate(),
            Err(ResourceError::InvalidDescriptor(_))
        ));

        desc.color_formats = vec![TextureFormat::Rgba8Unorm];
        desc.depth_format = Some(TextureFormat::Rgba8Unorm);
        assert!(desc.validate().is_err());

        desc.depth_format = Some(TextureFormat::Depth24PlusStencil8);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let mut desc = RenderTargetDescriptor::single_color("rt", 0, 64, TextureFormat::Rgba8Unorm);
        assert!(desc.validate().is_err());
        desc.extent = Extent2D::new(64, 64);
        desc.color_formats.clear();
        assert!(desc.validate().is_err());
    }
}
