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

//! Descriptor sets: the textures, samplers and buffers a pipeline's shaders read.
//!
//! A pipeline declares its binding layout when it is created. A descriptor set is built
//! against one pipeline and must provide every binding of that layout, each with a
//! resource of the declared type. Sets bind to group [`DESCRIPTOR_SET_GROUP`]; loose
//! constant buffers keep group 0.

use crate::renderer::api::{BufferId, PipelineId, SamplerId, TextureId};
use crate::renderer::error::{PipelineError, ResourceError};
use std::borrow::Cow;

/// The shader resource group descriptor sets are bound to.
pub const DESCRIPTOR_SET_GROUP: u32 = 1;

/// The kind of resource a binding slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// A buffer created with `CONSTANT` usage.
    ConstantBuffer,
    /// A buffer created with `STORAGE` usage.
    StorageBuffer,
    /// A texture created with `SAMPLED` usage.
    SampledTexture,
    /// A sampler.
    Sampler,
}

/// One slot of a pipeline's binding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingLayoutEntry {
    /// Binding number inside the descriptor set group.
    pub binding: u32,
    /// What the slot accepts.
    pub ty: BindingType,
}

impl BindingLayoutEntry {
    /// Creates a layout entry.
    pub const fn new(binding: u32, ty: BindingType) -> Self {
        Self { binding, ty }
    }
}

/// Rejects layouts that declare the same binding number twice.
pub fn validate_binding_layout(
    label: Option<&str>,
    bindings: &[BindingLayoutEntry],
) -> Result<(), PipelineError> {
    for (index, entry) in bindings.iter().enumerate() {
        if bindings[..index].iter().any(|e| e.binding == entry.binding) {
            return Err(PipelineError::CompilationFailed {
                label: label.map(str::to_string),
                details: format!("binding {} is declared twice", entry.binding),
            });
        }
    }
    Ok(())
}

/// Whether two binding layouts declare the same slots, in any order.
pub fn layouts_compatible(a: &[BindingLayoutEntry], b: &[BindingLayoutEntry]) -> bool {
    a.len() == b.len() && a.iter().all(|entry| b.contains(entry))
}

/// A resource written into a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    /// A whole constant buffer.
    ConstantBuffer(BufferId),
    /// A whole storage buffer.
    StorageBuffer(BufferId),
    /// A sampled texture, all mip levels.
    Texture(TextureId),
    /// A sampler.
    Sampler(SamplerId),
}

impl DescriptorResource {
    /// The binding type this resource fills.
    pub fn binding_type(&self) -> BindingType {
        match self {
            DescriptorResource::ConstantBuffer(_) => BindingType::ConstantBuffer,
            DescriptorResource::StorageBuffer(_) => BindingType::StorageBuffer,
            DescriptorResource::Texture(_) => BindingType::SampledTexture,
            DescriptorResource::Sampler(_) => BindingType::Sampler,
        }
    }
}

/// One resource at one binding number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    /// Binding number inside the descriptor set group.
    pub binding: u32,
    /// The resource bound there.
    pub resource: DescriptorResource,
}

/// A descriptor used to create a descriptor set.
#[derive(Debug, Clone)]
pub struct DescriptorSetDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// The pipeline whose binding layout the set follows.
    pub pipeline: PipelineId,
    /// One entry per binding of the layout.
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetDescriptor<'_> {
    /// Checks that the set fills `layout` exactly: every slot once, with its declared type.
    pub fn validate_against(&self, layout: &[BindingLayoutEntry]) -> Result<(), ResourceError> {
        let name = self.label.as_deref().unwrap_or("descriptor set");
        for (index, entry) in self.bindings.iter().enumerate() {
            if self.bindings[..index]
                .iter()
                .any(|e| e.binding == entry.binding)
            {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "'{name}' writes binding {} twice",
                    entry.binding
                )));
            }
            let Some(slot) = layout.iter().find(|slot| slot.binding == entry.binding) else {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "'{name}' writes binding {}, pipeline {:?} does not declare it",
                    entry.binding, self.pipeline
                )));
            };
            if slot.ty != entry.resource.binding_type() {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "'{name}' binds {:?} at binding {}, the layout expects {:?}",
                    entry.resource, entry.binding, slot.ty
                )));
            }
        }
        if let Some(slot) = layout
            .iter()
            .find(|slot| !self.bindings.iter().any(|e| e.binding == slot.binding))
        {
            return Err(ResourceError::InvalidDescriptor(format!(
                "'{name}' leaves binding {} ({:?}) empty",
                slot.binding, slot.ty
            )));
        }
        Ok(())
    }
}

/// An opaque handle to a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetId(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    fn texture_layout() -> Vec<BindingLayoutEntry> {
        vec![
            BindingLayoutEntry::new(0, BindingType::SampledTexture),
            BindingLayoutEntry::new(1, BindingType::Sampler),
        ]
    }

    fn set(bindings: Vec<DescriptorBinding>) -> DescriptorSetDescriptor<'static> {
        DescriptorSetDescriptor {
            label: Some(Cow::Borrowed("picture")),
            pipeline: PipelineId(7),
            bindings,
        }
    }

    #[test]
    fn test_set_must_fill_every_slot_with_the_declared_type() {
        // ARRANGE
        let layout = texture_layout();
        let complete = set(vec![
            DescriptorBinding {
                binding: 0,
                resource: DescriptorResource::Texture(TextureId(3)),
            },
            DescriptorBinding {
                binding: 1,
                resource: DescriptorResource::Sampler(SamplerId(4)),
            },
        ]);
        let swapped = set(vec![
            DescriptorBinding {
                binding: 0,
                resource: DescriptorResource::Sampler(SamplerId(4)),
            },
            DescriptorBinding {
                binding: 1,
                resource: DescriptorResource::Texture(TextureId(3)),
            },
        ]);
        let partial = set(vec![DescriptorBinding {
            binding: 0,
            resource: DescriptorResource::Texture(TextureId(3)),
        }]);

        // ACT & ASSERT
        assert!(complete.validate_against(&layout).is_ok());
        assert!(matches!(
            swapped.validate_against(&layout),
            Err(ResourceError::InvalidDescriptor(_))
        ));
        match partial.validate_against(&layout) {
            Err(ResourceError::InvalidDescriptor(msg)) => assert!(msg.contains("empty"), "{msg}"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_layout_rejects_duplicate_bindings() {
        let mut layout = texture_layout();
        assert!(validate_binding_layout(Some("blit"), &layout).is_ok());

        layout.push(BindingLayoutEntry::new(1, BindingType::ConstantBuffer));

        assert!(matches!(
            validate_binding_layout(Some("blit"), &layout),
            Err(PipelineError::CompilationFailed { .. })
        ));
    }

    #[test]
    fn test_layout_order_does_not_matter() {
        let layout = texture_layout();
        let reversed: Vec<_> = layout.iter().rev().copied().collect();

        assert!(layouts_compatible(&layout, &reversed));
        assert!(!layouts_compatible(&layout, &layout[..1]));
    }
}
