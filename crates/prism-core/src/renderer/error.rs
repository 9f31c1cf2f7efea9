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

//! Defines the hierarchy of error types for the graphics layer.
//!
//! Fatal conditions (device loss, submission failure, shader compilation failure) are
//! errors. Expected, transient conditions such as a wait timing out are *not* errors:
//! they are reported through [`WaitStatus`](crate::renderer::api::WaitStatus) and
//! [`AcquireStatus`](crate::renderer::api::AcquireStatus).

use crate::renderer::api::{GraphicsBackendType, PipelineId, ShaderId};
use std::fmt;

/// An error related to the creation or compilation of a shader.
#[derive(Debug)]
pub enum ShaderError {
    /// The shader source failed to compile for the active backend.
    CompilationError {
        /// The shader name.
        label: String,
        /// Compiler output.
        details: String,
    },
    /// The backend cannot consume this kind of shader source.
    UnsupportedSource {
        /// The shader name.
        label: String,
        /// The backend that rejected the source.
        backend: GraphicsBackendType,
    },
    /// The requested shader could not be found.
    NotFound {
        /// The ID of the missing shader.
        id: ShaderId,
    },
    /// The entry point is empty or not present in the source.
    InvalidEntryPoint {
        /// The shader name.
        label: String,
        /// The entry point that was requested.
        entry_point: String,
    },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::CompilationError { label, details } => {
                write!(f, "Shader compilation failed for '{label}': {details}")
            }
            ShaderError::UnsupportedSource { label, backend } => {
                write!(f, "Shader '{label}' has a source kind {backend:?} cannot consume")
            }
            ShaderError::NotFound { id } => write!(f, "Shader not found for ID: {id:?}"),
            ShaderError::InvalidEntryPoint { label, entry_point } => {
                write!(f, "Invalid entry point '{entry_point}' for shader '{label}'")
            }
        }
    }
}

impl std::error::Error for ShaderError {}

/// An error related to the creation or use of a pipeline.
#[derive(Debug)]
pub enum PipelineError {
    /// A shader given to the pipeline is invalid, destroyed, or of the wrong stage.
    InvalidShader {
        /// The offending shader.
        id: ShaderId,
        /// The label of the pipeline being created.
        pipeline_label: Option<String>,
    },
    /// The backend failed to build the pipeline state object.
    CompilationFailed {
        /// The label of the pipeline, if any.
        label: Option<String>,
        /// Details from the backend.
        details: String,
    },
    /// The referenced pipeline does not exist.
    InvalidPipeline {
        /// The ID of the invalid pipeline.
        id: PipelineId,
    },
    /// The color formats of the pipeline and the bound render target differ.
    IncompatibleColorTarget(String),
    /// The depth format of the pipeline and the bound render target differ.
    IncompatibleDepthStencilFormat(String),
    /// A required feature is not available on this backend.
    FeatureNotSupported(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidShader { id, pipeline_label } => write!(
                f,
                "Invalid shader {:?} for pipeline '{}'",
                id,
                pipeline_label.as_deref().unwrap_or("Unknown")
            ),
            PipelineError::CompilationFailed { label, details } => write!(
                f,
                "Pipeline compilation failed for '{}': {}",
                label.as_deref().unwrap_or("Unknown"),
                details
            ),
            PipelineError::InvalidPipeline { id } => write!(f, "Invalid pipeline ID: {id:?}"),
            PipelineError::IncompatibleColorTarget(msg) => {
                write!(f, "Incompatible color target format: {msg}")
            }
            PipelineError::IncompatibleDepthStencilFormat(msg) => {
                write!(f, "Incompatible depth/stencil format: {msg}")
            }
            PipelineError::FeatureNotSupported(msg) => write!(f, "Feature not supported: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// An error related to the creation or use of a GPU resource.
///
/// Creation functions return this error instead of a partially built object.
#[derive(Debug)]
pub enum ResourceError {
    /// A shader-specific error occurred.
    Shader(ShaderError),
    /// A pipeline-specific error occurred.
    Pipeline(PipelineError),
    /// No resource exists for the given ID.
    NotFound,
    /// The handle refers to a resource of another kind, or one that was destroyed.
    InvalidHandle,
    /// The allocation does not fit in the remaining device memory.
    OutOfMemory {
        /// Bytes requested by the allocation.
        requested: u64,
        /// Bytes still available on the device.
        available: u64,
    },
    /// The descriptor is self-inconsistent (zero size, mismatched extents, ...).
    InvalidDescriptor(String),
    /// The buffer is already mapped.
    AlreadyMapped,
    /// The buffer is not currently mapped.
    NotMapped,
    /// An access went past the end of a resource.
    OutOfBounds,
    /// An object created by one backend was handed to another.
    BackendMismatch {
        /// The backend of the receiving object.
        expected: GraphicsBackendType,
        /// The backend of the object that was passed in.
        found: GraphicsBackendType,
    },
    /// An error originating from the backend implementation.
    BackendError(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Shader(err) => write!(f, "Shader resource error: {err}"),
            ResourceError::Pipeline(err) => write!(f, "Pipeline resource error: {err}"),
            ResourceError::NotFound => write!(f, "Resource not found with ID."),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle or ID."),
            ResourceError::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "Out of device memory: requested {requested} bytes, {available} available"
            ),
            ResourceError::InvalidDescriptor(msg) => write!(f, "Invalid descriptor: {msg}"),
            ResourceError::AlreadyMapped => write!(f, "Buffer is already mapped."),
            ResourceError::NotMapped => write!(f, "Buffer is not mapped."),
            ResourceError::OutOfBounds => write!(f, "Resource access out of bounds."),
            ResourceError::BackendMismatch { expected, found } => {
                write!(f, "Backend mismatch: expected {expected:?}, found {found:?}")
            }
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Shader(err) => Some(err),
            ResourceError::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for ResourceError {
    fn from(err: ShaderError) -> Self {
        ResourceError::Shader(err)
    }
}

impl From<PipelineError> for ResourceError {
    fn from(err: PipelineError) -> Self {
        ResourceError::Pipeline(err)
    }
}

/// A high-level error from a device, queue, command buffer or swapchain.
#[derive(Debug)]
pub enum RenderError {
    /// The backend could not be brought up.
    InitializationFailed(String),
    /// The device was lost. Every object created from it is unusable.
    DeviceLost,
    /// The driver rejected a submission. The queue is unusable afterwards.
    SubmissionFailed(String),
    /// The queue failed earlier and refuses further work.
    QueueLost,
    /// An operation was called in the wrong state (e.g. `end` while not recording).
    InvalidState(String),
    /// The command buffer's previous submission has not completed yet.
    CommandBufferInFlight,
    /// A swapchain image could not be acquired.
    SurfaceAcquisitionFailed(String),
    /// A recorded operation failed validation.
    Validation(String),
    /// An error occurred while managing a GPU resource.
    ResourceError(ResourceError),
    /// An object created by one backend was handed to another.
    BackendMismatch {
        /// The backend of the receiving object.
        expected: GraphicsBackendType,
        /// The backend of the object that was passed in.
        found: GraphicsBackendType,
    },
    /// An unexpected or internal error occurred.
    Internal(String),
}

impl RenderError {
    /// `true` for errors after which the device or queue cannot be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderError::DeviceLost | RenderError::SubmissionFailed(_) | RenderError::QueueLost
        ) || matches!(self, RenderError::ResourceError(ResourceError::Shader(_)))
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InitializationFailed(msg) => {
                write!(f, "Failed to initialize graphics backend: {msg}")
            }
            RenderError::DeviceLost => write!(
                f,
                "The graphics device was lost and needs to be reinitialized."
            ),
            RenderError::SubmissionFailed(msg) => write!(f, "Queue submission failed: {msg}"),
            RenderError::QueueLost => {
                write!(f, "The queue failed earlier and cannot accept more work.")
            }
            RenderError::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            RenderError::CommandBufferInFlight => write!(
                f,
                "The command buffer is still executing on the GPU and cannot be reset."
            ),
            RenderError::SurfaceAcquisitionFailed(msg) => {
                write!(f, "Failed to acquire surface for rendering: {msg}")
            }
            RenderError::Validation(msg) => write!(f, "Validation error: {msg}"),
            RenderError::ResourceError(err) => {
                write!(f, "Graphics resource operation failed: {err}")
            }
            RenderError::BackendMismatch { expected, found } => {
                write!(f, "Backend mismatch: expected {expected:?}, found {found:?}")
            }
            RenderError::Internal(msg) => {
                write!(f, "An internal or unexpected error occurred: {msg}")
            }
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::ResourceError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        RenderError::ResourceError(err)
    }
}

impl From<ShaderError> for RenderError {
    fn from(err: ShaderError) -> Self {
        RenderError::ResourceError(ResourceError::Shader(err))
    }
}

impl From<PipelineError> for RenderError {
    fn from(err: PipelineError) -> Self {
        RenderError::ResourceError(ResourceError::Pipeline(err))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn shader_error_display() {
        let err = ShaderError::CompilationError {
            label: "triangle.vs".to_string(),
            details: "unexpected token at 3:7".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Shader compilation failed for 'triangle.vs': unexpected token at 3:7"
        );
    }

    #[test]
    fn render_error_wraps_resource_error() {
        let render_err: RenderError = ShaderError::NotFound { id: ShaderId(7) }.into();
        assert_eq!(
            format!("{render_err}"),
            concat!(
                "Graphics resource operation failed: Shader resource error: ",
                "Shader not found for ID: ShaderId(7)"
            )
        );
        assert!(render_err.source().is_some());
        assert!(render_err.is_fatal());
    }

    #[test]
    fn transient_errors_are_not_fatal() {
        assert!(!RenderError::CommandBufferInFlight.is_fatal());
        assert!(!RenderError::from(ResourceError::AlreadyMapped).is_fatal());
        assert!(RenderError::DeviceLost.is_fatal());
        assert!(RenderError::SubmissionFailed("worker gone".into()).is_fatal());
    }
}
