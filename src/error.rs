//! Pipeline error taxonomy
//!
//! Every error except [`PipelineError::ContextLost`] is recoverable by
//! dropping one sample or skipping one render tick.

use std::time::Duration;

use crate::gpu::GpuError;

/// Errors raised along the decode → upload → render → publish path
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// The buffer pool could not satisfy an allocation
    #[error("buffer pool cannot allocate {requested} bytes ({in_use} of {limit} bytes in use)")]
    OutOfMemory {
        requested: usize,
        in_use: usize,
        limit: usize,
    },

    /// Sample metadata cannot be mapped to plane descriptors
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// No decoded frame at or before the requested presentation time
    #[error("no decoded frame available at {0:?}")]
    NoFrameAvailable(Duration),

    /// The processing stage declined to render this tick
    #[error("processing stage produced no output")]
    RenderUnavailable,

    /// The codec failed to fill a decode target
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// A GPU operation failed on a still-usable context
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// The texture publisher refused to start
    #[error("publisher failed: {0}")]
    PublishFailed(String),

    /// The shared GPU context can no longer be used
    #[error("GPU context lost: {0}")]
    ContextLost(String),
}

impl PipelineError {
    /// Whether this error ends the decode/render session
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::ContextLost(_))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_context_loss_is_fatal() {
        assert!(PipelineError::ContextLost("poisoned".into()).is_fatal());
        assert!(!PipelineError::RenderUnavailable.is_fatal());
        assert!(!PipelineError::PublishFailed("no server".into()).is_fatal());
        assert!(!PipelineError::NoFrameAvailable(Duration::ZERO).is_fatal());
        assert!(!PipelineError::UnsupportedFormat("x".into()).is_fatal());
        assert!(!PipelineError::OutOfMemory {
            requested: 1,
            in_use: 0,
            limit: 0
        }
        .is_fatal());
    }

    #[test]
    fn test_out_of_memory_message() {
        let err = PipelineError::OutOfMemory {
            requested: 1024,
            in_use: 4096,
            limit: 4096,
        };
        assert_eq!(
            err.to_string(),
            "buffer pool cannot allocate 1024 bytes (4096 of 4096 bytes in use)"
        );
    }
}
