//! Multi-pass GPU renderer running on a dedicated thread.
//!
//! The crate's surface is deliberately small: [`Worker::spawn`] starts the
//! render thread, and everything after that happens over the message protocol.
//! Internally each session runs a fixed four-pass chain (integer upscale,
//! unsharp mask, color correction, CRT emulation) on one of two wgpu paths:
//! the primary Vulkan/Metal/DX12 path with threaded pipeline builds, or a
//! GL fallback with downlevel limits and fully pre-linked programs.

mod backend;
mod gpu;
mod opt;
mod worker;

use protocol::{BackendKind, ErrorCode};

pub use opt::PoolError;
pub use worker::Worker;

#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("{kind} backend unavailable: {reason}")]
    BackendUnavailable { kind: BackendKind, reason: String },
    #[error("shader '{pass}' failed to compile: {message}")]
    ShaderCompile {
        pass: &'static str,
        message: String,
    },
    #[error("pipeline '{pass}' failed to build: {message}")]
    PipelineBuild {
        pass: &'static str,
        message: String,
    },
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("render failed: {0}")]
    RenderFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("frame is {actual:?}, session expects {expected:?}")]
    FrameSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("failed to spawn render thread: {0}")]
    ThreadSpawn(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl RendererError {
    /// Wire classification carried by `Event::Error`.
    pub fn code(&self) -> ErrorCode {
        match self {
            RendererError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            RendererError::ShaderCompile { .. } => ErrorCode::ShaderCompile,
            RendererError::PipelineBuild { .. } => ErrorCode::PipelineBuild,
            RendererError::DeviceLost(_) => ErrorCode::DeviceLost,
            RendererError::RenderFailed(_)
            | RendererError::ThreadSpawn(_)
            | RendererError::Pool(_) => ErrorCode::RenderFailed,
            RendererError::CaptureFailed(_) => ErrorCode::CaptureFailed,
            RendererError::FrameSizeMismatch { .. } => ErrorCode::InvalidMessage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_classify_by_variant() {
        let err = RendererError::DeviceLost("gone".to_string());
        assert_eq!(err.code(), ErrorCode::DeviceLost);
        let err = RendererError::FrameSizeMismatch {
            expected: (160, 144),
            actual: (320, 288),
        };
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
    }
}
