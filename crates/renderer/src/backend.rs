//! Seam between the session state machine and the two GPU implementations.

use std::sync::{Arc, Mutex};

use protocol::{
    BackendKind, CapturedFrame, FrameHandle, FrameParams, PipelineConfig, ResizeRequest,
    SurfaceHandle,
};
use tracing::warn;

use crate::gpu::fallback::FallbackBackend;
use crate::gpu::primary::PrimaryBackend;
use crate::RendererError;

/// Sticky fault raised by asynchronous device callbacks (device lost,
/// uncaptured validation errors). The first fault wins; the flag stays raised
/// until the session is released.
#[derive(Clone, Default)]
pub(crate) struct FaultFlag {
    inner: Arc<Mutex<Option<String>>>,
}

impl FaultFlag {
    pub fn raise(&self, message: String) {
        if let Ok(mut slot) = self.inner.lock() {
            if slot.is_none() {
                *slot = Some(message);
            }
        }
    }

    pub fn peek(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = None;
        }
    }
}

/// What every GPU path must provide to the render thread.
pub(crate) trait RenderBackend {
    /// Uploads one native-resolution frame without drawing it.
    fn upload_frame(&mut self, frame: &FrameHandle) -> Result<(), RendererError>;

    /// Runs the pass chain over the last uploaded frame and presents.
    fn render_frame(&mut self, params: &FrameParams) -> Result<(), RendererError>;

    /// Applies new surface and target geometry, invalidating size-dependent
    /// resources.
    fn resize(&mut self, request: &ResizeRequest) -> Result<(), RendererError>;

    /// Re-runs the pass chain into an offscreen target and reads it back.
    fn capture(&mut self, params: &FrameParams) -> Result<CapturedFrame, RendererError>;

    fn kind(&self) -> BackendKind;

    /// Flushes outstanding GPU work before the backend is dropped.
    fn finish(&mut self);
}

/// Brings up the configured backend, falling back from the primary path to
/// the GL path when no primary adapter can be acquired.
pub(crate) fn create(
    config: &PipelineConfig,
    handle: &SurfaceHandle,
    fault: &FaultFlag,
) -> Result<Box<dyn RenderBackend>, RendererError> {
    match config.backend {
        BackendKind::Primary => match PrimaryBackend::new(config, handle, fault) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(RendererError::BackendUnavailable { reason, .. }) => {
                warn!(%reason, "primary backend unavailable, trying gl fallback");
                let mut gl_config = *config;
                gl_config.backend = BackendKind::Gl;
                Ok(Box::new(FallbackBackend::new(&gl_config, handle, fault)?))
            }
            Err(err) => Err(err),
        },
        BackendKind::Gl => Ok(Box::new(FallbackBackend::new(config, handle, fault)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fault_is_sticky_until_cleared() {
        let fault = FaultFlag::default();
        assert!(fault.peek().is_none());
        fault.raise("device lost".to_string());
        fault.raise("later noise".to_string());
        assert_eq!(fault.peek().as_deref(), Some("device lost"));
        fault.clear();
        assert!(fault.peek().is_none());
    }
}
