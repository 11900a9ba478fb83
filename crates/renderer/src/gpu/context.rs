//! Device and surface bring-up, shared by both backends.

use protocol::{BackendKind, SurfaceHandle};
use tracing::{debug, info};

use crate::backend::FaultFlag;
use crate::RendererError;

/// Live GPU handles for one render session.
///
/// Created on the render thread from a transferred [`SurfaceHandle`]; the
/// surface never leaves this struct.
pub(crate) struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    pub fn new(
        kind: BackendKind,
        handle: &SurfaceHandle,
        fault: &FaultFlag,
    ) -> Result<Self, RendererError> {
        let backends = match kind {
            BackendKind::Primary => wgpu::Backends::PRIMARY,
            BackendKind::Gl => wgpu::Backends::GL,
        };
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        // SAFETY: the embedder guarantees the window behind the handle stays
        // alive until the session is destroyed, and the handle was transferred
        // exclusively to this thread.
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: handle.display_handle(),
                raw_window_handle: handle.window_handle(),
            })
        }
        .map_err(|err| RendererError::BackendUnavailable {
            kind,
            reason: err.to_string(),
        })?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        }))
        .map_err(|err| RendererError::BackendUnavailable {
            kind,
            reason: err.to_string(),
        })?;
        let info = adapter.get_info();
        info!(
            backend = %info.backend,
            adapter = %info.name,
            "adapter selected"
        );

        let required_limits = match kind {
            BackendKind::Primary => wgpu::Limits::default(),
            BackendKind::Gl => wgpu::Limits::downlevel_defaults(),
        };
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("scanview device"),
            required_features: wgpu::Features::empty(),
            required_limits,
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| RendererError::BackendUnavailable {
            kind,
            reason: err.to_string(),
        })?;

        device.set_device_lost_callback({
            let fault = fault.clone();
            move |reason, message| fault.raise(format!("device lost ({reason:?}): {message}"))
        });
        device.on_uncaptured_error(Box::new({
            let fault = fault.clone();
            move |error| fault.raise(error.to_string())
        }));

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RendererError::BackendUnavailable {
                kind,
                reason: "surface reports no compatible formats".into(),
            })?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let (width, height) = handle.size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        debug!(?format, width, height, "surface configured");

        Ok(Self {
            device,
            queue,
            surface,
            config,
        })
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.device, &self.config);
    }

    /// Acquires the next swapchain texture, reconfiguring once on a lost or
    /// outdated surface before giving up.
    pub fn acquire_frame(&mut self) -> Result<wgpu::SurfaceTexture, RendererError> {
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost, reconfiguring once");
                self.surface.configure(&self.device, &self.config);
                self.surface
                    .get_current_texture()
                    .map_err(|err| RendererError::RenderFailed(err.to_string()))
            }
            Err(err) => Err(RendererError::RenderFailed(err.to_string())),
        }
    }
}
