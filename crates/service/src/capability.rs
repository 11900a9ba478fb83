//! GPU capability detection, run once before the first session.

use protocol::BackendKind;
use tracing::info;

/// What the host machine can render with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityReport {
    pub primary_available: bool,
    pub gl_available: bool,
    pub worker_threads_available: bool,
    pub max_texture_size: u32,
}

impl CapabilityReport {
    pub fn any_backend(&self) -> bool {
        self.primary_available || self.gl_available
    }

    /// Best backend for this machine, or `None` when nothing can render.
    pub fn preferred(&self) -> Option<BackendKind> {
        if self.primary_available {
            Some(BackendKind::Primary)
        } else if self.gl_available {
            Some(BackendKind::Gl)
        } else {
            None
        }
    }
}

pub trait CapabilityProbe {
    fn probe(&self) -> CapabilityReport;
}

/// Probes by enumerating adapters on each wgpu backend family.
pub struct WgpuProbe;

impl WgpuProbe {
    fn adapters(backends: wgpu::Backends) -> Vec<wgpu::Adapter> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });
        instance.enumerate_adapters(backends)
    }
}

impl CapabilityProbe for WgpuProbe {
    fn probe(&self) -> CapabilityReport {
        let primary = Self::adapters(wgpu::Backends::PRIMARY);
        let gl = Self::adapters(wgpu::Backends::GL);
        let max_texture_size = primary
            .iter()
            .chain(gl.iter())
            .map(|adapter| adapter.limits().max_texture_dimension_2d)
            .max()
            .unwrap_or(0);
        let report = CapabilityReport {
            primary_available: !primary.is_empty(),
            gl_available: !gl.is_empty(),
            worker_threads_available: std::thread::available_parallelism()
                .map(|count| count.get() > 1)
                .unwrap_or(false),
            max_texture_size,
        };
        info!(
            primary = report.primary_available,
            gl = report.gl_available,
            max_texture_size,
            "gpu capabilities probed"
        );
        report
    }
}
