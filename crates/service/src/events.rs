//! Domain events pushed toward the embedding application.

use protocol::{BackendKind, ErrorCode};

use crate::capability::CapabilityReport;

/// Application-facing notifications. Delivery is best-effort; a full or
/// disconnected sink never blocks the orchestrator.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    CapabilityDetected(CapabilityReport),
    PipelineReady { backend: BackendKind },
    PipelineError { code: ErrorCode, message: String },
    StatsUpdate { fps: f32, average_frame_time_ms: f32 },
    /// The transferred surface is gone; the embedder must provide a fresh one
    /// before rendering can resume.
    SurfaceExpired,
}

pub type EventSink = crossbeam_channel::Sender<DomainEvent>;
