use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::{PipelineConfig, ResizeRequest};
use crate::handle::{CapturedFrame, FrameHandle, SurfaceHandle};
use crate::preset::FrameParams;

/// Wire shape carried by every message in both directions.
#[derive(Debug)]
pub struct Envelope<M> {
    pub message: M,
    /// Milliseconds since the Unix epoch at send time, for diagnostics.
    pub timestamp_ms: u64,
}

impl<M> Envelope<M> {
    pub fn new(message: M) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        Self {
            message,
            timestamp_ms,
        }
    }
}

/// First command of a session. The surface is present on the first call and
/// absent on re-entry after `Release`, when the renderer reuses the handle it
/// already holds.
#[derive(Debug)]
pub struct InitRequest {
    pub surface: Option<SurfaceHandle>,
    pub config: PipelineConfig,
}

/// One decoded frame plus the preset parameters in effect at submission time.
#[derive(Debug)]
pub struct FrameSubmission {
    pub frame: FrameHandle,
    pub params: FrameParams,
}

/// Controller → renderer. Closed set; anything else on the wire is answered
/// with [`ErrorCode::InvalidMessage`].
#[derive(Debug)]
pub enum Command {
    Init(InitRequest),
    Frame(FrameSubmission),
    Resize(ResizeRequest),
    SetPreset { id: String },
    RequestCapture,
    Capture,
    Release,
    Destroy,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Init(_) => "init",
            Command::Frame(_) => "frame",
            Command::Resize(_) => "resize",
            Command::SetPreset { .. } => "set-preset",
            Command::RequestCapture => "request-capture",
            Command::Capture => "capture",
            Command::Release => "release",
            Command::Destroy => "destroy",
        }
    }
}

/// Renderer → controller. Closed set.
#[derive(Debug)]
pub enum Event {
    Ready,
    FrameRendered { frame_index: u64 },
    Error { code: ErrorCode, message: String },
    Stats { fps: f32, average_frame_time_ms: f32 },
    CaptureRequested,
    CaptureReady(CapturedFrame),
    Released,
    Destroyed,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Ready => "ready",
            Event::FrameRendered { .. } => "frame-rendered",
            Event::Error { .. } => "error",
            Event::Stats { .. } => "stats",
            Event::CaptureRequested => "capture-requested",
            Event::CaptureReady(_) => "capture-ready",
            Event::Released => "released",
            Event::Destroyed => "destroyed",
        }
    }
}

pub const COMMAND_KINDS: [&str; 8] = [
    "init",
    "frame",
    "resize",
    "set-preset",
    "request-capture",
    "capture",
    "release",
    "destroy",
];

pub const EVENT_KINDS: [&str; 8] = [
    "ready",
    "frame-rendered",
    "error",
    "stats",
    "capture-requested",
    "capture-ready",
    "released",
    "destroyed",
];

pub fn is_command_kind(kind: &str) -> bool {
    COMMAND_KINDS.contains(&kind)
}

pub fn is_event_kind(kind: &str) -> bool {
    EVENT_KINDS.contains(&kind)
}

/// Stable error classification carried by `Event::Error` and surfaced to the
/// application through the domain event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidMessage,
    BackendUnavailable,
    ShaderCompile,
    PipelineBuild,
    DeviceLost,
    RenderFailed,
    CaptureFailed,
}

impl ErrorCode {
    /// Whether an error of this class ends the render session. Non-fatal
    /// codes describe one rejected message or one failed capture; the session
    /// keeps rendering after them.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorCode::InvalidMessage | ErrorCode::CaptureFailed)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InvalidMessage => "invalid-message",
            ErrorCode::BackendUnavailable => "backend-unavailable",
            ErrorCode::ShaderCompile => "shader-compile",
            ErrorCode::PipelineBuild => "pipeline-build",
            ErrorCode::DeviceLost => "device-lost",
            ErrorCode::RenderFailed => "render-failed",
            ErrorCode::CaptureFailed => "capture-failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_in_the_closed_sets() {
        assert!(is_command_kind(Command::RequestCapture.kind()));
        assert!(is_command_kind(
            Command::SetPreset {
                id: "crt".to_string()
            }
            .kind()
        ));
        assert!(is_event_kind(Event::Ready.kind()));
        assert!(is_event_kind(
            Event::Stats {
                fps: 60.0,
                average_frame_time_ms: 16.6,
            }
            .kind()
        ));
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        assert!(!is_command_kind("telemetry"));
        assert!(!is_command_kind(""));
        assert!(!is_event_kind("frame"));
    }

    #[test]
    fn command_and_event_sets_are_distinct_and_complete() {
        assert_eq!(COMMAND_KINDS.len(), 8);
        assert_eq!(EVENT_KINDS.len(), 8);
        for kind in COMMAND_KINDS {
            assert!(!is_event_kind(kind), "{kind} leaked into the event set");
        }
    }

    #[test]
    fn envelope_carries_a_wall_clock_stamp() {
        let envelope = Envelope::new(Event::Ready);
        // Any realistic clock is far past 2020.
        assert!(envelope.timestamp_ms > 1_577_836_800_000);
    }

    #[test]
    fn error_codes_serialize_kebab_case() {
        let json = serde_json::to_string(&ErrorCode::DeviceLost).unwrap();
        assert_eq!(json, "\"device-lost\"");
        assert_eq!(ErrorCode::InvalidMessage.to_string(), "invalid-message");
    }

    #[test]
    fn only_per_message_errors_are_non_fatal() {
        assert!(!ErrorCode::InvalidMessage.is_fatal());
        assert!(!ErrorCode::CaptureFailed.is_fatal());
        assert!(ErrorCode::DeviceLost.is_fatal());
        assert!(ErrorCode::RenderFailed.is_fatal());
        assert!(ErrorCode::BackendUnavailable.is_fatal());
        assert!(ErrorCode::ShaderCompile.is_fatal());
        assert!(ErrorCode::PipelineBuild.is_fatal());
    }
}
