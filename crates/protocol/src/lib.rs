//! Message vocabulary shared by the controlling thread and the render thread.
//!
//! The two execution contexts of scanview communicate exclusively through the
//! channel pair built by [`link`]: commands flow controller → renderer, events
//! flow back. Nothing else crosses the thread boundary; frames and the drawing
//! surface move through these channels as ownership-transferring handles.
//!
//! ```text
//!   RendererService ── Envelope<Command> ──▶ render thread
//!        ▲                                         │
//!        └────────── Envelope<Event> ◀─────────────┘
//! ```

mod config;
mod handle;
mod message;
mod preset;

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

pub use config::{BackendKind, PipelineConfig, ResizeRequest};
pub use handle::{CapturedFrame, FrameHandle, SurfaceHandle};
pub use message::{
    is_command_kind, is_event_kind, Command, Envelope, ErrorCode, Event, FrameSubmission,
    InitRequest, COMMAND_KINDS, EVENT_KINDS,
};
pub use preset::{
    catalog, preset, ColorPass, CrtPass, FrameParams, Preset, UnsharpPass, UpscalePass,
    DEFAULT_PRESET_ID,
};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message kind '{0}'")]
    UnknownKind(String),
    #[error("peer thread disconnected")]
    Disconnected,
    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} rgba8")]
    FrameSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("failed to acquire surface handle: {0}")]
    SurfaceUnavailable(String),
}

/// Controller-side endpoints of the thread-boundary link.
pub struct ControllerLink {
    commands: Sender<Envelope<Command>>,
    events: Receiver<Envelope<Event>>,
}

impl ControllerLink {
    /// Stamps and sends one command to the render thread.
    pub fn send(&self, command: Command) -> Result<(), ProtocolError> {
        self.commands
            .send(Envelope::new(command))
            .map_err(|_| ProtocolError::Disconnected)
    }

    /// Non-blocking event poll; `Ok(None)` means the queue is empty.
    pub fn try_recv(&self) -> Result<Option<Envelope<Event>>, ProtocolError> {
        match self.events.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ProtocolError::Disconnected),
        }
    }

    /// Blocking event poll with a deadline; `Ok(None)` means the timeout
    /// elapsed without an event.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope<Event>>, ProtocolError> {
        match self.events.recv_timeout(timeout) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ProtocolError::Disconnected),
        }
    }
}

/// Renderer-side endpoints of the thread-boundary link.
pub struct WorkerLink {
    commands: Receiver<Envelope<Command>>,
    events: Sender<Envelope<Event>>,
}

impl WorkerLink {
    /// Blocks until the next command arrives or the controller goes away.
    pub fn recv(&self) -> Result<Envelope<Command>, ProtocolError> {
        self.commands.recv().map_err(|_| ProtocolError::Disconnected)
    }

    /// Bounded wait used by pollers; `Ok(None)` means the timeout elapsed.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Envelope<Command>>, ProtocolError> {
        match self.commands.recv_timeout(timeout) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ProtocolError::Disconnected),
        }
    }

    /// Stamps and emits one event toward the controller.
    pub fn emit(&self, event: Event) -> Result<(), ProtocolError> {
        self.events
            .send(Envelope::new(event))
            .map_err(|_| ProtocolError::Disconnected)
    }
}

/// Builds the only coupling between the controlling thread and one render
/// thread: a command channel and an event channel, both FIFO.
pub fn link() -> (ControllerLink, WorkerLink) {
    let (command_tx, command_rx) = unbounded();
    let (event_tx, event_rx) = unbounded();
    (
        ControllerLink {
            commands: command_tx,
            events: event_rx,
        },
        WorkerLink {
            commands: command_rx,
            events: event_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_delivers_commands_in_order() {
        let (controller, worker) = link();
        controller.send(Command::RequestCapture).unwrap();
        controller.send(Command::Capture).unwrap();
        assert_eq!(worker.recv().unwrap().message.kind(), "request-capture");
        assert_eq!(worker.recv().unwrap().message.kind(), "capture");
    }

    #[test]
    fn link_reports_disconnect() {
        let (controller, worker) = link();
        drop(worker);
        assert!(matches!(
            controller.send(Command::Release),
            Err(ProtocolError::Disconnected)
        ));
    }

    #[test]
    fn try_recv_empty_is_not_an_error() {
        let (controller, _worker) = link();
        assert!(controller.try_recv().unwrap().is_none());
    }
}
