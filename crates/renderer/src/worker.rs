//! The dedicated render thread and its owning handle.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use protocol::{
    catalog, link, preset, Command, ControllerLink, Envelope, Event, FrameParams, FrameSubmission,
    ProtocolError, SurfaceHandle, WorkerLink, DEFAULT_PRESET_ID,
};
use tracing::{debug, error, info, warn};

use crate::backend::{self, FaultFlag, RenderBackend};
use crate::opt::{CaptureLatch, SnapshotSlot};
use crate::RendererError;

const STATS_WINDOW: Duration = Duration::from_secs(1);

/// Owning handle to one render thread.
///
/// Dropping the handle sends `Destroy` and joins the thread, so a worker can
/// never outlive its controller.
pub struct Worker {
    link: ControllerLink,
    join: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns the render thread and returns the controller-side handle.
    pub fn spawn() -> Result<Self, RendererError> {
        let (controller, worker_link) = link();
        let join = thread::Builder::new()
            .name("scanview-render".to_string())
            .spawn(move || run_worker(worker_link))
            .map_err(|err| RendererError::ThreadSpawn(err.to_string()))?;
        Ok(Self {
            link: controller,
            join: Some(join),
        })
    }

    /// Wraps an externally spawned thread speaking the same protocol.
    pub fn from_parts(link: ControllerLink, join: JoinHandle<()>) -> Self {
        Self {
            link,
            join: Some(join),
        }
    }

    pub fn send(&self, command: Command) -> Result<(), ProtocolError> {
        self.link.send(command)
    }

    pub fn try_recv(&self) -> Result<Option<Envelope<Event>>, ProtocolError> {
        self.link.try_recv()
    }

    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Envelope<Event>>, ProtocolError> {
        self.link.recv_timeout(timeout)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.link.send(Command::Destroy);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("render thread panicked during shutdown");
            }
        }
    }
}

/// Frame accounting over fixed wall-clock windows.
struct FrameTimer {
    window: Duration,
    window_start: Instant,
    frames: u32,
    total_frame_time: Duration,
}

impl FrameTimer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            frames: 0,
            total_frame_time: Duration::ZERO,
        }
    }

    /// Records one frame; returns `(fps, average_frame_time_ms)` when the
    /// current window closed.
    fn tick(&mut self, frame_time: Duration) -> Option<(f32, f32)> {
        self.frames += 1;
        self.total_frame_time += frame_time;
        let elapsed = self.window_start.elapsed();
        if elapsed < self.window {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32().max(f32::EPSILON);
        let average = self.total_frame_time.as_secs_f32() * 1000.0 / self.frames as f32;
        self.window_start = Instant::now();
        self.frames = 0;
        self.total_frame_time = Duration::ZERO;
        Some((fps, average))
    }
}

struct Session {
    backend: Box<dyn RenderBackend>,
    params: FrameParams,
    frame_index: u64,
    latch: CaptureLatch,
    slot: SnapshotSlot,
    faulted: Option<(protocol::ErrorCode, String)>,
    timer: FrameTimer,
}

impl Session {
    fn new(backend: Box<dyn RenderBackend>) -> Self {
        let default = preset(DEFAULT_PRESET_ID).unwrap_or(&catalog()[0]);
        Self {
            backend,
            params: FrameParams::from_preset(default, 1.0),
            frame_index: 0,
            latch: CaptureLatch::default(),
            slot: SnapshotSlot::default(),
            faulted: None,
            timer: FrameTimer::new(STATS_WINDOW),
        }
    }

    fn handle_frame(&mut self, link: &WorkerLink, submission: FrameSubmission) {
        if let Some((code, message)) = &self.faulted {
            let _ = link.emit(Event::Error {
                code: *code,
                message: format!("frame dropped, session faulted: {message}"),
            });
            return;
        }
        self.params = submission.params;
        let started = Instant::now();
        let result = self
            .backend
            .upload_frame(&submission.frame)
            .and_then(|()| self.backend.render_frame(&self.params));
        match result {
            Ok(()) => {
                self.frame_index += 1;
                let _ = link.emit(Event::FrameRendered {
                    frame_index: self.frame_index,
                });
                if self.latch.take() {
                    match self.backend.capture(&self.params) {
                        Ok(frame) => self.slot.store(frame),
                        Err(err) => {
                            let _ = link.emit(Event::Error {
                                code: err.code(),
                                message: err.to_string(),
                            });
                        }
                    }
                }
                if let Some((fps, average_frame_time_ms)) = self.timer.tick(started.elapsed()) {
                    let _ = link.emit(Event::Stats {
                        fps,
                        average_frame_time_ms,
                    });
                }
            }
            Err(err) => {
                let code = err.code();
                let message = err.to_string();
                error!(%code, %message, "frame render failed");
                let _ = link.emit(Event::Error {
                    code,
                    message: message.clone(),
                });
                self.faulted = Some((code, message));
            }
        }
    }

    /// Arms the capture latch. A latch left armed by a request the controller
    /// gave up on is simply re-armed for the new one.
    fn handle_request_capture(&mut self, link: &WorkerLink) {
        if !self.latch.arm() {
            debug!("capture latch re-armed");
        }
        let _ = link.emit(Event::CaptureRequested);
    }

    fn handle_capture(&mut self, link: &WorkerLink) {
        // A collection settles whatever request is still armed.
        self.latch.take();
        if let Some(buffered) = self.slot.take() {
            let _ = link.emit(Event::CaptureReady(buffered));
            return;
        }
        match self.backend.capture(&self.params) {
            Ok(frame) => {
                let _ = link.emit(Event::CaptureReady(frame));
            }
            Err(err) => {
                let _ = link.emit(Event::Error {
                    code: err.code(),
                    message: err.to_string(),
                });
            }
        }
    }
}

fn reject(link: &WorkerLink, message: &str) {
    let _ = link.emit(Event::Error {
        code: protocol::ErrorCode::InvalidMessage,
        message: message.to_string(),
    });
}

/// Body of the render thread: one command at a time, in arrival order.
fn run_worker(link: WorkerLink) {
    let fault = FaultFlag::default();
    let mut session: Option<Session> = None;
    let mut retained_surface: Option<SurfaceHandle> = None;

    loop {
        let Ok(envelope) = link.recv() else {
            // Controller dropped its endpoint; nothing left to serve.
            debug!("command channel closed, render thread exiting");
            break;
        };
        match envelope.message {
            Command::Init(request) => {
                if session.is_some() {
                    reject(&link, "init received while a session is active");
                    continue;
                }
                let Some(surface) = request.surface.or(retained_surface) else {
                    reject(&link, "init without a surface and none retained");
                    continue;
                };
                retained_surface = Some(surface);
                fault.clear();
                match backend::create(&request.config, &surface, &fault) {
                    Ok(backend) => {
                        info!(backend = %backend.kind(), "render session ready");
                        session = Some(Session::new(backend));
                        let _ = link.emit(Event::Ready);
                    }
                    Err(err) => {
                        error!(%err, "session bring-up failed");
                        let _ = link.emit(Event::Error {
                            code: err.code(),
                            message: err.to_string(),
                        });
                    }
                }
            }
            Command::Frame(submission) => match session.as_mut() {
                Some(session) => session.handle_frame(&link, submission),
                None => reject(&link, "frame received before init"),
            },
            Command::Resize(request) => match session.as_mut() {
                Some(session) => {
                    if let Err(err) = session.backend.resize(&request) {
                        let _ = link.emit(Event::Error {
                            code: err.code(),
                            message: err.to_string(),
                        });
                    } else {
                        // Anything buffered was rendered at the old geometry.
                        session.slot.clear();
                    }
                }
                None => reject(&link, "resize received before init"),
            },
            Command::SetPreset { id } => match session.as_mut() {
                Some(session) => match preset(&id) {
                    Some(entry) => {
                        session.params = FrameParams::from_preset(entry, 1.0);
                        debug!(preset = %id, "preset switched");
                    }
                    None => reject(&link, &format!("unknown preset '{id}'")),
                },
                None => reject(&link, "set-preset received before init"),
            },
            Command::RequestCapture => match session.as_mut() {
                Some(session) => session.handle_request_capture(&link),
                None => reject(&link, "request-capture received before init"),
            },
            Command::Capture => match session.as_mut() {
                Some(session) => session.handle_capture(&link),
                None => reject(&link, "capture received before init"),
            },
            Command::Release => match session.take() {
                Some(mut session) => {
                    session.backend.finish();
                    drop(session);
                    fault.clear();
                    info!("session released, surface retained");
                    let _ = link.emit(Event::Released);
                }
                None => reject(&link, "release received before init"),
            },
            Command::Destroy => {
                if let Some(mut session) = session.take() {
                    session.backend.finish();
                }
                let _ = link.emit(Event::Destroyed);
                info!("render thread destroyed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBackend;

    impl RenderBackend for NullBackend {
        fn upload_frame(&mut self, _frame: &protocol::FrameHandle) -> Result<(), RendererError> {
            Ok(())
        }

        fn render_frame(&mut self, _params: &FrameParams) -> Result<(), RendererError> {
            Ok(())
        }

        fn resize(&mut self, _request: &protocol::ResizeRequest) -> Result<(), RendererError> {
            Ok(())
        }

        fn capture(
            &mut self,
            _params: &FrameParams,
        ) -> Result<protocol::CapturedFrame, RendererError> {
            protocol::CapturedFrame::from_rgba8(1, 1, vec![0, 0, 0, 255])
                .map_err(|err| RendererError::CaptureFailed(err.to_string()))
        }

        fn kind(&self) -> protocol::BackendKind {
            protocol::BackendKind::Gl
        }

        fn finish(&mut self) {}
    }

    #[test]
    fn capture_request_rearms_after_a_stale_one() {
        let (controller, worker_link) = link();
        let mut session = Session::new(Box::new(NullBackend));
        session.handle_request_capture(&worker_link);
        session.handle_request_capture(&worker_link);
        for _ in 0..2 {
            let event = controller
                .recv_timeout(Duration::from_secs(1))
                .unwrap()
                .expect("each request must be acknowledged");
            assert_eq!(event.message.kind(), "capture-requested");
        }
        assert!(session.latch.take(), "latch must still be armed");
    }

    #[test]
    fn collection_settles_the_armed_latch() {
        let (controller, worker_link) = link();
        let mut session = Session::new(Box::new(NullBackend));
        session.handle_request_capture(&worker_link);
        session.handle_capture(&worker_link);
        let mut kinds = Vec::new();
        for _ in 0..2 {
            let event = controller
                .recv_timeout(Duration::from_secs(1))
                .unwrap()
                .expect("event expected");
            kinds.push(event.message.kind());
        }
        assert_eq!(kinds, ["capture-requested", "capture-ready"]);
        assert!(
            !session.latch.take(),
            "collection must consume the armed latch"
        );
    }

    #[test]
    fn frame_timer_holds_stats_until_the_window_closes() {
        let mut timer = FrameTimer::new(Duration::from_secs(3600));
        assert!(timer.tick(Duration::from_millis(16)).is_none());
        assert!(timer.tick(Duration::from_millis(16)).is_none());
    }

    #[test]
    fn frame_timer_reports_average_frame_time() {
        let mut timer = FrameTimer::new(Duration::ZERO);
        let (fps, average) = timer
            .tick(Duration::from_millis(20))
            .expect("zero-length window closes immediately");
        assert!(fps > 0.0);
        assert!((average - 20.0).abs() < 1.0);
    }

    #[test]
    fn worker_rejects_commands_before_init() {
        let (controller, worker_link) = link();
        let join = thread::Builder::new()
            .name("scanview-render".to_string())
            .spawn(move || run_worker(worker_link))
            .unwrap();
        let worker = Worker::from_parts(controller, join);
        worker.send(Command::RequestCapture).unwrap();
        let event = worker
            .recv_timeout(Duration::from_secs(1))
            .unwrap()
            .expect("worker must answer");
        match event.message {
            Event::Error { code, .. } => {
                assert_eq!(code, protocol::ErrorCode::InvalidMessage);
            }
            other => panic!("unexpected event {}", other.kind()),
        }
    }

    #[test]
    fn worker_acknowledges_destroy_and_exits() {
        let (controller, worker_link) = link();
        let join = thread::Builder::new()
            .name("scanview-render".to_string())
            .spawn(move || run_worker(worker_link))
            .unwrap();
        controller.send(Command::Destroy).unwrap();
        let event = controller
            .recv_timeout(Duration::from_secs(1))
            .unwrap()
            .expect("destroy must be acknowledged");
        assert_eq!(event.message.kind(), "destroyed");
        join.join().unwrap();
    }
}
