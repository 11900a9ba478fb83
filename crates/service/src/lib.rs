//! Renderer orchestration: owns the render thread, enforces backpressure, and
//! translates wire events into application-facing domain events.
//!
//! One [`RendererService`] manages at most one render session at a time. The
//! embedding application hands it a drawing surface exactly once per session,
//! submits decoded frames, and listens on the [`DomainEvent`] sink.

mod capability;
mod events;
mod settings;

use std::time::{Duration, Instant};

use protocol::{
    preset, BackendKind, CapturedFrame, Command, ErrorCode, Event, FrameHandle, FrameParams,
    FrameSubmission, InitRequest, PipelineConfig, ProtocolError, ResizeRequest, SurfaceHandle,
    DEFAULT_PRESET_ID,
};
use renderer::{RendererError, Worker};
use tracing::{debug, info, warn};

pub use capability::{CapabilityProbe, CapabilityReport, WgpuProbe};
pub use events::{DomainEvent, EventSink};
pub use settings::{BrightnessHandle, SettingsSource, StaticSettings};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("no renderer session is active")]
    NotInitialized,
    #[error("a session is already active")]
    AlreadyInitialized,
    #[error("teardown in progress")]
    TeardownInProgress,
    #[error("renderer initialization timed out after {0:?}")]
    InitTimeout(Duration),
    #[error("renderer initialization failed ({code}): {message}")]
    InitFailed { code: ErrorCode, message: String },
    #[error("renderer shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Renderer(#[from] RendererError),
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no renderer session is active")]
    NotInitialized,
    #[error("a capture is already pending")]
    AlreadyPending,
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
    #[error("capture failed ({code}): {message}")]
    Failed { code: ErrorCode, message: String },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Tunables of one orchestrator instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Frames allowed in flight before new submissions are dropped.
    pub max_in_flight: usize,
    pub init_timeout: Duration,
    pub capture_timeout: Duration,
    /// Minimum gap between dropped-frame log lines.
    pub drop_log_window: Duration,
    /// Forces a backend instead of following the capability report.
    pub backend_override: Option<BackendKind>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 2,
            init_timeout: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(1),
            drop_log_window: Duration::from_secs(5),
            backend_override: None,
        }
    }
}

/// Last frame-rate window reported by the render thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineStats {
    pub fps: f32,
    pub average_frame_time_ms: f32,
}

/// How the orchestrator obtains a render thread. The seam exists so tests can
/// substitute a scripted worker for the GPU-backed one.
pub trait Connector {
    fn connect(&mut self) -> Result<Worker, ServiceError>;
}

/// Production connector: spawns the real render thread.
pub struct SpawnConnector;

impl Connector for SpawnConnector {
    fn connect(&mut self) -> Result<Worker, ServiceError> {
        Ok(Worker::spawn()?)
    }
}

/// Largest integer factor that fits the native frame inside the surface on
/// both axes, never below 1.
pub fn integer_scale(surface: (u32, u32), native: (u32, u32)) -> u32 {
    let horizontal = surface.0 / native.0.max(1);
    let vertical = surface.1 / native.1.max(1);
    horizontal.min(vertical).max(1)
}

pub struct RendererService<C: Connector = SpawnConnector> {
    config: ServiceConfig,
    connector: C,
    sink: Option<EventSink>,
    report: Option<CapabilityReport>,
    worker: Option<Worker>,
    pipeline: Option<PipelineConfig>,
    preset_id: String,
    brightness: BrightnessHandle,
    ready: bool,
    surface_transferred: bool,
    tearing_down: bool,
    fallback: bool,
    fault: Option<ErrorCode>,
    last_stats: Option<PipelineStats>,
    pending_frames: usize,
    dropped_since_log: u64,
    last_drop_log: Instant,
    capture_pending: bool,
    capture_dispatched: bool,
    capture_started: Instant,
    captured: Option<CapturedFrame>,
}

impl RendererService<SpawnConnector> {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_connector(SpawnConnector, config)
    }
}

impl<C: Connector> RendererService<C> {
    pub fn with_connector(connector: C, config: ServiceConfig) -> Self {
        Self {
            config,
            connector,
            sink: None,
            report: None,
            worker: None,
            pipeline: None,
            preset_id: DEFAULT_PRESET_ID.to_string(),
            brightness: BrightnessHandle::default(),
            ready: false,
            surface_transferred: false,
            tearing_down: false,
            fallback: false,
            fault: None,
            last_stats: None,
            pending_frames: 0,
            dropped_since_log: 0,
            last_drop_log: Instant::now(),
            capture_pending: false,
            capture_dispatched: false,
            capture_started: Instant::now(),
            captured: None,
        }
    }

    pub fn set_event_sink(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    /// Seeds preset and brightness from the embedder's settings store.
    pub fn apply_settings(&mut self, settings: &dyn SettingsSource) {
        if preset(settings.initial_preset()).is_some() {
            self.preset_id = settings.initial_preset().to_string();
        }
        self.brightness.set(settings.brightness_multiplier());
    }

    /// Runs the capability probe once and publishes the result.
    pub fn detect_capabilities(&mut self, probe: &dyn CapabilityProbe) -> CapabilityReport {
        let report = probe.probe();
        self.emit(DomainEvent::CapabilityDetected(report.clone()));
        self.report = Some(report.clone());
        report
    }

    /// Brings up a render session on `surface` for `native`-sized frames.
    ///
    /// Returns `Ok(false)` without touching the surface when capability
    /// detection found no usable backend. On success the surface is owned by
    /// the render thread until [`terminate_and_reset`](Self::terminate_and_reset).
    pub fn initialize(
        &mut self,
        surface: SurfaceHandle,
        native: (u32, u32),
    ) -> Result<bool, ServiceError> {
        if self.tearing_down {
            return Err(ServiceError::TeardownInProgress);
        }
        if self.worker.is_some() {
            return Err(ServiceError::AlreadyInitialized);
        }
        if let Some(report) = &self.report {
            if !report.any_backend() || !report.worker_threads_available {
                warn!(
                    backend = report.any_backend(),
                    threads = report.worker_threads_available,
                    "off-thread rendering unavailable, staying on the cpu path"
                );
                self.fallback = true;
                return Ok(false);
            }
        }
        self.fallback = false;
        self.fault = None;
        self.last_stats = None;
        let backend = self
            .config
            .backend_override
            .or_else(|| self.report.as_ref().and_then(CapabilityReport::preferred))
            .unwrap_or(BackendKind::Primary);
        let scale = integer_scale(surface.size(), native);
        let pipeline = PipelineConfig::new(native, scale, backend);

        let worker = self.connector.connect()?;
        worker.send(Command::Init(InitRequest {
            surface: Some(surface),
            config: pipeline,
        }))?;
        self.surface_transferred = true;
        self.worker = Some(worker);
        self.pipeline = Some(pipeline);
        self.await_ready(backend)
    }

    /// Re-arms a session released with
    /// [`release_resources`](Self::release_resources). The render thread
    /// reuses the surface it retained; no new handle changes hands.
    pub fn reinitialize(&mut self) -> Result<bool, ServiceError> {
        if self.tearing_down {
            return Err(ServiceError::TeardownInProgress);
        }
        if self.ready {
            return Err(ServiceError::AlreadyInitialized);
        }
        let Some(pipeline) = self.pipeline else {
            return Err(ServiceError::NotInitialized);
        };
        let Some(worker) = self.worker.as_ref() else {
            return Err(ServiceError::NotInitialized);
        };
        worker.send(Command::Init(InitRequest {
            surface: None,
            config: pipeline,
        }))?;
        self.fault = None;
        self.await_ready(pipeline.backend)
    }

    fn await_ready(&mut self, backend: BackendKind) -> Result<bool, ServiceError> {
        let deadline = Instant::now() + self.config.init_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.worker = None;
                self.pipeline = None;
                self.surface_transferred = false;
                self.emit(DomainEvent::SurfaceExpired);
                return Err(ServiceError::InitTimeout(self.config.init_timeout));
            }
            let Some(worker) = self.worker.as_ref() else {
                return Err(ServiceError::NotInitialized);
            };
            match worker.recv_timeout(remaining)? {
                Some(envelope) => match envelope.message {
                    Event::Ready => {
                        self.ready = true;
                        info!(%backend, "render session initialized");
                        self.emit(DomainEvent::PipelineReady { backend });
                        return Ok(true);
                    }
                    Event::Error { code, message } => {
                        self.worker = None;
                        self.pipeline = None;
                        self.surface_transferred = false;
                        self.emit(DomainEvent::PipelineError {
                            code,
                            message: message.clone(),
                        });
                        self.emit(DomainEvent::SurfaceExpired);
                        return Err(ServiceError::InitFailed { code, message });
                    }
                    other => {
                        self.handle_event(other);
                    }
                },
                None => continue,
            }
        }
    }

    /// Submits one decoded frame. Fire-and-forget: returns `Ok(false)` when
    /// the frame was dropped, whether from backpressure or because no session
    /// is currently able to render. A decode loop never has to care which.
    pub fn render_frame(&mut self, frame: FrameHandle) -> Result<bool, ServiceError> {
        self.poll()?;
        if self.tearing_down || !self.ready || self.worker.is_none() {
            self.note_dropped("no active session");
            return Ok(false);
        }
        if self.pending_frames >= self.config.max_in_flight {
            self.note_dropped("renderer back-pressured");
            return Ok(false);
        }
        let params = self.current_params();
        let Some(worker) = self.worker.as_ref() else {
            return Ok(false);
        };
        worker.send(Command::Frame(FrameSubmission { frame, params }))?;
        self.pending_frames += 1;
        Ok(true)
    }

    fn note_dropped(&mut self, reason: &'static str) {
        self.dropped_since_log += 1;
        if self.last_drop_log.elapsed() >= self.config.drop_log_window {
            warn!(
                dropped = self.dropped_since_log,
                pending = self.pending_frames,
                reason,
                "dropping frames"
            );
            self.dropped_since_log = 0;
            self.last_drop_log = Instant::now();
        }
    }

    /// Switches the active preset. Unknown ids are ignored and reported by
    /// the return value; nothing is sent to the renderer for them.
    pub fn set_preset(&mut self, id: &str) -> bool {
        if preset(id).is_none() {
            debug!(preset = %id, "ignoring unknown preset");
            return false;
        }
        if self.preset_id == id {
            return true;
        }
        self.preset_id = id.to_string();
        // A released or faulted session picks the preset up on re-entry; only
        // a ready renderer is notified.
        if self.ready {
            if let Some(worker) = self.worker.as_ref() {
                let _ = worker.send(Command::SetPreset { id: id.to_string() });
            }
        }
        true
    }

    /// Recomputes the integer scale for a resized surface and forwards the
    /// new geometry.
    pub fn resize(&mut self, surface_width: u32, surface_height: u32) -> Result<(), ServiceError> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Err(ServiceError::NotInitialized);
        };
        let native = pipeline.native();
        let scale = integer_scale((surface_width, surface_height), native);
        let request = ResizeRequest {
            surface_width,
            surface_height,
            target_width: native.0 * scale,
            target_height: native.1 * scale,
            scale_factor: scale,
        };
        pipeline.apply_resize(&request);
        let Some(worker) = self.worker.as_ref() else {
            return Err(ServiceError::NotInitialized);
        };
        worker.send(Command::Resize(request))?;
        Ok(())
    }

    /// Arms a capture. The renderer snapshots the next rendered frame (or the
    /// current one when the pipeline is idle); the result arrives through
    /// [`poll_capture`](Self::poll_capture).
    pub fn request_capture(&mut self) -> Result<(), CaptureError> {
        if !self.ready || self.worker.is_none() {
            return Err(CaptureError::NotInitialized);
        }
        if self.capture_pending {
            return Err(CaptureError::AlreadyPending);
        }
        let Some(worker) = self.worker.as_ref() else {
            return Err(CaptureError::NotInitialized);
        };
        worker.send(Command::RequestCapture)?;
        self.capture_pending = true;
        self.capture_dispatched = false;
        self.capture_started = Instant::now();
        self.captured = None;
        if self.pending_frames == 0 {
            // Idle pipeline: no frame will trip the latch, ask directly.
            worker.send(Command::Capture)?;
            self.capture_dispatched = true;
        }
        Ok(())
    }

    /// Non-blocking check for a finished capture.
    pub fn poll_capture(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        self.poll().map_err(|err| match err {
            ServiceError::Protocol(protocol) => CaptureError::Protocol(protocol),
            _ => CaptureError::NotInitialized,
        })?;
        if let Some(frame) = self.captured.take() {
            self.capture_pending = false;
            self.capture_dispatched = false;
            return Ok(Some(frame));
        }
        if self.capture_pending && self.capture_started.elapsed() >= self.config.capture_timeout {
            self.capture_pending = false;
            self.capture_dispatched = false;
            return Err(CaptureError::Timeout(self.config.capture_timeout));
        }
        Ok(None)
    }

    /// Blocking capture convenience wrapper around
    /// [`request_capture`](Self::request_capture) and
    /// [`poll_capture`](Self::poll_capture).
    pub fn capture_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        self.request_capture()?;
        let deadline = Instant::now() + self.config.capture_timeout;
        loop {
            if let Some(frame) = self.poll_capture()? {
                return Ok(frame);
            }
            if Instant::now() >= deadline {
                self.capture_pending = false;
                self.capture_dispatched = false;
                return Err(CaptureError::Timeout(self.config.capture_timeout));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Tears down GPU resources but keeps the render thread and its surface
    /// for a later re-`initialize`.
    pub fn release_resources(&mut self) -> Result<(), ServiceError> {
        let Some(worker) = self.worker.as_ref() else {
            return Err(ServiceError::NotInitialized);
        };
        worker.send(Command::Release)?;
        let deadline = Instant::now() + self.config.init_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ServiceError::ShutdownTimeout(self.config.init_timeout));
            }
            let Some(worker) = self.worker.as_ref() else {
                return Err(ServiceError::NotInitialized);
            };
            match worker.recv_timeout(remaining)? {
                Some(envelope) => {
                    if matches!(envelope.message, Event::Released) {
                        self.ready = false;
                        self.fault = None;
                        self.pending_frames = 0;
                        self.capture_pending = false;
                        self.capture_dispatched = false;
                        self.captured = None;
                        info!("renderer resources released");
                        return Ok(());
                    }
                    self.handle_event(envelope.message);
                }
                None => continue,
            }
        }
    }

    /// Destroys the session and forgets the surface. Emits `SurfaceExpired`
    /// exactly once per active session.
    pub fn terminate_and_reset(&mut self) -> Result<(), ServiceError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.tearing_down = true;
        let destroyed = match worker.send(Command::Destroy) {
            Ok(()) => {
                let deadline = Instant::now() + self.config.init_timeout;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break false;
                    }
                    match worker.recv_timeout(remaining) {
                        Ok(Some(envelope)) => {
                            if matches!(envelope.message, Event::Destroyed) {
                                break true;
                            }
                        }
                        Ok(None) => continue,
                        Err(_) => break false,
                    }
                }
            }
            Err(_) => false,
        };
        // Dropping the handle joins the thread either way.
        drop(worker);
        if !destroyed {
            warn!("render thread did not acknowledge destroy");
        }
        let had_surface = self.surface_transferred;
        self.pipeline = None;
        self.ready = false;
        self.fault = None;
        self.last_stats = None;
        self.surface_transferred = false;
        self.pending_frames = 0;
        self.capture_pending = false;
        self.capture_dispatched = false;
        self.captured = None;
        self.tearing_down = false;
        if had_surface {
            self.emit(DomainEvent::SurfaceExpired);
        }
        info!("renderer service reset");
        Ok(())
    }

    /// Drains pending renderer events without blocking.
    pub fn poll(&mut self) -> Result<(), ServiceError> {
        loop {
            let Some(worker) = self.worker.as_ref() else {
                return Ok(());
            };
            match worker.try_recv()? {
                Some(envelope) => self.handle_event(envelope.message),
                None => return Ok(()),
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether a render thread is attached, ready or not (a released or
    /// faulted session is still active until terminated).
    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Whether the last `initialize` declined GPU rendering and left frame
    /// presentation to the embedder's CPU path.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Last frame-rate window reported by the renderer, if any.
    pub fn stats(&self) -> Option<PipelineStats> {
        self.last_stats
    }

    /// Upscaled output size of the current session.
    pub fn target_dimensions(&self) -> Option<(u32, u32)> {
        self.pipeline.as_ref().map(PipelineConfig::target)
    }

    pub fn pending_frames(&self) -> usize {
        self.pending_frames
    }

    pub fn surface_transferred(&self) -> bool {
        self.surface_transferred
    }

    pub fn preset_id(&self) -> &str {
        &self.preset_id
    }

    pub fn pipeline_config(&self) -> Option<&PipelineConfig> {
        self.pipeline.as_ref()
    }

    pub fn capability_report(&self) -> Option<&CapabilityReport> {
        self.report.as_ref()
    }

    /// Shared handle for live brightness adjustments from other threads.
    pub fn brightness(&self) -> BrightnessHandle {
        self.brightness.clone()
    }

    fn current_params(&self) -> FrameParams {
        let entry = preset(&self.preset_id)
            .or_else(|| preset(DEFAULT_PRESET_ID))
            .unwrap_or(&protocol::catalog()[0]);
        FrameParams::from_preset(entry, self.brightness.get())
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Ready => {
                self.ready = true;
            }
            Event::FrameRendered { frame_index } => {
                self.pending_frames = self.pending_frames.saturating_sub(1);
                if self.capture_pending && !self.capture_dispatched {
                    if let Some(worker) = self.worker.as_ref() {
                        if worker.send(Command::Capture).is_ok() {
                            self.capture_dispatched = true;
                        }
                    }
                }
                debug!(frame_index, pending = self.pending_frames, "frame acked");
            }
            Event::Error { code, message } => {
                self.pending_frames = self.pending_frames.saturating_sub(1);
                if code == ErrorCode::CaptureFailed {
                    self.capture_pending = false;
                    self.capture_dispatched = false;
                }
                if code.is_fatal() {
                    // First fatal error halts submissions; the worker answers
                    // every later frame with the same fault, so repeats are
                    // dropped instead of re-reported.
                    if self.fault.is_none() {
                        self.fault = Some(code);
                        self.ready = false;
                        warn!(%code, %message, "renderer faulted, halting submissions");
                        self.emit(DomainEvent::PipelineError { code, message });
                    }
                } else {
                    self.emit(DomainEvent::PipelineError { code, message });
                }
            }
            Event::Stats {
                fps,
                average_frame_time_ms,
            } => {
                self.last_stats = Some(PipelineStats {
                    fps,
                    average_frame_time_ms,
                });
                self.emit(DomainEvent::StatsUpdate {
                    fps,
                    average_frame_time_ms,
                });
            }
            Event::CaptureRequested => {}
            Event::CaptureReady(frame) => {
                self.captured = Some(frame);
            }
            Event::Released => {
                self.ready = false;
            }
            Event::Destroyed => {
                self.ready = false;
            }
        }
    }

    fn emit(&self, event: DomainEvent) {
        if let Some(sink) = &self.sink {
            if sink.send(event).is_err() {
                debug!("domain event sink disconnected");
            }
        }
    }
}
