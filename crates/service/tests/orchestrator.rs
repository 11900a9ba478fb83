//! End-to-end orchestrator behavior against a scripted render thread.
//!
//! The stub speaks the real wire protocol over the real channel pair; only
//! the GPU work behind it is scripted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use protocol::{
    link, CapturedFrame, Command, ErrorCode, Event, FrameHandle, SurfaceHandle, WorkerLink,
};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};
use renderer::Worker;
use service::{
    CapabilityProbe, CapabilityReport, CaptureError, Connector, DomainEvent, RendererService,
    ServiceConfig, ServiceError,
};

#[derive(Clone, Copy, PartialEq)]
enum InitMode {
    Ready,
    Silent,
}

#[derive(Clone, Copy)]
struct Behavior {
    init: InitMode,
    auto_ack: bool,
    capture_silent: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            init: InitMode::Ready,
            auto_ack: true,
            capture_silent: false,
        }
    }
}

enum Ctrl {
    AckFrame(u64),
    EmitStats { fps: f32, average_frame_time_ms: f32 },
    EmitError { code: ErrorCode, message: String },
}

fn scripted_worker(
    link: WorkerLink,
    behavior: Behavior,
    ctrl: Receiver<Ctrl>,
    set_preset_count: Arc<AtomicUsize>,
) {
    let mut armed = false;
    let mut buffered: Option<u8> = None;
    let mut frame_count = 0u64;
    loop {
        while let Ok(message) = ctrl.try_recv() {
            match message {
                Ctrl::AckFrame(frame_index) => {
                    let _ = link.emit(Event::FrameRendered { frame_index });
                }
                Ctrl::EmitStats {
                    fps,
                    average_frame_time_ms,
                } => {
                    let _ = link.emit(Event::Stats {
                        fps,
                        average_frame_time_ms,
                    });
                }
                Ctrl::EmitError { code, message } => {
                    let _ = link.emit(Event::Error { code, message });
                }
            }
        }
        let envelope = match link.recv_timeout(Duration::from_millis(5)) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(_) => break,
        };
        match envelope.message {
            Command::Init(_) => match behavior.init {
                InitMode::Ready => {
                    let _ = link.emit(Event::Ready);
                }
                InitMode::Silent => {}
            },
            Command::Frame(_) => {
                frame_count += 1;
                if armed {
                    // Marker 1: snapshot buffered from a rendered frame.
                    buffered = Some(1);
                    armed = false;
                }
                if behavior.auto_ack {
                    let _ = link.emit(Event::FrameRendered {
                        frame_index: frame_count,
                    });
                }
            }
            Command::Resize(_) => {}
            Command::SetPreset { .. } => {
                set_preset_count.fetch_add(1, Ordering::SeqCst);
            }
            Command::RequestCapture => {
                armed = true;
                let _ = link.emit(Event::CaptureRequested);
            }
            Command::Capture => {
                if behavior.capture_silent {
                    continue;
                }
                // Marker 2: fresh synchronous snapshot.
                let marker = buffered.take().unwrap_or(2);
                if let Ok(frame) = CapturedFrame::from_rgba8(1, 1, vec![marker, 0, 0, 255]) {
                    let _ = link.emit(Event::CaptureReady(frame));
                }
            }
            Command::Release => {
                armed = false;
                buffered = None;
                let _ = link.emit(Event::Released);
            }
            Command::Destroy => {
                let _ = link.emit(Event::Destroyed);
                break;
            }
        }
    }
}

struct StubConnector {
    behavior: Behavior,
    ctrl: Option<Receiver<Ctrl>>,
    set_preset_count: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

impl Connector for StubConnector {
    fn connect(&mut self) -> Result<Worker, ServiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (controller, worker_link) = link();
        let behavior = self.behavior;
        let ctrl = self.ctrl.take().unwrap_or_else(|| unbounded().1);
        let counter = self.set_preset_count.clone();
        let join = thread::Builder::new()
            .name("stub-render".to_string())
            .spawn(move || scripted_worker(worker_link, behavior, ctrl, counter))
            .expect("spawn stub worker");
        Ok(Worker::from_parts(controller, join))
    }
}

struct Harness {
    service: RendererService<StubConnector>,
    events: Receiver<DomainEvent>,
    ctrl: Sender<Ctrl>,
    set_preset_count: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

fn harness(behavior: Behavior, config: ServiceConfig) -> Harness {
    let (ctrl_tx, ctrl_rx) = unbounded();
    let set_preset_count = Arc::new(AtomicUsize::new(0));
    let connects = Arc::new(AtomicUsize::new(0));
    let connector = StubConnector {
        behavior,
        ctrl: Some(ctrl_rx),
        set_preset_count: set_preset_count.clone(),
        connects: connects.clone(),
    };
    let mut service = RendererService::with_connector(connector, config);
    let (event_tx, event_rx) = unbounded();
    service.set_event_sink(event_tx);
    Harness {
        service,
        events: event_rx,
        ctrl: ctrl_tx,
        set_preset_count,
        connects,
    }
}

fn surface(width: u32, height: u32) -> SurfaceHandle {
    SurfaceHandle::from_raw(
        RawDisplayHandle::Web(WebDisplayHandle::new()),
        RawWindowHandle::Web(WebWindowHandle::new(1)),
        width,
        height,
    )
}

fn frame() -> FrameHandle {
    FrameHandle::from_rgba8(160, 144, vec![0; 160 * 144 * 4]).expect("valid frame buffer")
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 2s");
        thread::sleep(Duration::from_millis(2));
    }
}

struct StubProbe(CapabilityReport);

impl CapabilityProbe for StubProbe {
    fn probe(&self) -> CapabilityReport {
        self.0.clone()
    }
}

#[test]
fn initialize_computes_integer_scale_and_reports_ready() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    let ready = h
        .service
        .initialize(surface(652, 489), (160, 144))
        .expect("init");
    assert!(ready);
    assert!(h.service.is_ready());
    assert!(h.service.surface_transferred());
    let config = h.service.pipeline_config().expect("pipeline config");
    assert_eq!(config.scale_factor, 3);
    assert_eq!(config.target(), (480, 432));
    let event = h.events.try_recv().expect("domain event");
    assert!(matches!(event, DomainEvent::PipelineReady { .. }));
}

#[test]
fn initialize_without_backend_stays_headless() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    h.service.detect_capabilities(&StubProbe(CapabilityReport {
        primary_available: false,
        gl_available: false,
        worker_threads_available: true,
        max_texture_size: 0,
    }));
    let ready = h
        .service
        .initialize(surface(640, 576), (160, 144))
        .expect("headless init must not fail");
    assert!(!ready);
    assert!(!h.service.surface_transferred());
    assert!(h.service.is_fallback());
    assert!(!h.service.is_active());
    assert_eq!(h.connects.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_worker_threads_force_the_cpu_fallback() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    h.service.detect_capabilities(&StubProbe(CapabilityReport {
        primary_available: true,
        gl_available: true,
        worker_threads_available: false,
        max_texture_size: 8192,
    }));
    let ready = h
        .service
        .initialize(surface(640, 576), (160, 144))
        .expect("single-core init must not fail");
    assert!(!ready, "no background thread means no gpu session");
    assert!(h.service.is_fallback());
    assert!(!h.service.surface_transferred());
    assert_eq!(h.connects.load(Ordering::SeqCst), 0);
}

#[test]
fn initialize_timeout_expires_the_surface() {
    let behavior = Behavior {
        init: InitMode::Silent,
        ..Behavior::default()
    };
    let config = ServiceConfig {
        init_timeout: Duration::from_millis(50),
        ..ServiceConfig::default()
    };
    let mut h = harness(behavior, config);
    let err = h
        .service
        .initialize(surface(640, 576), (160, 144))
        .expect_err("silent worker must time out");
    assert!(matches!(err, ServiceError::InitTimeout(_)));
    assert!(!h.service.surface_transferred());
    let expired = h
        .events
        .try_iter()
        .filter(|event| matches!(event, DomainEvent::SurfaceExpired))
        .count();
    assert_eq!(expired, 1);
}

#[test]
fn backpressure_caps_frames_in_flight() {
    let behavior = Behavior {
        auto_ack: false,
        ..Behavior::default()
    };
    let mut h = harness(behavior, ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    assert!(h.service.render_frame(frame()).expect("first frame"));
    assert!(h.service.render_frame(frame()).expect("second frame"));
    assert!(!h.service.render_frame(frame()).expect("third must be dropped"));
    assert_eq!(h.service.pending_frames(), 2);
}

#[test]
fn spurious_acks_saturate_at_zero() {
    let behavior = Behavior {
        auto_ack: false,
        ..Behavior::default()
    };
    let mut h = harness(behavior, ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.ctrl.send(Ctrl::AckFrame(7)).expect("ctrl");
    h.ctrl.send(Ctrl::AckFrame(8)).expect("ctrl");
    thread::sleep(Duration::from_millis(30));
    h.service.poll().expect("poll");
    assert_eq!(h.service.pending_frames(), 0);
    // The counter still works after saturating.
    assert!(h.service.render_frame(frame()).expect("frame"));
    assert_eq!(h.service.pending_frames(), 1);
}

#[test]
fn unknown_preset_is_a_local_no_op() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    assert!(!h.service.set_preset("does-not-exist"));
    assert_eq!(h.service.preset_id(), "pixel-perfect");
    thread::sleep(Duration::from_millis(30));
    assert_eq!(h.set_preset_count.load(Ordering::SeqCst), 0);
}

#[test]
fn repeated_set_preset_sends_once() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    assert!(h.service.set_preset("crt"));
    assert!(h.service.set_preset("crt"));
    wait_until(|| h.set_preset_count.load(Ordering::SeqCst) == 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(h.set_preset_count.load(Ordering::SeqCst), 1);
}

#[test]
fn second_capture_request_is_rejected() {
    let behavior = Behavior {
        auto_ack: false,
        ..Behavior::default()
    };
    let mut h = harness(behavior, ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.render_frame(frame()).expect("frame");
    h.service.request_capture().expect("first request");
    let err = h
        .service
        .request_capture()
        .expect_err("second request must be rejected");
    assert!(matches!(err, CaptureError::AlreadyPending));
}

#[test]
fn capture_prefers_the_buffered_snapshot() {
    let behavior = Behavior {
        auto_ack: false,
        ..Behavior::default()
    };
    let mut h = harness(behavior, ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.render_frame(frame()).expect("frame one");
    h.service.request_capture().expect("request");
    h.service.render_frame(frame()).expect("frame two");
    // Acking the first frame makes the orchestrator dispatch the collection.
    h.ctrl.send(Ctrl::AckFrame(1)).expect("ctrl");
    let mut captured = None;
    wait_until(|| {
        captured = h.service.poll_capture().expect("poll capture");
        captured.is_some()
    });
    let captured = captured.expect("captured frame");
    assert_eq!(captured.bytes()[0], 1, "must be the buffered snapshot");
}

#[test]
fn idle_capture_takes_a_fresh_snapshot() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.render_frame(frame()).expect("frame");
    wait_until(|| {
        h.service.poll().expect("poll");
        h.service.pending_frames() == 0
    });
    h.service.request_capture().expect("request");
    let mut captured = None;
    wait_until(|| {
        captured = h.service.poll_capture().expect("poll capture");
        captured.is_some()
    });
    assert_eq!(
        captured.expect("captured frame").bytes()[0],
        2,
        "idle pipeline must capture synchronously"
    );
}

#[test]
fn capture_timeout_clears_the_pending_state() {
    let behavior = Behavior {
        capture_silent: true,
        ..Behavior::default()
    };
    let config = ServiceConfig {
        capture_timeout: Duration::from_millis(50),
        ..ServiceConfig::default()
    };
    let mut h = harness(behavior, config);
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.request_capture().expect("request");
    let deadline = Instant::now() + Duration::from_secs(2);
    let err = loop {
        match h.service.poll_capture() {
            Ok(None) => {
                assert!(Instant::now() < deadline, "timeout never fired");
                thread::sleep(Duration::from_millis(5));
            }
            Ok(Some(_)) => panic!("silent worker must not produce a capture"),
            Err(err) => break err,
        }
    };
    assert!(matches!(err, CaptureError::Timeout(_)));
    // The slot is free again.
    h.service.request_capture().expect("request after timeout");
}

#[test]
fn release_retains_surface_and_allows_reinitialize() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.release_resources().expect("release");
    assert!(!h.service.is_ready());
    assert!(h.service.surface_transferred());
    assert_eq!(h.service.pending_frames(), 0);
    let ready = h.service.reinitialize().expect("reinitialize");
    assert!(ready);
    assert!(h.service.is_ready());
}

#[test]
fn terminate_emits_surface_expired_exactly_once() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.terminate_and_reset().expect("terminate");
    h.service
        .terminate_and_reset()
        .expect("second terminate is a no-op");
    assert!(!h.service.surface_transferred());
    assert!(!h.service.is_ready());
    let expired = h
        .events
        .try_iter()
        .filter(|event| matches!(event, DomainEvent::SurfaceExpired))
        .count();
    assert_eq!(expired, 1);
    assert!(
        !h.service.render_frame(frame()).expect("skipped, not an error"),
        "submissions after terminate are dropped"
    );
}

#[test]
fn stats_are_forwarded_to_the_domain_sink() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.ctrl
        .send(Ctrl::EmitStats {
            fps: 59.7,
            average_frame_time_ms: 16.4,
        })
        .expect("ctrl");
    wait_until(|| {
        h.service.poll().expect("poll");
        h.events.try_iter().any(|event| {
            matches!(
                event,
                DomainEvent::StatsUpdate { fps, .. } if (fps - 59.7).abs() < f32::EPSILON
            )
        })
    });
    // The last window stays queryable between events.
    let stats = h.service.stats().expect("cached stats");
    assert!((stats.fps - 59.7).abs() < f32::EPSILON);
    assert!((stats.average_frame_time_ms - 16.4).abs() < f32::EPSILON);
}

#[test]
fn renderer_errors_free_the_slot_and_reach_the_app() {
    let behavior = Behavior {
        auto_ack: false,
        ..Behavior::default()
    };
    let mut h = harness(behavior, ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.render_frame(frame()).expect("frame");
    assert_eq!(h.service.pending_frames(), 1);
    h.ctrl
        .send(Ctrl::EmitError {
            code: ErrorCode::DeviceLost,
            message: "adapter vanished".to_string(),
        })
        .expect("ctrl");
    wait_until(|| {
        h.service.poll().expect("poll");
        h.service.pending_frames() == 0
    });
    let forwarded = h.events.try_iter().any(|event| {
        matches!(
            event,
            DomainEvent::PipelineError {
                code: ErrorCode::DeviceLost,
                ..
            }
        )
    });
    assert!(forwarded, "device-lost must surface as a domain event");
}

#[test]
fn fatal_renderer_errors_halt_further_submissions() {
    let behavior = Behavior {
        auto_ack: false,
        ..Behavior::default()
    };
    let mut h = harness(behavior, ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.render_frame(frame()).expect("frame");
    h.ctrl
        .send(Ctrl::EmitError {
            code: ErrorCode::DeviceLost,
            message: "adapter vanished".to_string(),
        })
        .expect("ctrl");
    wait_until(|| {
        h.service.poll().expect("poll");
        !h.service.is_ready()
    });
    // Submissions are dropped from here on, not sent and not errored.
    for _ in 0..10 {
        assert!(!h.service.render_frame(frame()).expect("dropped"));
    }
    assert_eq!(h.service.pending_frames(), 0);
    assert!(h.service.is_active(), "the session is faulted, not gone");
    // A repeat of the same fault stays quiet.
    h.ctrl
        .send(Ctrl::EmitError {
            code: ErrorCode::DeviceLost,
            message: "adapter vanished".to_string(),
        })
        .expect("ctrl");
    thread::sleep(Duration::from_millis(30));
    h.service.poll().expect("poll");
    let errors = h
        .events
        .try_iter()
        .filter(|event| matches!(event, DomainEvent::PipelineError { .. }))
        .count();
    assert_eq!(errors, 1, "the fault must be reported upstream once");
}

#[test]
fn submissions_outside_an_active_session_are_skipped() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    assert!(
        !h.service.render_frame(frame()).expect("no session yet"),
        "a frame before initialize is silently dropped"
    );
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.release_resources().expect("release");
    assert!(
        !h.service.render_frame(frame()).expect("released session"),
        "a frame while released is silently dropped"
    );
}

#[test]
fn preset_changes_while_released_stay_local() {
    let mut h = harness(Behavior::default(), ServiceConfig::default());
    h.service
        .initialize(surface(640, 576), (160, 144))
        .expect("init");
    h.service.release_resources().expect("release");
    assert!(h.service.set_preset("crt"));
    assert_eq!(h.service.preset_id(), "crt");
    thread::sleep(Duration::from_millis(30));
    assert_eq!(h.set_preset_count.load(Ordering::SeqCst), 0);
    h.service.poll().expect("poll");
    assert!(
        h.events
            .try_iter()
            .all(|event| !matches!(event, DomainEvent::PipelineError { .. })),
        "a local preset change must not bounce off the released renderer"
    );
}
