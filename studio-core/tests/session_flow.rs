use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use studio_core::audio::{
    AudioBackend, CaptureRequest, InputStream, OutputContext, VirtualOutput, WindowHandler,
};
use studio_core::buffering::chunk::EncodedFrame;
use studio_core::codec::{decode_text_to_bytes, encode_bytes_to_text, pcm16_to_bytes};
use studio_core::engine::pipeline::{self, SessionLoop};
use studio_core::live::controller::SessionController;
use studio_core::live::protocol::InboundMessage;
use studio_core::live::transport::{Connector, SendOutcome, Transport};
use studio_core::live::{EventSender, LiveConfig, SessionEnvelope, SessionEvent};
use studio_core::{SessionState, Speaker, StudioError, VoiceEngine};

const PLAYBACK_RATE: u32 = 24_000;

// ── Fakes ───────────────────────────────────────────────────────────────────

type SharedOutput = Arc<Mutex<VirtualOutput>>;

#[derive(Default)]
struct BackendCounters {
    deny_microphone: AtomicBool,
    inputs_opened: AtomicUsize,
    inputs_released: AtomicUsize,
    handler: Mutex<Option<WindowHandler>>,
}

struct FakeBackend {
    counters: Arc<BackendCounters>,
    output: SharedOutput,
}

struct FakeInput {
    counters: Arc<BackendCounters>,
}

impl InputStream for FakeInput {
    fn device_sample_rate(&self) -> u32 {
        16_000
    }
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        self.counters.inputs_released.fetch_add(1, Ordering::SeqCst);
    }
}

impl AudioBackend for FakeBackend {
    type Output = SharedOutput;

    fn open_input(
        &self,
        request: &CaptureRequest,
        on_window: WindowHandler,
    ) -> studio_core::Result<Box<dyn InputStream>> {
        assert_eq!(request.sample_rate, 16_000);
        assert_eq!(request.frame_len, 4096);
        if self.counters.deny_microphone.load(Ordering::SeqCst) {
            return Err(StudioError::DeviceUnavailable("permission denied".into()));
        }
        self.counters.inputs_opened.fetch_add(1, Ordering::SeqCst);
        *self.counters.handler.lock() = Some(on_window);
        Ok(Box::new(FakeInput {
            counters: Arc::clone(&self.counters),
        }))
    }

    fn open_output(&self, sample_rate: u32) -> studio_core::Result<Self::Output> {
        assert_eq!(sample_rate, PLAYBACK_RATE);
        Ok(Arc::clone(&self.output))
    }
}

#[derive(Default)]
struct ConnectorCounters {
    refuse: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    sent: Mutex<Vec<EncodedFrame>>,
    server: Mutex<Option<EventSender>>,
}

struct FakeConnector {
    counters: Arc<ConnectorCounters>,
}

struct FakeTransport {
    counters: Arc<ConnectorCounters>,
}

impl Transport for FakeTransport {
    fn send(&mut self, frame: EncodedFrame) -> studio_core::Result<SendOutcome> {
        self.counters.sent.lock().push(frame);
        Ok(SendOutcome::Queued)
    }

    fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        _config: &LiveConfig,
        events: EventSender,
    ) -> studio_core::Result<Box<dyn Transport>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.counters.refuse.load(Ordering::SeqCst) {
            return Err(StudioError::MissingCredential);
        }
        *self.counters.server.lock() = Some(events);
        Ok(Box::new(FakeTransport {
            counters: Arc::clone(&self.counters),
        }))
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    controller: SessionController<FakeBackend, FakeConnector>,
    events: Receiver<SessionEnvelope>,
    backend: Arc<BackendCounters>,
    connector: Arc<ConnectorCounters>,
    output: SharedOutput,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(LiveConfig::default())
    }

    fn with_config(config: LiveConfig) -> Self {
        let backend = Arc::new(BackendCounters::default());
        let connector = Arc::new(ConnectorCounters::default());
        let output = Arc::new(Mutex::new(VirtualOutput::manual(PLAYBACK_RATE)));
        let (tx, events) = crossbeam_channel::unbounded();
        let controller = SessionController::new(
            Arc::new(FakeBackend {
                counters: Arc::clone(&backend),
                output: Arc::clone(&output),
            }),
            Arc::new(FakeConnector {
                counters: Arc::clone(&connector),
            }),
            config,
            tx,
        );
        Self {
            controller,
            events,
            backend,
            connector,
            output,
        }
    }

    fn pump(&mut self) {
        while let Ok(envelope) = self.events.try_recv() {
            self.controller.handle(envelope);
        }
        self.controller.tick();
    }

    fn server(&self) -> EventSender {
        self.connector
            .server
            .lock()
            .clone()
            .expect("transport connected")
    }

    fn open(&mut self) {
        self.controller.start().expect("start");
        self.server().send(SessionEvent::Opened);
        self.pump();
        assert_eq!(self.controller.state(), SessionState::Open);
    }

    fn capture(&self, window: Vec<f32>) {
        let mut handler = self.backend.handler.lock();
        (handler.as_mut().expect("microphone open"))(window);
    }

    fn deliver(&mut self, message: InboundMessage) {
        self.server().send(SessionEvent::Message(message));
        self.pump();
    }

    fn advance(&self, secs: f64) {
        self.output.lock().advance_secs(secs);
    }
}

fn audio_payload(secs: f64) -> String {
    let samples = vec![250i16; (secs * PLAYBACK_RATE as f64).round() as usize];
    encode_bytes_to_text(&pcm16_to_bytes(&samples))
}

fn audio_message(payloads: Vec<String>) -> InboundMessage {
    InboundMessage {
        audio: payloads,
        ..Default::default()
    }
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[test]
fn denied_microphone_stays_idle_without_connecting() {
    let mut h = Harness::new();
    h.backend.deny_microphone.store(true, Ordering::SeqCst);

    let err = h.controller.start().unwrap_err();
    assert!(matches!(err, StudioError::DeviceUnavailable(_)));
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
    assert!(!h.controller.holds_resources());
    assert!(h.controller.session_id().is_none());
}

#[test]
fn silent_window_is_sent_as_zero_pcm() {
    let mut h = Harness::new();
    h.open();

    h.capture(vec![0.0; 4096]);
    h.pump();

    let sent = h.connector.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");
    let bytes = decode_text_to_bytes(&sent[0].data).unwrap();
    assert_eq!(bytes.len(), 8192);
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn windows_before_open_are_discarded() {
    let mut h = Harness::new();
    h.controller.start().unwrap();
    h.capture(vec![0.1; 4096]);
    h.pump();
    assert_eq!(h.controller.state(), SessionState::Connecting);
    assert!(h.connector.sent.lock().is_empty());
}

#[test]
fn consecutive_chunks_are_scheduled_gaplessly() {
    let mut h = Harness::new();
    h.open();

    h.deliver(audio_message(vec![audio_payload(0.5)]));
    h.deliver(audio_message(vec![audio_payload(0.3)]));

    let playback = h.controller.playback().unwrap();
    assert_eq!(playback.active_count(), 2);
    let first = playback.handle(1).unwrap();
    let second = playback.handle(2).unwrap();
    assert_relative_eq!(second.start_at - first.start_at, 0.5, epsilon = 1e-9);
    assert_relative_eq!(playback.clock().next_start(), first.start_at + 0.8, epsilon = 1e-9);
}

#[test]
fn interruption_stops_playback_and_resets_clock() {
    let mut h = Harness::new();
    h.open();
    h.deliver(audio_message(vec![audio_payload(1.0)]));
    h.advance(0.3);

    h.deliver(InboundMessage {
        interrupted: true,
        ..Default::default()
    });

    let playback = h.controller.playback().unwrap();
    assert_eq!(playback.active_count(), 0);
    assert_eq!(h.output.lock().stopped(), &[1]);
    assert_relative_eq!(playback.clock().next_start(), 0.3, epsilon = 1e-9);
    assert_eq!(h.controller.diagnostics().snapshot().interruptions, 1);
}

#[test]
fn finished_playback_is_reaped_on_tick() {
    let mut h = Harness::new();
    h.open();
    h.deliver(audio_message(vec![audio_payload(0.2), audio_payload(0.2)]));
    h.advance(0.25);
    h.pump();

    assert_eq!(h.controller.playback().unwrap().active_count(), 1);
    assert_eq!(h.controller.diagnostics().snapshot().chunks_finished, 1);
}

#[test]
fn one_message_processes_transcript_audio_and_interruption() {
    let mut h = Harness::new();
    h.open();
    h.deliver(InboundMessage {
        input_transcript: Some("What sold today?".into()),
        transcript: Some("Twelve orders.".into()),
        audio: vec![audio_payload(0.4)],
        interrupted: true,
        ..Default::default()
    });

    let entries = h.controller.transcript().to_vec();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].speaker, Speaker::User);
    assert_eq!(entries[1].to_string(), "AI: Twelve orders.");

    let diag = h.controller.diagnostics().snapshot();
    assert_eq!(diag.chunks_scheduled, 1);
    assert_eq!(diag.interruptions, 1);
    assert_eq!(h.controller.playback().unwrap().active_count(), 0);
}

#[test]
fn transcript_is_bounded() {
    let mut h = Harness::new();
    h.open();
    for i in 0..15 {
        h.deliver(InboundMessage {
            transcript: Some(format!("fragment {i}")),
            ..Default::default()
        });
    }
    let entries = h.controller.transcript().to_vec();
    assert_eq!(entries.len(), 11);
    assert_eq!(entries[0].text, "fragment 4");
    assert_eq!(entries[10].text, "fragment 14");
}

#[test]
fn malformed_audio_is_skipped_without_failing_the_session() {
    let mut h = Harness::new();
    h.open();
    h.deliver(audio_message(vec!["***".into(), audio_payload(0.1)]));

    assert_eq!(h.controller.state(), SessionState::Open);
    let diag = h.controller.diagnostics().snapshot();
    assert_eq!(diag.chunks_rejected, 1);
    assert_eq!(diag.chunks_scheduled, 1);
}

#[test]
fn stop_closes_then_releases_on_confirmation() {
    let mut h = Harness::new();
    h.open();

    h.controller.stop();
    assert_eq!(h.controller.state(), SessionState::Closing);
    assert_eq!(h.connector.closes.load(Ordering::SeqCst), 1);
    assert!(h.controller.holds_resources());

    h.server().send(SessionEvent::Closed { reason: None });
    h.pump();
    assert_eq!(h.controller.state(), SessionState::Closed);
    assert!(!h.controller.holds_resources());
    assert!(!h.controller.is_active());
    assert_eq!(h.backend.inputs_released.load(Ordering::SeqCst), 1);

    // Terminal: a second stop changes nothing.
    h.controller.stop();
    assert_eq!(h.controller.state(), SessionState::Closed);
    assert_eq!(h.connector.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn unconfirmed_close_is_completed_locally() {
    let close_timeout = Duration::from_millis(100);
    let mut h = Harness::with_config(LiveConfig {
        close_timeout,
        ..LiveConfig::default()
    });
    h.open();
    h.controller.stop();
    assert_eq!(h.controller.state(), SessionState::Closing);

    // The server never confirms; the loop has to give up on its own.
    let Harness {
        controller,
        events,
        backend,
        connector,
        ..
    } = h;
    let started = Instant::now();
    let controller = pipeline::run(SessionLoop { controller, events });

    assert!(started.elapsed() >= close_timeout);
    assert_eq!(controller.state(), SessionState::Closed);
    assert!(!controller.holds_resources());
    assert_eq!(backend.inputs_released.load(Ordering::SeqCst), 1);
    assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_while_idle_is_a_no_op() {
    let mut h = Harness::new();
    h.controller.stop();
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.connector.closes.load(Ordering::SeqCst), 0);
}

#[test]
fn server_close_while_open_goes_straight_to_closed() {
    let mut h = Harness::new();
    h.open();
    h.server().send(SessionEvent::Closed {
        reason: Some("session expired".into()),
    });
    h.pump();
    assert_eq!(h.controller.state(), SessionState::Closed);
    assert!(!h.controller.holds_resources());
}

#[test]
fn transport_error_releases_everything() {
    let mut h = Harness::new();
    h.open();
    h.deliver(audio_message(vec![audio_payload(0.5)]));

    h.server()
        .send(SessionEvent::TransportError("connection reset".into()));
    h.pump();

    assert_eq!(h.controller.state(), SessionState::Error);
    assert!(!h.controller.holds_resources());
    assert_eq!(h.backend.inputs_released.load(Ordering::SeqCst), 1);
}

#[test]
fn synchronous_connect_failure_ends_in_error() {
    let mut h = Harness::new();
    h.connector.refuse.store(true, Ordering::SeqCst);

    let err = h.controller.start().unwrap_err();
    assert!(matches!(err, StudioError::MissingCredential));
    assert_eq!(h.controller.state(), SessionState::Error);
    assert_eq!(h.backend.inputs_opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.inputs_released.load(Ordering::SeqCst), 1);
}

#[test]
fn start_while_live_is_ignored() {
    let mut h = Harness::new();
    h.open();
    let session = h.controller.session_id();

    h.controller.start().unwrap();
    assert_eq!(h.controller.session_id(), session);
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.state(), SessionState::Open);
}

#[test]
fn restart_after_terminal_state_uses_a_fresh_session() {
    let mut h = Harness::new();
    h.open();
    h.deliver(InboundMessage {
        transcript: Some("first session".into()),
        ..Default::default()
    });
    let old_server = h.server();
    old_server.send(SessionEvent::TransportError("dropped".into()));
    h.pump();
    assert_eq!(h.controller.state(), SessionState::Error);

    h.controller.start().unwrap();
    assert_eq!(h.controller.state(), SessionState::Connecting);
    assert!(h.controller.transcript().is_empty());
    assert_ne!(h.controller.session_id(), Some(old_server.session()));

    // Late events from the first session are ignored.
    old_server.send(SessionEvent::Opened);
    h.pump();
    assert_eq!(h.controller.state(), SessionState::Connecting);

    h.server().send(SessionEvent::Opened);
    h.pump();
    assert_eq!(h.controller.state(), SessionState::Open);
    assert_relative_eq!(h.controller.playback().unwrap().clock().next_start(), 0.0);
}

// ── Engine ──────────────────────────────────────────────────────────────────

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_runs_a_session_to_completion() {
    let backend = Arc::new(BackendCounters::default());
    let connector = Arc::new(ConnectorCounters::default());
    let engine = VoiceEngine::new(
        FakeBackend {
            counters: Arc::clone(&backend),
            output: Arc::new(Mutex::new(VirtualOutput::manual(PLAYBACK_RATE))),
        },
        FakeConnector {
            counters: Arc::clone(&connector),
        },
        LiveConfig::default(),
    );
    let mut transcripts = engine.subscribe_transcripts();

    engine.start().unwrap();
    assert!(engine.is_running());
    assert_eq!(engine.status(), SessionState::Connecting);

    let server = connector.server.lock().clone().unwrap();
    server.send(SessionEvent::Opened);
    assert!(wait_for(|| engine.is_active()));

    server.send(SessionEvent::Message(InboundMessage {
        transcript: Some("Hello operator.".into()),
        ..Default::default()
    }));
    let event = transcripts.recv().await.unwrap();
    assert_eq!(event.entry.text, "Hello operator.");
    assert_eq!(event.session, server.session());

    // A second start while live changes nothing.
    engine.start().unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

    engine.stop();
    assert!(wait_for(|| engine.status() == SessionState::Closing));
    assert_eq!(connector.closes.load(Ordering::SeqCst), 1);

    server.send(SessionEvent::Closed { reason: None });
    assert!(wait_for(|| !engine.is_running()));
    assert_eq!(engine.status(), SessionState::Closed);
    assert_eq!(backend.inputs_released.load(Ordering::SeqCst), 1);
    assert_eq!(engine.transcript().len(), 1);
}
