//! Session lifecycle controller.
//!
//! Owns the microphone, the output context and the transport of the current
//! session and drives the state machine from queued [`SessionEvent`]s:
//!
//! ```text
//! Idle ──start──► Connecting ──Opened──► Open ──stop──► Closing ──Closed──► Closed
//!  ▲                  │ │                 │ │                │
//!  └─device failure───┘ └──TransportError─┴─┴────────────────┴──────────► Error
//! ```
//!
//! A server-side close while `Connecting` or `Open` goes straight to `Closed`.
//! Resources are released on every path into a terminal state.
//!
//! The controller is single-threaded: it is only ever touched by the loop that
//! drains the session queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use super::capture::CapturePipeline;
use super::diagnostics::SessionDiagnostics;
use super::playback::PlaybackScheduler;
use super::protocol::InboundMessage;
use super::transport::{Connector, SendOutcome, Transport};
use super::{EventSender, LiveConfig, SessionEnvelope, SessionEvent};
use crate::audio::{AudioBackend, CaptureRequest, InputStream, OutputContext, WindowHandler};
use crate::error::{Result, StudioError};
use crate::events::{SessionState, Speaker, TranscriptEntry};

/// Process-wide so ids never repeat across controllers.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Receives state changes and transcript fragments as they happen.
pub trait SessionObserver: Send {
    fn on_state(&mut self, _session: u64, _state: SessionState, _detail: Option<&str>) {}

    fn on_transcript(&mut self, _session: u64, _entry: &TranscriptEntry) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Rolling transcript; the oldest fragment is dropped once full.
#[derive(Debug, Clone)]
pub struct TranscriptLog {
    capacity: usize,
    entries: VecDeque<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a fragment, returning the one evicted to make room, if any.
    pub fn push(&mut self, entry: TranscriptEntry) -> Option<TranscriptEntry> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<TranscriptEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// Fields drop in declaration order: microphone, then connection, then speaker.
struct SessionResources<O: OutputContext> {
    _input: Box<dyn InputStream>,
    transport: Box<dyn Transport>,
    playback: PlaybackScheduler<O>,
}

struct Session<O: OutputContext> {
    id: u64,
    state: SessionState,
    resources: Option<SessionResources<O>>,
}

pub struct SessionController<B: AudioBackend, C: Connector> {
    backend: Arc<B>,
    connector: Arc<C>,
    config: LiveConfig,
    events: Sender<SessionEnvelope>,
    capture: CapturePipeline,
    session: Option<Session<B::Output>>,
    transcript: TranscriptLog,
    observer: Box<dyn SessionObserver>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl<B: AudioBackend, C: Connector> SessionController<B, C> {
    /// `events` is the sending half of the queue this controller is fed from.
    pub fn new(
        backend: Arc<B>,
        connector: Arc<C>,
        config: LiveConfig,
        events: Sender<SessionEnvelope>,
    ) -> Self {
        Self {
            capture: CapturePipeline::new(config.capture_sample_rate),
            transcript: TranscriptLog::new(config.transcript_capacity),
            backend,
            connector,
            config,
            events,
            session: None,
            observer: Box::new(NoopObserver),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<SessionDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Acquire devices and begin connecting.
    ///
    /// Ignored (returns `Ok`) while a session is already live.
    ///
    /// # Errors
    /// - `DeviceUnavailable` if the microphone or speaker cannot be opened; the
    ///   controller returns to `Idle` and no connection is attempted.
    /// - Any synchronous connector failure; the session ends in `Error`.
    pub fn start(&mut self) -> Result<()> {
        let state = self.state();
        if state.is_live() {
            warn!(session = self.session_id(), %state, "start ignored: session already live");
            return Ok(());
        }

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        self.transcript.clear();
        self.diagnostics.reset();
        self.session = Some(Session {
            id,
            state: SessionState::Connecting,
            resources: None,
        });
        self.observer.on_state(id, SessionState::Connecting, None);

        let events = EventSender::new(id, self.events.clone());
        let request = CaptureRequest {
            sample_rate: self.config.capture_sample_rate,
            frame_len: self.config.capture_frame_len,
            preferred_device: self.config.preferred_input_device.clone(),
        };
        let window_events = events.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        let on_window: WindowHandler = Box::new(move |window| {
            SessionDiagnostics::bump(&diagnostics.frames_captured, 1);
            window_events.send(SessionEvent::CaptureWindow(window));
        });

        let input = match self.backend.open_input(&request, on_window) {
            Ok(input) => input,
            Err(e) => return self.abort_start(id, e),
        };
        info!(
            session = id,
            device_rate = input.device_sample_rate(),
            wire_rate = request.sample_rate,
            "microphone open"
        );
        let output = match self.backend.open_output(self.config.playback_sample_rate) {
            Ok(output) => output,
            Err(e) => {
                drop(input);
                return self.abort_start(id, e);
            }
        };

        let transport = match self.connector.connect(&self.config, events) {
            Ok(transport) => transport,
            Err(e) => {
                drop(input);
                drop(output);
                error!(session = id, "connect failed: {e}");
                self.set_state(SessionState::Error, Some(e.to_string()));
                return Err(e);
            }
        };

        let playback = PlaybackScheduler::new(output, self.config.playback_channels);
        if let Some(session) = self.session.as_mut() {
            session.resources = Some(SessionResources {
                _input: input,
                transport,
                playback,
            });
        }
        info!(session = id, "session connecting");
        Ok(())
    }

    /// Request a close. No-op unless `Connecting` or `Open`.
    pub fn stop(&mut self) {
        let state = self.state();
        if !matches!(state, SessionState::Connecting | SessionState::Open) {
            debug!(%state, "stop ignored");
            return;
        }
        if let Some(resources) = self.resources_mut() {
            resources.transport.close();
        }
        self.set_state(SessionState::Closing, None);
        info!(session = self.session_id(), "session closing");
    }

    /// Apply one queued event. Events from any session other than the current
    /// one are ignored.
    pub fn handle(&mut self, envelope: SessionEnvelope) {
        let Some(current) = self.session_id() else {
            debug!(session = envelope.session, "event with no session");
            return;
        };
        if envelope.session != current {
            debug!(stale = envelope.session, current, "ignoring event from an earlier session");
            return;
        }

        let state = self.state();
        match envelope.event {
            SessionEvent::Opened if state == SessionState::Connecting => {
                self.set_state(SessionState::Open, None);
                info!(session = current, "session open");
            }
            SessionEvent::Message(message) if state == SessionState::Open => {
                self.on_message(message);
            }
            SessionEvent::CaptureWindow(window) if state == SessionState::Open => {
                self.forward_window(&window);
            }
            SessionEvent::TransportError(message) if state.is_live() => {
                error!(session = current, "session failed: {message}");
                self.release();
                self.set_state(SessionState::Error, Some(message));
            }
            SessionEvent::Closed { reason } if state.is_live() => {
                self.release();
                self.set_state(SessionState::Closed, reason);
                info!(session = current, "session closed");
            }
            SessionEvent::StopRequested => self.stop(),
            other => debug!(%state, event = event_kind(&other), "event ignored in this state"),
        }
    }

    /// Retire playback the output reports as finished.
    pub fn tick(&mut self) {
        let finished = self
            .resources_mut()
            .map(|resources| resources.playback.reap_finished())
            .unwrap_or(0);
        if finished > 0 {
            SessionDiagnostics::bump(&self.diagnostics.chunks_finished, finished);
        }
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    /// True while audio flows both ways.
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Whether devices and transport are currently held.
    pub fn holds_resources(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.resources.is_some())
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn playback(&self) -> Option<&PlaybackScheduler<B::Output>> {
        self.session
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .map(|r| &r.playback)
    }

    /// Sender for posting events into the current session.
    pub fn control_sender(&self) -> Option<EventSender> {
        self.session_id()
            .map(|id| EventSender::new(id, self.events.clone()))
    }

    pub fn diagnostics(&self) -> Arc<SessionDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn abort_start(&mut self, id: u64, err: StudioError) -> Result<()> {
        warn!(session = id, "session start failed: {err}");
        self.session = None;
        self.observer
            .on_state(id, SessionState::Idle, Some(&err.to_string()));
        Err(err)
    }

    fn on_message(&mut self, message: InboundMessage) {
        if let Some(text) = message.input_transcript {
            self.record(TranscriptEntry::new(Speaker::User, text));
        }
        if let Some(text) = message.transcript {
            self.record(TranscriptEntry::new(Speaker::Model, text));
        }

        let Some(resources) = self.session.as_mut().and_then(|s| s.resources.as_mut()) else {
            return;
        };
        let diagnostics = &self.diagnostics;

        for data in &message.audio {
            match resources.playback.enqueue_encoded(data) {
                Ok(Some(_)) => SessionDiagnostics::bump(&diagnostics.chunks_scheduled, 1),
                Ok(None) => {}
                Err(e) => {
                    SessionDiagnostics::bump(&diagnostics.chunks_rejected, 1);
                    warn!("skipping undecodable audio chunk: {e}");
                }
            }
        }

        if message.interrupted {
            resources.playback.interrupt();
            SessionDiagnostics::bump(&diagnostics.interruptions, 1);
        }
        if message.turn_complete {
            debug!("model turn complete");
        }
    }

    fn record(&mut self, entry: TranscriptEntry) {
        let Some(id) = self.session_id() else { return };
        self.transcript.push(entry.clone());
        SessionDiagnostics::bump(&self.diagnostics.transcript_entries, 1);
        debug!(session = id, "{entry}");
        self.observer.on_transcript(id, &entry);
    }

    fn forward_window(&mut self, window: &[f32]) {
        let frame = self.capture.process(window);
        let Some(resources) = self.session.as_mut().and_then(|s| s.resources.as_mut()) else {
            return;
        };
        match resources.transport.send(frame) {
            Ok(SendOutcome::Queued) => {
                SessionDiagnostics::bump(&self.diagnostics.frames_sent, 1);
            }
            Ok(SendOutcome::DroppedOldest) => {
                SessionDiagnostics::bump(&self.diagnostics.frames_sent, 1);
                SessionDiagnostics::bump(&self.diagnostics.frames_dropped, 1);
                debug!("outbound queue full, dropped oldest frame");
            }
            Err(e) => warn!("capture frame not sent: {e}"),
        }
    }

    fn resources_mut(&mut self) -> Option<&mut SessionResources<B::Output>> {
        self.session.as_mut().and_then(|s| s.resources.as_mut())
    }

    fn release(&mut self) {
        if let Some(resources) = self.session.as_mut().and_then(|s| s.resources.take()) {
            let in_flight = resources.playback.active_count();
            drop(resources);
            info!(in_flight, "session resources released");
        }
    }

    fn set_state(&mut self, state: SessionState, detail: Option<String>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state == state {
            return;
        }
        debug!(session = session.id, from = %session.state, to = %state, "session state change");
        session.state = state;
        let id = session.id;
        self.observer.on_state(id, state, detail.as_deref());
    }
}

fn event_kind(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Opened => "opened",
        SessionEvent::Message(_) => "message",
        SessionEvent::TransportError(_) => "transport_error",
        SessionEvent::Closed { .. } => "closed",
        SessionEvent::CaptureWindow(_) => "capture_window",
        SessionEvent::StopRequested => "stop_requested",
    }
}
