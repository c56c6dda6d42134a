//! `VoiceEngine`: top-level lifecycle handle for live voice sessions.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceEngine::new()
//!     └─► start()        → devices open, transport connecting, status = Connecting
//!         │                 (Open once the provider confirms setup)
//!         └─► stop()     → close requested, status = Closing → Closed
//! ```
//!
//! `start()` while a session is live and `stop()` while idle are both no-ops.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send`, and the session controller mutates its playback
//! clock without locks. The controller is therefore created *inside* the
//! `spawn_blocking` closure and never leaves that thread. A sync oneshot channel
//! propagates the outcome of `SessionController::start` back to the caller.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::AudioBackend,
    error::{Result, StudioError},
    events::{SessionState, SessionStatusEvent, TranscriptEntry, TranscriptEvent},
    live::{
        controller::{SessionController, SessionObserver, TranscriptLog},
        diagnostics::{DiagnosticsSnapshot, SessionDiagnostics},
        transport::Connector,
        EventSender, LiveConfig, SessionEvent,
    },
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// The top-level engine handle.
///
/// `VoiceEngine` is `Send + Sync`; all fields use interior mutability. Wrap it
/// in `Arc` to share between the console and event-forwarding tasks.
pub struct VoiceEngine<B: AudioBackend, C: Connector> {
    backend: Arc<B>,
    connector: Arc<C>,
    config: Mutex<LiveConfig>,
    /// `true` from `start()` until the session loop exits.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<SessionState>>,
    transcript: Arc<Mutex<TranscriptLog>>,
    /// Posts into the running session's queue.
    control: Arc<Mutex<Option<EventSender>>>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    /// Monotonically increasing event sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl<B: AudioBackend, C: Connector> VoiceEngine<B, C> {
    pub fn new(backend: B, connector: C, config: LiveConfig) -> Self {
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            backend: Arc::new(backend),
            connector: Arc::new(connector),
            transcript: Arc::new(Mutex::new(TranscriptLog::new(config.transcript_capacity))),
            config: Mutex::new(config),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionState::Idle)),
            control: Arc::new(Mutex::new(None)),
            transcript_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    /// Start a live session.
    ///
    /// Blocks until devices are open and the connection attempt has begun (or
    /// failed), then returns. The session keeps running on a blocking worker.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `StudioError::DeviceUnavailable` when the microphone or speaker
    ///   cannot be opened.
    /// - `StudioError::MissingCredential` / `Transport` when the connection
    ///   cannot even be attempted.
    pub fn start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("session already live, start ignored");
            return Ok(());
        }

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let controller = SessionController::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.connector),
            self.config.lock().clone(),
            events_tx,
        )
        .with_diagnostics(Arc::clone(&self.diagnostics))
        .with_observer(Box::new(BroadcastObserver {
            status: Arc::clone(&self.status),
            transcript: Arc::clone(&self.transcript),
            status_tx: self.status_tx.clone(),
            transcript_tx: self.transcript_tx.clone(),
            seq: Arc::clone(&self.seq),
        }));

        let running = Arc::clone(&self.running);
        let control = Arc::clone(&self.control);

        // Sync oneshot: the session thread reports whether `start` succeeded.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            let mut controller = controller;
            match controller.start() {
                Ok(()) => {
                    *control.lock() = controller.control_sender();
                    let _ = open_tx.send(Ok(()));
                }
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    let _ = open_tx.send(Err(e));
                    return;
                }
            }

            let controller = pipeline::run(pipeline::SessionLoop {
                controller,
                events: events_rx,
            });
            drop(controller);

            // Every device handle is gone with the controller.
            *control.lock() = None;
            running.store(false, Ordering::SeqCst);
        });

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!("live session starting");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // Channel closed before a message was sent: the task panicked.
                self.running.store(false, Ordering::SeqCst);
                Err(StudioError::Other(anyhow::anyhow!(
                    "session task died unexpectedly"
                )))
            }
        }
    }

    /// Use a specific microphone for subsequent sessions.
    pub fn set_preferred_input_device(&self, device: Option<String>) {
        self.config.lock().preferred_input_device = device;
    }

    /// Request the running session to close. No-op when idle.
    pub fn stop(&self) {
        match self.control.lock().as_ref() {
            Some(sender) => {
                sender.send(SessionEvent::StopRequested);
                info!(session = sender.session(), "session stop requested");
            }
            None => info!("no live session to stop"),
        }
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionState {
        *self.status.lock()
    }

    /// True while audio flows both ways.
    pub fn is_active(&self) -> bool {
        self.status() == SessionState::Open
    }

    /// True until the session worker has exited and released its devices.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Rolling transcript of the current (or last) session.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.lock().to_vec()
    }

    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of session counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

/// Mirrors controller notifications into the engine's shared state and
/// broadcast channels.
struct BroadcastObserver {
    status: Arc<Mutex<SessionState>>,
    transcript: Arc<Mutex<TranscriptLog>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    seq: Arc<AtomicU64>,
}

impl SessionObserver for BroadcastObserver {
    fn on_state(&mut self, session: u64, state: SessionState, detail: Option<&str>) {
        if state == SessionState::Connecting {
            self.transcript.lock().clear();
        }
        *self.status.lock() = state;
        let _ = self.status_tx.send(SessionStatusEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            session,
            status: state,
            detail: detail.map(str::to_string),
        });
    }

    fn on_transcript(&mut self, session: u64, entry: &TranscriptEntry) {
        self.transcript.lock().push(entry.clone());
        let _ = self.transcript_tx.send(TranscriptEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            session,
            entry: entry.clone(),
        });
    }
}
