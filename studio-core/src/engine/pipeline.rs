//! Session event loop, run inside `tokio::task::spawn_blocking`.
//!
//! ## Loop structure
//!
//! ```text
//! loop {
//!     recv one event (≤ TICK) ─► controller.handle
//!     drain whatever else is queued
//!     controller.tick()            // reap finished playback
//!     exit once the session is Closed or Error
//! }
//! ```
//!
//! A session stuck in `Closing` longer than `LiveConfig::close_timeout` is
//! closed locally.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

use crate::audio::AudioBackend;
use crate::events::SessionState;
use crate::live::controller::SessionController;
use crate::live::transport::Connector;
use crate::live::{SessionEnvelope, SessionEvent};

/// Longest wait for an event before reaping playback again.
pub const TICK: Duration = Duration::from_millis(20);

pub struct SessionLoop<B: AudioBackend, C: Connector> {
    pub controller: SessionController<B, C>,
    pub events: Receiver<SessionEnvelope>,
}

/// Drive the controller until its session ends, then hand it back.
pub fn run<B: AudioBackend, C: Connector>(ctx: SessionLoop<B, C>) -> SessionController<B, C> {
    let SessionLoop {
        mut controller,
        events,
    } = ctx;
    let session = controller.session_id();
    let close_timeout = controller.config().close_timeout;
    info!(?session, ?close_timeout, "session loop started");

    let mut closing_since: Option<Instant> = None;

    loop {
        match events.recv_timeout(TICK) {
            Ok(envelope) => {
                controller.handle(envelope);
                while let Ok(more) = events.try_recv() {
                    controller.handle(more);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        controller.tick();

        let state = controller.state();
        if state.is_terminal() || state == SessionState::Idle {
            break;
        }

        if state == SessionState::Closing {
            let since = *closing_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= close_timeout {
                warn!(?session, "close not confirmed in time, closing locally");
                if let Some(id) = controller.session_id() {
                    controller.handle(SessionEnvelope {
                        session: id,
                        event: SessionEvent::Closed {
                            reason: Some("close handshake timed out".into()),
                        },
                    });
                }
            }
        }
    }

    info!(?session, state = %controller.state(), "session loop exited");
    controller
}
