//! Gemini Live connector: a `tungstenite` WebSocket driven by one I/O thread.
//!
//! The thread connects, sends the `setup` message, then alternates between
//! flushing queued outbound frames and reading with a short socket timeout.
//! It reports `Opened` once the provider answers `setupComplete`, and exactly
//! one terminal event (`Closed` or `TransportError`) before it exits. A close
//! the server never answers ends after `LiveConfig::close_timeout`; dropping
//! every transport handle ends the connection at once.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use tracing::{debug, info, warn};
use tungstenite::{stream::MaybeTlsStream, Message, WebSocket};

use super::protocol::{realtime_input_json, InboundMessage, SetupMessage};
use super::transport::{Connector, Outbound, OutboundQueue, QueuedTransport, Transport};
use super::{EventSender, LiveConfig, SessionEvent};
use crate::error::Result;
use crate::service::resolve_api_key;

/// Socket read timeout between outbound flushes.
const READ_POLL: Duration = Duration::from_millis(20);

const CLOSE_TIMED_OUT: &str = "close handshake timed out";

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiLiveConnector;

impl Connector for GeminiLiveConnector {
    fn connect(&self, config: &LiveConfig, events: EventSender) -> Result<Box<dyn Transport>> {
        let key = resolve_api_key(config.api_key.as_deref())?;
        let url = format!("{}?key={}", config.endpoint, key);
        let setup = serde_json::to_string(&SetupMessage::from_config(config))?;
        let (queue, outbound) = OutboundQueue::bounded(config.outbound_queue_cap);
        let close_timeout = config.close_timeout;

        info!(model = config.model.as_str(), session = events.session(), "connecting live session");
        std::thread::Builder::new()
            .name("studio-live-io".into())
            .spawn(move || run_socket(&url, setup, close_timeout, outbound, events))?;

        Ok(Box::new(QueuedTransport::new(queue)))
    }
}

/// Outcome of one connection, reported exactly once.
enum Ending {
    Closed(Option<String>),
    Failed(String),
}

fn run_socket(
    url: &str,
    setup: String,
    close_timeout: Duration,
    outbound: Receiver<Outbound>,
    events: EventSender,
) {
    let ending = match tungstenite::connect(url) {
        Ok((mut socket, _response)) => {
            set_read_timeout(&socket, Some(READ_POLL));
            match socket.send(Message::text(setup)) {
                Ok(()) => pump(&mut socket, &outbound, close_timeout, &events),
                Err(e) => Ending::Failed(format!("setup not sent: {e}")),
            }
        }
        Err(e) => Ending::Failed(format!("connect failed: {e}")),
    };

    match ending {
        Ending::Closed(reason) => {
            info!(session = events.session(), ?reason, "live connection closed");
            events.send(SessionEvent::Closed { reason });
        }
        Ending::Failed(message) => {
            warn!(session = events.session(), "live connection failed: {message}");
            events.send(SessionEvent::TransportError(message));
        }
    }
}

/// What the outbound queue asked for since the last poll.
enum Drained {
    Idle,
    CloseRequested,
    /// Every transport handle is gone; nobody will read further events.
    Abandoned,
    Failed(String),
}

fn pump(
    socket: &mut Socket,
    outbound: &Receiver<Outbound>,
    close_timeout: Duration,
    events: &EventSender,
) -> Ending {
    let mut opened = false;
    let mut close_deadline: Option<Instant> = None;
    let mut close_reason: Option<String> = None;

    loop {
        match drain_outbound(socket, outbound, opened && close_deadline.is_none()) {
            Drained::Idle => {}
            Drained::CloseRequested => {
                if close_deadline.is_none() {
                    if let Err(e) = socket.close(None) {
                        debug!("close handshake: {e}");
                    }
                    close_deadline = Some(Instant::now() + close_timeout);
                }
            }
            Drained::Abandoned => {
                if close_deadline.is_none() {
                    if let Err(e) = socket.close(None) {
                        debug!("close on abandon: {e}");
                    }
                }
                return Ending::Closed(close_reason);
            }
            Drained::Failed(message) => return Ending::Failed(message),
        }

        if close_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            debug!("server did not answer the close; dropping the socket");
            return Ending::Closed(Some(CLOSE_TIMED_OUT.to_string()));
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                handle_payload(InboundMessage::parse(text.as_str()), &mut opened, events)
            }
            Ok(Message::Binary(bytes)) => {
                handle_payload(InboundMessage::parse_bytes(&bytes), &mut opened, events)
            }
            Ok(Message::Close(frame)) => {
                // tungstenite answers the close; keep reading until it reports the end.
                debug!(?frame, "close frame received");
                close_reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|reason| !reason.is_empty());
                close_deadline.get_or_insert_with(|| Instant::now() + close_timeout);
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Ending::Closed(close_reason);
            }
            Err(e) if close_deadline.is_some() => {
                debug!("error while closing: {e}");
                return Ending::Closed(close_reason);
            }
            Err(e) => return Ending::Failed(e.to_string()),
        }
    }
}

/// Drain the outbound queue. Frames are written only while `writable`;
/// otherwise (before the handshake, or once closing) they are discarded.
fn drain_outbound(socket: &mut Socket, outbound: &Receiver<Outbound>, writable: bool) -> Drained {
    let mut drained = Drained::Idle;
    loop {
        match outbound.try_recv() {
            Ok(Outbound::Frame(frame)) => {
                if !writable || matches!(drained, Drained::CloseRequested) {
                    continue;
                }
                let text = match realtime_input_json(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("dropping unserialisable frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = socket.send(Message::text(text)) {
                    return Drained::Failed(format!("send failed: {e}"));
                }
            }
            Ok(Outbound::Close) => drained = Drained::CloseRequested,
            Err(TryRecvError::Disconnected) => return Drained::Abandoned,
            Err(TryRecvError::Empty) => return drained,
        }
    }
}

fn handle_payload(parsed: Result<InboundMessage>, opened: &mut bool, events: &EventSender) {
    let message = match parsed {
        Ok(message) => message,
        Err(e) => {
            warn!("skipping unreadable server message: {e}");
            return;
        }
    };

    if message.setup_complete && !*opened {
        *opened = true;
        events.send(SessionEvent::Opened);
    }
    if message.go_away {
        warn!(session = events.session(), "server announced disconnect");
    }
    if message.has_content() {
        events.send(SessionEvent::Message(message));
    }
}

fn set_read_timeout(socket: &Socket, timeout: Option<Duration>) {
    let result = match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(timeout),
        MaybeTlsStream::Rustls(stream) => stream.get_ref().set_read_timeout(timeout),
        _ => Ok(()),
    };
    if let Err(e) = result {
        warn!("failed to set socket read timeout: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread::JoinHandle;

    use crossbeam_channel::RecvTimeoutError;

    use super::*;
    use crate::live::SessionEnvelope;

    const WAIT: Duration = Duration::from_secs(3);

    /// How the local server behaves once it has answered the setup.
    #[derive(Clone, Copy)]
    enum ServerMode {
        /// Keep the socket open and never read again, so a close goes unanswered.
        Silent,
        /// Drop the TCP connection without a close frame.
        Vanish,
    }

    struct LocalServer {
        port: u16,
        release: mpsc::Sender<()>,
        handle: JoinHandle<()>,
    }

    impl LocalServer {
        fn start(mode: ServerMode) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let (release, hold) = mpsc::channel::<()>();
            let handle = std::thread::spawn(move || {
                let (stream, _) = listener.accept().unwrap();
                let mut ws = tungstenite::accept(stream).unwrap();
                let setup = ws.read().unwrap();
                assert!(setup.to_text().unwrap().contains("\"setup\""));
                ws.send(Message::text(r#"{"setupComplete":{}}"#)).unwrap();
                if let ServerMode::Silent = mode {
                    let _ = hold.recv();
                }
                drop(ws);
            });
            Self {
                port,
                release,
                handle,
            }
        }

        fn config(&self, close_timeout: Duration) -> LiveConfig {
            LiveConfig {
                endpoint: format!("ws://127.0.0.1:{}/", self.port),
                api_key: Some("test-key".into()),
                close_timeout,
                ..LiveConfig::default()
            }
        }

        fn finish(self) {
            let _ = self.release.send(());
            self.handle.join().unwrap();
        }
    }

    fn connect(
        server: &LocalServer,
        close_timeout: Duration,
    ) -> (Box<dyn Transport>, crossbeam_channel::Receiver<SessionEnvelope>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let transport = GeminiLiveConnector
            .connect(&server.config(close_timeout), EventSender::new(7, tx))
            .unwrap();
        let opened = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(opened.event, SessionEvent::Opened);
        (transport, rx)
    }

    /// Collect events until the I/O thread drops its sender.
    fn remaining_events(rx: &crossbeam_channel::Receiver<SessionEnvelope>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            match rx.recv_timeout(WAIT) {
                Ok(envelope) => events.push(envelope.event),
                Err(RecvTimeoutError::Disconnected) => return events,
                Err(RecvTimeoutError::Timeout) => panic!("I/O thread still running after {events:?}"),
            }
        }
    }

    #[test]
    fn dropping_the_transport_releases_the_socket() {
        let server = LocalServer::start(ServerMode::Silent);
        let (transport, rx) = connect(&server, Duration::from_secs(30));

        drop(transport);

        assert_eq!(
            remaining_events(&rx),
            vec![SessionEvent::Closed { reason: None }]
        );
        server.finish();
    }

    #[test]
    fn unanswered_close_times_out_once() {
        let server = LocalServer::start(ServerMode::Silent);
        let (mut transport, rx) = connect(&server, Duration::from_millis(200));

        transport.close();

        assert_eq!(
            remaining_events(&rx),
            vec![SessionEvent::Closed {
                reason: Some(CLOSE_TIMED_OUT.into())
            }]
        );
        drop(transport);
        server.finish();
    }

    #[test]
    fn vanished_server_reports_one_transport_error() {
        let server = LocalServer::start(ServerMode::Vanish);
        let (transport, rx) = connect(&server, Duration::from_secs(30));

        let events = remaining_events(&rx);
        assert_eq!(events.len(), 1, "{events:?}");
        assert!(matches!(events[0], SessionEvent::TransportError(_)));
        drop(transport);
        server.finish();
    }
}
