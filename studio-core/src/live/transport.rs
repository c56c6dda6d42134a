//! Transport seam between the session controller and the provider connection.
//!
//! A [`Connector`] opens a connection and returns immediately; handshake
//! progress, inbound messages and the close are reported back as
//! [`SessionEvent`](super::SessionEvent)s through the [`EventSender`].

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::{EventSender, LiveConfig};
use crate::buffering::chunk::EncodedFrame;
use crate::error::{Result, StudioError};

/// What happened to a frame handed to [`Transport::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queued after discarding the oldest pending frame.
    DroppedOldest,
}

/// An open (or opening) provider connection owned by one session.
///
/// Dropping the transport abandons any queued frames and tears the
/// connection down.
pub trait Transport: Send {
    /// Queue a frame for delivery. Never blocks.
    fn send(&mut self, frame: EncodedFrame) -> Result<SendOutcome>;

    /// Ask for a close handshake. Completion arrives as `SessionEvent::Closed`.
    fn close(&mut self);
}

pub trait Connector: Send + Sync + 'static {
    /// Start connecting. Errors returned here are synchronous failures
    /// (missing credential, bad endpoint); everything later is an event.
    fn connect(&self, config: &LiveConfig, events: EventSender) -> Result<Box<dyn Transport>>;
}

/// Messages from the session to a transport's I/O thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(EncodedFrame),
    Close,
}

/// Bounded outbound queue that discards the oldest entry when full.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: Sender<Outbound>,
    // Second handle on the receiving end, used only to evict.
    evict: Receiver<Outbound>,
}

impl OutboundQueue {
    /// Returns the queue and the receiver the I/O thread drains.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Outbound>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (
            Self {
                tx,
                evict: rx.clone(),
            },
            rx,
        )
    }

    pub fn push(&self, item: Outbound) -> Result<SendOutcome> {
        let mut item = item;
        let mut outcome = SendOutcome::Queued;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return Ok(outcome),
                Err(TrySendError::Full(back)) => {
                    let _ = self.evict.try_recv();
                    outcome = SendOutcome::DroppedOldest;
                    item = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(StudioError::Transport("outbound queue closed".into()))
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// A transport that only feeds an [`OutboundQueue`]; the connection itself
/// lives on whichever thread drains the queue.
#[derive(Debug)]
pub struct QueuedTransport {
    queue: OutboundQueue,
    closing: bool,
}

impl QueuedTransport {
    pub fn new(queue: OutboundQueue) -> Self {
        Self {
            queue,
            closing: false,
        }
    }
}

impl Transport for QueuedTransport {
    fn send(&mut self, frame: EncodedFrame) -> Result<SendOutcome> {
        self.queue.push(Outbound::Frame(frame))
    }

    fn close(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;
        if let Err(e) = self.queue.push(Outbound::Close) {
            tracing::debug!("close request not delivered: {e}");
        }
    }
}
