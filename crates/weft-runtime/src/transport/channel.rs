//! In-process channel transport.
//!
//! The reference adapter: two linked endpoints over tokio channels
//! carrying JSON text frames, so two contexts in one process exchange
//! events exactly as two peers over a socket would, malformed-frame
//! path included. Useful on its own for tests and in-process isolation,
//! and as the template for real wire adapters.

use super::{Transport, TransportEvent};
use crate::error::TransportError;
use tokio::sync::mpsc;

/// One endpoint of an in-process transport pair.
pub struct ChannelTransport {
    to_peer: mpsc::UnboundedSender<TransportEvent>,
    inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl ChannelTransport {
    /// Creates two linked endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                to_peer: b_tx,
                inbound: Some(a_rx),
            },
            Self {
                to_peer: a_tx,
                inbound: Some(b_rx),
            },
        )
    }

    /// Sends raw text to the peer, bypassing frame encoding.
    ///
    /// Exercises the peer's parse-error path. Returns `false` when the
    /// peer is gone.
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_peer.send(TransportEvent::Frame(text.into())).is_ok()
    }

    /// Delivers a fatal failure to the peer, as a broken connection
    /// would. Returns `false` when the peer is gone.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.to_peer
            .send(TransportEvent::Fatal(message.into()))
            .is_ok()
    }

    /// Returns `true` when the peer endpoint has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.to_peer.is_closed()
    }
}

impl Transport for ChannelTransport {
    fn publish(&self, text: String) -> Result<(), TransportError> {
        self.to_peer
            .send(TransportEvent::Frame(text))
            .map_err(|_| TransportError::Closed)
    }

    fn take_inbound(&mut self) -> mpsc::UnboundedReceiver<TransportEvent> {
        match self.inbound.take() {
            Some(rx) => rx,
            None => {
                // Already taken: hand back a closed channel.
                let (_tx, rx) = mpsc::unbounded_channel();
                rx
            }
        }
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
