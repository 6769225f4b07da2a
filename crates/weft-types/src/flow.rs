//! Flow-direction marker for transported events.
//!
//! A transport adapter subscribes to the bus with a wildcard and publishes
//! everything it sees. Without a direction marker it would also republish
//! the events it just delivered from the wire, bouncing every message back
//! to its sender. Adapters therefore stamp [`Flow::Inbound`] on events they
//! re-emit locally and skip inbound-stamped events when publishing.

use serde::{Deserialize, Serialize};

/// Direction of an event relative to the local bus.
///
/// Events emitted by local code carry no flow marker (or
/// [`Flow::Outbound`]); events re-emitted by a transport adapter carry
/// [`Flow::Inbound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// The event was delivered by a transport adapter from a remote peer.
    Inbound,
    /// The event was emitted locally and is eligible for publication.
    Outbound,
}

impl Flow {
    /// Returns `true` for [`Flow::Inbound`].
    #[must_use]
    pub fn is_inbound(self) -> bool {
        matches!(self, Self::Inbound)
    }

    /// Returns `true` for [`Flow::Outbound`].
    #[must_use]
    pub fn is_outbound(self) -> bool {
        matches!(self, Self::Outbound)
    }
}
