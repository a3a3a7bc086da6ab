//! Channel boundary between the client and its transport.
//!
//! A [`Link`] is the client's whole view of the wire: a sender for outbound
//! envelopes, a receiver for inbound link events, and a control sender for
//! dial/close commands. The QUIC driver (feature `transport`) produces one;
//! tests wire the same shape to in-memory channels and a scripted peer.

use tally_proto::Envelope;
use tokio::sync::mpsc;

/// Channel capacity for envelope and event traffic.
pub const LINK_CHANNEL_CAPACITY: usize = 64;

/// Inbound transport events, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link is up and envelopes can flow.
    Up,
    /// An envelope arrived.
    Envelope(Envelope),
    /// The link went down. The client decides whether to redial.
    Down {
        /// Transport-supplied reason.
        reason: String,
    },
}

/// Commands from the client to the transport task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    /// Dial (or redial) the remote endpoint.
    Dial,
    /// Close the link and stop. Terminal for this transport task.
    Close,
}

/// The client's handle to its transport.
#[derive(Debug)]
pub struct Link {
    /// Outbound envelopes.
    pub to_remote: mpsc::Sender<Envelope>,
    /// Inbound events.
    pub events: mpsc::Receiver<LinkEvent>,
    /// Dial/close commands.
    pub control: mpsc::Sender<LinkCommand>,
}

impl Link {
    /// Build a link over caller-supplied channels.
    ///
    /// Used by tests and by embedders bringing their own transport.
    #[must_use]
    pub fn from_channels(
        to_remote: mpsc::Sender<Envelope>,
        events: mpsc::Receiver<LinkEvent>,
        control: mpsc::Sender<LinkCommand>,
    ) -> Self {
        Self { to_remote, events, control }
    }
}
