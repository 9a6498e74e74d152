use tokio::sync::mpsc;

use crate::{
    signal::packets::{IceCandidate, PacketS2C},
    SessionId,
};

/// Process-unique id of one negotiated connection
pub type LinkId = u64;

/// Sending half of the client's event queue
pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

/// Receiving half of the client's event queue
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

/// State changes of the signaling transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Reconnected,
    ConnectError(String),
}

/// Lifecycle of a negotiated connection as reported by the connectivity layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Something a negotiated connection observed
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local connectivity candidate to trickle to the remote
    LocalCandidate(IceCandidate),
    /// Inbound media arrived
    MediaStarted { stream_id: String, muted: bool },
    MediaMuted,
    MediaUnmuted,
    MediaEnded,
    StateChanged(ConnectionState),
}

/// Requests from the local user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleMicrophone,
    Leave,
}

/// One entry of the client's single inbound queue
#[derive(Debug)]
pub enum ClientEvent {
    Transport(TransportEvent),
    Server(PacketS2C),
    Peer {
        remote: SessionId,
        link: LinkId,
        event: PeerEvent,
    },
    Command(Command),
}

/// Handle given to a negotiated connection to report back into the queue.
///
/// Every event is tagged with the remote and the link it belongs to, so
/// events from a connection that has since been replaced can be told apart.
#[derive(Clone, Debug)]
pub struct PeerEventSink {
    remote: SessionId,
    link: LinkId,
    tx: EventSender,
}

impl PeerEventSink {
    pub fn new(remote: SessionId, link: LinkId, tx: EventSender) -> Self {
        Self { remote, link, tx }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn emit(&self, event: PeerEvent) {
        let event = ClientEvent::Peer {
            remote: self.remote.clone(),
            link: self.link,
            event,
        };
        if self.tx.send(event).is_err() {
            debug!("[Link {}] Client is gone, dropping peer event", self.remote);
        }
    }
}

/// Create the client's event queue
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
