use super::{event::TransportEvent, status::Notice};

/// What the client should do after a transport change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reaction {
    pub status: Option<Notice>,
    /// Send `join-room` again with the original room id and name
    pub rejoin: bool,
}

/// Decides how transport loss and recovery affect the session.
///
/// Links are left alone while the transport is down; they are discarded
/// only when the `init` for the new session arrives.
#[derive(Debug, Default)]
pub struct ReconnectCoordinator {
    joined_once: bool,
    rebuilds: usize,
}

impl ReconnectCoordinator {
    pub fn joined_once(&self) -> bool {
        self.joined_once
    }

    /// Number of times the mesh was rebuilt from a fresh `init`
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    pub fn on_transport(&mut self, event: &TransportEvent, has_media: bool) -> Reaction {
        match event {
            TransportEvent::Connected => Reaction::default(),
            TransportEvent::Disconnected => Reaction {
                status: self.joined_once.then_some(Notice::ServerLost),
                rejoin: false,
            },
            TransportEvent::Reconnected => Reaction {
                status: Some(Notice::Restoring),
                rejoin: has_media,
            },
            TransportEvent::ConnectError(_) => Reaction {
                status: (!self.joined_once).then_some(Notice::ServerUnreachable),
                rejoin: false,
            },
        }
    }

    /// Record an `init`. Returns whether it replaces an earlier session.
    pub fn on_init(&mut self) -> bool {
        let rebuild = self.joined_once;
        self.joined_once = true;
        if rebuild {
            self.rebuilds += 1;
        }
        rebuild
    }
}
