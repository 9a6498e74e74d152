use std::collections::{BTreeMap, HashMap};

use postage::{mpsc, sink::Sink};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{normalize_name, SessionId};

use super::packets::{PacketS2C, ParticipantInfo};

/// Capacity of each session's outbound queue
const OUTBOX_CAPACITY: usize = 256;

/// Sending half of a session's outbound queue
pub type Outbox = mpsc::Sender<PacketS2C>;

/// Receiving half of a session's outbound queue
pub type Inbox = mpsc::Receiver<PacketS2C>;

/// Create a bounded outbound queue for one session
pub fn outbox() -> (Outbox, Inbox) {
    mpsc::channel(OUTBOX_CAPACITY)
}

/// A live signaling connection as the registry sees it
struct Session {
    name: String,
    room_id: Option<String>,
    outbox: Outbox,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Session>,
    /// Room id to its members, in join order
    rooms: HashMap<String, Vec<SessionId>>,
}

/// Membership of every live room.
///
/// All reads and writes for a single join, relay or disconnect happen under
/// one lock acquisition, so the snapshot handed to a joiner and the
/// broadcast to the rest of the room always agree.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<Registry>,
}

impl Registry {
    fn deliver(&self, id: &str, packet: PacketS2C) -> bool {
        let Some(session) = self.sessions.get(id) else {
            return false;
        };

        match session.outbox.clone().try_send(packet) {
            Ok(()) => true,
            Err(_) => {
                warn!("Outbox of {id} is full or closed, dropping packet");
                false
            }
        }
    }

    fn broadcast_except(&self, room_id: &str, except: &str, packet: PacketS2C) {
        let Some(members) = self.rooms.get(room_id) else {
            return;
        };

        for member in members.iter().filter(|member| member.as_str() != except) {
            self.deliver(member, packet.clone());
        }
    }

    /// Take a session out of its room, dissolving the room when it empties.
    /// Returns the id of the room that was left.
    fn leave_room(&mut self, id: &str) -> Option<String> {
        let room_id = self.sessions.get_mut(id)?.room_id.take()?;

        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.retain(|member| member != id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
                info!("[Room {room_id}] Dissolved");
            }
        }

        Some(room_id)
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a newly accepted connection to the registry
    pub async fn register(&self, id: SessionId, outbox: Outbox) {
        let mut registry = self.inner.lock().await;
        debug!("Registered session {id}");
        registry.sessions.insert(
            id,
            Session {
                name: normalize_name(None),
                room_id: None,
                outbox,
            },
        );
    }

    /// Put a session into a room.
    ///
    /// Replies `init` to the caller with everyone already present and
    /// announces the caller to the rest of the room. A missing or empty room
    /// id leaves everything untouched. Returns the snapshot sent to the
    /// caller, or `None` when nothing happened.
    pub async fn join(
        &self,
        id: &str,
        room_id: Option<&str>,
        name: Option<&str>,
    ) -> Option<Vec<ParticipantInfo>> {
        let room_id = room_id.filter(|room_id| !room_id.is_empty())?;
        let mut registry = self.inner.lock().await;

        if !registry.sessions.contains_key(id) {
            warn!("Join from unknown session {id}");
            return None;
        }

        // A second join on the same connection moves the session
        if let Some(previous) = registry.leave_room(id) {
            if previous != room_id {
                registry.broadcast_except(
                    &previous,
                    id,
                    PacketS2C::UserLeft { id: id.to_owned() },
                );
            }
        }

        let name = normalize_name(name);
        if let Some(session) = registry.sessions.get_mut(id) {
            session.name = name.clone();
            session.room_id = Some(room_id.to_owned());
        }

        let participants: Vec<ParticipantInfo> = registry
            .rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|member| {
                        registry.sessions.get(member).map(|session| ParticipantInfo {
                            id: member.clone(),
                            name: session.name.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        registry
            .rooms
            .entry(room_id.to_owned())
            .or_default()
            .push(id.to_owned());

        info!(
            "[Room {room_id}] {id} joined as {name}, {} already present",
            participants.len()
        );

        registry.deliver(
            id,
            PacketS2C::Init {
                id: id.to_owned(),
                participants: participants.clone(),
            },
        );
        registry.broadcast_except(
            room_id,
            id,
            PacketS2C::UserJoined {
                id: id.to_owned(),
                name,
            },
        );

        Some(participants)
    }

    /// Forward a negotiation payload verbatim.
    ///
    /// Delivered only when the target is live and shares the sender's room.
    /// Anything else is dropped without telling the sender.
    pub async fn relay(
        &self,
        from: &str,
        target: Option<&str>,
        description: Option<Value>,
        candidate: Option<Value>,
    ) -> bool {
        let Some(target) = target else {
            return false;
        };

        let registry = self.inner.lock().await;
        let Some(room_id) = registry
            .sessions
            .get(from)
            .and_then(|session| session.room_id.as_deref())
        else {
            return false;
        };

        let same_room = registry
            .sessions
            .get(target)
            .is_some_and(|session| session.room_id.as_deref() == Some(room_id));
        if !same_room {
            debug!("[Room {room_id}] Dropping signal from {from} to {target}");
            return false;
        }

        registry.deliver(
            target,
            PacketS2C::Signal {
                from: from.to_owned(),
                description,
                candidate,
            },
        )
    }

    /// Forget a closed connection and tell its room
    pub async fn disconnect(&self, id: &str) {
        let mut registry = self.inner.lock().await;
        let room_id = registry.leave_room(id);
        registry.sessions.remove(id);

        if let Some(room_id) = room_id {
            info!("[Room {room_id}] {id} left");
            registry.broadcast_except(&room_id, id, PacketS2C::UserLeft { id: id.to_owned() });
        }
    }

    /// Members of a room in join order
    pub async fn members(&self, room_id: &str) -> Vec<ParticipantInfo> {
        let registry = self.inner.lock().await;
        registry
            .rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|member| {
                        registry.sessions.get(member).map(|session| ParticipantInfo {
                            id: member.clone(),
                            name: session.name.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Member count of every live room
    pub async fn snapshot(&self) -> BTreeMap<String, usize> {
        let registry = self.inner.lock().await;
        registry
            .rooms
            .iter()
            .map(|(id, members)| (id.clone(), members.len()))
            .collect()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.lock().await.rooms.len()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}
