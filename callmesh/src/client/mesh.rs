use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use serde_json::Value;

use crate::{
    error::MeshError,
    signal::packets::{IceCandidate, PacketC2S, SdpKind, SessionDescription},
    SessionId,
};

use super::{
    event::{ConnectionState, EventSender, LinkId, PeerEvent, PeerEventSink},
    media::LocalMedia,
    peer::{Connector, NegotiatedConnection},
    roster::MuteState,
    transport::Transport,
};

static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

/// Which side sends the offer on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
}

/// Where a remote participant's inbound audio is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSurface {
    pub stream_id: String,
}

/// The local end of one connection to a remote participant
pub struct PeerLink {
    id: LinkId,
    remote: SessionId,
    role: LinkRole,
    state: LinkState,
    connection: Box<dyn NegotiatedConnection>,
    surface: Option<RenderSurface>,
}

impl PeerLink {
    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn surface(&self) -> Option<&RenderSurface> {
        self.surface.as_ref()
    }
}

/// Something a link reported that the rest of the client must react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotice {
    Mute(MuteState),
    ConnectionLost,
}

/// Table of links, one per remote participant.
///
/// Only the client's event loop touches the table, so it needs no locking.
/// Existing room members initiate toward newcomers; a newcomer sets up
/// responder links from its `init` snapshot and waits for their offers.
pub struct PeerMesh {
    connector: Arc<dyn Connector>,
    signal: Arc<dyn Transport>,
    events: EventSender,
    media: Option<LocalMedia>,
    links: HashMap<SessionId, PeerLink>,
}

impl PeerMesh {
    pub fn new(connector: Arc<dyn Connector>, signal: Arc<dyn Transport>, events: EventSender) -> Self {
        Self {
            connector,
            signal,
            events,
            media: None,
            links: HashMap::new(),
        }
    }

    /// Local audio attached to every link created from now on
    pub fn set_media(&mut self, media: LocalMedia) {
        self.media = Some(media);
    }

    pub fn media(&self) -> Option<&LocalMedia> {
        self.media.as_ref()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, remote: &str) -> bool {
        self.links.contains_key(remote)
    }

    pub fn link(&self, remote: &str) -> Option<&PeerLink> {
        self.links.get(remote)
    }

    pub fn remotes(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    async fn open(&mut self, remote: &str, role: LinkRole) -> Result<()> {
        let media = self.media.as_ref().ok_or(MeshError::NoLocalMedia)?;
        let id = NEXT_LINK.fetch_add(1, Ordering::Relaxed);
        let sink = PeerEventSink::new(remote.to_owned(), id, self.events.clone());
        let connection = self.connector.connect(media, sink).await?;

        debug!("[Link {remote}] Opened link {id} as {role:?}");
        self.links.insert(
            remote.to_owned(),
            PeerLink {
                id,
                remote: remote.to_owned(),
                role,
                state: LinkState::Connecting,
                connection,
                surface: None,
            },
        );
        Ok(())
    }

    async fn send_signal(
        &self,
        target: &str,
        description: Option<Value>,
        candidate: Option<Value>,
    ) -> Result<()> {
        self.signal
            .send(PacketC2S::Signal {
                target: Some(target.to_owned()),
                description,
                candidate,
            })
            .await
    }

    /// Open a link toward a newcomer and send it an offer.
    ///
    /// A link already present for the remote belongs to a session the
    /// server has re-announced and is replaced.
    pub async fn initiate(&mut self, remote: &str) {
        if self.close(remote).await {
            info!("[Link {remote}] Re-announced, replacing its link");
        }

        if let Err(e) = self.offer(remote).await {
            warn!("[Link {remote}] Unable to send offer: {e}");
            self.close(remote).await;
        }
    }

    async fn offer(&mut self, remote: &str) -> Result<()> {
        self.open(remote, LinkRole::Initiator).await?;
        let Some(link) = self.links.get(remote) else {
            return Ok(());
        };
        let offer = link.connection.create_offer().await?;
        self.send_signal(remote, Some(offer.to_value()), None).await
    }

    /// Open a link that waits for the remote's offer
    pub async fn prepare_responder(&mut self, remote: &str) {
        if self.links.contains_key(remote) {
            return;
        }
        if let Err(e) = self.open(remote, LinkRole::Responder).await {
            warn!("[Link {remote}] Unable to prepare link: {e}");
        }
    }

    /// Apply a relayed negotiation payload from a remote.
    ///
    /// Failures are logged and stay confined to that remote's link.
    pub async fn handle_signal(
        &mut self,
        from: &str,
        description: Option<Value>,
        candidate: Option<Value>,
    ) {
        if let Some(description) = description {
            if let Err(e) = self.apply_description(from, description).await {
                warn!("[Link {from}] Negotiation failed: {e}");
            }
        }

        if let Some(candidate) = candidate {
            if let Err(e) = self.apply_candidate(from, candidate).await {
                warn!("[Link {from}] Candidate rejected: {e}");
            }
        }
    }

    async fn apply_description(&mut self, from: &str, description: Value) -> Result<()> {
        let description = SessionDescription::parse(description)?;

        match description.kind {
            SdpKind::Offer => {
                match self.links.get(from).map(|link| (link.role, link.state)) {
                    Some((LinkRole::Initiator, LinkState::Connecting)) => {
                        warn!("[Link {from}] Ignoring offer while our own offer is pending");
                        return Ok(());
                    }
                    Some(_) => {}
                    None => self.open(from, LinkRole::Responder).await?,
                }

                let Some(link) = self.links.get(from) else {
                    return Ok(());
                };
                link.connection.apply_remote(description).await?;
                let answer = link.connection.create_answer().await?;
                self.send_signal(from, Some(answer.to_value()), None).await
            }
            SdpKind::Answer | SdpKind::Pranswer => match self.links.get(from) {
                Some(link) => link.connection.apply_remote(description).await,
                None => {
                    debug!("[Link {from}] Dropping answer without a link");
                    Ok(())
                }
            },
            SdpKind::Rollback => Err(MeshError::UnsupportedDescription("rollback".to_owned()).into()),
        }
    }

    async fn apply_candidate(&mut self, from: &str, candidate: Value) -> Result<()> {
        let candidate = IceCandidate::parse(candidate)?;
        match self.links.get(from) {
            Some(link) => link.connection.add_candidate(candidate).await,
            None => {
                debug!("[Link {from}] Dropping candidate without a link");
                Ok(())
            }
        }
    }

    /// React to something a link's connection reported.
    ///
    /// Events from a link that has since been closed or replaced are ignored.
    pub async fn handle_peer_event(
        &mut self,
        remote: &str,
        link: LinkId,
        event: PeerEvent,
    ) -> Option<LinkNotice> {
        let Some(current) = self.links.get_mut(remote) else {
            debug!("[Link {remote}] Event for a closed link: {event:?}");
            return None;
        };
        if current.id != link {
            debug!("[Link {remote}] Stale event from link {link}: {event:?}");
            return None;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.send_signal(remote, None, Some(candidate.to_value())).await {
                    debug!("[Link {remote}] Unable to relay candidate: {e}");
                }
                None
            }
            PeerEvent::MediaStarted { stream_id, muted } => {
                info!("[Link {remote}] Receiving audio");
                current.state = LinkState::Connected;
                current.surface = Some(RenderSurface { stream_id });
                Some(LinkNotice::Mute(if muted {
                    MuteState::Muted
                } else {
                    MuteState::Live
                }))
            }
            PeerEvent::MediaMuted | PeerEvent::MediaEnded => Some(LinkNotice::Mute(MuteState::Muted)),
            PeerEvent::MediaUnmuted => Some(LinkNotice::Mute(MuteState::Live)),
            PeerEvent::StateChanged(ConnectionState::Failed | ConnectionState::Disconnected) => {
                warn!("[Link {remote}] Connection lost");
                Some(LinkNotice::ConnectionLost)
            }
            PeerEvent::StateChanged(ConnectionState::Closed) => {
                debug!("[Link {remote}] Connection closed by itself");
                self.links.remove(remote);
                None
            }
            PeerEvent::StateChanged(_) => None,
        }
    }

    /// Close the link to a remote. Returns whether one existed.
    pub async fn close(&mut self, remote: &str) -> bool {
        match self.links.remove(remote) {
            Some(link) => {
                link.connection.close().await;
                debug!("[Link {remote}] Closed link {}", link.id);
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&mut self) {
        for (remote, link) in self.links.drain() {
            link.connection.close().await;
            debug!("[Link {remote}] Closed link {}", link.id);
        }
    }
}
