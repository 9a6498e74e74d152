//! Full-mesh meeting client.
//!
//! A [`MeshClient`] owns every piece of client state and is driven by a
//! single queue of [`ClientEvent`]s: transport changes, server packets,
//! reports from negotiated connections and local commands. Handlers run to
//! completion in arrival order.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use crate::{
    error::MeshError,
    normalize_name,
    signal::packets::{PacketC2S, PacketS2C, ParticipantInfo},
    SessionId,
};

pub mod event;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod reconnect;
pub mod roster;
pub mod status;
pub mod transport;

pub use event::{ClientEvent, Command, ConnectionState, EventSender, LinkId, PeerEvent, TransportEvent};
pub use media::{CaptureDevice, LocalMedia};
pub use mesh::{LinkNotice, LinkRole, LinkState, PeerLink, PeerMesh};
pub use peer::{Connector, NegotiatedConnection, WebRtcConnector};
pub use roster::{MuteState, RosterEntry, RosterView};
pub use status::{Notice, Status};
pub use transport::{Transport, WsTransport};

use self::{event::EventReceiver, reconnect::ReconnectCoordinator, roster::Roster};

/// Name shown for a departing participant we never learned the name of
const UNKNOWN_PARTICIPANT: &str = "Participant";

/// What the client joins and under which name
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub room_id: String,
    pub display_name: String,
}

impl ClientConfig {
    pub fn new(room_id: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            room_id: room_id.into(),
            display_name: normalize_name(display_name),
        }
    }
}

pub struct MeshClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    capture: Arc<dyn CaptureDevice>,
    mesh: PeerMesh,
    roster: Roster,
    status: Status,
    reconnect: ReconnectCoordinator,
    session_id: Option<SessionId>,
    microphone_control: bool,
    left: bool,
    events_tx: EventSender,
    events_rx: EventReceiver,
    roster_tx: watch::Sender<RosterView>,
    status_tx: watch::Sender<Status>,
}

impl MeshClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        connector: Arc<dyn Connector>,
        capture: Arc<dyn CaptureDevice>,
    ) -> Self {
        let (events_tx, events_rx) = event::channel();
        let (roster_tx, _) = watch::channel(RosterView::default());
        let (status_tx, _) = watch::channel(Status::default());
        let mesh = PeerMesh::new(connector, transport.clone(), events_tx.clone());

        Self {
            config,
            transport,
            capture,
            mesh,
            roster: Roster::default(),
            status: Status::default(),
            reconnect: ReconnectCoordinator::default(),
            session_id: None,
            microphone_control: true,
            left: false,
            events_tx,
            events_rx,
            roster_tx,
            status_tx,
        }
    }

    /// Handle for feeding commands into the client's queue
    pub fn events(&self) -> EventSender {
        self.events_tx.clone()
    }

    pub fn roster(&self) -> watch::Receiver<RosterView> {
        self.roster_tx.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    pub fn mesh(&self) -> &PeerMesh {
        &self.mesh
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn microphone_enabled(&self) -> bool {
        self.mesh.media().is_some_and(LocalMedia::is_enabled)
    }

    /// False once the microphone could not be acquired
    pub fn can_toggle_microphone(&self) -> bool {
        self.microphone_control
    }

    pub fn has_left(&self) -> bool {
        self.left
    }

    /// Acquire the microphone, connect and join the room.
    ///
    /// Without a microphone nothing is connected and the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        let media = match self.capture.acquire().await {
            Ok(media) => media,
            Err(e) => {
                error!("Unable to access the microphone: {e}");
                self.microphone_control = false;
                self.set_base(Notice::MicrophoneDenied);
                return Err(MeshError::CaptureUnavailable(e.to_string()).into());
            }
        };
        self.mesh.set_media(media);
        self.set_base(Notice::AloneInRoom);
        self.publish_roster();

        self.transport.connect(self.events_tx.clone()).await?;
        self.join().await
    }

    async fn join(&self) -> Result<()> {
        info!(
            "Joining room {} as {}",
            self.config.room_id, self.config.display_name
        );
        self.transport
            .send(PacketC2S::JoinRoom {
                room_id: Some(self.config.room_id.clone()),
                name: Some(self.config.display_name.clone()),
            })
            .await
    }

    /// Process events until the client leaves
    pub async fn run(&mut self) {
        while !self.left {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle(event).await;
        }
    }

    /// Process every event already queued. Returns how many were handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while !self.left {
            let Ok(event) = self.events_rx.try_recv() else {
                break;
            };
            self.handle(event).await;
            handled += 1;
        }
        handled
    }

    pub async fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Server(packet) => self.on_packet(packet).await,
            ClientEvent::Peer {
                remote,
                link,
                event,
            } => match self.mesh.handle_peer_event(&remote, link, event).await {
                Some(LinkNotice::Mute(state)) => {
                    self.roster.set_mute(&remote, state);
                    self.publish_roster();
                }
                Some(LinkNotice::ConnectionLost) => self.flash(Notice::PeerConnectionLost),
                None => {}
            },
            ClientEvent::Transport(event) => {
                let reaction = self
                    .reconnect
                    .on_transport(&event, self.mesh.media().is_some());
                if let Some(notice) = reaction.status {
                    self.set_base(notice);
                }
                if reaction.rejoin {
                    if let Err(e) = self.join().await {
                        warn!("Unable to rejoin: {e}");
                    }
                }
            }
            ClientEvent::Command(Command::ToggleMicrophone) => {
                self.toggle_microphone();
            }
            ClientEvent::Command(Command::Leave) => self.leave().await,
        }
    }

    async fn on_packet(&mut self, packet: PacketS2C) {
        match packet {
            PacketS2C::Init { id, participants } => self.on_init(id, participants).await,
            PacketS2C::UserJoined { id, name } => {
                if self.session_id.as_deref() == Some(id.as_str()) {
                    return;
                }
                let name = normalize_name(Some(&name));
                self.roster.insert(&id, &name);
                self.mesh.initiate(&id).await;
                self.publish_roster();
                self.flash(Notice::Joined(name));
            }
            PacketS2C::UserLeft { id } => {
                let name = self
                    .roster
                    .remove(&id)
                    .unwrap_or_else(|| UNKNOWN_PARTICIPANT.to_owned());
                self.mesh.close(&id).await;
                self.publish_roster();
                self.flash(Notice::Left(name));
            }
            PacketS2C::Signal {
                from,
                description,
                candidate,
            } => self.mesh.handle_signal(&from, description, candidate).await,
        }
    }

    /// Start over from a fresh snapshot: every previous link is discarded and
    /// a responder link is prepared for each participant already present
    async fn on_init(&mut self, id: SessionId, participants: Vec<ParticipantInfo>) {
        if self.reconnect.on_init() {
            info!("Rebuilding the mesh as {id}");
        }
        self.mesh.close_all().await;
        self.roster.reset();
        self.roster.insert(&id, &self.config.display_name);

        let mut others = 0;
        for participant in participants {
            if participant.id == id {
                continue;
            }
            self.roster
                .insert(&participant.id, &normalize_name(Some(&participant.name)));
            self.mesh.prepare_responder(&participant.id).await;
            others += 1;
        }
        self.session_id = Some(id);

        self.publish_roster();
        self.set_base(if others > 0 {
            Notice::SettingUpAudio
        } else {
            Notice::AloneInRoom
        });
    }

    /// Flip the microphone. Returns the new state, or `None` without media.
    pub fn toggle_microphone(&mut self) -> Option<bool> {
        let media = self.mesh.media()?;
        let enabled = !media.is_enabled();
        media.set_enabled(enabled);
        debug!("Microphone {}", if enabled { "on" } else { "off" });
        self.publish_roster();
        Some(enabled)
    }

    /// Close every link, the transport and the microphone
    pub async fn leave(&mut self) {
        if self.left {
            return;
        }
        info!("Leaving room {}", self.config.room_id);
        self.left = true;
        self.mesh.close_all().await;
        self.transport.close().await;
        if self.mesh.media().is_some() {
            self.capture.release().await;
        }
    }

    fn publish_roster(&self) {
        let view = self
            .roster
            .view(self.session_id.as_deref(), self.microphone_enabled());
        self.roster_tx.send_replace(view);
    }

    fn set_base(&mut self, notice: Notice) {
        self.status.set_base(notice);
        self.status_tx.send_replace(self.status.clone());
    }

    fn flash(&mut self, notice: Notice) {
        self.status.flash(notice);
        self.status_tx.send_replace(self.status.clone());
    }
}
