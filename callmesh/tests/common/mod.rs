//! In-process doubles for the client's injected capabilities.
//!
//! `FakeTransport` talks to a real `RoomRegistry` through `dispatch`, and
//! server packets are only delivered when a test calls `flush`, so every
//! scenario runs in a fixed order.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use postage::stream::Stream;

use callmesh::{
    client::{
        event::PeerEventSink, CaptureDevice, ClientConfig, ClientEvent, Connector, EventSender,
        LocalMedia, MeshClient, NegotiatedConnection, PeerEvent, TransportEvent,
    },
    signal::{
        dispatch,
        packets::{IceCandidate, PacketC2S, SdpKind, SessionDescription},
        room::{outbox, Inbox},
        RoomRegistry,
    },
    MeshError, SessionId,
};

/// The server side shared by every fake transport of a test
#[derive(Default)]
pub struct Network {
    pub registry: RoomRegistry,
    next: AtomicU64,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(&self) -> SessionId {
        format!("s{}", self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Default)]
struct Wire {
    events: Option<EventSender>,
    session: Option<SessionId>,
    inbox: Option<Inbox>,
    sent: Vec<PacketC2S>,
}

pub struct FakeTransport {
    network: Arc<Network>,
    wire: Mutex<Wire>,
}

impl FakeTransport {
    pub fn new(network: Arc<Network>) -> Arc<Self> {
        Arc::new(Self {
            network,
            wire: Mutex::new(Wire::default()),
        })
    }

    pub fn session(&self) -> Option<SessionId> {
        self.wire.lock().unwrap().session.clone()
    }

    pub fn sent(&self) -> Vec<PacketC2S> {
        self.wire.lock().unwrap().sent.clone()
    }

    /// Descriptions sent so far as (target, kind)
    pub fn descriptions(&self) -> Vec<(SessionId, SdpKind)> {
        self.sent()
            .into_iter()
            .filter_map(|packet| match packet {
                PacketC2S::Signal {
                    target: Some(target),
                    description: Some(description),
                    ..
                } => SessionDescription::parse(description)
                    .ok()
                    .map(|description| (target, description.kind)),
                _ => None,
            })
            .collect()
    }

    /// Move every packet the server queued for this session into the client
    pub fn flush(&self) -> usize {
        let mut wire = self.wire.lock().unwrap();
        let Wire { events, inbox, .. } = &mut *wire;
        let (Some(events), Some(inbox)) = (events.as_ref(), inbox.as_mut()) else {
            return 0;
        };

        let mut delivered = 0;
        while let Ok(packet) = inbox.try_recv() {
            let _ = events.send(ClientEvent::Server(packet));
            delivered += 1;
        }
        delivered
    }

    async fn open_session(&self, event: TransportEvent) -> Result<()> {
        let id = self.network.next_id();
        let (tx, rx) = outbox();
        self.network.registry.register(id.clone(), tx).await;

        let events = {
            let mut wire = self.wire.lock().unwrap();
            wire.session = Some(id);
            wire.inbox = Some(rx);
            wire.events.clone()
        };
        events
            .ok_or_else(|| anyhow!("not connected"))?
            .send(ClientEvent::Transport(event))
            .map_err(|_| anyhow!("client is gone"))
    }

    /// Lose the server: the registry sees a disconnect, the client a
    /// `Disconnected` event
    pub async fn drop_connection(&self) {
        let (session, events) = {
            let mut wire = self.wire.lock().unwrap();
            wire.inbox = None;
            (wire.session.take(), wire.events.clone())
        };
        if let Some(session) = session {
            self.network.registry.disconnect(&session).await;
        }
        if let Some(events) = events {
            let _ = events.send(ClientEvent::Transport(TransportEvent::Disconnected));
        }
    }

    /// Come back under a new session id
    pub async fn restore(&self) {
        self.open_session(TransportEvent::Reconnected).await.unwrap();
    }
}

#[async_trait]
impl callmesh::client::Transport for FakeTransport {
    async fn connect(&self, events: EventSender) -> Result<()> {
        self.wire.lock().unwrap().events = Some(events);
        self.open_session(TransportEvent::Connected).await
    }

    async fn send(&self, packet: PacketC2S) -> Result<()> {
        let session = {
            let mut wire = self.wire.lock().unwrap();
            wire.sent.push(packet.clone());
            wire.session.clone()
        };
        let session = session.ok_or(MeshError::TransportClosed)?;
        dispatch(&self.network.registry, &session, packet).await;
        Ok(())
    }

    async fn close(&self) {
        let session = {
            let mut wire = self.wire.lock().unwrap();
            wire.events = None;
            wire.inbox = None;
            wire.session.take()
        };
        if let Some(session) = session {
            self.network.registry.disconnect(&session).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Opened,
    Offered,
    Answered,
    Applied(SdpKind),
    Candidate,
    Closed,
}

/// Everything the fake connections of one client did, in order
#[derive(Default)]
pub struct Journal(Mutex<Vec<(SessionId, u64, Action)>>);

impl Journal {
    fn record(&self, sink: &PeerEventSink, action: Action) {
        self.0
            .lock()
            .unwrap()
            .push((sink.remote().to_owned(), sink.link(), action));
    }

    pub fn count(&self, remote: &str, action: Action) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _, a)| r == remote && *a == action)
            .count()
    }

    /// Links ever opened, with whether they were closed since
    pub fn links(&self) -> Vec<(SessionId, u64, bool)> {
        let entries = self.0.lock().unwrap();
        entries
            .iter()
            .filter(|(_, _, action)| *action == Action::Opened)
            .map(|(remote, link, _)| {
                let closed = entries
                    .iter()
                    .any(|(_, l, a)| l == link && *a == Action::Closed);
                (remote.clone(), *link, closed)
            })
            .collect()
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub journal: Arc<Journal>,
    fail_next: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next connection fail every negotiation step
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _media: &LocalMedia,
        events: PeerEventSink,
    ) -> Result<Box<dyn NegotiatedConnection>> {
        self.journal.record(&events, Action::Opened);
        Ok(Box::new(FakeConnection {
            fail: self.fail_next.swap(false, Ordering::Relaxed),
            journal: self.journal.clone(),
            sink: events,
            negotiation: Mutex::default(),
        }))
    }
}

#[derive(Default)]
struct Negotiation {
    local: Option<SdpKind>,
    remote: Option<SdpKind>,
}

/// Completes negotiation as soon as both descriptions are in place and
/// reports one local candidate per description it generates
pub struct FakeConnection {
    fail: bool,
    journal: Arc<Journal>,
    sink: PeerEventSink,
    negotiation: Mutex<Negotiation>,
}

impl FakeConnection {
    fn local_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{} 1 udp 2122260223 127.0.0.1 9 typ host", self.sink.link()),
            sdp_mid: Some("0".to_owned()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    fn media_started(&self) {
        self.sink.emit(PeerEvent::MediaStarted {
            stream_id: format!("stream-{}", self.sink.remote()),
            muted: false,
        });
    }
}

#[async_trait]
impl NegotiatedConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        if self.fail {
            bail!("offer refused");
        }
        self.negotiation.lock().unwrap().local = Some(SdpKind::Offer);
        self.journal.record(&self.sink, Action::Offered);
        self.sink.emit(PeerEvent::LocalCandidate(self.local_candidate()));
        Ok(SessionDescription::offer(format!("v=0 link {}", self.sink.link())))
    }

    async fn apply_remote(&self, description: SessionDescription) -> Result<()> {
        if self.fail {
            bail!("description refused");
        }
        let complete = {
            let mut negotiation = self.negotiation.lock().unwrap();
            if description.kind == SdpKind::Answer && negotiation.local != Some(SdpKind::Offer) {
                bail!("answer without a pending offer");
            }
            negotiation.remote = Some(description.kind);
            description.kind == SdpKind::Answer
        };
        self.journal.record(&self.sink, Action::Applied(description.kind));
        if complete {
            self.media_started();
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        {
            let mut negotiation = self.negotiation.lock().unwrap();
            if self.fail || negotiation.remote != Some(SdpKind::Offer) {
                bail!("no remote offer to answer");
            }
            negotiation.local = Some(SdpKind::Answer);
        }
        self.journal.record(&self.sink, Action::Answered);
        self.sink.emit(PeerEvent::LocalCandidate(self.local_candidate()));
        self.media_started();
        Ok(SessionDescription::answer(format!("v=0 link {}", self.sink.link())))
    }

    async fn add_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        self.journal.record(&self.sink, Action::Candidate);
        Ok(())
    }

    async fn close(&self) {
        self.journal.record(&self.sink, Action::Closed);
        self.sink.emit(PeerEvent::StateChanged(
            callmesh::client::ConnectionState::Closed,
        ));
    }
}

#[derive(Default)]
pub struct FakeCapture {
    deny: bool,
    pub released: AtomicBool,
}

impl FakeCapture {
    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    async fn acquire(&self) -> Result<LocalMedia> {
        if self.deny {
            bail!("permission denied");
        }
        Ok(LocalMedia::opus("local"))
    }

    async fn release(&self) {
        self.released.store(true, Ordering::Relaxed);
    }
}

/// One simulated participant with its doubles
pub struct Participant {
    pub client: MeshClient,
    pub transport: Arc<FakeTransport>,
    pub connector: Arc<FakeConnector>,
    pub capture: Arc<FakeCapture>,
}

impl Participant {
    pub fn new(network: &Arc<Network>, room_id: &str, name: &str) -> Self {
        Self::with_capture(network, room_id, name, Arc::new(FakeCapture::default()))
    }

    pub fn with_capture(
        network: &Arc<Network>,
        room_id: &str,
        name: &str,
        capture: Arc<FakeCapture>,
    ) -> Self {
        let transport = FakeTransport::new(network.clone());
        let connector = FakeConnector::new();
        let client = MeshClient::new(
            ClientConfig::new(room_id, Some(name)),
            transport.clone(),
            connector.clone(),
            capture.clone(),
        );
        Self {
            client,
            transport,
            connector,
            capture,
        }
    }

    /// Session id assigned by the last `init`
    pub fn id(&self) -> SessionId {
        self.client
            .session_id()
            .expect("participant has not joined")
            .to_owned()
    }

    /// Deliver server packets and handle queued events until idle
    pub async fn step(&mut self) -> usize {
        self.transport.flush() + self.client.pump().await
    }
}

/// Run every participant until no packet or event is left anywhere
pub async fn settle(participants: &mut [Participant]) {
    for _ in 0..1000 {
        let mut progress = 0;
        for participant in participants.iter_mut() {
            progress += participant.step().await;
        }
        if progress == 0 {
            return;
        }
    }
    panic!("participants did not settle");
}

/// Start a participant and let the whole room settle
pub async fn join(participants: &mut Vec<Participant>, mut participant: Participant) {
    participant.client.start().await.unwrap();
    participants.push(participant);
    settle(participants).await;
}
