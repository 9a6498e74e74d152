use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors,
        media_engine::{MediaEngine, MIME_TYPE_OPUS},
        setting_engine::SettingEngine,
        APIBuilder, API,
    },
    ice::mdns::MulticastDnsMode,
    ice_transport::ice_candidate::RTCIceCandidate,
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType},
        rtp_receiver::RTCRtpReceiver,
        RTCRtpTransceiver,
    },
    track::{track_local::TrackLocal, track_remote::TrackRemote},
};

use crate::{
    signal::packets::{IceCandidate, SessionDescription},
    SessionId,
};

use super::{
    event::{ConnectionState, PeerEvent, PeerEventSink},
    media::LocalMedia,
};

/// Inbound audio that stops flowing for this long is reported as muted
const SILENCE_TIMEOUT: Duration = Duration::from_millis(1500);

/// One negotiated media connection to a single remote participant
#[async_trait]
pub trait NegotiatedConnection: Send + Sync {
    /// Generate a local offer and apply it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a description received from the remote
    async fn apply_remote(&self, description: SessionDescription) -> Result<()>;

    /// Generate a local answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self);
}

/// Factory for negotiated connections.
///
/// Everything a connection observes after creation (local candidates,
/// inbound media, state changes) is reported through the given sink.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        media: &LocalMedia,
        events: PeerEventSink,
    ) -> Result<Box<dyn NegotiatedConnection>>;
}

/// Payload of an inbound audio packet, tagged with its sender
#[derive(Debug, Clone)]
pub struct RemoteAudio {
    pub remote: SessionId,
    pub payload: Vec<u8>,
}

/// Connector backed by the `webrtc` crate
pub struct WebRtcConnector {
    configuration: RTCConfiguration,
    playback: Option<mpsc::UnboundedSender<RemoteAudio>>,
}

impl WebRtcConnector {
    pub fn new(configuration: RTCConfiguration) -> Self {
        Self {
            configuration,
            playback: None,
        }
    }

    /// Forward inbound audio payloads to a player
    pub fn with_playback(mut self, playback: mpsc::UnboundedSender<RemoteAudio>) -> Self {
        self.playback = Some(playback);
        self
    }
}

/// Build the API object for an audio-only connection
fn create_api() -> Result<API> {
    let mut m = MediaEngine::default();
    m.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            payload_type: 111,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    // Each connection needs its own interceptor registry
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut m)?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);

    Ok(APIBuilder::new()
        .with_media_engine(m)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::New,
        }
    }
}

#[async_trait]
impl Connector for WebRtcConnector {
    async fn connect(
        &self,
        media: &LocalMedia,
        events: PeerEventSink,
    ) -> Result<Box<dyn NegotiatedConnection>> {
        let api = create_api()?;
        let pc = Arc::new(api.new_peer_connection(self.configuration.clone()).await?);

        let track: Arc<dyn TrackLocal + Send + Sync> = media.track();
        let rtp_sender = pc.add_track(track).await?;

        // Incoming RTCP must be read for the interceptors to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                // End of gathering is not relayed
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => events.emit(PeerEvent::LocalCandidate(init.into())),
                    Err(e) => warn!("[Link {}] Unable to encode candidate: {e}", events.remote()),
                }
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            debug!("[Link {}] Peer connection state: {state}", events.remote());
            Box::pin(async move {
                events.emit(PeerEvent::StateChanged(state.into()));
            })
        }));

        let track_events = events;
        let playback = self.playback.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                let playback = playback.clone();
                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        debug!("[Link {}] Ignoring non-audio track {}", events.remote(), track.id());
                        return;
                    }
                    info!(
                        "[Link {}] Track {} from stream {} received",
                        events.remote(),
                        track.id(),
                        track.stream_id()
                    );
                    events.emit(PeerEvent::MediaStarted {
                        stream_id: track.stream_id(),
                        muted: false,
                    });
                    tokio::spawn(read_track(track, events, playback));
                })
            },
        ));

        Ok(Box::new(WebRtcConnection { pc }))
    }
}

/// Drain an inbound track, reporting silence as mute and read failure as end
async fn read_track(
    track: Arc<TrackRemote>,
    events: PeerEventSink,
    playback: Option<mpsc::UnboundedSender<RemoteAudio>>,
) {
    let mut muted = false;
    loop {
        match tokio::time::timeout(SILENCE_TIMEOUT, track.read_rtp()).await {
            Ok(Ok((packet, _))) => {
                if muted {
                    muted = false;
                    events.emit(PeerEvent::MediaUnmuted);
                }
                if let Some(playback) = &playback {
                    let audio = RemoteAudio {
                        remote: events.remote().to_owned(),
                        payload: packet.payload.to_vec(),
                    };
                    if playback.send(audio).is_err() {
                        debug!("[Link {}] Player is gone", events.remote());
                    }
                }
            }
            Ok(Err(e)) => {
                debug!("[Link {}] Track ended: {e}", events.remote());
                events.emit(PeerEvent::MediaEnded);
                return;
            }
            Err(_) => {
                if !muted {
                    muted = true;
                    events.emit(PeerEvent::MediaMuted);
                }
            }
        }
    }
}

/// Negotiated connection over an `RTCPeerConnection`
pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl NegotiatedConnection for WebRtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription::try_from(offer)?)
    }

    async fn apply_remote(&self, description: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(description.try_into()?).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription::try_from(answer)?)
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {e}");
        }
    }
}
