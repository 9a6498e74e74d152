use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
};

use crate::{error::MeshError, SessionId};

/// Participant entry of a room snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: SessionId,
    pub name: String,
}

/// Packet sent from the client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PacketC2S {
    /// Enter a room under a display name
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    /// Negotiation payload addressed to another session
    Signal {
        #[serde(default)]
        target: Option<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate: Option<Value>,
    },
}

/// Packet sent from the server to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PacketS2C {
    /// Reply to a join with the caller's id and everyone already present
    Init {
        id: SessionId,
        participants: Vec<ParticipantInfo>,
    },
    /// Someone entered the room
    UserJoined { id: SessionId, name: String },
    /// Someone left the room
    UserLeft { id: SessionId },
    /// Relayed negotiation payload, untouched by the server
    Signal {
        from: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate: Option<Value>,
    },
}

impl PacketC2S {
    /// Create a packet from incoming Message
    pub fn from(message: Message) -> anyhow::Result<Option<Self>> {
        Ok(if let Message::Text(text) = message {
            debug!("Parsing {}", text);
            Some(serde_json::from_str(&text)?)
        } else {
            None
        })
    }
}

impl PacketS2C {
    /// Create a packet from incoming Message
    pub fn from(message: Message) -> anyhow::Result<Option<Self>> {
        Ok(if let Message::Text(text) = message {
            Some(serde_json::from_str(&text)?)
        } else {
            None
        })
    }
}

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Browser compliant session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    #[serde(default)]
    pub sdp: String,
}

/// Browser compliant ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn parse(value: Value) -> Result<Self, MeshError> {
        serde_json::from_value(value).map_err(|e| MeshError::MalformedDescription(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl IceCandidate {
    pub fn parse(value: Value) -> Result<Self, MeshError> {
        serde_json::from_value(value).map_err(|e| MeshError::MalformedCandidate(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = anyhow::Error;

    fn try_from(description: SessionDescription) -> anyhow::Result<Self> {
        Ok(match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
            SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp)?,
            SdpKind::Rollback => {
                return Err(MeshError::UnsupportedDescription("rollback".to_owned()).into())
            }
        })
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = MeshError;

    fn try_from(description: RTCSessionDescription) -> Result<Self, MeshError> {
        let kind = match description.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer => SdpKind::Answer,
            RTCSdpType::Pranswer => SdpKind::Pranswer,
            RTCSdpType::Rollback => SdpKind::Rollback,
            other => return Err(MeshError::UnsupportedDescription(other.to_string())),
        };

        Ok(Self {
            kind,
            sdp: description.sdp,
        })
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(candidate: RTCIceCandidateInit) -> Self {
        let RTCIceCandidateInit {
            candidate,
            sdp_mid,
            sdp_mline_index,
            username_fragment,
        } = candidate;

        Self {
            candidate,
            sdp_mid,
            sdp_mline_index,
            username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        let IceCandidate {
            candidate,
            sdp_mid,
            sdp_mline_index,
            username_fragment,
        } = candidate;

        Self {
            candidate,
            sdp_mid,
            sdp_mline_index,
            username_fragment,
        }
    }
}
