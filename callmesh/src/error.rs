use thiserror::Error;

/// An error raised while coordinating a meeting
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("microphone could not be acquired: {0}")]
    CaptureUnavailable(String),
    #[error("signaling transport is closed")]
    TransportClosed,
    #[error("session description is malformed: {0}")]
    MalformedDescription(String),
    #[error("connectivity candidate is malformed: {0}")]
    MalformedCandidate(String),
    #[error("unsupported description type `{0}`")]
    UnsupportedDescription(String),
    #[error("no local media to send")]
    NoLocalMedia,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}
