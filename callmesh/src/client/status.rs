use std::fmt;

use tokio::time::{Duration, Instant};

/// How long a flashed notice covers the persistent one
pub const FLASH_DURATION: Duration = Duration::from_millis(3200);

/// User-facing status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Connecting,
    AloneInRoom,
    SettingUpAudio,
    MicrophoneDenied,
    ServerLost,
    Restoring,
    ServerUnreachable,
    PeerConnectionLost,
    Joined(String),
    Left(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Connecting => write!(f, "Connecting..."),
            Notice::AloneInRoom => write!(f, "You are in the room. Share the link to invite others."),
            Notice::SettingUpAudio => write!(f, "You are connected to the meeting. Setting up audio."),
            Notice::MicrophoneDenied => {
                write!(f, "Could not access the microphone. Check your permissions.")
            }
            Notice::ServerLost => write!(f, "Lost connection to the server. Reconnecting..."),
            Notice::Restoring => write!(f, "Reconnected. Restoring the meeting..."),
            Notice::ServerUnreachable => {
                write!(f, "Unable to reach the server. Try reloading the page.")
            }
            Notice::PeerConnectionLost => write!(f, "Lost connection to one of the participants"),
            Notice::Joined(name) => write!(f, "{name} joined the meeting"),
            Notice::Left(name) => write!(f, "{name} left the meeting"),
        }
    }
}

/// A persistent notice, optionally covered for a while by a flashed one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    base: Notice,
    flash: Option<(Notice, Instant)>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            base: Notice::Connecting,
            flash: None,
        }
    }
}

impl Status {
    pub fn base(&self) -> &Notice {
        &self.base
    }

    pub fn set_base(&mut self, notice: Notice) {
        self.base = notice;
    }

    pub fn flash(&mut self, notice: Notice) {
        self.flash = Some((notice, Instant::now() + FLASH_DURATION));
    }

    /// Notice to show at the given moment
    pub fn current_at(&self, now: Instant) -> &Notice {
        match &self.flash {
            Some((notice, until)) if now < *until => notice,
            _ => &self.base,
        }
    }

    pub fn current(&self) -> &Notice {
        self.current_at(Instant::now())
    }
}
