//! Session coordination for peer-to-peer audio meetings.
//!
//! The `signal` module holds the server side: the room registry and the
//! relay that forwards negotiation payloads between sessions sharing a room.
//! The `client` module holds the full-mesh controller that owns one
//! negotiated connection per remote participant.

#[macro_use]
extern crate serde;

#[macro_use]
extern crate log;

pub mod client;
pub mod config;
pub mod error;
pub mod signal;

pub use error::MeshError;

/// Ephemeral id assigned to a live signaling connection
pub type SessionId = String;

/// Name used when a participant does not provide one
pub const DEFAULT_NAME: &str = "Guest";

/// Trim a display name, falling back to [`DEFAULT_NAME`] when blank
pub fn normalize_name(name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => DEFAULT_NAME.to_owned(),
    }
}
