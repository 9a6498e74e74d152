//! Server side of the meeting: room membership and payload relay.

pub mod packets;
pub mod relay;
pub mod room;

pub use packets::{PacketC2S, PacketS2C, ParticipantInfo};
pub use relay::dispatch;
pub use room::RoomRegistry;
