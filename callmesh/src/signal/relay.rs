use super::{packets::PacketC2S, room::RoomRegistry};

/// Apply one client packet to the registry on behalf of a session.
///
/// The protocol carries no acknowledgements or error frames: input that
/// cannot be acted on is dropped here.
pub async fn dispatch(registry: &RoomRegistry, session_id: &str, packet: PacketC2S) {
    match packet {
        PacketC2S::JoinRoom { room_id, name } => {
            if registry
                .join(session_id, room_id.as_deref(), name.as_deref())
                .await
                .is_none()
            {
                debug!("Ignoring join-room without a room from {session_id}");
            }
        }
        PacketC2S::Signal {
            target,
            description,
            candidate,
        } => {
            registry
                .relay(session_id, target.as_deref(), description, candidate)
                .await;
        }
    }
}
