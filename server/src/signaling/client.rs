use std::sync::Arc;

use anyhow::Result;
use callmesh::{
    signal::{dispatch, room::outbox, PacketC2S, RoomRegistry},
    SessionId,
};
use futures::{
    future::{select, Either},
    pin_mut, FutureExt, TryStreamExt,
};
use postage::stream::Stream;
use tokio_tungstenite::tungstenite::Message;

use super::sender::ReadWritePair;

/// One live signaling connection
pub struct Client {
    id: SessionId,
    registry: Arc<RoomRegistry>,
}

impl Client {
    pub fn new(id: SessionId, registry: Arc<RoomRegistry>) -> Self {
        Self { id, registry }
    }

    /// Run client lifecycle
    pub async fn run(self, stream: ReadWritePair) -> Result<()> {
        let result = self.lifecycle_listen(stream).await;

        // Whatever ended the connection, the room must forget it
        self.registry.disconnect(&self.id).await;
        info!("Session {} disconnected", self.id);

        result
    }

    /// Relay incoming packets to the registry and registry output to the socket
    async fn lifecycle_listen(&self, stream: ReadWritePair) -> Result<()> {
        let (mut read, write) = stream;
        let (tx, mut rx) = outbox();
        self.registry.register(self.id.clone(), tx).await;

        debug!("Now accepting incoming messages for {}", self.id);

        let ws_worker = async {
            while let Some(msg) = read.try_next().await? {
                match msg {
                    Message::Close(_) => break,
                    msg => match PacketC2S::from(msg) {
                        Ok(Some(packet)) => dispatch(&self.registry, &self.id, packet).await,
                        Ok(None) => {}
                        Err(e) => debug!("Dropping malformed frame from {}: {e}", self.id),
                    },
                }
            }

            anyhow::Ok(())
        }
        .fuse();

        let outbox_worker = async {
            while let Some(packet) = rx.recv().await {
                write.send(&packet).await?;
            }

            debug!("Outbox of {} closed", self.id);
            anyhow::Ok(())
        }
        .fuse();

        pin_mut!(ws_worker, outbox_worker);

        let result = match select(ws_worker, outbox_worker).await {
            Either::Left((result, _)) => result,
            Either::Right((result, _)) => result,
        };
        write.close().await;
        result
    }
}
