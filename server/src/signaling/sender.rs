use std::sync::Arc;

use callmesh::signal::PacketS2C;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt,
};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Sink side of the WebSocket stream behind a Mutex for distributed writing
#[derive(Clone)]
pub struct Sender {
    write: Arc<Mutex<Sink>>,
}

impl Sender {
    pub fn new(sink: Sink) -> Self {
        Sender {
            write: Arc::new(Mutex::new(sink)),
        }
    }

    /// Send a packet through the WebSocket
    pub async fn send(&self, packet: &PacketS2C) -> anyhow::Result<()> {
        debug!("S->C: {:?}", packet);
        self.write
            .lock()
            .await
            .send(Message::Text(serde_json::to_string(packet)?))
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(e) = self.write.lock().await.close().await {
            debug!("Closing WebSocket failed: {e}");
        }
    }
}

/// Pair of sink and stream
pub type ReadWritePair = (SplitStream<WebSocketStream<TcpStream>>, Sender);
