use std::{collections::VecDeque, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{
    error::MeshError,
    signal::packets::{PacketC2S, PacketS2C},
};

use super::event::{ClientEvent, EventSender, TransportEvent};

const BACKOFF_START: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Real-time bidirectional channel to the signaling server.
///
/// Inbound packets and connectivity changes are delivered to the client's
/// event queue. Implementations retry lost connections on their own and
/// report `Reconnected` once a new session is up.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, events: EventSender) -> Result<()>;
    async fn send(&self, packet: PacketC2S) -> Result<()>;
    async fn close(&self);
}

/// WebSocket transport with automatic reconnection
pub struct WsTransport {
    url: String,
    outgoing: Mutex<Option<mpsc::UnboundedSender<PacketC2S>>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outgoing: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, events: EventSender) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.outgoing.lock().await.replace(tx).is_some() {
            warn!("Transport to {} was already running, replacing it", self.url);
        }
        tokio::spawn(run(self.url.clone(), rx, events));
        Ok(())
    }

    async fn send(&self, packet: PacketC2S) -> Result<()> {
        match &*self.outgoing.lock().await {
            Some(tx) => tx.send(packet).map_err(|_| MeshError::TransportClosed.into()),
            None => Err(MeshError::TransportClosed.into()),
        }
    }

    async fn close(&self) {
        // Dropping the sender ends the connection task
        self.outgoing.lock().await.take();
    }
}

/// Delay before the given reconnection attempt, with up to 20% jitter
pub fn backoff(attempt: u32) -> Duration {
    let base = BACKOFF_START
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(BACKOFF_MAX);
    let jitter = rand::thread_rng().gen_range(0.0..0.2);
    base.mul_f64(1.0 - jitter)
}

fn notify(events: &EventSender, event: TransportEvent) -> bool {
    events.send(ClientEvent::Transport(event)).is_ok()
}

/// Connection task: connect, pump frames both ways, retry on loss
async fn run(url: String, mut outgoing: mpsc::UnboundedReceiver<PacketC2S>, events: EventSender) {
    let mut pending: VecDeque<PacketC2S> = VecDeque::new();
    let mut connected_once = false;
    let mut attempt = 0;

    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                attempt = 0;
                info!("Signaling connected to {url}");
                let event = if connected_once {
                    // Frames queued for the lost session mean nothing to the new one
                    if !pending.is_empty() {
                        debug!("Discarding {} frames queued while disconnected", pending.len());
                        pending.clear();
                    }
                    TransportEvent::Reconnected
                } else {
                    TransportEvent::Connected
                };
                connected_once = true;
                if !notify(&events, event) {
                    return;
                }

                let (mut write, mut read) = stream.split();
                let mut closing = false;

                let replayed = match replay(&mut write, &mut pending).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Signaling send failed: {e}");
                        false
                    }
                };

                while replayed {
                    tokio::select! {
                        packet = outgoing.recv() => match packet {
                            Some(packet) => {
                                if let Err(e) = send_packet(&mut write, &packet).await {
                                    warn!("Signaling send failed: {e}");
                                    pending.push_back(packet);
                                    break;
                                }
                            }
                            None => {
                                closing = true;
                                break;
                            }
                        },
                        message = read.next() => match message {
                            Some(Ok(message)) => match PacketS2C::from(message) {
                                Ok(Some(packet)) => {
                                    if events.send(ClientEvent::Server(packet)).is_err() {
                                        closing = true;
                                        break;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => debug!("Dropping malformed frame: {e}"),
                            },
                            Some(Err(e)) => {
                                warn!("Signaling connection error: {e}");
                                break;
                            }
                            None => break,
                        },
                    }
                }

                if closing {
                    let _ = write.close().await;
                    info!("Signaling to {url} closed");
                    return;
                }

                warn!("Signaling connection to {url} lost");
                if !notify(&events, TransportEvent::Disconnected) {
                    return;
                }
            }
            Err(e) => {
                warn!("Could not reach signaling server at {url}: {e}");
                if !connected_once && !notify(&events, TransportEvent::ConnectError(e.to_string())) {
                    return;
                }
            }
        }

        // Keep accepting frames while waiting so a close is noticed
        let delay = tokio::time::sleep(backoff(attempt));
        tokio::pin!(delay);
        attempt = attempt.saturating_add(1);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                packet = outgoing.recv() => match packet {
                    Some(packet) => pending.push_back(packet),
                    None => return,
                },
            }
        }
    }
}

/// Send queued frames in order. A frame that fails to send stays at the front.
async fn replay<S>(write: &mut S, pending: &mut VecDeque<PacketC2S>) -> Result<()>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    while let Some(packet) = pending.pop_front() {
        if let Err(e) = send_packet(write, &packet).await {
            pending.push_front(packet);
            return Err(e);
        }
    }
    Ok(())
}

async fn send_packet<S>(write: &mut S, packet: &PacketC2S) -> Result<()>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = serde_json::to_string(packet)?;
    write.send(Message::Text(text)).await?;
    Ok(())
}
