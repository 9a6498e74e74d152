use std::sync::Arc;

use anyhow::Result;
use callmesh::signal::RoomRegistry;
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::{
    handshake::server::{ErrorResponse, Request, Response},
    http::{header, StatusCode},
};
use ulid::Ulid;

use super::{client::Client, sender::Sender};

/// Launch the signaling relay
///
/// A non-empty `origins` list restricts which browser origins may open a
/// signaling socket.
pub async fn launch<A: ToSocketAddrs>(addr: A, registry: Arc<RoomRegistry>, origins: Vec<String>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Signaling listening on {}", listener.local_addr()?);

    serve(listener, registry, Arc::new(origins)).await
}

/// Accept connections on an already bound listener
pub async fn serve(listener: TcpListener, registry: Arc<RoomRegistry>, origins: Arc<Vec<String>>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(accept_connection(stream, registry.clone(), origins.clone()));
            }
            Err(e) => warn!("Failed to accept connection: {e}"),
        }
    }
}

/// Whether a handshake carrying `origin` may proceed.
/// Requests without an Origin header come from non-browser clients and pass.
fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    match origin {
        Some(origin) if !allowed.is_empty() => allowed.iter().any(|entry| entry == origin),
        _ => true,
    }
}

/// Accept a new TCP connection
async fn accept_connection(stream: TcpStream, registry: Arc<RoomRegistry>, origins: Arc<Vec<String>>) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer.to_string(),
        Err(_) => "unknown".to_owned(),
    };

    let check_origin = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|value| value.to_str().ok());
        if origin_allowed(&origins, origin) {
            return Ok(response);
        }

        let mut rejection = ErrorResponse::new(Some("Origin not allowed".to_owned()));
        *rejection.status_mut() = StatusCode::FORBIDDEN;
        Err(rejection)
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, check_origin).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!("WebSocket handshake with {peer} failed: {e}");
            return;
        }
    };

    // Prepare the connection for read / write
    let (write, read) = ws_stream.split();
    let write = Sender::new(write);

    let id = Ulid::new().to_string();
    info!("Session {id} connected from {peer}");

    if let Err(error) = Client::new(id, registry).run((read, write)).await {
        debug!("Connection ended with error: {error}");
    }
}
