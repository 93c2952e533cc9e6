//! Websocket transport.
//!
//! One binary frame carries one encoded envelope. Each connection gets a
//! reader (frames to dispatcher) and a writer (outbox to frames); neither
//! touches session state.

use futures_util::{SinkExt, Stream, StreamExt};
use prost::Message as _;
use rookery_wire::{ClientMessage, encode_frame};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, info, warn};

use crate::ConnectionId;
use crate::dispatch::{DispatchHandle, OUTBOX_DEPTH};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dispatcher stopped")]
    DispatcherGone,
}

/// Session id named by a request path: `/game/<id>` or `/<id>`.
pub fn session_from_path(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["game", id] => Some((*id).to_string()),
        [id] if *id != "game" => Some((*id).to_string()),
        _ => None,
    }
}

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, dispatch: DispatchHandle) -> Result<(), TransportError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let dispatch = dispatch.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, dispatch).await {
                warn!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, dispatch: DispatchHandle) -> Result<(), TransportError> {
    let mut path_session = None;
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            path_session = session_from_path(request.uri().path());
            Ok(response)
        },
    )
    .await?;

    let (outbox, mut outbox_rx) = mpsc::channel(OUTBOX_DEPTH);
    let conn = dispatch.open(path_session.clone(), outbox).await?;
    info!(conn, session = ?path_session, "connection opened");

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Ends when the dispatcher drops the outbox or the peer is gone.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            if ws_tx.send(Message::binary(encode_frame(&message))).await.is_err() {
                debug!(conn, "send failed, peer gone");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let result = read_frames(conn, &mut ws_rx, &dispatch).await;

    dispatch.closed(conn).await?;
    let _ = writer.await;
    info!(conn, "connection closed");
    result
}

async fn read_frames<S>(
    conn: ConnectionId,
    frames: &mut S,
    dispatch: &DispatchHandle,
) -> Result<(), TransportError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame? {
            Message::Binary(data) => match ClientMessage::decode(&data[..]) {
                Ok(message) => dispatch.inbound(conn, message).await?,
                Err(e) => warn!(conn, error = %e, "undecodable frame dropped"),
            },
            Message::Text(_) => warn!(conn, "text frame dropped"),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_from_path() {
        assert_eq!(session_from_path("/game/abc").as_deref(), Some("abc"));
        assert_eq!(session_from_path("/abc").as_deref(), Some("abc"));
        assert_eq!(session_from_path("/game/abc/").as_deref(), Some("abc"));
        assert_eq!(session_from_path("/abc?x=1").as_deref(), Some("abc"));
        assert_eq!(session_from_path("/"), None);
        assert_eq!(session_from_path("/game"), None);
        assert_eq!(session_from_path("/a/b/c"), None);
    }
}
