use std::fmt::{Display, Formatter};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::{MapMatchRequest, MapMatchResponse};

/// Transport failures on the map-match connection.
#[derive(Debug, Clone)]
pub enum StreamError {
    Connect(String),
    Transport(String),
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            StreamError::Connect(msg) => write!(f, "connection failed: {}", msg),
            StreamError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of the map-match connection. Sends are best-effort: a step
/// that cannot be written is dropped, counted, and logged, never queued.
pub struct MatchStream {
    sink: SplitSink<WsStream, Message>,
    dropped_sends: u64,
}

/// Inbound half, yielding parsed server events.
pub struct MatchMessages {
    inner: SplitStream<WsStream>,
}

/// One event from the server side of the connection.
#[derive(Debug)]
pub enum ServerEvent {
    Response(MapMatchResponse),
    /// A text frame that did not parse as a match response.
    Malformed(String),
    Closed,
}

/// Open the persistent map-match connection.
pub async fn connect(url: &str) -> Result<(MatchStream, MatchMessages), StreamError> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| StreamError::Connect(e.to_string()))?;
    let (sink, stream) = ws.split();
    Ok((
        MatchStream {
            sink,
            dropped_sends: 0,
        },
        MatchMessages { inner: stream },
    ))
}

impl MatchStream {
    /// Write one step onto the stream. Returns false when the frame was
    /// dropped (serialization failure or a transport that is no longer open).
    pub async fn send_fix(&mut self, request: &MapMatchRequest) -> bool {
        let json = match serde_json::to_string(request) {
            Ok(json) => json,
            Err(e) => {
                self.dropped_sends += 1;
                log::warn!("[stream] unserializable step {}: {}", request.k, e);
                return false;
            }
        };
        match self.sink.send(Message::Text(json)).await {
            Ok(()) => true,
            Err(e) => {
                self.dropped_sends += 1;
                log::debug!(
                    "[stream] dropped step {} ({} dropped so far): {}",
                    request.k,
                    self.dropped_sends,
                    e
                );
                false
            }
        }
    }

    /// Steps dropped on this connection so far.
    pub fn dropped_sends(&self) -> u64 {
        self.dropped_sends
    }

    /// Normal-closure teardown. Errors are ignored: the peer may already be
    /// gone.
    pub async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            log::debug!("[stream] close frame not delivered: {}", e);
        }
        let _ = self.sink.close().await;
    }
}

impl MatchMessages {
    /// Next server event; `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        while let Some(message) = self.inner.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    return Some(match serde_json::from_str::<MapMatchResponse>(&text) {
                        Ok(response) => ServerEvent::Response(response),
                        Err(e) => ServerEvent::Malformed(e.to_string()),
                    });
                }
                Ok(Message::Close(_)) => return Some(ServerEvent::Closed),
                Ok(_) => continue, // ping/pong/binary
                Err(e) => {
                    log::warn!("[stream] transport error: {}", e);
                    return Some(ServerEvent::Closed);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_error_display() {
        let connect = StreamError::Connect("refused".to_string());
        let transport = StreamError::Transport("reset".to_string());
        assert_eq!(connect.to_string(), "connection failed: refused");
        assert_eq!(transport.to_string(), "transport error: reset");
    }
}
