//! WebSocket adapter for axum sockets.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::future::{ready, Ready};
use futures_util::{SinkExt, StreamExt};

use crate::connection::Connection;
use crate::traits::{Frame, TransportError};

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(Bytes::from(text)),
            Message::Binary(data) => Frame::Binary(Bytes::from(data)),
            Message::Ping(data) => Frame::Ping(Bytes::from(data)),
            Message::Pong(data) => Frame::Pong(Bytes::from(data)),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            // Envelopes are JSON, so this only falls back for foreign payloads.
            Frame::Text(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            },
            Frame::Binary(data) => Message::Binary(data.to_vec()),
            Frame::Ping(data) => Message::Ping(data.to_vec()),
            Frame::Pong(data) => Message::Pong(data.to_vec()),
            Frame::Close => Message::Close(None),
        }
    }
}

fn to_message(frame: Frame) -> Ready<Result<Message, axum::Error>> {
    ready(Ok(Message::from(frame)))
}

/// Run `connection` over an upgraded axum socket.
///
/// axum answers pings itself; the connection only sees them for tracing.
///
/// # Errors
///
/// Returns the error that ended the connection.
pub async fn serve_websocket(
    socket: WebSocket,
    connection: Connection,
) -> Result<(), TransportError> {
    let (sink, stream) = socket.split();
    let stream = stream.map(|message| message.map(Frame::from));
    let sink = sink.with(to_message);
    connection.run(stream, sink).await
}
