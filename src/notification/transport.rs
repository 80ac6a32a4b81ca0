//! Notification socket transport
//!
//! A connection is handed out as separate sink and stream halves so the
//! session loop can read frames and write commands concurrently.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;

use super::NotificationError;
use crate::core_types::SubjectId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// Close frame from the server; `clean` for a normal closure
    Closed { clean: bool },
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = NotificationError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<InboundFrame, NotificationError>>;

pub struct SocketConnection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens a notification socket for a subject
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self, subject: &SubjectId) -> Result<SocketConnection, NotificationError>;
}

/// WebSocket transport over `tokio-tungstenite`
#[derive(Debug, Clone)]
pub struct WsSocketTransport {
    url: String,
}

impl WsSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn url_for(&self, subject: &SubjectId) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}subjectId={}", self.url, sep, subject)
    }
}

fn inbound(message: Message) -> Option<InboundFrame> {
    match message {
        Message::Text(text) => Some(InboundFrame::Text(text)),
        Message::Close(frame) => Some(InboundFrame::Closed {
            clean: frame.is_none_or(|f| f.code == CloseCode::Normal),
        }),
        // Protocol pings are answered by tungstenite itself
        Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

#[async_trait]
impl SocketTransport for WsSocketTransport {
    async fn connect(&self, subject: &SubjectId) -> Result<SocketConnection, NotificationError> {
        let url = self.url_for(subject);
        let (socket, response) = connect_async(url.as_str())
            .await
            .map_err(|e| NotificationError::Connect(e.to_string()))?;
        debug!(url = %url, status = response.status().as_u16(), "Notification socket open");

        let (write, read) = socket.split();
        let sink = write
            .with(|text: String| {
                futures::future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(text)))
            })
            .sink_map_err(|e: tokio_tungstenite::tungstenite::Error| {
                NotificationError::Send(e.to_string())
            });
        let stream = read
            .filter_map(|message| {
                futures::future::ready(match message {
                    Ok(message) => inbound(message).map(Ok),
                    Err(e) => Some(Err(NotificationError::Transport(e.to_string()))),
                })
            })
            .boxed();

        Ok(SocketConnection {
            sink: Box::pin(sink),
            stream,
        })
    }
}
