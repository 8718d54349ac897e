use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::message::SignalingMessage;

/// Duplex message channel to one viewer.
#[async_trait]
pub trait SignalChannel: Send + Sync + 'static {
    async fn send(&self, message: &SignalingMessage) -> anyhow::Result<()>;

    /// Next inbound frame. `None` once the channel is closed from either side
    /// or broke.
    async fn recv(&self) -> Option<Vec<u8>>;

    /// Idempotent.
    async fn close(&self);
}

pub struct WsChannel {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    closed: CancellationToken,
}

impl WsChannel {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl SignalChannel for WsChannel {
    async fn send(&self, message: &SignalingMessage) -> anyhow::Result<()> {
        if self.closed.is_cancelled() {
            anyhow::bail!("channel closed");
        }
        let text = message.encode()?;
        self.sink.lock().await.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => return None,
                next = stream.next() => next,
            };
            match next? {
                Ok(Message::Text(text)) => return Some(text.as_bytes().to_vec()),
                Ok(Message::Binary(data)) => return Some(data.to_vec()),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(e) => {
                    log::debug!("websocket read: {}", e);
                    return None;
                }
            }
        }
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        if let Err(e) = self.sink.lock().await.close().await {
            log::debug!("websocket close: {}", e);
        }
    }
}
