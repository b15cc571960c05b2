use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

/// One live connection to the control bridge. The closed signal stays `None`
/// until the transport dies and then carries the reason exactly once.
#[async_trait]
pub trait ControlSession: Send + Sync {
    async fn send_frame(&self, frame: &[u8]) -> Result<()>;
    async fn close(&self);
    fn closed_signal(&self) -> watch::Receiver<Option<String>>;
}

#[async_trait]
pub trait ControlConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn ControlSession>>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WsControlConnector;

#[async_trait]
impl ControlConnector for WsControlConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn ControlSession>> {
        Url::parse(url).with_context(|| format!("invalid control url: {url}"))?;
        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        let (writer, mut reader) = ws_stream.split();

        let (closed_tx, closed_rx) = watch::channel(None);
        let read_pump = tokio::spawn(async move {
            let reason = loop {
                match reader.next().await {
                    Some(Ok(Message::Close(_))) => break "closed by peer".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break format!("websocket receive failed: {err}"),
                    None => break "websocket stream ended".to_string(),
                }
            };
            closed_tx.send_replace(Some(reason));
        });

        Ok(Arc::new(WsControlSession {
            writer: Mutex::new(writer),
            closed_rx,
            read_pump,
        }))
    }
}

struct WsControlSession {
    writer: Mutex<WsSink>,
    closed_rx: watch::Receiver<Option<String>>,
    read_pump: JoinHandle<()>,
}

#[async_trait]
impl ControlSession for WsControlSession {
    async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        self.writer
            .lock()
            .await
            .send(Message::Binary(frame.to_vec()))
            .await
            .context("websocket send failed")
    }

    async fn close(&self) {
        self.read_pump.abort();
        if let Err(err) = self.writer.lock().await.send(Message::Close(None)).await {
            debug!(error = %err, "close frame not delivered");
        }
    }

    fn closed_signal(&self) -> watch::Receiver<Option<String>> {
        self.closed_rx.clone()
    }
}

impl Drop for WsControlSession {
    fn drop(&mut self) {
        self.read_pump.abort();
    }
}
