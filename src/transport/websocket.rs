//! WebSocket connection to the Gemini Live endpoint

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};
use url::Url;

use super::protocol::ServerMessage;
use super::{ConnectRequest, Connector, EventSink, Link, SessionEvent};
use crate::backend::Credential;
use crate::{Error, Result};

/// Opens live sessions over WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
}

impl WebSocketConnector {
    /// Create a connector for the endpoint base URL
    /// (e.g. `wss://generativelanguage.googleapis.com/ws`)
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Full connection URL for the given API version
    ///
    /// The URL embeds the access token; never log it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` if the endpoint is not a valid URL
    pub fn live_url(&self, api_version: &str, credential: &Credential) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/google.ai.generativelanguage.{api_version}.GenerativeService.BidiGenerateContent",
            self.endpoint
        ))
        .map_err(|e| Error::Connect(format!("invalid live endpoint: {e}")))?;

        url.query_pairs_mut()
            .append_pair("key", credential.token.expose_secret());
        Ok(url)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        request: ConnectRequest<'_>,
        events: EventSink,
    ) -> Result<Box<dyn Link>> {
        let url = self.live_url(&request.config.api_version, request.credential)?;
        tracing::debug!(endpoint = %self.endpoint, "connecting to live endpoint");

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");

        Ok(Box::new(WebSocketLink::spawn(stream, events)))
    }
}

/// Commands for the writer task
enum Outbound {
    Text(String),
    Close,
}

/// An open WebSocket connection
///
/// Reading and writing run on their own tasks; inbound traffic is reported
/// through the session's [`EventSink`].
pub struct WebSocketLink {
    tx: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl WebSocketLink {
    /// Start the reader and writer tasks for an established stream
    pub fn spawn<S>(stream: WebSocketStream<S>, events: EventSink) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, rx));
        let reader = tokio::spawn(read_loop(source, events));

        Self {
            tx,
            reader,
            closed: false,
        }
    }
}

impl Link for WebSocketLink {
    fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(Error::SendFailed("connection closed".to_string()));
        }
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| Error::SendFailed("connection writer stopped".to_string()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Writer may already be gone after a network failure
        let _ = self.tx.send(Outbound::Close);
        self.reader.abort();
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "websocket write failed");
                    break;
                }
            }
            Outbound::Close => {
                if let Err(e) = sink.close().await {
                    tracing::debug!(error = %e, "websocket close failed");
                }
                break;
            }
        }
    }
}

async fn read_loop<S>(mut source: SplitStream<WebSocketStream<S>>, events: EventSink)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    while let Some(item) = source.next().await {
        let parsed = match item {
            Ok(Message::Text(text)) => serde_json::from_str::<ServerMessage>(&text),
            Ok(Message::Binary(bytes)) => serde_json::from_slice::<ServerMessage>(&bytes),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|reason| !reason.is_empty());
                tracing::info!(reason = ?reason, "live endpoint closed the connection");
                events.emit(SessionEvent::Closed(reason));
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(error = %e, "live connection error");
                events.emit(SessionEvent::Error(e.to_string()));
                return;
            }
        };

        match parsed {
            Ok(msg) => {
                if !events.emit(SessionEvent::Message(msg)) {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "ignoring unparseable live message"),
        }
    }

    events.emit(SessionEvent::Closed(None));
}
