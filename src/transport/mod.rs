//! Live session transport
//!
//! Owns the single bidirectional connection to the live model endpoint.
//! Initialization fetches the remote configuration, then an access
//! credential, then opens the connection and sends the setup message.
//! Lifecycle notifications arrive as [`SessionEvent`]s tagged with the
//! connection generation; events from a connection that has since been
//! closed are discarded.

pub mod protocol;
mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::{Backend, Credential, RemoteConfig};
use crate::voice::AudioFrame;
use crate::{Error, Result};

pub use protocol::{ClientMessage, Inbound, ServerMessage, Setup};
pub use websocket::{WebSocketConnector, WebSocketLink};

/// Lifecycle notification from the live connection
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The endpoint acknowledged the setup message
    Opened,
    /// An inbound message
    Message(ServerMessage),
    /// The connection failed
    Error(String),
    /// The connection closed, with the peer's reason if any
    Closed(Option<String>),
}

/// Delivers events for one connection generation
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, SessionEvent)>,
}

impl EventSink {
    /// Post an event; returns `false` once the session is gone
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    /// Generation this sink belongs to
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Everything a connector needs to open the live connection
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    pub config: &'a RemoteConfig,
    pub credential: &'a Credential,
}

/// Opens live connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection; inbound traffic is reported through `events`
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` if the connection cannot be established
    async fn connect(&self, request: ConnectRequest<'_>, events: EventSink)
    -> Result<Box<dyn Link>>;
}

/// Outbound half of an open connection
pub trait Link: Send {
    /// Queue a text message
    ///
    /// # Errors
    ///
    /// Returns `Error::SendFailed` if the connection writer is gone
    fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the connection
    fn close(&mut self);
}

/// Connection lifecycle as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection
    Idle,
    /// Connection open, setup not yet acknowledged
    Connecting,
    /// Ready for audio
    Open,
    /// Connection ended or closed locally
    Closed,
}

/// Initialization progress reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    FetchingConfig,
    FetchingCredential,
    Connecting,
}

/// The live session with the remote model
pub struct TransportSession {
    backend: Arc<dyn Backend>,
    connector: Arc<dyn Connector>,
    config: Option<Arc<RemoteConfig>>,
    link: Option<Box<dyn Link>>,
    state: LinkState,
    generation: u64,
    events_tx: mpsc::UnboundedSender<(u64, SessionEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, SessionEvent)>,
}

impl TransportSession {
    /// Create an idle session
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            connector,
            config: None,
            link: None,
            state: LinkState::Idle,
            generation: 0,
            events_tx,
            events_rx,
        }
    }

    /// Fetch configuration and credential, then open the connection
    ///
    /// Any previous connection is closed first. The session is usable for
    /// audio once [`SessionEvent::Opened`] is delivered.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigFetch`, `Error::CredentialFetch` or
    /// `Error::Connect` for the step that failed. Nothing is retried.
    pub async fn initialize(
        &mut self,
        mut progress: impl FnMut(InitStage) + Send,
    ) -> Result<Arc<RemoteConfig>> {
        self.close();

        progress(InitStage::FetchingConfig);
        let config = Arc::new(self.backend.fetch_config().await?);
        tracing::debug!(
            model = %config.model,
            api_version = %config.api_version,
            voice = %config.voice_name,
            "session config received"
        );

        progress(InitStage::FetchingCredential);
        let credential = self.backend.fetch_credential().await?;

        progress(InitStage::Connecting);
        self.generation += 1;
        let sink = EventSink {
            generation: self.generation,
            tx: self.events_tx.clone(),
        };
        let request = ConnectRequest {
            config: &config,
            credential: &credential,
        };
        let mut link = self.connector.connect(request, sink).await?;

        let setup = serde_json::to_string(&ClientMessage::Setup(Setup::from_remote(&config)))?;
        if let Err(e) = link.send_text(setup) {
            link.close();
            return Err(Error::Connect(format!("failed to send setup: {e}")));
        }

        self.link = Some(link);
        self.config = Some(Arc::clone(&config));
        self.state = LinkState::Connecting;
        tracing::info!(generation = self.generation, "live connection opened");

        Ok(config)
    }

    /// Send one audio frame
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless the session is open, or
    /// `Error::SendFailed` if the connection writer is gone
    pub fn send(&mut self, frame: &AudioFrame) -> Result<()> {
        if self.state != LinkState::Open {
            return Err(Error::NotConnected);
        }
        let Some(link) = self.link.as_mut() else {
            return Err(Error::NotConnected);
        };

        let text = serde_json::to_string(&ClientMessage::audio(frame))?;
        link.send_text(text)
    }

    /// Close the connection; idempotent
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            tracing::info!(generation = self.generation, "live connection closed");
        }
        // Anything still in flight belongs to the old connection
        self.generation += 1;
        if self.state != LinkState::Idle {
            self.state = LinkState::Closed;
        }
    }

    /// Wait for the next event of the current connection
    ///
    /// Cancel safe. A setup acknowledgement is reported as
    /// [`SessionEvent::Opened`]. After an error or close the connection is
    /// released and later events from it are dropped.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let (generation, event) = self.events_rx.recv().await?;
            if generation != self.generation {
                tracing::trace!(generation, current = self.generation, "stale event dropped");
                continue;
            }

            match event {
                SessionEvent::Message(msg)
                    if self.state == LinkState::Connecting && msg.is_setup_complete() =>
                {
                    self.state = LinkState::Open;
                    return Some(SessionEvent::Opened);
                }
                SessionEvent::Opened => {
                    self.state = LinkState::Open;
                    return Some(SessionEvent::Opened);
                }
                SessionEvent::Error(_) | SessionEvent::Closed(_) => {
                    self.close();
                    return Some(event);
                }
                SessionEvent::Message(_) => return Some(event),
            }
        }
    }

    /// Current connection state
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Whether audio can be sent
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Configuration negotiated for the current session
    #[must_use]
    pub fn config(&self) -> Option<&RemoteConfig> {
        self.config.as_deref()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}
