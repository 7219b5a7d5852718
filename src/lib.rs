//! Aurea Voice - Realtime voice session client
//!
//! This library provides the audio session core of the Aurea assistant:
//! - Microphone capture and PCM16 framing
//! - Live session transport (config, credential, WebSocket)
//! - Gapless playback scheduling with barge-in cancellation
//! - A session controller publishing user-facing events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Session Controller                   │
//! │   state  │  UI events  │  user intent               │
//! └───────┬──────────────────┬───────────────────┬──────┘
//!         │                  │                   │
//! ┌───────▼───────┐  ┌───────▼────────┐  ┌───────▼──────┐
//! │    Capture    │  │   Transport    │  │   Playback   │
//! │  mic → frames │  │  backend + ws  │  │  scheduler   │
//! └───────────────┘  └────────────────┘  └──────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod transport;
pub mod voice;

pub use backend::{Backend, Credential, HttpBackend, RemoteConfig};
pub use config::{AudioConfig, Config, ReconnectPolicy};
pub use controller::{SessionController, SessionState, UiEvent};
pub use error::{Error, Result};
pub use transport::{
    Connector, EventSink, Link, SessionEvent, TransportSession, WebSocketConnector,
};
