//! Shared test utilities
//!
//! Fakes for every device and network seam so sessions run without audio
//! hardware or a live endpoint.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use secrecy::SecretString;
use tokio::sync::broadcast;

use aurea_voice::transport::{ConnectRequest, Connector, EventSink, Link, SessionEvent};
use aurea_voice::voice::{
    AudioSegment, CaptureRequest, Microphone, OutputDevice, SampleSink, SourceEnded, SourceId,
};
use aurea_voice::{
    Backend, Config, Credential, Error, RemoteConfig, Result, SessionController, UiEvent,
};

/// Remote configuration served by [`FakeBackend`]
#[must_use]
pub fn remote_config() -> RemoteConfig {
    RemoteConfig {
        api_version: "v1alpha".to_string(),
        model: "gemini-2.0-flash-live-001".to_string(),
        system_instruction: "You are Aurea, a friendly campus guide.".to_string(),
        voice_name: "Aoede".to_string(),
    }
}

/// Which backend call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendFailure {
    #[default]
    None,
    Config,
    Token,
}

#[derive(Default)]
pub struct FakeBackend {
    pub failure: BackendFailure,
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_config(&self) -> Result<RemoteConfig> {
        if self.failure == BackendFailure::Config {
            return Err(Error::ConfigFetch("500 Internal Server Error".to_string()));
        }
        Ok(remote_config())
    }

    async fn fetch_credential(&self) -> Result<Credential> {
        if self.failure == BackendFailure::Token {
            return Err(Error::CredentialFetch("token service down".to_string()));
        }
        Ok(Credential {
            token: SecretString::from("test-token"),
        })
    }
}

/// Everything the fake connection observed
#[derive(Default)]
pub struct Wire {
    pub sent: Vec<String>,
    pub closed: usize,
    pub sinks: Vec<EventSink>,
    pub connects: usize,
    /// Acknowledge the setup message as soon as the connection opens
    pub auto_ack: bool,
    pub fail_connect: bool,
    pub fail_send: bool,
}

impl Wire {
    /// Sink of the most recent connection
    #[must_use]
    pub fn sink(&self) -> EventSink {
        self.sinks.last().cloned().expect("no connection opened")
    }

    /// Outbound audio messages (everything except setup)
    #[must_use]
    pub fn audio_messages(&self) -> Vec<&String> {
        self.sent
            .iter()
            .filter(|m| m.contains("realtimeInput"))
            .collect()
    }
}

pub struct FakeConnector(pub Arc<Mutex<Wire>>);

pub struct FakeLink(Arc<Mutex<Wire>>);

impl Link for FakeLink {
    fn send_text(&mut self, text: String) -> Result<()> {
        let mut wire = self.0.lock().unwrap();
        if wire.fail_send && text.contains("realtimeInput") {
            return Err(Error::SendFailed("socket is closing".to_string()));
        }
        wire.sent.push(text);
        Ok(())
    }

    fn close(&mut self) {
        self.0.lock().unwrap().closed += 1;
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _request: ConnectRequest<'_>,
        events: EventSink,
    ) -> Result<Box<dyn Link>> {
        let mut wire = self.0.lock().unwrap();
        wire.connects += 1;
        if wire.fail_connect {
            return Err(Error::Connect("connection refused".to_string()));
        }
        if wire.auto_ack {
            events.emit(setup_complete());
        }
        wire.sinks.push(events);
        Ok(Box::new(FakeLink(Arc::clone(&self.0))))
    }
}

#[derive(Default)]
pub struct MicState {
    pub sink: Option<SampleSink>,
    pub acquired: usize,
    pub released: usize,
    pub deny: bool,
}

pub struct FakeMic(pub Arc<Mutex<MicState>>);

impl Microphone for FakeMic {
    fn acquire(&mut self, _request: &CaptureRequest, sink: SampleSink) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.deny {
            return Err(Error::PermissionDenied("NotAllowedError".to_string()));
        }
        state.acquired += 1;
        state.sink = Some(sink);
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.released += 1;
        state.sink = None;
    }
}

#[derive(Default)]
pub struct OutputState {
    pub now: f64,
    pub started: Vec<(SourceId, f64, f64)>,
    pub stopped: Vec<SourceId>,
    pub pending: Vec<SourceEnded>,
    pub shutdowns: usize,
}

impl OutputState {
    /// Sources currently scheduled on the fake device
    #[must_use]
    pub fn playing(&self) -> usize {
        self.pending.len()
    }

    /// Let every scheduled source finish naturally
    pub fn finish_all(&mut self) {
        for ended in self.pending.drain(..) {
            ended.notify();
        }
    }
}

pub struct FakeOutput(pub Arc<Mutex<OutputState>>);

impl OutputDevice for FakeOutput {
    fn now(&self) -> f64 {
        self.0.lock().unwrap().now
    }

    fn start_source(&mut self, segment: AudioSegment, start_at: f64, ended: SourceEnded) {
        let mut state = self.0.lock().unwrap();
        state.started.push((ended.id(), start_at, segment.duration()));
        state.pending.push(ended);
    }

    fn stop_source(&mut self, id: SourceId) {
        let mut state = self.0.lock().unwrap();
        state.stopped.push(id);
        state.pending.retain(|e| e.id() != id);
    }

    fn shutdown(&mut self) {
        self.0.lock().unwrap().shutdowns += 1;
    }
}

/// A controller wired to fakes, plus handles to inspect them
pub struct Harness {
    pub controller: SessionController,
    pub ui: broadcast::Receiver<UiEvent>,
    pub wire: Arc<Mutex<Wire>>,
    pub mic: Arc<Mutex<MicState>>,
    pub output: Arc<Mutex<OutputState>>,
}

impl Harness {
    #[must_use]
    pub fn new(failure: BackendFailure) -> Self {
        let mut config = Config::default();
        config.audio.block_size = 4;

        let wire = Arc::new(Mutex::new(Wire {
            auto_ack: true,
            ..Wire::default()
        }));
        let mic = Arc::new(Mutex::new(MicState::default()));
        let output = Arc::new(Mutex::new(OutputState::default()));

        let controller = SessionController::new(
            &config,
            Arc::new(FakeBackend { failure }),
            Arc::new(FakeConnector(Arc::clone(&wire))),
            Box::new(FakeMic(Arc::clone(&mic))),
            Box::new(FakeOutput(Arc::clone(&output))),
        );
        let ui = controller.subscribe();

        Self {
            controller,
            ui,
            wire,
            mic,
            output,
        }
    }

    /// Feed samples through the microphone callback
    pub fn speak(&self, samples: &[f32]) {
        let mut mic = self.mic.lock().unwrap();
        let sink = mic.sink.as_mut().expect("microphone not acquired");
        sink(samples);
    }

    /// Deliver an event on the current connection
    pub fn server_sends(&self, event: SessionEvent) {
        self.wire.lock().unwrap().sink().emit(event);
    }

    /// Drive the controller until no more work is immediately available
    pub async fn settle(&mut self) {
        while let Ok(true) = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            self.controller.step(),
        )
        .await
        {}
    }

    /// Every UI event published so far
    pub fn drain_ui(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.ui.try_recv() {
            events.push(event);
        }
        events
    }
}

/// The endpoint's acknowledgement of the setup message
#[must_use]
pub fn setup_complete() -> SessionEvent {
    SessionEvent::Message(serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap())
}

/// A model turn carrying one silent PCM16 segment per duration
#[must_use]
pub fn audio_message(durations: &[f64]) -> SessionEvent {
    let parts: Vec<serde_json::Value> = durations
        .iter()
        .map(|secs| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let frames = (secs * 24_000.0).round() as usize;
            serde_json::json!({
                "inlineData": {
                    "mimeType": "audio/pcm;rate=24000",
                    "data": STANDARD.encode(vec![0_u8; frames * 2]),
                }
            })
        })
        .collect();

    let value = serde_json::json!({ "serverContent": { "modelTurn": { "parts": parts } } });
    SessionEvent::Message(serde_json::from_value(value).unwrap())
}

/// The user spoke over the assistant
#[must_use]
pub fn interrupted() -> SessionEvent {
    SessionEvent::Message(serde_json::from_str(r#"{"serverContent":{"interrupted":true}}"#).unwrap())
}
