//! Voice session controller
//!
//! Wires user intent (talk, stop, navigate away, reset, quit) to the capture
//! pipeline, the live transport and the playback scheduler. All session
//! state is mutated from the task that drives [`SessionController::step`];
//! devices and the network report back over channels.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::backend::Backend;
use crate::config::Config;
use crate::transport::{Connector, Inbound, InitStage, SessionEvent, TransportSession};
use crate::voice::{
    AudioFrame, CapturePipeline, Microphone, OutputDevice, PlaybackScheduler, SourceId,
};
use crate::{Error, Result};

const STATUS_INITIALIZING: &str = "Initializing...";
const STATUS_LOADING_CONFIG: &str = "Loading configuration...";
const STATUS_FETCHING_TOKEN: &str = "Fetching access token...";
const STATUS_CONNECTING: &str = "Token received. Connecting...";
const STATUS_OPENED: &str = "Session open!";
const STATUS_READY: &str = "Ready! Tap to talk";
const STATUS_REQUESTING_MIC: &str = "Requesting microphone permission...";
const STATUS_LISTENING: &str = "Listening...";
const STATUS_STOPPING: &str = "Stopping recording...";
const STATUS_IDLE_PROMPT: &str = "Tap to talk";

/// Buffered UI events per subscriber
const UI_CHANNEL_CAPACITY: usize = 256;

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing started yet
    Idle,
    /// Fetching config, credential, or waiting for the open acknowledgement
    Initializing,
    /// Session open, microphone idle
    Ready,
    /// Session open, microphone streaming
    Recording,
    /// Tearing down
    Closing,
    /// Torn down for good
    Closed,
    /// The session failed; recover with [`SessionController::reinitialize`]
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Recording => "recording",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Event for the user-facing surface
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Human-readable status line
    Status(String),
    /// Human-readable error
    Error(String),
    /// A model audio segment was scheduled (duration in seconds)
    AudioReceived(f64),
    /// The assistant started or stopped speaking
    Speaking(bool),
    /// The controller changed state
    State(SessionState),
}

/// What woke the controller
enum Wake {
    Frame(AudioFrame),
    Session(SessionEvent),
    Ended(SourceId),
}

/// Drives one voice session
pub struct SessionController {
    transport: TransportSession,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    state: SessionState,
    speaking: bool,
    session_id: Option<Uuid>,
    ui: broadcast::Sender<UiEvent>,
}

impl SessionController {
    /// Create an idle controller
    #[must_use]
    pub fn new(
        config: &Config,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn Connector>,
        microphone: Box<dyn Microphone>,
        output: Box<dyn OutputDevice>,
    ) -> Self {
        let (ui, _) = broadcast::channel(UI_CHANNEL_CAPACITY);

        Self {
            transport: TransportSession::new(backend, connector),
            capture: CapturePipeline::with_block_size(
                microphone,
                config.audio.capture_request(),
                config.audio.block_size,
            ),
            playback: PlaybackScheduler::new(
                output,
                config.audio.output_sample_rate,
                config.audio.output_channels,
            ),
            state: SessionState::Idle,
            speaking: false,
            session_id: None,
            ui,
        }
    }

    /// Subscribe to UI events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.ui.subscribe()
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether model audio is scheduled or playing
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Identifier of the current session, used in logs
    #[must_use]
    pub const fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Open a live session and wait until it is ready for audio
    ///
    /// A session that is already running is torn down first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` after [`SessionController::close`], the
    /// fetch or connect error that stopped initialization, or
    /// `Error::Connect` if the connection ends before it is acknowledged.
    /// On failure the controller is left in [`SessionState::Error`].
    pub async fn initialize(&mut self) -> Result<()> {
        if matches!(self.state, SessionState::Closed | SessionState::Closing) {
            return Err(Error::Closed);
        }
        if self.state != SessionState::Idle {
            self.teardown();
        }

        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.set_state(SessionState::Initializing);
        self.status(STATUS_INITIALIZING);
        tracing::info!(%session_id, "initializing voice session");

        let ui = self.ui.clone();
        let progress = move |stage: InitStage| {
            let text = match stage {
                InitStage::FetchingConfig => STATUS_LOADING_CONFIG,
                InitStage::FetchingCredential => STATUS_FETCHING_TOKEN,
                InitStage::Connecting => STATUS_CONNECTING,
            };
            let _ = ui.send(UiEvent::Status(text.to_string()));
        };

        if let Err(e) = self.transport.initialize(progress).await {
            tracing::error!(%session_id, error = %e, "session initialization failed");
            self.error(e.to_string());
            self.set_state(SessionState::Error);
            return Err(e);
        }

        while self.state == SessionState::Initializing {
            if !self.step().await {
                break;
            }
        }

        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Closed | SessionState::Closing => Err(Error::Closed),
            _ => Err(Error::Connect(
                "connection ended before the session opened".to_string(),
            )),
        }
    }

    /// Start streaming the microphone
    ///
    /// # Errors
    ///
    /// Returns `Error::CaptureActive` while already recording,
    /// `Error::NotConnected` unless the session is ready, `Error::Closed`
    /// after close, or the capture error (the controller stays ready)
    pub fn start_recording(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Recording => return Err(Error::CaptureActive),
            SessionState::Closed | SessionState::Closing => return Err(Error::Closed),
            _ => return Err(Error::NotConnected),
        }

        self.status(STATUS_REQUESTING_MIC);
        if let Err(e) = self.capture.start() {
            tracing::warn!(error = %e, "microphone unavailable");
            self.recoverable_error(e.to_string());
            return Err(e);
        }

        self.set_state(SessionState::Recording);
        self.status(STATUS_LISTENING);
        Ok(())
    }

    /// Stop streaming the microphone; a no-op unless recording
    pub fn stop_recording(&mut self) {
        if self.state != SessionState::Recording {
            return;
        }

        self.status(STATUS_STOPPING);
        self.capture.stop();
        self.set_state(SessionState::Ready);
        self.status(STATUS_IDLE_PROMPT);
    }

    /// Start or stop recording
    ///
    /// # Errors
    ///
    /// Same as [`SessionController::start_recording`]
    pub fn toggle_recording(&mut self) -> Result<()> {
        if self.state == SessionState::Recording {
            self.stop_recording();
            Ok(())
        } else {
            self.start_recording()
        }
    }

    /// The user left the voice page; stops recording but keeps the session
    pub fn navigate_away(&mut self) {
        self.stop_recording();
    }

    /// Tear the session down and open a fresh one
    ///
    /// # Errors
    ///
    /// Same as [`SessionController::initialize`]
    pub async fn reinitialize(&mut self) -> Result<()> {
        if matches!(self.state, SessionState::Closed | SessionState::Closing) {
            return Err(Error::Closed);
        }
        tracing::info!("reinitializing voice session");
        self.teardown();
        self.set_state(SessionState::Idle);
        self.initialize().await
    }

    /// Release every resource; the controller cannot be reused
    pub fn close(&mut self) {
        if matches!(self.state, SessionState::Closed | SessionState::Closing) {
            return;
        }

        self.set_state(SessionState::Closing);
        self.capture.stop();
        self.transport.close();
        self.playback.shutdown();
        self.update_speaking();
        self.set_state(SessionState::Closed);
        tracing::info!(session_id = ?self.session_id, "voice session closed");
    }

    /// Wait for one capture frame, session event or playback completion and
    /// apply it
    ///
    /// Returns `false` once there is nothing left to drive. Cancel safe.
    pub async fn step(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }

        let wake = tokio::select! {
            Some(frame) = self.capture.next_frame() => Wake::Frame(frame),
            Some(event) = self.transport.next_event() => Wake::Session(event),
            Some(id) = self.playback.next_ended() => Wake::Ended(id),
            else => return false,
        };

        match wake {
            Wake::Frame(frame) => self.on_frame(&frame),
            Wake::Session(event) => self.on_session_event(event),
            Wake::Ended(id) => self.on_source_ended(id),
        }
        true
    }

    fn on_frame(&mut self, frame: &AudioFrame) {
        if self.state != SessionState::Recording {
            return;
        }

        if let Err(e) = self.transport.send(frame) {
            tracing::warn!(error = %e, "failed to send audio frame, stopping capture");
            self.capture.stop();
            self.set_state(SessionState::Ready);
            self.recoverable_error(e.to_string());
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Opened => {
                if self.state == SessionState::Initializing {
                    tracing::info!(session_id = ?self.session_id, "voice session ready");
                    self.status(STATUS_OPENED);
                    self.set_state(SessionState::Ready);
                    self.status(STATUS_READY);
                }
            }
            SessionEvent::Message(msg) => {
                for signal in msg.into_signals() {
                    self.on_inbound(signal);
                }
                self.update_speaking();
            }
            SessionEvent::Error(reason) => {
                tracing::error!(session_id = ?self.session_id, %reason, "live session error");
                self.fail(format!("Session error: {reason}"));
            }
            SessionEvent::Closed(reason) => {
                tracing::info!(session_id = ?self.session_id, reason = ?reason, "live session closed");
                let text = reason.map_or_else(
                    || "Session closed".to_string(),
                    |reason| format!("Session closed: {reason}"),
                );
                self.fail(text);
            }
        }
    }

    fn on_inbound(&mut self, signal: Inbound) {
        match signal {
            Inbound::Audio(payload) => match self.playback.enqueue(&payload) {
                Ok(segment) => self.emit(UiEvent::AudioReceived(segment.duration)),
                Err(e) => tracing::warn!(error = %e, "dropping malformed audio payload"),
            },
            Inbound::Interrupted => {
                let stopped = self.playback.interrupt();
                tracing::debug!(stopped, "assistant interrupted");
            }
            Inbound::TurnComplete => tracing::debug!("model turn complete"),
            Inbound::GoAway(time_left) => {
                tracing::warn!(time_left = ?time_left, "live endpoint is ending the session");
            }
        }
    }

    fn on_source_ended(&mut self, id: SourceId) {
        self.playback.finish(id);
        self.update_speaking();
    }

    /// Report an error the open session survives, then prompt again
    fn recoverable_error(&mut self, message: String) {
        self.error(message);
        self.status(STATUS_IDLE_PROMPT);
    }

    /// Transport failure: release capture and playback, enter the error state
    fn fail(&mut self, message: String) {
        if matches!(self.state, SessionState::Closed | SessionState::Closing) {
            return;
        }

        self.capture.stop();
        self.playback.interrupt();
        self.update_speaking();
        self.set_state(SessionState::Error);
        self.error(message);
    }

    fn teardown(&mut self) {
        self.capture.stop();
        self.transport.close();
        self.playback.interrupt();
        self.update_speaking();
    }

    fn update_speaking(&mut self) {
        let speaking = self.playback.is_playing();
        if speaking != self.speaking {
            self.speaking = speaking;
            self.emit(UiEvent::Speaking(speaking));
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "session state changed");
        self.state = state;
        self.emit(UiEvent::State(state));
    }

    fn status(&self, text: &str) {
        self.emit(UiEvent::Status(text.to_string()));
    }

    fn error(&self, text: String) {
        self.emit(UiEvent::Error(text));
    }

    fn emit(&self, event: UiEvent) {
        // No subscribers is fine
        let _ = self.ui.send(event);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}
