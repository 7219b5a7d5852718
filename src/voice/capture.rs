//! Microphone capture pipeline
//!
//! Taps the microphone in fixed-size blocks and turns every block into a
//! transport-ready [`AudioFrame`].

use tokio::sync::mpsc;

use super::pcm::{AudioFrame, BLOCK_SIZE, INPUT_SAMPLE_RATE};
use crate::{Error, Result};

/// Receives raw mono samples from the device callback
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// What the pipeline asks of the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Mono sample rate the sink expects
    pub sample_rate: u32,
    /// Request acoustic echo cancellation
    pub echo_cancellation: bool,
    /// Request noise suppression
    pub noise_suppression: bool,
    /// Request automatic gain control
    pub auto_gain_control: bool,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// A microphone that can be acquired and released
pub trait Microphone {
    /// Open the device and start delivering mono samples at
    /// `request.sample_rate` to `sink`
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` or `Error::DeviceUnavailable`
    fn acquire(&mut self, request: &CaptureRequest, sink: SampleSink) -> Result<()>;

    /// Stop delivery and release the device
    fn release(&mut self);
}

/// Cuts a sample stream into fixed-size blocks and encodes them
struct BlockFramer {
    block: Vec<f32>,
    block_size: usize,
    sample_rate: u32,
    tx: mpsc::UnboundedSender<AudioFrame>,
}

impl BlockFramer {
    fn push(&mut self, mut samples: &[f32]) {
        while !samples.is_empty() {
            let take = (self.block_size - self.block.len()).min(samples.len());
            self.block.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.block.len() == self.block_size {
                let frame = AudioFrame::from_samples(&self.block, self.sample_rate);
                self.block.clear();
                if self.tx.send(frame).is_err() {
                    return;
                }
            }
        }
    }
}

/// Owns the microphone while recording and emits encoded frames
pub struct CapturePipeline {
    microphone: Box<dyn Microphone>,
    request: CaptureRequest,
    block_size: usize,
    frames_tx: mpsc::UnboundedSender<AudioFrame>,
    frames_rx: mpsc::UnboundedReceiver<AudioFrame>,
    active: bool,
}

impl CapturePipeline {
    /// Create a pipeline with the default block size
    #[must_use]
    pub fn new(microphone: Box<dyn Microphone>, request: CaptureRequest) -> Self {
        Self::with_block_size(microphone, request, BLOCK_SIZE)
    }

    /// Create a pipeline emitting `block_size` samples per frame
    #[must_use]
    pub fn with_block_size(
        microphone: Box<dyn Microphone>,
        request: CaptureRequest,
        block_size: usize,
    ) -> Self {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        Self {
            microphone,
            request,
            block_size: block_size.max(1),
            frames_tx,
            frames_rx,
            active: false,
        }
    }

    /// Acquire the microphone and start emitting frames
    ///
    /// # Errors
    ///
    /// Returns `Error::CaptureActive` if already capturing, or the device
    /// error if acquisition fails
    pub fn start(&mut self) -> Result<()> {
        if self.active {
            return Err(Error::CaptureActive);
        }

        let mut framer = BlockFramer {
            block: Vec::with_capacity(self.block_size),
            block_size: self.block_size,
            sample_rate: self.request.sample_rate,
            tx: self.frames_tx.clone(),
        };

        self.microphone
            .acquire(&self.request, Box::new(move |samples| framer.push(samples)))?;
        self.active = true;

        tracing::debug!(
            sample_rate = self.request.sample_rate,
            block_size = self.block_size,
            "audio capture started"
        );
        Ok(())
    }

    /// Release the microphone; a no-op when not capturing
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }

        self.microphone.release();
        self.active = false;

        // Frames already queued belong to the finished recording
        let mut dropped = 0_usize;
        while self.frames_rx.try_recv().is_ok() {
            dropped += 1;
        }
        tracing::debug!(dropped, "audio capture stopped");
    }

    /// Wait for the next encoded frame
    ///
    /// Cancel safe.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.frames_rx.recv().await
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.active
    }

    /// Sample rate declared on every frame
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.request.sample_rate
    }

    /// Samples per emitted frame
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
