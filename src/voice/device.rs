//! cpal-backed microphone and speaker

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::capture::{CaptureRequest, Microphone, SampleSink};
use super::mixer::Mixer;
use super::pcm::AudioSegment;
use super::resample::{StreamResampler, downmix};
use super::scheduler::{OutputDevice, SourceEnded, SourceId};
use crate::{Error, Result};

/// Map a host error message onto the capture error taxonomy
///
/// Hosts report refused microphone access through backend-specific
/// errors, so the message text is the only signal available.
#[must_use]
pub fn classify_device_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    let denied = ["permission", "denied", "not authorized", "unauthorized", "not permitted"]
        .iter()
        .any(|needle| lower.contains(needle));

    if denied {
        Error::PermissionDenied(message.to_string())
    } else {
        Error::DeviceUnavailable(message.to_string())
    }
}

/// Pick a mono config at `rate`, or fall back to the device default
fn select_input_config(device: &Device, rate: u32) -> Result<StreamConfig> {
    let exact = device
        .supported_input_configs()
        .map_err(|e| classify_device_error(&e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(rate)
                && c.max_sample_rate() >= SampleRate(rate)
        });

    if let Some(supported) = exact {
        return Ok(supported.with_sample_rate(SampleRate(rate)).config());
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| classify_device_error(&e.to_string()))?;
    Ok(fallback.config())
}

/// Device callback state: downmix, resample, hand to the pipeline
struct InputTap {
    channels: usize,
    resampler: Option<StreamResampler>,
    scratch: Vec<f32>,
    sink: SampleSink,
}

impl InputTap {
    fn process(&mut self, data: &[f32]) {
        let mono = downmix(data, self.channels);
        match self.resampler.as_mut() {
            Some(resampler) => {
                self.scratch.clear();
                resampler.push(&mono, &mut self.scratch);
                if !self.scratch.is_empty() {
                    (self.sink)(&self.scratch);
                }
            }
            None => (self.sink)(&mono),
        }
    }
}

/// Captures audio from the default input device
#[derive(Default)]
pub struct CpalMicrophone {
    stream: Option<Stream>,
}

impl CpalMicrophone {
    /// Create a microphone handle; the device is opened on acquire
    #[must_use]
    pub const fn new() -> Self {
        Self { stream: None }
    }
}

impl Microphone for CpalMicrophone {
    fn acquire(&mut self, request: &CaptureRequest, sink: SampleSink) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::CaptureActive);
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        if request.echo_cancellation || request.noise_suppression || request.auto_gain_control {
            // cpal exposes no voice processing switches; the OS input chain applies its own
            tracing::debug!(
                echo_cancellation = request.echo_cancellation,
                noise_suppression = request.noise_suppression,
                auto_gain_control = request.auto_gain_control,
                "voice processing requested from host defaults"
            );
        }

        let config = select_input_config(&device, request.sample_rate)?;
        let native_rate = config.sample_rate.0;
        let resampler = if native_rate == request.sample_rate {
            None
        } else {
            Some(StreamResampler::new(native_rate, request.sample_rate)?)
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            native_rate,
            target_rate = request.sample_rate,
            channels = config.channels,
            "audio capture initialized"
        );

        let mut tap = InputTap {
            channels: usize::from(config.channels),
            resampler,
            scratch: Vec::new(),
            sink,
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| tap.process(data),
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| classify_device_error(&e.to_string()))?;

        stream
            .play()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("microphone released");
        }
    }
}

/// Plays scheduled segments on the default output device
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<Stream>,
    device_rate: u32,
}

impl SpeakerOutput {
    /// Open the default output device, preferring `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if no output device can be opened
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

        let config = select_output_config(&device, sample_rate)?;
        let device_rate = config.sample_rate.0;
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate,
            source_rate = sample_rate,
            channels,
            "audio playback initialized"
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(device_rate)));
        let render_mixer = Arc::clone(&mixer);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if let Ok(mut mixer) = render_mixer.lock() {
                        mixer.render(data, channels);
                    } else {
                        data.fill(0.0);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            mixer,
            stream: Some(stream),
            device_rate,
        })
    }

    /// Rate the device actually runs at
    #[must_use]
    pub const fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

/// Mono or stereo at `rate`, else whatever the device defaults to
fn select_output_config(device: &Device, rate: u32) -> Result<StreamConfig> {
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(rate)
                && c.max_sample_rate() >= SampleRate(rate)
        })
    };

    if let Some(supported) = supports(1).or_else(|| supports(2)) {
        return Ok(supported.with_sample_rate(SampleRate(rate)).config());
    }

    device
        .default_output_config()
        .map(|c| c.config())
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
}

impl OutputDevice for SpeakerOutput {
    fn now(&self) -> f64 {
        self.mixer.lock().map(|m| m.now()).unwrap_or_default()
    }

    fn start_source(&mut self, segment: AudioSegment, start_at: f64, ended: SourceEnded) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.add(segment, start_at, ended);
        }
    }

    fn stop_source(&mut self, id: SourceId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.remove(id);
        }
    }

    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            if let Ok(mut mixer) = self.mixer.lock() {
                mixer.clear();
            }
            tracing::debug!("audio playback released");
        }
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}
