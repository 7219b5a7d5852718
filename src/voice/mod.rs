//! Voice processing module
//!
//! Handles microphone capture, PCM framing, and gapless playback of model
//! audio.

mod capture;
mod device;
mod mixer;
pub mod pcm;
mod resample;
mod scheduler;

pub use capture::{CapturePipeline, CaptureRequest, Microphone, SampleSink};
pub use device::{CpalMicrophone, SpeakerOutput, classify_device_error};
pub use mixer::Mixer;
pub use pcm::{
    AudioFrame, AudioSegment, BLOCK_SIZE, INPUT_SAMPLE_RATE, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE,
    samples_to_wav,
};
pub use resample::{StreamResampler, downmix};
pub use scheduler::{OutputDevice, PlaybackScheduler, ScheduledSegment, SourceEnded, SourceId};
