//! Software mixer behind the speaker output
//!
//! Renders scheduled segments against a sample-accurate clock: the clock is
//! the number of device frames rendered so far. Segments at a different rate
//! than the device are converted with linear interpolation.

use super::pcm::AudioSegment;
use super::scheduler::{SourceEnded, SourceId};

/// A segment placed on the device timeline
struct Voice {
    id: SourceId,
    start_frame: u64,
    /// First device frame after the voice; the next contiguous voice starts here
    end_frame: u64,
    samples: Vec<f32>,
    /// Source samples advanced per device frame
    step: f64,
    ended: Option<SourceEnded>,
}

impl Voice {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn sample_at(&self, offset: u64) -> Option<f32> {
        if self.start_frame + offset >= self.end_frame {
            return None;
        }
        let last = self.samples.len().checked_sub(1)?;
        let pos = offset as f64 * self.step;
        let index = (pos.floor() as usize).min(last);
        let current = self.samples[index];
        let next = self.samples.get(index + 1).copied().unwrap_or(current);
        let frac = (pos - pos.floor()).min(1.0) as f32;
        Some(current + (next - current) * frac)
    }
}

/// Mixes scheduled segments into the device stream
pub struct Mixer {
    device_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    /// Create a mixer for a device running at `device_rate`
    #[must_use]
    pub const fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            frames_rendered: 0,
            voices: Vec::new(),
        }
    }

    /// Device clock in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn now(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.device_rate)
    }

    /// Place a segment at `start_at` seconds
    ///
    /// A start time already in the past begins at the next rendered frame.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn add(&mut self, segment: AudioSegment, start_at: f64, ended: SourceEnded) {
        let rate = f64::from(self.device_rate);
        let duration = segment.duration();
        let requested = (start_at.max(0.0) * rate).round() as u64;

        // Start and end frames round the same way so contiguous voices meet exactly
        let (start_frame, start_secs) = if requested >= self.frames_rendered {
            (requested, start_at.max(0.0))
        } else {
            (self.frames_rendered, self.now())
        };
        let end_frame = ((start_secs + duration) * rate).round() as u64;

        let channels = usize::from(segment.channels.max(1));
        let samples = if channels == 1 {
            segment.samples
        } else {
            let scale = 1.0 / channels as f32;
            segment
                .samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() * scale)
                .collect()
        };

        self.voices.push(Voice {
            id: ended.id(),
            start_frame,
            end_frame: end_frame.max(start_frame),
            samples,
            step: f64::from(segment.sample_rate) / rate,
            ended: Some(ended),
        });
    }

    /// Drop a voice without reporting completion
    pub fn remove(&mut self, id: SourceId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    /// Drop every voice without reporting completion
    pub fn clear(&mut self) {
        self.voices.clear();
    }

    /// Number of voices not yet finished
    #[must_use]
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Fill an interleaved output buffer and advance the clock
    ///
    /// Voices that ran out during this buffer report completion.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let base = self.frames_rendered;
        out.fill(0.0);

        for voice in &self.voices {
            for (k, frame) in out.chunks_mut(channels).enumerate() {
                let absolute = base + k as u64;
                if absolute < voice.start_frame {
                    continue;
                }
                let Some(sample) = voice.sample_at(absolute - voice.start_frame) else {
                    break;
                };
                for slot in frame.iter_mut() {
                    *slot += sample;
                }
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        self.frames_rendered = base + (out.len() / channels) as u64;

        let now = self.frames_rendered;
        self.voices.retain_mut(|voice| {
            if voice.end_frame > now {
                return true;
            }
            if let Some(ended) = voice.ended.take() {
                ended.notify();
            }
            false
        });
    }
}
