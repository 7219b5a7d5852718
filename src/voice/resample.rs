//! Streaming resampler for capture devices that cannot run at the input rate

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input frames fed to the FFT resampler per call
const CHUNK_SIZE: usize = 480;

/// Converts an unbounded mono stream between sample rates
///
/// Input is buffered until a full resampler chunk is available, so output
/// lags input by up to one chunk.
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a resampler from `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if the rates are unsupported
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
            .map_err(|e| Error::DeviceUnavailable(format!("resampler init failed: {e}")))?;

        Ok(Self {
            inner,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    /// Feed samples and append any converted output to `out`
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) {
        self.pending.extend_from_slice(input);

        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            match self.inner.process(&[&self.pending[..needed]], None) {
                Ok(converted) => {
                    if let Some(channel) = converted.first() {
                        out.extend_from_slice(channel);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "resample failed, dropping chunk");
                }
            }
            self.pending.drain(..needed);
        }
    }
}

/// Average interleaved frames down to mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}
