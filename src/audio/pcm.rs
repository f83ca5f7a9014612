//! PCM sample format conversion
//!
//! The transport carries 16-bit little-endian signed PCM; the audio graph
//! works in `f32`. Both directions are pure functions with no state.

use crate::{Error, Result};

/// One encoded block of capture audio: 16-bit little-endian PCM, mono.
///
/// Produced once by [`encode`] and consumed once by the transport layer;
/// never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
}

impl AudioFrame {
    /// Borrow the raw PCM bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame, yielding the raw PCM bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Number of 16-bit samples in the frame
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.data.len() / 2
    }
}

/// Convert `f32` samples in `[-1.0, 1.0]` to a 16-bit little-endian PCM frame.
///
/// Samples are clamped first; negative values scale by 32768 and
/// non-negative values by 32767 to cover the asymmetric signed 16-bit range.
#[must_use]
pub fn encode(samples: &[f32]) -> AudioFrame {
    let mut data = Vec::with_capacity(samples.len() * 2);

    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let scaled = if clamped < 0.0 {
            clamped * 32768.0
        } else {
            clamped * 32767.0
        };
        #[allow(clippy::cast_possible_truncation)]
        let value = scaled as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }

    AudioFrame { data }
}

/// Convert 16-bit little-endian PCM bytes back to `f32` samples.
///
/// # Errors
///
/// Returns [`Error::MalformedBuffer`] if the byte length is odd.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::MalformedBuffer(format!(
            "odd byte length {} for 16-bit PCM",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}
