//! Audio capture from microphone
//!
//! Owns the input device behind an explicit permission gate and frames the
//! incoming sample stream into fixed-size blocks. Each full block yields one
//! encoded [`AudioFrame`] and one voice level, computed from the same
//! samples, delivered in capture order.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::audio::level::level_of;
use crate::audio::pcm::{self, AudioFrame};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per transmitted frame (256ms at 16kHz)
pub const FRAME_SIZE: usize = 4096;

/// Microphone permission state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicPermission {
    /// Permission has not been requested yet
    Pending,
    /// A request is in flight
    Requesting,
    /// The input device is available
    Granted,
    /// The request failed; only an explicit retry re-enters `Requesting`
    Denied,
}

/// Accumulates raw capture callbacks into fixed-size blocks.
///
/// The cpal callback delivers buffers of arbitrary length; frames must be
/// exactly `frame_size` samples. A trailing partial block stays pending
/// until the next callback fills it.
pub(crate) struct Framer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub(crate) fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and emit every completed block, oldest first.
    pub(crate) fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.frame_size {
            emit(&self.pending[..self.frame_size]);
            self.pending.drain(..self.frame_size);
        }
    }
}

type InterruptHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Captures audio from the default input device
pub struct CapturePipeline {
    permission: MicPermission,
    device: Option<Device>,
    config: Option<StreamConfig>,
    stream: Option<Stream>,
    frame_size: usize,
    interrupt: Option<InterruptHandler>,
}

impl CapturePipeline {
    /// Create a new capture pipeline with permission still pending
    #[must_use]
    pub fn new() -> Self {
        Self {
            permission: MicPermission::Pending,
            device: None,
            config: None,
            stream: None,
            frame_size: FRAME_SIZE,
            interrupt: None,
        }
    }

    /// Request access to the default input device.
    ///
    /// On success the permission becomes [`MicPermission::Granted`] and the
    /// device is held for later [`start`](Self::start) calls. On failure the
    /// permission becomes [`MicPermission::Denied`] until called again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] when no input device or no 16kHz
    /// mono configuration exists, [`Error::PermissionDenied`] when the
    /// platform refuses to enumerate the device.
    pub fn request_permission(&mut self) -> Result<()> {
        if self.permission == MicPermission::Granted && self.device.is_some() {
            return Ok(());
        }

        self.permission = MicPermission::Requesting;
        tracing::debug!("requesting microphone access");

        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            self.permission = MicPermission::Denied;
            return Err(Error::DeviceNotFound("no input device available".to_string()));
        };

        let mut supported = match device.supported_input_configs() {
            Ok(configs) => configs,
            Err(e) => {
                self.permission = MicPermission::Denied;
                return Err(Error::PermissionDenied(e.to_string()));
            }
        };

        let Some(range) = supported.find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        }) else {
            self.permission = MicPermission::Denied;
            return Err(Error::DeviceNotFound(
                "no 16kHz mono input configuration available".to_string(),
            ));
        };

        let config = range.with_sample_rate(SampleRate(SAMPLE_RATE)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "microphone access granted"
        );

        self.device = Some(device);
        self.config = Some(config);
        self.permission = MicPermission::Granted;
        Ok(())
    }

    /// Start producing frames and voice levels.
    ///
    /// No-op when already recording. Per full block of [`FRAME_SIZE`]
    /// samples, `on_frame` receives the encoded PCM frame and `on_level` the
    /// voice level of the same block, in that order. Both callbacks run on
    /// the audio thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotPermitted`] when permission is not granted,
    /// [`Error::Audio`] when the input stream cannot be opened.
    pub fn start<F, L>(&mut self, on_frame: F, on_level: L) -> Result<()>
    where
        F: Fn(AudioFrame) + Send + 'static,
        L: Fn(u8) + Send + 'static,
    {
        if self.stream.is_some() {
            tracing::debug!("capture already running");
            return Ok(());
        }

        if self.permission != MicPermission::Granted {
            return Err(Error::NotPermitted);
        }

        let (device, config) = match (&self.device, &self.config) {
            (Some(device), Some(config)) => (device, config.clone()),
            _ => return Err(Error::NotPermitted),
        };

        let mut framer = Framer::new(self.frame_size);
        let interrupt = self.interrupt.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    framer.push(data, |block| {
                        let frame = pcm::encode(block);
                        let level = level_of(block);
                        on_frame(frame);
                        on_level(level);
                    });
                },
                move |err| {
                    tracing::error!(error = %err, "capture interrupted");
                    if let Some(handler) = &interrupt {
                        handler(&err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!(frame_size = self.frame_size, "capture started");
        Ok(())
    }

    /// Stop capturing audio. Idempotent; no callbacks fire after return.
    ///
    /// A trailing partial block is discarded, not flushed.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("capture stopped");
        }
    }

    /// Stop and release the input device.
    pub fn dispose(&mut self) {
        self.stop();
        self.device = None;
        self.config = None;
        tracing::debug!("capture resources released");
    }

    /// Register a handler for device errors during steady-state capture.
    ///
    /// Without a handler such errors are only logged; the stream goes
    /// silent rather than faulting.
    pub fn set_interrupt_handler(&mut self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.interrupt = Some(Arc::new(handler));
    }

    /// Current permission state
    #[must_use]
    pub const fn permission(&self) -> MicPermission {
        self.permission
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.stream.is_some()
    }
}

impl Default for CapturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_emits_nothing_below_frame_size() {
        let mut framer = Framer::new(8);
        let mut blocks = 0;
        framer.push(&[0.0; 7], |_| blocks += 1);
        assert_eq!(blocks, 0);
    }

    #[test]
    fn framer_emits_full_blocks_and_keeps_remainder() {
        let mut framer = Framer::new(4);
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();

        let mut blocks: Vec<Vec<f32>> = Vec::new();
        framer.push(&samples, |block| blocks.push(block.to_vec()));

        assert_eq!(blocks, vec![vec![0.0, 1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0, 7.0]]);

        // The remainder completes with the next push
        framer.push(&[8.0, 9.0], |block| blocks.push(block.to_vec()));
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2], vec![8.0, 9.0, 8.0, 9.0]);
    }

    #[test]
    fn framer_preserves_sample_order_across_pushes() {
        let mut framer = Framer::new(6);
        let mut collected = Vec::new();

        for chunk in (0..18).map(|i| i as f32).collect::<Vec<_>>().chunks(5) {
            framer.push(chunk, |block| collected.extend_from_slice(block));
        }

        let expected: Vec<f32> = (0..18).map(|i| i as f32).collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn start_without_permission_is_rejected() {
        let mut capture = CapturePipeline::new();
        let result = capture.start(|_| {}, |_| {});
        assert!(matches!(result, Err(Error::NotPermitted)));
        assert!(!capture.is_recording());
    }

    #[test]
    fn stop_is_idempotent_when_not_recording() {
        let mut capture = CapturePipeline::new();
        capture.stop();
        capture.stop();
        assert!(!capture.is_recording());
    }

    #[test]
    fn permission_starts_pending() {
        let capture = CapturePipeline::new();
        assert_eq!(capture.permission(), MicPermission::Pending);
    }
}
