//! Audio playback to speakers
//!
//! Maintains an ordered queue of decoded buffers behind a single output
//! stream. Buffers play strictly in arrival order, back to back, with at
//! most one audible at a time; the output callback advances the queue
//! itself so no gap is introduced between buffers.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use crate::audio::pcm;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Queue state shared with the output callback.
///
/// The callback pulls samples out; the API side pushes buffers in. All
/// transitions (buffer completion, queue advance, idle) happen inside
/// [`Mixer::fill`] on the audio thread.
struct Mixer {
    queue: VecDeque<Vec<f32>>,
    current: Option<Vec<f32>>,
    position: usize,
    playing: bool,
    volume: f32,
}

impl Mixer {
    const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            position: 0,
            playing: false,
            volume: 1.0,
        }
    }

    fn enqueue(&mut self, samples: Vec<f32>) {
        self.queue.push_back(samples);
        self.playing = true;
    }

    /// Fill an interleaved output buffer, advancing through the queue.
    fn fill(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels) {
            let sample = self.next_sample();
            for slot in frame.iter_mut() {
                *slot = sample;
            }
        }
    }

    fn next_sample(&mut self) -> f32 {
        loop {
            if let Some(current) = &self.current {
                if self.position < current.len() {
                    let sample = current[self.position] * self.volume;
                    self.position += 1;
                    return sample;
                }
                self.current = None;
                self.position = 0;
            }

            match self.queue.pop_front() {
                Some(next) => {
                    self.current = Some(next);
                    self.position = 0;
                }
                None => {
                    self.playing = false;
                    return 0.0;
                }
            }
        }
    }

    fn stop(&mut self) {
        self.queue.clear();
        self.current = None;
        self.position = 0;
        self.playing = false;
    }
}

/// Handle to the thread that owns the cpal output stream.
///
/// `cpal::Stream` is not `Send`, so the stream lives on its own thread and
/// everything else talks to it through the shared mixer.
struct Worker {
    shutdown: std::sync::mpsc::Sender<()>,
    thread: std::thread::JoinHandle<()>,
}

/// Plays decoded audio buffers in arrival order
pub struct PlaybackPipeline {
    mixer: Arc<Mutex<Mixer>>,
    worker: Option<Worker>,
}

impl PlaybackPipeline {
    /// Create a new playback pipeline; the output stream opens lazily on
    /// the first enqueued buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new())),
            worker: None,
        }
    }

    /// Decode an inbound payload and append it to the playback queue.
    ///
    /// The payload is probed as MP3 first; when the probe yields nothing it
    /// is treated as raw 16-bit PCM. Playback starts immediately when
    /// nothing is currently playing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedBuffer`] when the payload is neither MP3
    /// nor well-formed PCM (the queue is left untouched), [`Error::Audio`]
    /// when the output stream cannot be opened.
    pub fn enqueue(&mut self, payload: &[u8]) -> Result<()> {
        let samples = decode_payload(payload)?;
        if samples.is_empty() {
            return Ok(());
        }

        self.ensure_stream()?;

        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.enqueue(samples);
        }
        Ok(())
    }

    /// Halt playback and discard all queued buffers.
    ///
    /// Buffered-but-unplayed audio is not preserved; after a reconnect the
    /// session resumes from live audio rather than a stale backlog.
    pub fn stop(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop();
        }
        tracing::debug!("playback stopped, queue cleared");
    }

    /// Set the gain multiplier for subsequent playback, clamped to `[0, 1]`.
    pub fn set_volume(&mut self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.volume = clamped;
        }
    }

    /// Current gain multiplier
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.mixer.lock().map(|m| m.volume).unwrap_or(1.0)
    }

    /// Check if a buffer is playing or queued
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.mixer.lock().map(|m| m.playing).unwrap_or(false)
    }

    /// Stop playback and release the output stream.
    pub fn dispose(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            let _ = worker.thread.join();
            tracing::debug!("playback stream released");
        }
    }

    /// Spawn the stream-owning thread if it is not running yet.
    fn ensure_stream(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (init_tx, init_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let mixer = Arc::clone(&self.mixer);

        let thread = std::thread::Builder::new()
            .name("voicewire-playback".to_string())
            .spawn(move || {
                let stream = match open_output_stream(&mixer) {
                    Ok(stream) => {
                        let _ = init_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                // Block until dispose; dropping the stream stops playback
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        match init_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker {
                    shutdown: shutdown_tx,
                    thread,
                });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Audio("playback thread exited during init".to_string())),
        }
    }
}

impl Default for PlaybackPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Open the default output device at the playback rate and start pulling
/// from the mixer.
fn open_output_stream(mixer: &Arc<Mutex<Mixer>>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();
    let channels = usize::from(config.channels);

    let mixer = Arc::clone(mixer);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if let Ok(mut mixer) = mixer.lock() {
                    mixer.fill(data, channels);
                } else {
                    data.fill(0.0);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    tracing::debug!(
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels,
        "playback stream opened"
    );

    Ok(stream)
}

/// Decode an inbound payload to `f32` samples.
///
/// The transport does not declare a format per frame, so this probes: MP3
/// first, raw 16-bit PCM as the fallback.
///
/// # Errors
///
/// Returns [`Error::MalformedBuffer`] when the PCM fallback fails too.
pub fn decode_payload(payload: &[u8]) -> Result<Vec<f32>> {
    match decode_mp3(payload) {
        Ok(samples) if !samples.is_empty() => Ok(samples),
        Ok(_) => pcm::decode(payload),
        Err(e) => {
            tracing::trace!(error = %e, "mp3 probe failed, treating payload as raw pcm");
            pcm::decode(payload)
        }
    }
}

/// Decode MP3 bytes to mono f32 samples, averaging stereo channels.
fn decode_mp3(payload: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(payload));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("mp3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pump the mixer the way the output callback would, mono.
    fn drain(mixer: &mut Mixer, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        mixer.fill(&mut out, 1);
        out
    }

    #[test]
    fn buffers_play_in_arrival_order_without_gaps() {
        let mut mixer = Mixer::new();
        mixer.enqueue(vec![0.1; 4]);
        mixer.enqueue(vec![0.2; 4]);
        mixer.enqueue(vec![0.3; 4]);

        let out = drain(&mut mixer, 12);
        let expected: Vec<f32> = [[0.1f32; 4], [0.2; 4], [0.3; 4]].concat();
        assert_eq!(out, expected);
    }

    #[test]
    fn queue_drains_to_silence_and_clears_playing() {
        let mut mixer = Mixer::new();
        mixer.enqueue(vec![0.5; 3]);
        assert!(mixer.playing);

        let out = drain(&mut mixer, 6);
        assert_eq!(out, vec![0.5, 0.5, 0.5, 0.0, 0.0, 0.0]);
        assert!(!mixer.playing);
    }

    #[test]
    fn enqueue_after_drain_resumes_playback() {
        let mut mixer = Mixer::new();
        mixer.enqueue(vec![0.5; 2]);
        drain(&mut mixer, 4);
        assert!(!mixer.playing);

        mixer.enqueue(vec![0.7; 2]);
        assert!(mixer.playing);
        assert_eq!(drain(&mut mixer, 2), vec![0.7, 0.7]);
    }

    #[test]
    fn stop_discards_current_buffer_and_queue() {
        let mut mixer = Mixer::new();
        mixer.enqueue(vec![0.5; 8]);
        mixer.enqueue(vec![0.6; 8]);
        drain(&mut mixer, 2);

        mixer.stop();
        assert!(!mixer.playing);
        assert_eq!(drain(&mut mixer, 4), vec![0.0; 4]);
    }

    #[test]
    fn volume_scales_output() {
        let mut mixer = Mixer::new();
        mixer.volume = 0.5;
        mixer.enqueue(vec![0.8; 2]);
        assert_eq!(drain(&mut mixer, 2), vec![0.4, 0.4]);
    }

    #[test]
    fn fill_duplicates_samples_across_channels() {
        let mut mixer = Mixer::new();
        mixer.enqueue(vec![0.25, 0.75]);

        let mut out = vec![0.0; 4];
        mixer.fill(&mut out, 2);
        assert_eq!(out, vec![0.25, 0.25, 0.75, 0.75]);
    }

    #[test]
    fn raw_pcm_payload_falls_through_the_probe() {
        let frame = pcm::encode(&[0.0, 0.25, -0.25, 0.5]);
        let samples = decode_payload(frame.as_bytes()).unwrap();
        assert_eq!(samples.len(), 4);
        assert!((samples[1] - 0.25).abs() < 1.0 / 32768.0);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let result = decode_payload(&[0x01, 0x02, 0x03]);
        assert!(matches!(result, Err(Error::MalformedBuffer(_))));
    }

    #[test]
    fn malformed_payload_does_not_disturb_the_queue() {
        let mut mixer = Mixer::new();

        for payload in [
            pcm::encode(&[0.1; 4]).into_bytes(),
            vec![0xAB; 5],
            pcm::encode(&[0.2; 4]).into_bytes(),
        ] {
            if let Ok(samples) = decode_payload(&payload) {
                mixer.enqueue(samples);
            }
        }

        let out = drain(&mut mixer, 8);
        let expected: Vec<f32> = decode_payload(pcm::encode(&[0.1; 4]).as_bytes())
            .unwrap()
            .into_iter()
            .chain(decode_payload(pcm::encode(&[0.2; 4]).as_bytes()).unwrap())
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn set_volume_clamps_to_unit_range() {
        let mut playback = PlaybackPipeline::new();
        playback.set_volume(2.5);
        assert!((playback.volume() - 1.0).abs() < f32::EPSILON);
        playback.set_volume(-0.5);
        assert!(playback.volume() < f32::EPSILON);
    }

    #[test]
    fn new_pipeline_is_idle() {
        let playback = PlaybackPipeline::new();
        assert!(!playback.is_playing());
        assert!((playback.volume() - 1.0).abs() < f32::EPSILON);
    }
}
