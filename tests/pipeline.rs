//! Audio pipeline integration tests
//!
//! Tests the codec, level estimator, and payload decoding without
//! requiring audio hardware.

use std::time::Duration;

use voicewire::audio::{self, decode_payload, level_of, pcm};
use voicewire::connection::backoff::{ReconnectPolicy, delay_for_attempt};
use voicewire::Error;

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (audio::SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / audio::SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

#[test]
fn test_codec_round_trip_on_speech_like_signal() {
    let samples = generate_sine_samples(440.0, 0.5, 0.8);

    let decoded = pcm::decode(pcm::encode(&samples).as_bytes()).unwrap();
    assert_eq!(decoded.len(), samples.len());

    for (original, restored) in samples.iter().zip(&decoded) {
        assert!(
            (original - restored).abs() <= 1.0 / 32768.0,
            "quantization error exceeded one step: {original} vs {restored}"
        );
    }
}

#[test]
fn test_codec_round_trip_at_extremes() {
    let samples = vec![-1.0, -0.5, 0.0, 0.5, 1.0];
    let decoded = pcm::decode(pcm::encode(&samples).as_bytes()).unwrap();

    for (original, restored) in samples.iter().zip(&decoded) {
        assert!((original - restored).abs() <= 1.0 / 32768.0);
    }
}

#[test]
fn test_codec_output_size() {
    let frame = pcm::encode(&generate_sine_samples(440.0, 0.256, 0.5));
    assert_eq!(frame.sample_count(), audio::FRAME_SIZE);
    assert_eq!(frame.as_bytes().len(), audio::FRAME_SIZE * 2);
}

#[test]
fn test_level_tracks_amplitude() {
    let quiet = level_of(&generate_sine_samples(440.0, 0.1, 0.02));
    let medium = level_of(&generate_sine_samples(440.0, 0.1, 0.1));
    let loud = level_of(&generate_sine_samples(440.0, 0.1, 0.5));

    assert!(quiet < medium, "{quiet} !< {medium}");
    assert!(medium < loud, "{medium} !< {loud}");
    assert!(loud <= 100);
}

#[test]
fn test_level_of_silence_is_zero() {
    assert_eq!(level_of(&vec![0.0; audio::FRAME_SIZE]), 0);
}

#[test]
fn test_sine_level_matches_rms() {
    // A 0.2-amplitude sine has RMS 0.2/sqrt(2) ≈ 0.1414; scaled by 500
    // and clamped, that reads as 71.
    let level = level_of(&generate_sine_samples(440.0, 0.5, 0.2));
    assert!((level as i32 - 71).abs() <= 1, "level was {level}");
}

#[test]
fn test_raw_pcm_payload_decodes_via_fallback() {
    let samples = generate_sine_samples(440.0, 0.1, 0.3);
    let frame = pcm::encode(&samples);

    let decoded = decode_payload(frame.as_bytes()).unwrap();
    assert_eq!(decoded.len(), samples.len());
}

#[test]
fn test_odd_length_payload_is_malformed() {
    let mut bytes = pcm::encode(&generate_sine_samples(440.0, 0.01, 0.3)).into_bytes();
    bytes.push(0xFF);

    assert!(matches!(
        decode_payload(&bytes),
        Err(Error::MalformedBuffer(_))
    ));
}

#[test]
fn test_empty_payload_decodes_to_nothing() {
    assert!(decode_payload(&[]).unwrap().is_empty());
}

#[test]
fn test_backoff_schedule_doubles_from_one_second() {
    let policy = ReconnectPolicy::default();

    let delays: Vec<u64> = (1..=5)
        .map(|attempt| delay_for_attempt(&policy, attempt).as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
}

#[test]
fn test_backoff_respects_configured_base() {
    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(50),
        ..ReconnectPolicy::default()
    };

    assert_eq!(delay_for_attempt(&policy, 1), Duration::from_millis(50));
    assert_eq!(delay_for_attempt(&policy, 3), Duration::from_millis(200));
}
