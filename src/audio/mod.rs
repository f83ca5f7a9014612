//! Audio processing module
//!
//! Capture, playback, PCM conversion, and voice level estimation.

pub mod capture;
pub mod level;
pub mod pcm;
pub mod playback;

pub use capture::{CapturePipeline, FRAME_SIZE, MicPermission, SAMPLE_RATE};
pub use level::level_of;
pub use pcm::AudioFrame;
pub use playback::{PLAYBACK_SAMPLE_RATE, PlaybackPipeline, decode_payload};
