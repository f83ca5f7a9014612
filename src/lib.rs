//! Voicewire - real-time bidirectional voice streaming client
//!
//! Captures microphone audio, frames and transmits it continuously over a
//! persistent WebSocket, receives synthesized speech in return, and plays
//! it back gaplessly while tolerating connection loss.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    VoiceSession                       │
//! │  observer callbacks out │ user actions in             │
//! └───────┬──────────────────────┬───────────────┬───────┘
//!         │                      │               │
//! ┌───────▼───────┐   ┌──────────▼──────────┐   ┌▼──────────────┐
//! │ CapturePipeline│  │  ConnectionManager   │  │PlaybackPipeline│
//! │ mic → frames   │─▶│  state machine +     │─▶│ queue → speaker│
//! │ + voice levels │  │  backoff reconnect   │  │ gapless, FIFO  │
//! └────────────────┘  └──────────────────────┘  └────────────────┘
//! ```
//!
//! Outbound: 16-bit PCM at 16kHz, one frame per 4096-sample block.
//! Inbound: MP3 or raw PCM at 24kHz, probed per frame.

pub mod audio;
pub mod config;
pub mod connection;
pub mod error;
pub mod session;

pub use audio::{AudioFrame, CapturePipeline, MicPermission, PlaybackPipeline, level_of};
pub use config::Config;
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, EventKind, ListenerId, ReconnectPolicy,
};
pub use error::{Error, Result};
pub use session::VoiceSession;
