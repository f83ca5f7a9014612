//! Voice session orchestration
//!
//! Wires the capture pipeline, the playback pipeline, and the connection
//! manager together and exposes the surface a UI collaborator consumes:
//! observer callbacks out, user actions in. Owns no audio or protocol
//! logic of its own.

use std::sync::{Arc, Mutex};

use crate::audio::{CapturePipeline, MicPermission, PlaybackPipeline};
use crate::config::Config;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, EventKind};
use crate::Result;

type LevelHandler = Arc<dyn Fn(u8) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// A single voice streaming session: one capture, one playback, one
/// connection, explicitly owned and disposed together.
pub struct VoiceSession {
    capture: CapturePipeline,
    playback: Arc<Mutex<PlaybackPipeline>>,
    connection: ConnectionManager,
    on_voice_level: Option<LevelHandler>,
}

impl VoiceSession {
    /// Create a session from the given configuration.
    ///
    /// Inbound audio is routed to the playback queue from the start;
    /// nothing connects or records until the corresponding action.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let connection = ConnectionManager::new(config.endpoint.clone(), config.reconnect.clone());

        let playback = Arc::new(Mutex::new(PlaybackPipeline::new()));
        if let Ok(mut pb) = playback.lock() {
            pb.set_volume(config.volume);
        }

        // Inbound binary payloads go straight to the playback queue;
        // malformed frames are dropped without disturbing the rest.
        let playback_for_messages = Arc::clone(&playback);
        connection.on(EventKind::Message, move |event| {
            if let ConnectionEvent::Message(payload) = event {
                let Ok(mut pb) = playback_for_messages.lock() else {
                    return;
                };
                if let Err(e) = pb.enqueue(payload) {
                    tracing::warn!(error = %e, bytes = payload.len(), "dropping inbound frame");
                }
            }
        });

        Self {
            capture: CapturePipeline::new(),
            playback,
            connection,
            on_voice_level: None,
        }
    }

    /// Register the voice level observer, fed once per captured frame.
    ///
    /// Takes effect when capture starts (or restarts).
    pub fn on_voice_level(&mut self, handler: impl Fn(u8) + Send + Sync + 'static) {
        self.on_voice_level = Some(Arc::new(handler));
    }

    /// Register the connection status observer.
    pub fn on_status_change(&self, handler: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.connection.on(EventKind::Status, move |event| {
            if let ConnectionEvent::Status(state) = event {
                handler(*state);
            }
        });
    }

    /// Register the error observer: transport errors and capture
    /// interruptions both land here.
    pub fn on_error(&mut self, handler: impl Fn(&str) + Send + Sync + 'static) {
        let handler: ErrorHandler = Arc::new(handler);

        let for_connection = Arc::clone(&handler);
        self.connection.on(EventKind::Error, move |event| {
            if let ConnectionEvent::Error(message) = event {
                for_connection(message);
            }
        });

        let for_capture = Arc::clone(&handler);
        self.capture
            .set_interrupt_handler(move |message| for_capture(message));
    }

    /// Request microphone access.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PermissionDenied`] or
    /// [`crate::Error::DeviceNotFound`]; either is terminal until called
    /// again.
    pub fn request_permission(&mut self) -> Result<()> {
        self.capture.request_permission()
    }

    /// Open the connection to the voice backend.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConnectFailed`] when the transport cannot be
    /// opened.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Start streaming microphone audio to the backend.
    ///
    /// Captured frames go to the transport; while disconnected they are
    /// dropped (and logged), never buffered. No-op when already capturing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotPermitted`] when permission has not been
    /// granted.
    pub fn start_capture(&mut self) -> Result<()> {
        let connection = self.connection.clone();
        let on_level = self.on_voice_level.clone();

        self.capture.start(
            move |frame| {
                connection.send_frame(frame);
            },
            move |level| {
                if let Some(handler) = &on_level {
                    handler(level);
                }
            },
        )
    }

    /// Stop streaming microphone audio. Idempotent.
    pub fn stop_capture(&mut self) {
        self.capture.stop();
    }

    /// Tear down and re-establish the session connection (user action).
    ///
    /// Capture is stopped for the duration and restarted afterwards when
    /// permission is granted. Returns whether the connection came back.
    pub async fn reconnect(&mut self) -> bool {
        self.capture.stop();

        let connected = self.connection.reconnect().await;

        if connected && self.capture.permission() == MicPermission::Granted {
            if let Err(e) = self.start_capture() {
                tracing::error!(error = %e, "failed to restart capture after reconnect");
            }
        }

        connected
    }

    /// Set the playback volume, clamped to `[0, 1]`.
    pub fn set_volume(&self, volume: f32) {
        if let Ok(mut pb) = self.playback.lock() {
            pb.set_volume(volume);
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current microphone permission state
    #[must_use]
    pub fn mic_permission(&self) -> MicPermission {
        self.capture.permission()
    }

    /// Check if microphone audio is streaming
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.capture.is_recording()
    }

    /// Release every resource: capture device, playback stream, socket.
    ///
    /// Safe to call more than once.
    pub fn dispose(&mut self) {
        self.capture.dispose();
        if let Ok(mut pb) = self.playback.lock() {
            pb.dispose();
        }
        self.connection.disconnect();
        tracing::info!("session disposed");
    }
}
