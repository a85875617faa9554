//! Error types for realtime-sound.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`StreamError`]): returned synchronously to the caller,
//!   either at session setup or when a session fails
//! - **Recoverable conditions**: underruns, overruns and device status
//!   warnings are counted in [`SessionStats`](crate::SessionStats) and
//!   surfaced via [`EventCallback`](crate::EventCallback)

use std::path::PathBuf;

/// Fatal errors surfaced to the caller.
///
/// Configuration errors are returned before any stream is opened; a running
/// session never raises them. [`StreamError::DeviceFailed`] is the only error
/// that originates from a running stream, and it is reported by
/// [`Transfer::wait()`](crate::Transfer::wait) after the session terminated.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The requested channel mapping does not fit the device.
    #[error("invalid channel selection {channels:?}: {reason}")]
    InvalidChannelSelection {
        /// The rejected channel indices.
        channels: Vec<usize>,
        /// Why the selection was rejected.
        reason: String,
    },

    /// The requested sample rate is not usable.
    #[error("sample rate {requested}Hz not supported")]
    UnsupportedSampleRate {
        /// The requested sample rate.
        requested: u32,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The operation is not allowed while a session is active.
    #[error("a stream session is active - {operation} is not allowed until it stops")]
    SessionActive {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The operation needs continuous mode but it is off.
    #[error("continuous mode is not active")]
    ContinuousModeInactive,

    /// Audio data handed to the context cannot be streamed.
    #[error("invalid audio data: {reason}")]
    InvalidData {
        /// Why the data was rejected.
        reason: String,
    },

    /// The requested audio device was not found.
    #[error("device not found: {name}")]
    DeviceNotFound {
        /// Name of the device that wasn't found.
        name: String,
    },

    /// No default device is configured on this system.
    #[error("no default audio device configured")]
    NoDefaultDevice,

    /// An error from the underlying audio library.
    #[error("audio backend error: {0}")]
    BackendError(String),

    /// The stream failed while running and the session was terminated.
    #[error("device failed during the session: {reason}")]
    DeviceFailed {
        /// Backend-reported reason.
        reason: String,
    },
}

/// Errors that can occur within a [`CaptureReceiver`](crate::CaptureReceiver).
///
/// Receiver errors are recoverable - the Sink worker emits a
/// [`StreamEvent`](crate::StreamEvent) and keeps draining.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The receiver already holds its target length.
    #[error("receiver overrun: {dropped_frames} frames beyond target")]
    Overrun {
        /// Frames that did not fit.
        dropped_frames: usize,
    },

    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Custom error for user-implemented receivers.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom receiver error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

impl StreamError {
    pub(crate) fn invalid_channels(channels: &[usize], reason: impl Into<String>) -> Self {
        Self::InvalidChannelSelection {
            channels: channels.to_vec(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
