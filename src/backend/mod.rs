//! Audio backend boundary.
//!
//! A backend hosts the real-time callback: it invokes
//! [`RealtimeCallback::process`] once per hardware block, on its own clock,
//! until the callback returns [`CallbackFlow::Stop`] or the stream is closed.
//!
//! Two backends ship with the crate:
//! - [`CpalBackend`]: real devices through `cpal`
//! - [`SimulatedBackend`]: a timer-driven device for tests and CI

mod cpal_backend;
mod device_id;
mod simulated;

pub use cpal_backend::{default_device_name, list_devices, CpalBackend};
pub use device_id::DeviceId;
pub use simulated::{CaptureSignal, SimulatedBackend, SimulatedBackendBuilder, SimulatedDevice};

use std::fmt;

use crate::{LatencyHint, SampleFormat, StreamError};

/// Value returned by the real-time callback after every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFlow {
    /// Keep the stream running.
    Continue,
    /// Complete the stream after this block.
    Stop,
}

/// Glitch flags reported by the backend for one callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackStatus {
    /// Captured input was lost before reaching the callback.
    pub input_overflow: bool,
    /// Input was not ready and silence was substituted.
    pub input_underflow: bool,
    /// The device played silence because the callback was late.
    pub output_underflow: bool,
    /// The host API reported a non-fatal problem of its own.
    pub backend_warning: bool,
}

impl CallbackStatus {
    /// Returns `true` if no flag is set.
    pub fn is_empty(&self) -> bool {
        !(self.input_overflow
            || self.input_underflow
            || self.output_underflow
            || self.backend_warning)
    }

    pub(crate) fn bits(self) -> u8 {
        u8::from(self.input_overflow)
            | u8::from(self.input_underflow) << 1
            | u8::from(self.output_underflow) << 2
            | u8::from(self.backend_warning) << 3
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            input_overflow: bits & 1 != 0,
            input_underflow: bits & 2 != 0,
            output_underflow: bits & 4 != 0,
            backend_warning: bits & 8 != 0,
        }
    }
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.input_overflow, "input overflow"),
            (self.input_underflow, "input underflow"),
            (self.output_underflow, "output underflow"),
            (self.backend_warning, "backend warning"),
        ];
        let mut first = true;
        for (set, name) in flags {
            if set {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("ok")?;
        }
        Ok(())
    }
}

/// Code executed inside the real-time callback.
///
/// `input` holds `frames` interleaved frames of
/// [`StreamParams::input_channels`] samples, `output` has room for `frames`
/// frames of [`StreamParams::output_channels`] samples and arrives
/// zero-filled. `frames` never exceeds [`StreamParams::block_size`].
///
/// Implementations must not block, allocate or take locks.
pub trait RealtimeCallback: Send + 'static {
    /// Processes one block.
    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        frames: usize,
        status: CallbackStatus,
    ) -> CallbackFlow;
}

/// How a backend stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The callback returned [`CallbackFlow::Stop`].
    Completed,
    /// The stream was closed from outside.
    Closed,
    /// The device or host failed.
    Failed(String),
}

/// Invoked exactly once, off the audio thread, after a stream ended.
pub type FinishedCallback = Box<dyn FnOnce(StreamEnd) + Send>;

/// A stream opened by an [`AudioBackend`].
///
/// Dropping the handle closes the stream.
pub trait BackendStream: Send {
    /// Closes the stream and waits until the finished callback has run.
    fn close(&mut self);

    /// Returns `true` while the backend still invokes the callback.
    fn is_active(&self) -> bool;
}

/// Parameters of a stream to open.
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum frames per callback.
    pub block_size: usize,
    /// Device to open.
    pub device: DeviceId,
    /// Device input channels to open; 0 disables capture.
    pub input_channels: u16,
    /// Device output channels to open; 0 disables playback.
    pub output_channels: u16,
    /// Device sample format.
    pub sample_format: SampleFormat,
    /// Latency preference.
    pub latency: LatencyHint,
}

/// Static description of a device, consumed at session setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend-specific identifier.
    pub id: DeviceId,
    /// Human-readable name.
    pub name: String,
    /// Input channels exposed by the device.
    pub max_input_channels: u16,
    /// Output channels exposed by the device.
    pub max_output_channels: u16,
    /// Sample rate used when none is configured.
    pub default_sample_rate: u32,
}

/// Host adapter hosting the real-time callback.
pub trait AudioBackend: Send + Sync {
    /// The device this backend opens streams on.
    fn device(&self) -> &DeviceInfo;

    /// Returns `true` if the device can run at `sample_rate`.
    fn supports_sample_rate(&self, sample_rate: u32) -> bool {
        sample_rate > 0
    }

    /// Opens and starts a stream.
    ///
    /// Returns once the backend invokes (or is about to invoke) `callback`.
    /// `on_finished` runs exactly once after the stream ends, unless this
    /// call fails.
    fn open_stream(
        &self,
        params: &StreamParams,
        callback: Box<dyn RealtimeCallback>,
        on_finished: FinishedCallback,
    ) -> Result<Box<dyn BackendStream>, StreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bits_roundtrip() {
        let status = CallbackStatus {
            input_overflow: true,
            input_underflow: false,
            output_underflow: true,
            backend_warning: false,
        };
        assert_eq!(CallbackStatus::from_bits(status.bits()), status);

        let warning = CallbackStatus {
            backend_warning: true,
            ..Default::default()
        };
        assert_eq!(warning.bits(), 8);
        assert_eq!(CallbackStatus::from_bits(8), warning);
        assert!(!warning.is_empty());
        assert!(!warning.output_underflow);
        assert!(CallbackStatus::default().is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CallbackStatus::default().to_string(), "ok");
        let status = CallbackStatus {
            input_overflow: true,
            output_underflow: true,
            ..Default::default()
        };
        assert_eq!(status.to_string(), "input overflow, output underflow");
        let warning = CallbackStatus {
            backend_warning: true,
            ..Default::default()
        };
        assert_eq!(warning.to_string(), "backend warning");
    }
}
