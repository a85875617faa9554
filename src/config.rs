//! Configuration types for stream sessions.

use std::time::Duration;

use crate::StreamError;

/// Latency preference handed to the backend when a stream is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyHint {
    /// Request a hardware buffer of exactly one block.
    ///
    /// Keeps the round trip short at the cost of more callbacks.
    #[default]
    Low,

    /// Let the host pick its default buffer size.
    ///
    /// The callback still delivers blocks of the configured size.
    High,
}

/// Sample format requested from the device.
///
/// The engine always works in `f32`; integer devices are converted at the
/// backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// 32-bit float samples.
    #[default]
    F32,
    /// 16-bit signed integer samples.
    I16,
}

/// Configuration for stream behavior.
///
/// Use [`StreamConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use realtime_sound::StreamConfig;
///
/// let config = StreamConfig {
///     block_size: 512,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Frames per block handed across the callback boundary.
    ///
    /// Default: 256
    pub block_size: usize,

    /// Capacity of the playback and capture queues, in blocks.
    ///
    /// These queues only absorb scheduling jitter.
    /// Default: 8
    pub queue_blocks: usize,

    /// Capacity of the monitor queue, in blocks.
    ///
    /// Default: 64
    pub monitor_queue_blocks: usize,

    /// How long workers wait for the stream to report it is running.
    ///
    /// Default: 5 seconds
    pub start_timeout: Duration,

    /// Bounded wait of a single worker queue operation.
    ///
    /// Workers re-check the session state after each timeout.
    /// Default: 50ms
    pub worker_timeout: Duration,

    /// Latency preference passed to the backend.
    ///
    /// Default: [`LatencyHint::Low`]
    pub latency: LatencyHint,

    /// Sample format requested from the device.
    ///
    /// Default: [`SampleFormat::F32`]
    pub sample_format: SampleFormat,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            queue_blocks: 8,
            monitor_queue_blocks: 64,
            start_timeout: Duration::from_secs(5),
            worker_timeout: Duration::from_millis(50),
            latency: LatencyHint::Low,
            sample_format: SampleFormat::F32,
        }
    }
}

impl StreamConfig {
    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.block_size == 0 {
            return Err(StreamError::invalid_config("block_size must be non-zero"));
        }
        if self.queue_blocks < 2 {
            return Err(StreamError::invalid_config(
                "queue_blocks must hold at least two blocks",
            ));
        }
        if self.monitor_queue_blocks == 0 {
            return Err(StreamError::invalid_config(
                "monitor_queue_blocks must be non-zero",
            ));
        }
        if self.worker_timeout.is_zero() {
            return Err(StreamError::invalid_config(
                "worker_timeout must be non-zero",
            ));
        }
        Ok(())
    }

    /// Wall-clock length of one block at `sample_rate`.
    #[must_use]
    pub fn block_duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.block_size as f64 / f64::from(sample_rate))
    }
}

/// Length of the monitor's rolling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowSize {
    /// A fixed number of frames.
    Frames(usize),
    /// A duration, converted using the session sample rate.
    Seconds(f64),
}

impl WindowSize {
    /// Resolves the window length in frames at `sample_rate`.
    ///
    /// Durations round to the nearest frame.
    #[must_use]
    pub fn frames(&self, sample_rate: u32) -> usize {
        match *self {
            Self::Frames(frames) => frames,
            Self::Seconds(secs) => (secs * f64::from(sample_rate)).round().max(0.0) as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.block_size, 256);
        assert_eq!(config.queue_blocks, 8);
        assert_eq!(config.monitor_queue_blocks, 64);
        assert_eq!(config.start_timeout, Duration::from_secs(5));
        assert_eq!(config.worker_timeout, Duration::from_millis(50));
        assert_eq!(config.latency, LatencyHint::Low);
        assert_eq!(config.sample_format, SampleFormat::F32);
    }

    #[test]
    fn test_validate_rejects_zero_block() {
        let config = StreamConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StreamError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_tiny_queue() {
        let config = StreamConfig {
            queue_blocks: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_block_duration() {
        let config = StreamConfig {
            block_size: 480,
            ..Default::default()
        };
        assert_eq!(config.block_duration(48000), Duration::from_millis(10));
    }

    #[test]
    fn test_window_size_seconds_rounds() {
        assert_eq!(WindowSize::Seconds(0.5).frames(44100), 22050);
        assert_eq!(WindowSize::Seconds(0.00001).frames(48000), 0);
        assert_eq!(WindowSize::Seconds(0.00002).frames(48000), 1);
        assert_eq!(WindowSize::Frames(1024).frames(48000), 1024);
    }
}
