//! Rate-limited observation of the streamed audio.
//!
//! While a session runs, the callback pushes every (capture, playback) block
//! pair onto a dedicated monitor queue. A monitor worker drains it a few
//! times per second into [`RollingWindow`]s and hands the windows to a
//! [`MonitorSink`]. A slow sink never stalls the stream: when the monitor
//! queue is full the callback drops the pair and counts it.

mod sinks;
mod window;
mod worker;

use std::sync::Arc;
use std::time::Duration;

pub use sinks::{Level, LevelMonitor, ProbeLog, ProbeMonitor, ProbeSession};
pub use window::RollingWindow;
pub(crate) use worker::{spawn_monitor, MonitorHandle};

use crate::{SampleBlock, StreamError, WindowSize};

/// Shape of the data a monitor will receive during one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorInfo {
    /// Session sample rate.
    pub sample_rate: u32,
    /// Frames per window.
    pub window_frames: usize,
    /// Channels of the capture window, zero if the session does not capture.
    pub capture_channels: u16,
    /// Channels of the playback window, zero if the session does not play.
    pub playback_channels: u16,
}

/// Consumer of rolling windows.
///
/// `process_data` always receives two windows, `[capture, playback]`; the
/// window of an inactive direction has zero channels. Calls happen at most
/// `fps` times per second and only when new frames arrived.
///
/// # Example
///
/// ```
/// use realtime_sound::{MonitorSink, SampleBlock};
///
/// struct PeakPrinter;
///
/// impl MonitorSink for PeakPrinter {
///     fn process_data(&mut self, windows: &[SampleBlock]) {
///         let peak = windows[0].samples().iter().fold(0.0f32, |m, s| m.max(s.abs()));
///         println!("input peak {peak:.3}");
///     }
/// }
/// ```
pub trait MonitorSink: Send {
    /// Called once before the session starts streaming.
    fn setup(&mut self, _info: &MonitorInfo) {}

    /// Receives the current windows, oldest frame first.
    fn process_data(&mut self, windows: &[SampleBlock]);

    /// Called once after the last `process_data`.
    fn tear_down(&mut self) {}
}

/// Where the monitor loop runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MonitorMode {
    /// A tokio task. Suits cheap sinks.
    #[default]
    Task,
    /// A dedicated OS thread, isolating sinks that block or burn CPU.
    Thread,
}

type SinkFactory = Arc<dyn Fn() -> Box<dyn MonitorSink> + Send + Sync>;

/// A monitor to attach to every session of a context.
///
/// The factory builds a fresh sink for each session.
///
/// # Example
///
/// ```
/// use realtime_sound::{LevelMonitor, MonitorMode, MonitorSpec, WindowSize};
///
/// let spec = MonitorSpec::new(20, WindowSize::Seconds(0.1), LevelMonitor::new)?
///     .with_mode(MonitorMode::Thread);
/// assert_eq!(spec.fps(), 20);
/// # Ok::<(), realtime_sound::StreamError>(())
/// ```
#[derive(Clone)]
pub struct MonitorSpec {
    fps: u32,
    window: WindowSize,
    mode: MonitorMode,
    factory: SinkFactory,
}

impl MonitorSpec {
    /// Creates a monitor running `fps` times per second over `window`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `fps` is zero or the window is empty.
    pub fn new<F, M>(fps: u32, window: WindowSize, factory: F) -> Result<Self, StreamError>
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: MonitorSink + 'static,
    {
        if fps == 0 {
            return Err(StreamError::invalid_config("monitor fps must be non-zero"));
        }
        let empty = match window {
            WindowSize::Frames(frames) => frames == 0,
            WindowSize::Seconds(secs) => secs.is_nan() || secs <= 0.0,
        };
        if empty {
            return Err(StreamError::invalid_config("monitor window must be non-empty"));
        }
        Ok(Self {
            fps,
            window,
            mode: MonitorMode::default(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn MonitorSink>),
        })
    }

    /// Sets where the monitor loop runs.
    #[must_use]
    pub fn with_mode(mut self, mode: MonitorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Window updates per second.
    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Window length.
    pub fn window(&self) -> WindowSize {
        self.window
    }

    /// Where the monitor loop runs.
    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    pub(crate) fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps))
    }

    pub(crate) fn create_sink(&self) -> Box<dyn MonitorSink> {
        (self.factory)()
    }
}

impl std::fmt::Debug for MonitorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorSpec")
            .field("fps", &self.fps)
            .field("window", &self.window)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_rejects_zero_fps() {
        assert!(MonitorSpec::new(0, WindowSize::Frames(10), LevelMonitor::new).is_err());
    }

    #[test]
    fn test_spec_rejects_empty_window() {
        assert!(MonitorSpec::new(10, WindowSize::Frames(0), LevelMonitor::new).is_err());
        assert!(MonitorSpec::new(10, WindowSize::Seconds(0.0), LevelMonitor::new).is_err());
    }

    #[test]
    fn test_spec_interval() {
        let spec = MonitorSpec::new(25, WindowSize::Frames(10), LevelMonitor::new).unwrap();
        assert_eq!(spec.interval(), Duration::from_millis(40));
        assert_eq!(spec.mode(), MonitorMode::Task);
    }
}
