//! Built-in monitor sinks.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{MonitorInfo, MonitorSink};
use crate::SampleBlock;

/// Effective silence floor in dBFS.
const SILENCE_FLOOR_DB: f32 = -96.0;

fn to_dbfs(linear: f32) -> f32 {
    if linear > 0.0 {
        (20.0 * linear.log10()).max(SILENCE_FLOOR_DB)
    } else {
        SILENCE_FLOOR_DB
    }
}

/// RMS and peak level of one window, in dBFS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    /// RMS level over every sample of the window.
    pub rms_db: f32,
    /// Largest absolute sample.
    pub peak_db: f32,
}

impl Level {
    /// Measures a window. Empty windows read as the silence floor.
    pub fn measure(window: &SampleBlock) -> Self {
        let samples = window.samples();
        if samples.is_empty() {
            return Self {
                rms_db: SILENCE_FLOOR_DB,
                peak_db: SILENCE_FLOOR_DB,
            };
        }
        let mut peak = 0.0f32;
        let mut sum_squares = 0.0f64;
        for &s in samples {
            peak = peak.max(s.abs());
            sum_squares += f64::from(s) * f64::from(s);
        }
        let rms = (sum_squares / samples.len() as f64).sqrt() as f32;
        Self {
            rms_db: to_dbfs(rms),
            peak_db: to_dbfs(peak),
        }
    }
}

/// Logs the level of each active direction through `tracing`.
///
/// Every update is an `info!` event on the `realtime_sound::monitor`
/// target, so a subscriber filter can silence it.
#[derive(Debug, Default)]
pub struct LevelMonitor {
    info: Option<MonitorInfo>,
    updates: u64,
}

impl LevelMonitor {
    /// Creates a level monitor.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MonitorSink for LevelMonitor {
    fn setup(&mut self, info: &MonitorInfo) {
        self.info = Some(*info);
        self.updates = 0;
    }

    fn process_data(&mut self, windows: &[SampleBlock]) {
        self.updates += 1;
        let [capture, playback] = windows else {
            return;
        };
        let input = (capture.channels() > 0).then(|| Level::measure(capture));
        let output = (playback.channels() > 0).then(|| Level::measure(playback));
        tracing::info!(
            target: "realtime_sound::monitor",
            input_rms_db = input.map(|l| l.rms_db),
            input_peak_db = input.map(|l| l.peak_db),
            output_rms_db = output.map(|l| l.rms_db),
            output_peak_db = output.map(|l| l.peak_db),
            "levels"
        );
    }

    fn tear_down(&mut self) {
        tracing::debug!(
            target: "realtime_sound::monitor",
            updates = self.updates,
            window_frames = self.info.map(|i| i.window_frames),
            "level monitor done"
        );
    }
}

/// Everything one [`ProbeMonitor`] saw during a session.
#[derive(Debug, Clone, Default)]
pub struct ProbeSession {
    /// Info passed to `setup`, if it was called.
    pub info: Option<MonitorInfo>,
    /// Windows of every `process_data` call, in order.
    pub windows: Vec<Vec<SampleBlock>>,
    /// Whether `tear_down` was called.
    pub torn_down: bool,
}

/// Shared record of every window handed to probe monitors.
///
/// Clone it into a [`MonitorSpec`](crate::MonitorSpec) factory to inspect
/// what the monitor saw after the session.
///
/// # Example
///
/// ```
/// use realtime_sound::{MonitorSpec, ProbeLog, WindowSize};
///
/// let log = ProbeLog::new();
/// let probe = log.clone();
/// let _spec = MonitorSpec::new(10, WindowSize::Frames(480), move || probe.monitor())?;
/// assert_eq!(log.calls(), 0);
/// # Ok::<(), realtime_sound::StreamError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProbeLog {
    sessions: Arc<Mutex<Vec<ProbeSession>>>,
}

impl ProbeLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a monitor recording into this log.
    pub fn monitor(&self) -> ProbeMonitor {
        ProbeMonitor {
            log: self.clone(),
            index: None,
        }
    }

    /// Copy of every session recorded so far.
    pub fn sessions(&self) -> Vec<ProbeSession> {
        self.sessions.lock().clone()
    }

    /// Total `process_data` calls across sessions.
    pub fn calls(&self) -> usize {
        self.sessions.lock().iter().map(|s| s.windows.len()).sum()
    }

    /// Windows of the most recent `process_data` call.
    pub fn last_windows(&self) -> Option<Vec<SampleBlock>> {
        self.sessions
            .lock()
            .iter()
            .rev()
            .find_map(|s| s.windows.last().cloned())
    }
}

/// A monitor that records every window it receives.
#[derive(Debug)]
pub struct ProbeMonitor {
    log: ProbeLog,
    index: Option<usize>,
}

impl ProbeMonitor {
    fn with_session(&mut self, f: impl FnOnce(&mut ProbeSession)) {
        let mut sessions = self.log.sessions.lock();
        let index = *self.index.get_or_insert_with(|| {
            sessions.push(ProbeSession::default());
            sessions.len() - 1
        });
        f(&mut sessions[index]);
    }
}

impl MonitorSink for ProbeMonitor {
    fn setup(&mut self, info: &MonitorInfo) {
        let info = *info;
        self.with_session(|s| s.info = Some(info));
    }

    fn process_data(&mut self, windows: &[SampleBlock]) {
        self.with_session(|s| s.windows.push(windows.to_vec()));
    }

    fn tear_down(&mut self) {
        self.with_session(|s| s.torn_down = true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_of_full_scale_square() {
        let block = SampleBlock::new(vec![1.0, -1.0, 1.0, -1.0], 1);
        let level = Level::measure(&block);
        assert!(level.rms_db.abs() < 1e-4);
        assert!(level.peak_db.abs() < 1e-4);
    }

    #[test]
    fn test_level_of_silence_is_floor() {
        let level = Level::measure(&SampleBlock::zeros(16, 2));
        assert_eq!(level.rms_db, SILENCE_FLOOR_DB);
        assert_eq!(Level::measure(&SampleBlock::zeros(0, 0)).peak_db, SILENCE_FLOOR_DB);
    }

    #[test]
    fn test_level_half_amplitude() {
        let level = Level::measure(&SampleBlock::new(vec![0.5; 8], 1));
        assert!((level.peak_db - -6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_probe_records_per_session() {
        let log = ProbeLog::new();
        let info = MonitorInfo {
            sample_rate: 48000,
            window_frames: 2,
            capture_channels: 1,
            playback_channels: 0,
        };

        for _ in 0..2 {
            let mut probe = log.monitor();
            probe.setup(&info);
            probe.process_data(&[SampleBlock::zeros(2, 1), SampleBlock::zeros(2, 0)]);
            probe.tear_down();
        }

        let sessions = log.sessions();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.torn_down && s.windows.len() == 1));
        assert_eq!(log.calls(), 2);
    }

    #[test]
    fn test_level_monitor_counts_updates() {
        let mut monitor = LevelMonitor::new();
        monitor.setup(&MonitorInfo {
            sample_rate: 48000,
            window_frames: 4,
            capture_channels: 1,
            playback_channels: 1,
        });
        monitor.process_data(&[SampleBlock::zeros(4, 1), SampleBlock::zeros(4, 1)]);
        assert_eq!(monitor.updates, 1);
        monitor.tear_down();
    }
}
