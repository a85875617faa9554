//! Stream session state and handles.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::backend::CallbackStatus;
use crate::monitor::MonitorHandle;
use crate::pipeline::{SinkCommand, SourceCommand, StreamState, Streamer};
use crate::{CaptureReceiver, SampleBlock, StreamError};

/// Active directions of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Output only.
    Playback,
    /// Input only.
    Capture,
    /// Input and output on the same clock.
    Duplex,
}

impl Direction {
    pub(crate) fn from_counts(inputs: u16, outputs: u16) -> Option<Self> {
        match (inputs > 0, outputs > 0) {
            (true, true) => Some(Self::Duplex),
            (true, false) => Some(Self::Capture),
            (false, true) => Some(Self::Playback),
            (false, false) => None,
        }
    }

    /// Returns `true` if the session captures.
    pub fn captures(self) -> bool {
        matches!(self, Self::Capture | Self::Duplex)
    }

    /// Returns `true` if the session plays.
    pub fn plays(self) -> bool {
        matches!(self, Self::Playback | Self::Duplex)
    }
}

/// Length of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Stops by itself after `frames` frames in every active direction.
    Finite {
        /// Total frames.
        frames: u64,
    },
    /// Runs until turned off.
    Continuous,
}

/// Counters of a session, sampled at one point in time.
///
/// Underruns and overruns are recovered locally (silence and drop) and only
/// show up here and as [`StreamEvent`](crate::StreamEvent)s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames written to the device outputs from playback material.
    pub played_frames: u64,
    /// Frames taken from the device inputs for recording.
    pub captured_frames: u64,
    /// Frames of silence substituted for missing playback material.
    pub underrun_frames: u64,
    /// Captured frames dropped because the capture queue was full.
    pub capture_overrun_frames: u64,
    /// Frames a receiver refused because it was full.
    pub receiver_overrun_frames: u64,
    /// Monitor blocks dropped because the monitor queue was full.
    pub monitor_drops: u64,
    /// Callbacks flagged by the backend.
    pub device_warnings: u64,
    /// Callback invocations.
    pub callbacks: u64,
}

/// State shared between the audio callback, the workers and the caller.
///
/// Everything the callback touches is an atomic.
pub(crate) struct SessionState {
    pub state: AtomicU8,
    pub running: AtomicBool,
    pub finished: AtomicBool,
    pub stop_requested: AtomicBool,
    pub stream_ended: AtomicBool,
    pub capture_budget: AtomicU64,
    pub generator_installed: AtomicBool,
    pub workers_live: AtomicUsize,
    pub source_position: AtomicU64,
    pub played_frames: AtomicU64,
    pub captured_frames: AtomicU64,
    pub underrun_frames: AtomicU64,
    pub capture_overrun_frames: AtomicU64,
    pub receiver_overrun_frames: AtomicU64,
    pub monitor_drops: AtomicU64,
    pub device_warnings: AtomicU64,
    pub last_status: AtomicU8,
    pub callbacks: AtomicU64,
    pub failure: Mutex<Option<String>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(StreamState::Stopped as u8),
            running: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stream_ended: AtomicBool::new(false),
            capture_budget: AtomicU64::new(0),
            generator_installed: AtomicBool::new(false),
            workers_live: AtomicUsize::new(0),
            source_position: AtomicU64::new(0),
            played_frames: AtomicU64::new(0),
            captured_frames: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            capture_overrun_frames: AtomicU64::new(0),
            receiver_overrun_frames: AtomicU64::new(0),
            monitor_drops: AtomicU64::new(0),
            device_warnings: AtomicU64::new(0),
            last_status: AtomicU8::new(0),
            callbacks: AtomicU64::new(0),
            failure: Mutex::new(None),
        }
    }

    pub fn stream_state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Called from the audio callback when the session completes.
    #[inline]
    pub fn mark_finishing(&self) {
        self.finished.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.state
            .store(StreamState::Finishing as u8, Ordering::Release);
    }

    /// Everything has wound down: the stream ended and no worker is left.
    pub fn is_settled(&self) -> bool {
        self.is_finished()
            && self.stream_ended.load(Ordering::Acquire)
            && self.workers_live.load(Ordering::Acquire) == 0
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub fn last_status(&self) -> CallbackStatus {
        CallbackStatus::from_bits(self.last_status.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            played_frames: self.played_frames.load(Ordering::SeqCst),
            captured_frames: self.captured_frames.load(Ordering::SeqCst),
            underrun_frames: self.underrun_frames.load(Ordering::SeqCst),
            capture_overrun_frames: self.capture_overrun_frames.load(Ordering::SeqCst),
            receiver_overrun_frames: self.receiver_overrun_frames.load(Ordering::SeqCst),
            monitor_drops: self.monitor_drops.load(Ordering::SeqCst),
            device_warnings: self.device_warnings.load(Ordering::SeqCst),
            callbacks: self.callbacks.load(Ordering::SeqCst),
        }
    }
}

/// Waits until the stream reports running, or finished before that.
///
/// Returns `false` if neither happened within `timeout`.
pub(crate) async fn wait_for_start(state: &SessionState, timeout: Duration, poll: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if state.is_running() || state.is_finished() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Read-only view of a session's flags and counters.
///
/// Handed out with external monitor feeds so the caller can tell when the
/// session is over.
#[derive(Clone)]
pub struct SessionStatus {
    state: Arc<SessionState>,
}

impl SessionStatus {
    pub(crate) fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }

    /// Returns `true` while the stream is running.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Returns `true` once the stream completed or failed.
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Current counters.
    pub fn stats(&self) -> SessionStats {
        self.state.stats()
    }

    /// Lifecycle state of the backend stream.
    pub fn stream_state(&self) -> StreamState {
        self.state.stream_state()
    }
}

impl std::fmt::Debug for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStatus")
            .field("running", &self.is_running())
            .field("finished", &self.is_finished())
            .finish()
    }
}

const NOT_ENDED: u64 = u64::MAX;

/// Tracks one playback item through the Source worker.
pub(crate) struct PlaybackItem {
    end: AtomicU64,
}

impl PlaybackItem {
    pub fn new() -> Self {
        Self {
            end: AtomicU64::new(NOT_ENDED),
        }
    }

    /// Records the Source position right after the item's last frame.
    pub fn set_end(&self, position: u64) {
        self.end.store(position, Ordering::SeqCst);
    }

    pub fn end(&self) -> Option<u64> {
        match self.end.load(Ordering::SeqCst) {
            NOT_ENDED => None,
            end => Some(end),
        }
    }
}

/// Tracks one continuous-mode capture request through the Sink worker.
pub(crate) struct CaptureItem {
    done: AtomicBool,
}

impl CaptureItem {
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Marks the request delivered, or abandoned by a replacement.
    pub fn complete(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Handle to one play, record or playrec request.
///
/// Returned by every [`StreamContext`](crate::StreamContext) operation.
/// Dropping it does not stop anything.
///
/// # Example
///
/// ```ignore
/// let transfer = ctx.record(Duration::from_secs(1), false).await?;
/// transfer.wait().await?;
/// let take = transfer.recording().unwrap();
/// ```
pub struct Transfer {
    state: Arc<SessionState>,
    mode: SessionMode,
    item: Option<Arc<PlaybackItem>>,
    capture: Option<Arc<CaptureItem>>,
    receiver: Option<Arc<dyn CaptureReceiver>>,
    poll: Duration,
}

impl Transfer {
    pub(crate) fn new(
        state: Arc<SessionState>,
        mode: SessionMode,
        item: Option<Arc<PlaybackItem>>,
        capture: Option<Arc<CaptureItem>>,
        receiver: Option<Arc<dyn CaptureReceiver>>,
        poll: Duration,
    ) -> Self {
        Self {
            state,
            mode,
            item,
            capture,
            receiver,
            poll,
        }
    }

    /// Returns `true` once the request completed.
    ///
    /// A finite request is complete when the stream finished and every
    /// worker drained. A continuous request is complete once its material
    /// has been played and all its frames reached the receiver, or when
    /// continuous mode was turned off.
    pub fn is_finished(&self) -> bool {
        if self.state.is_settled() {
            return true;
        }
        match self.mode {
            SessionMode::Finite { .. } => false,
            SessionMode::Continuous => {
                let played = self.item.as_ref().map_or(true, |item| {
                    item.end().is_some_and(|end| {
                        self.state.played_frames.load(Ordering::SeqCst) >= end
                    })
                });
                let recorded = self.capture.as_ref().map_or(true, |c| c.is_done())
                    || self.receiver.as_ref().is_some_and(|r| r.is_complete());
                played && recorded
            }
        }
    }

    /// Waits for completion, polling at half the block period.
    ///
    /// # Errors
    ///
    /// Returns `DeviceFailed` if the stream failed during the session.
    pub async fn wait(&self) -> Result<(), StreamError> {
        while !self.is_finished() {
            tokio::time::sleep(self.poll).await;
        }
        self.result()
    }

    /// Like [`wait`](Transfer::wait), but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` on timeout.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<bool, StreamError> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result.map(|()| true),
            Err(_) => Ok(false),
        }
    }

    fn result(&self) -> Result<(), StreamError> {
        match self.state.failure() {
            Some(reason) => Err(StreamError::DeviceFailed { reason }),
            None => Ok(()),
        }
    }

    /// Copy of the recording so far, for in-memory receivers.
    pub fn recording(&self) -> Option<SampleBlock> {
        self.receiver.as_ref().and_then(|r| r.snapshot())
    }

    /// The session mode this request runs in.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Counters of the session carrying this request.
    pub fn stats(&self) -> SessionStats {
        self.state.stats()
    }
}

/// The single session owned by a [`StreamContext`](crate::StreamContext).
pub(crate) struct ActiveSession {
    pub state: Arc<SessionState>,
    pub mode: SessionMode,
    pub direction: Direction,
    pub streamer: Streamer,
    pub source_tx: Option<tokio::sync::mpsc::Sender<SourceCommand>>,
    pub sink_tx: Option<tokio::sync::mpsc::Sender<SinkCommand>>,
    pub workers: Vec<JoinHandle<()>>,
    pub monitor: Option<MonitorHandle>,
}

impl ActiveSession {
    /// Returns `true` if the stream ended and all workers are idle.
    pub fn is_settled(&self) -> bool {
        self.state.is_settled()
    }

    /// Stops the stream, joins all workers and releases the device.
    ///
    /// Queues are dropped with the workers that own them.
    pub async fn shutdown(mut self) -> SessionStats {
        self.streamer.request_stop();
        let mut streamer = self.streamer;
        // Closing joins the backend's stream thread.
        if let Err(e) = tokio::task::spawn_blocking(move || streamer.close()).await {
            tracing::error!("closing the stream failed: {e}");
        }
        self.state.mark_finishing();
        self.source_tx = None;
        self.sink_tx = None;

        for result in futures::future::join_all(self.workers.drain(..)).await {
            if let Err(e) = result {
                tracing::error!("worker task failed: {e}");
            }
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.join().await;
        }
        self.state
            .state
            .store(StreamState::Stopped as u8, Ordering::SeqCst);

        let stats = self.state.stats();
        tracing::info!(
            direction = ?self.direction,
            mode = ?self.mode,
            ?stats,
            "session stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_new() {
        let state = SessionState::new();
        assert!(!state.is_running());
        assert!(!state.is_finished());
        assert_eq!(state.stream_state(), StreamState::Stopped);
        assert_eq!(state.stats(), SessionStats::default());
    }

    #[test]
    fn test_mark_finishing() {
        let state = SessionState::new();
        state.running.store(true, Ordering::SeqCst);
        state.mark_finishing();
        assert!(state.is_finished());
        assert!(!state.is_running());
        assert_eq!(state.stream_state(), StreamState::Finishing);
        assert!(!state.is_settled());

        state.stream_ended.store(true, Ordering::SeqCst);
        assert!(state.is_settled());
    }

    #[test]
    fn test_direction_from_counts() {
        assert_eq!(Direction::from_counts(2, 2), Some(Direction::Duplex));
        assert_eq!(Direction::from_counts(0, 1), Some(Direction::Playback));
        assert_eq!(Direction::from_counts(1, 0), Some(Direction::Capture));
        assert_eq!(Direction::from_counts(0, 0), None);
        assert!(Direction::Duplex.captures() && Direction::Duplex.plays());
    }

    #[test]
    fn test_playback_item_end() {
        let item = PlaybackItem::new();
        assert_eq!(item.end(), None);
        item.set_end(4096);
        assert_eq!(item.end(), Some(4096));
    }

    #[test]
    fn test_continuous_transfer_finishes_when_capture_done() {
        let state = Arc::new(SessionState::new());
        state.running.store(true, Ordering::SeqCst);
        let capture = Arc::new(CaptureItem::new());
        let receiver: Arc<dyn CaptureReceiver> =
            Arc::new(crate::ChannelReceiver::new(tokio::sync::mpsc::channel(4).0));

        let transfer = Transfer::new(
            Arc::clone(&state),
            SessionMode::Continuous,
            None,
            Some(Arc::clone(&capture)),
            Some(receiver),
            Duration::from_millis(1),
        );
        assert!(!transfer.is_finished());

        capture.complete();
        assert!(transfer.is_finished());
        assert!(!state.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_start_times_out() {
        let state = SessionState::new();
        let started =
            wait_for_start(&state, Duration::from_millis(100), Duration::from_millis(5)).await;
        assert!(!started);

        state.finished.store(true, Ordering::SeqCst);
        assert!(wait_for_start(&state, Duration::from_millis(100), Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_transfer_reports_failure() {
        let state = Arc::new(SessionState::new());
        state.mark_finishing();
        state.stream_ended.store(true, Ordering::SeqCst);
        *state.failure.lock() = Some("unplugged".to_string());

        let transfer = Transfer::new(
            Arc::clone(&state),
            SessionMode::Finite { frames: 10 },
            None,
            None,
            None,
            Duration::from_millis(1),
        );
        assert!(transfer.is_finished());
        assert!(matches!(
            transfer.wait().await,
            Err(StreamError::DeviceFailed { ref reason }) if reason == "unplugged"
        ));
    }
}
