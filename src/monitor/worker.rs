//! Monitor loop, as a tokio task or a dedicated thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{MonitorInfo, MonitorMode, MonitorSink, MonitorSpec, RollingWindow};
use crate::pipeline::BlockConsumer;
use crate::session::{wait_for_start, SessionState};
use crate::StreamError;

/// Drains the monitor queue into rolling windows.
pub(crate) struct MonitorCore {
    consumer: BlockConsumer,
    window: RollingWindow,
    scratch: Vec<f32>,
    state: Arc<SessionState>,
}

impl MonitorCore {
    pub fn new(consumer: BlockConsumer, info: &MonitorInfo, state: Arc<SessionState>) -> Self {
        let window = RollingWindow::new(
            info.window_frames,
            &[info.capture_channels, info.playback_channels],
        );
        let scratch = vec![0.0; info.window_frames * window.width()];
        Self {
            consumer,
            window,
            scratch,
            state,
        }
    }

    /// Moves up to one window of frames into the rolling windows.
    fn drain(&mut self) -> usize {
        let width = self.window.width();
        if width == 0 {
            return 0;
        }
        let mut total = 0;
        while total < self.window.frames() {
            let want = self.window.frames() - total;
            let got = self.consumer.pop_into(&mut self.scratch[..want * width]);
            if got == 0 {
                break;
            }
            self.window.push_interleaved(&self.scratch[..got * width]);
            total += got;
        }
        total
    }

    /// Runs one monitor tick.
    ///
    /// Returns `false` once the stream stopped and nothing is left to show.
    fn step(&mut self, sink: &mut dyn MonitorSink) -> bool {
        // Read the flag first so frames pushed right before the stream
        // stopped are still drained.
        let running = self.state.is_running();
        let frames = self.drain();
        if frames > 0 {
            sink.process_data(self.window.windows());
        }
        frames > 0 || running
    }
}

/// A spawned monitor loop.
pub(crate) enum MonitorHandle {
    Task(JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
}

impl MonitorHandle {
    /// Waits for the loop to tear down its sink.
    pub async fn join(self) {
        match self {
            Self::Task(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!("monitor task failed: {e}");
                }
            }
            Self::Thread(handle) => {
                let joined = tokio::task::spawn_blocking(move || handle.join()).await;
                if !matches!(joined, Ok(Ok(()))) {
                    tracing::error!("monitor thread panicked");
                }
            }
        }
    }
}

fn wait_for_start_blocking(state: &SessionState, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !state.is_running() && !state.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(poll);
    }
    true
}

/// Starts the monitor loop described by `spec`.
pub(crate) fn spawn_monitor(
    spec: &MonitorSpec,
    consumer: BlockConsumer,
    info: MonitorInfo,
    state: Arc<SessionState>,
    start_timeout: Duration,
    poll: Duration,
) -> Result<MonitorHandle, StreamError> {
    let interval = spec.interval();
    let mut sink = spec.create_sink();
    let mut core = MonitorCore::new(consumer, &info, Arc::clone(&state));

    tracing::debug!(?info, fps = spec.fps(), mode = ?spec.mode(), "starting monitor");
    state.workers_live.fetch_add(1, Ordering::SeqCst);

    match spec.mode() {
        MonitorMode::Task => Ok(MonitorHandle::Task(tokio::spawn(async move {
            sink.setup(&info);
            if wait_for_start(&state, start_timeout, poll).await {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !core.step(sink.as_mut()) {
                        break;
                    }
                }
            }
            sink.tear_down();
            tracing::debug!("monitor task stopped");
            state.workers_live.fetch_sub(1, Ordering::SeqCst);
        }))),
        MonitorMode::Thread => {
            let thread_state = Arc::clone(&state);
            let spawned = std::thread::Builder::new()
                .name("realtime-sound-monitor".into())
                .spawn(move || {
                    sink.setup(&info);
                    if wait_for_start_blocking(&thread_state, start_timeout, poll) {
                        loop {
                            let started = Instant::now();
                            if !core.step(sink.as_mut()) {
                                break;
                            }
                            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                                std::thread::sleep(rest);
                            }
                        }
                    }
                    sink.tear_down();
                    tracing::debug!("monitor thread stopped");
                    thread_state.workers_live.fetch_sub(1, Ordering::SeqCst);
                });
            match spawned {
                Ok(handle) => Ok(MonitorHandle::Thread(handle)),
                Err(e) => {
                    state.workers_live.fetch_sub(1, Ordering::SeqCst);
                    Err(StreamError::BackendError(format!(
                        "failed to spawn monitor thread: {e}"
                    )))
                }
            }
        }
    }
}
