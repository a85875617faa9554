//! The real-time core: stream state machine and audio callback.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::backend::{
    AudioBackend, BackendStream, CallbackFlow, CallbackStatus, RealtimeCallback, StreamEnd,
    StreamParams,
};
use crate::pipeline::{BlockConsumer, BlockProducer};
use crate::session::{SessionMode, SessionState};
use crate::{ChannelSelection, StreamError};

/// Lifecycle of the backend stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// No stream is open.
    Stopped = 0,
    /// The backend is opening the stream.
    Starting = 1,
    /// The callback is live and workers may act.
    Running = 2,
    /// The callback completed; the stream is winding down.
    Finishing = 3,
}

impl StreamState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Finishing,
            _ => Self::Stopped,
        }
    }
}

/// Owns the backend stream of one session.
pub(crate) struct Streamer {
    state: Arc<SessionState>,
    stream: Option<Box<dyn BackendStream>>,
}

impl Streamer {
    /// Opens the backend stream and publishes `running`.
    ///
    /// Moves Stopped → Starting → Running. `running` is set exactly once,
    /// after the backend confirmed the stream is open, unless the callback
    /// already completed.
    pub fn start_streaming(
        backend: &dyn AudioBackend,
        params: &StreamParams,
        callback: StreamCallback,
        state: Arc<SessionState>,
    ) -> Result<Self, StreamError> {
        if state
            .state
            .compare_exchange(
                StreamState::Stopped as u8,
                StreamState::Starting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(StreamError::SessionActive {
                operation: "start_streaming",
            });
        }

        let finished_state = Arc::clone(&state);
        let on_finished = Box::new(move |end: StreamEnd| {
            match &end {
                StreamEnd::Failed(reason) => {
                    tracing::error!("stream failed: {reason}");
                    *finished_state.failure.lock() = Some(reason.clone());
                }
                StreamEnd::Completed | StreamEnd::Closed => {
                    tracing::debug!(?end, "stream ended");
                }
            }
            finished_state.mark_finishing();
            finished_state
                .state
                .store(StreamState::Stopped as u8, Ordering::SeqCst);
            finished_state.stream_ended.store(true, Ordering::Release);
        });

        let stream = match backend.open_stream(params, Box::new(callback), on_finished) {
            Ok(stream) => stream,
            Err(e) => {
                state
                    .state
                    .store(StreamState::Stopped as u8, Ordering::SeqCst);
                return Err(e);
            }
        };

        if state
            .state
            .compare_exchange(
                StreamState::Starting as u8,
                StreamState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            state.running.store(true, Ordering::Release);
        }

        Ok(Self {
            state,
            stream: Some(stream),
        })
    }

    /// Asks the callback to complete on its next tick.
    pub fn request_stop(&self) {
        self.state.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Closes the backend stream, waiting for its finished callback.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        self.state.stream_ended.store(true, Ordering::Release);
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.close();
    }
}

/// The code run by the backend once per hardware block.
///
/// All buffers are allocated up front; `process` only touches preallocated
/// scratch, the SPSC queues and atomics.
pub(crate) struct StreamCallback {
    state: Arc<SessionState>,
    mode: SessionMode,
    inputs: ChannelSelection,
    outputs: ChannelSelection,
    capture_tx: Option<BlockProducer>,
    playback_rx: Option<BlockConsumer>,
    monitor_tx: Option<BlockProducer>,
    capture: Vec<f32>,
    playback: Vec<f32>,
    max_frames: usize,
    captured: u64,
    played: u64,
    primed: bool,
}

impl StreamCallback {
    pub fn new(
        state: Arc<SessionState>,
        mode: SessionMode,
        inputs: ChannelSelection,
        outputs: ChannelSelection,
        max_frames: usize,
    ) -> Self {
        let capture = vec![0.0; max_frames * inputs.count() as usize];
        let playback = vec![0.0; max_frames * outputs.count() as usize];
        Self {
            state,
            mode,
            inputs,
            outputs,
            capture_tx: None,
            playback_rx: None,
            monitor_tx: None,
            capture,
            playback,
            max_frames,
            captured: 0,
            played: 0,
            primed: false,
        }
    }

    pub fn with_capture(mut self, tx: BlockProducer) -> Self {
        self.capture_tx = Some(tx);
        self
    }

    pub fn with_playback(mut self, rx: BlockConsumer) -> Self {
        self.playback_rx = Some(rx);
        self
    }

    pub fn with_monitor(mut self, tx: BlockProducer) -> Self {
        self.monitor_tx = Some(tx);
        self
    }

    fn remaining(total: u64, done: u64, frames: usize) -> usize {
        total.saturating_sub(done).min(frames as u64) as usize
    }

    /// Takes up to `frames` from the continuous-mode capture budget.
    #[inline]
    fn take_budget(&self, frames: usize) -> usize {
        let mut taken = 0;
        let _ = self
            .state
            .capture_budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |budget| {
                taken = budget.min(frames as u64);
                (taken > 0).then(|| budget - taken)
            });
        taken as usize
    }

    /// Starts the finite playback cursor on the first tick that finds
    /// material queued. A duplex capture starts on that same tick.
    #[inline]
    fn prime(&mut self, running: bool) {
        if self.primed || !running || !matches!(self.mode, SessionMode::Finite { .. }) {
            return;
        }
        if let Some(rx) = self.playback_rx.as_ref() {
            self.primed = rx.available_frames() > 0;
        }
    }

    #[inline]
    fn run_capture(&mut self, input: &[f32], frames: usize) {
        let width = self.inputs.count() as usize;
        if width == 0 {
            return;
        }
        let device_width = input.len() / frames.max(1);
        self.inputs
            .gather(input, device_width, &mut self.capture, frames);

        let wanted = match self.mode {
            SessionMode::Finite { .. } if self.playback_rx.is_some() && !self.primed => 0,
            SessionMode::Finite { frames: total } => Self::remaining(total, self.captured, frames),
            SessionMode::Continuous => self.take_budget(frames),
        };
        if wanted == 0 {
            return;
        }
        if let Some(tx) = self.capture_tx.as_mut() {
            if !tx.try_push(&self.capture[..wanted * width]) {
                self.state
                    .capture_overrun_frames
                    .fetch_add(wanted as u64, Ordering::Relaxed);
            }
        }
        self.captured += wanted as u64;
        // Published after the push; the Sink reads it to close a request.
        self.state
            .captured_frames
            .fetch_add(wanted as u64, Ordering::Release);
    }

    #[inline]
    fn run_playback(&mut self, output: &mut [f32], frames: usize, running: bool) {
        let width = self.outputs.count() as usize;
        output.fill(0.0);
        if width == 0 {
            return;
        }
        self.playback[..frames * width].fill(0.0);

        if running {
            if let Some(rx) = self.playback_rx.as_mut() {
                match self.mode {
                    SessionMode::Finite { frames: total } => {
                        if self.primed {
                            let wanted = Self::remaining(total, self.played, frames);
                            let got = rx.pop_into(&mut self.playback[..wanted * width]);
                            let short = wanted - got;
                            if short > 0 {
                                self.state
                                    .underrun_frames
                                    .fetch_add(short as u64, Ordering::Relaxed);
                            }
                            self.played += wanted as u64;
                            self.state
                                .played_frames
                                .fetch_add(got as u64, Ordering::Relaxed);
                        }
                    }
                    SessionMode::Continuous => {
                        let got = rx.pop_into(&mut self.playback[..frames * width]);
                        let short = frames - got;
                        if short > 0 && self.state.generator_installed.load(Ordering::Acquire) {
                            self.state
                                .underrun_frames
                                .fetch_add(short as u64, Ordering::Relaxed);
                        }
                        self.played += got as u64;
                        self.state
                            .played_frames
                            .fetch_add(got as u64, Ordering::Relaxed);
                    }
                }
            }
        }

        let device_width = output.len() / frames.max(1);
        self.outputs
            .scatter(&self.playback, output, device_width, frames);
    }

    fn is_complete(&self) -> bool {
        match self.mode {
            SessionMode::Finite { frames: total } => {
                let captured = self.inputs.is_empty() || self.captured >= total;
                let played = self.outputs.is_empty() || self.played >= total;
                captured && played
            }
            SessionMode::Continuous => false,
        }
    }
}

impl RealtimeCallback for StreamCallback {
    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        frames: usize,
        status: CallbackStatus,
    ) -> CallbackFlow {
        if self.state.is_finished() {
            output.fill(0.0);
            return CallbackFlow::Stop;
        }
        self.state.callbacks.fetch_add(1, Ordering::Relaxed);
        if !status.is_empty() {
            self.state.device_warnings.fetch_add(1, Ordering::Relaxed);
            self.state
                .last_status
                .store(status.bits(), Ordering::Relaxed);
        }

        let frames = frames.min(self.max_frames);
        let running = self.state.is_running();

        self.prime(running);
        self.run_capture(input, frames);
        self.run_playback(output, frames, running);

        if let Some(tx) = self.monitor_tx.as_mut() {
            let in_width = self.inputs.count() as usize;
            let out_width = self.outputs.count() as usize;
            if !tx.try_push_pair(
                &self.capture[..frames * in_width],
                in_width,
                &self.playback[..frames * out_width],
                out_width,
                frames,
            ) {
                self.state.monitor_drops.fetch_add(1, Ordering::Relaxed);
            }
        }

        if self.is_complete() || self.state.stop_requested.load(Ordering::Acquire) {
            self.state.mark_finishing();
            return CallbackFlow::Stop;
        }
        CallbackFlow::Continue
    }
}
