//! The device facade: play, record, playrec and continuous mode.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::backend::{AudioBackend, CpalBackend, DeviceInfo, StreamParams};
use crate::event::emit;
use crate::generator::{ArrayGenerator, BlockGenerator};
use crate::monitor::{spawn_monitor, MonitorHandle, MonitorInfo, MonitorSpec};
use crate::pipeline::{
    block_queue, spawn_sink, spawn_source, BlockConsumer, BlockProducer, SinkCommand, SinkWorker,
    SourceCommand, SourceWorker, StreamCallback, Streamer, WorkerTiming,
};
use crate::receiver::{BufferAccumulator, CaptureReceiver};
use crate::session::{
    ActiveSession, CaptureItem, Direction, PlaybackItem, SessionMode, SessionState, SessionStats,
    SessionStatus, Transfer,
};
use crate::{
    event_callback, ChannelSelection, EventCallback, SampleBlock, StreamConfig, StreamError,
    StreamEvent,
};

/// Capacity of the Source and Sink request channels.
/// Requests are rare: one per play or record call.
const COMMAND_CHANNEL_CAPACITY: usize = 4;

/// Lower bound of every polling interval.
const MIN_POLL: Duration = Duration::from_millis(1);

/// The monitor queue of one session, handed out by
/// [`StreamContext::use_external_monitor`].
///
/// Each queued frame holds `capture_channels` capture samples followed by
/// `playback_channels` playback samples. Feed it to a
/// [`RollingWindow`](crate::RollingWindow) to rebuild the windows.
pub struct MonitorFeed {
    /// Reading half of the monitor queue.
    pub consumer: BlockConsumer,
    /// Capture samples per frame.
    pub capture_channels: u16,
    /// Playback samples per frame.
    pub playback_channels: u16,
    /// Session sample rate.
    pub sample_rate: u32,
    /// Flags of the session feeding this queue.
    pub status: SessionStatus,
}

impl std::fmt::Debug for MonitorFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorFeed")
            .field("capture_channels", &self.capture_channels)
            .field("playback_channels", &self.playback_channels)
            .field("sample_rate", &self.sample_rate)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Playback material of one request.
struct PlaybackRequest {
    generator: Box<dyn BlockGenerator>,
    frames: Option<u64>,
}

/// Capture target of one request.
struct CaptureRequest {
    receiver: Arc<dyn CaptureReceiver>,
    frames: u64,
}

/// Streams audio blocks between one device and the application.
///
/// A context owns at most one session at a time. Finite requests
/// ([`play`](Self::play), [`record`](Self::record),
/// [`playrec`](Self::playrec)) open a stream, run to completion and close
/// it. [`turn_on`](Self::turn_on) keeps a stream open instead; requests
/// made while continuous mode is on are queued onto the running stream.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use realtime_sound::StreamContext;
///
/// # async fn run() -> Result<(), realtime_sound::StreamError> {
/// let mut ctx = StreamContext::builder().sample_rate(48000).build()?;
///
/// let take = ctx.record(Duration::from_secs(2), true).await?;
/// let recording = take.recording().unwrap();
///
/// ctx.play(recording, true).await?;
/// # Ok(())
/// # }
/// ```
pub struct StreamContext {
    backend: Arc<dyn AudioBackend>,
    sample_rate: u32,
    inputs: ChannelSelection,
    outputs: ChannelSelection,
    config: StreamConfig,
    events: Option<EventCallback>,
    monitor: Option<MonitorSpec>,
    external_monitor: Option<mpsc::UnboundedSender<MonitorFeed>>,
    session: Option<ActiveSession>,
}

impl StreamContext {
    /// Creates a builder for configuring a context.
    pub fn builder() -> StreamContextBuilder {
        StreamContextBuilder::new()
    }

    /// The device streams are opened on.
    pub fn device(&self) -> &DeviceInfo {
        self.backend.device()
    }

    /// Current sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Device inputs recorded by capture requests.
    pub fn inputs(&self) -> &ChannelSelection {
        &self.inputs
    }

    /// Device outputs used by playback requests.
    pub fn outputs(&self) -> &ChannelSelection {
        &self.outputs
    }

    /// Current stream configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The monitor attached to every session, if any.
    pub fn monitor(&self) -> Option<&MonitorSpec> {
        self.monitor.as_ref()
    }

    /// Returns `true` while a session still streams or drains.
    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_settled())
    }

    /// Returns `true` while continuous mode is on.
    pub fn is_continuous(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.mode == SessionMode::Continuous && !s.is_settled())
    }

    /// Counters of the current or last session.
    pub fn stats(&self) -> Option<SessionStats> {
        self.session.as_ref().map(|s| s.state.stats())
    }

    fn ensure_idle(&self, operation: &'static str) -> Result<(), StreamError> {
        if self.is_active() {
            return Err(StreamError::SessionActive { operation });
        }
        Ok(())
    }

    /// Changes the sample rate of future sessions.
    ///
    /// # Errors
    ///
    /// `SessionActive` while a session runs, `UnsupportedSampleRate` if the
    /// device cannot run at `sample_rate`.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), StreamError> {
        self.ensure_idle("set_sample_rate")?;
        if !self.backend.supports_sample_rate(sample_rate) {
            return Err(StreamError::UnsupportedSampleRate {
                requested: sample_rate,
            });
        }
        self.sample_rate = sample_rate;
        Ok(())
    }

    /// Selects the device inputs to record from.
    ///
    /// # Errors
    ///
    /// `SessionActive` while a session runs, `InvalidChannelSelection` for
    /// out-of-range or duplicate indices.
    pub fn set_inputs(&mut self, channels: &[usize]) -> Result<(), StreamError> {
        self.ensure_idle("set_inputs")?;
        self.inputs = ChannelSelection::new(channels, self.device().max_input_channels)?;
        Ok(())
    }

    /// Selects the device outputs to play on.
    ///
    /// # Errors
    ///
    /// Same as [`set_inputs`](Self::set_inputs).
    pub fn set_outputs(&mut self, channels: &[usize]) -> Result<(), StreamError> {
        self.ensure_idle("set_outputs")?;
        self.outputs = ChannelSelection::new(channels, self.device().max_output_channels)?;
        Ok(())
    }

    /// Replaces the stream configuration of future sessions.
    ///
    /// # Errors
    ///
    /// `SessionActive` while a session runs, `InvalidConfig` if a value is
    /// out of range.
    pub fn set_config(&mut self, config: StreamConfig) -> Result<(), StreamError> {
        self.ensure_idle("set_config")?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Attaches a monitor to future sessions, or detaches it with `None`.
    ///
    /// Returns whether a monitor is now attached. Attaching a monitor ends
    /// any external monitor feed.
    ///
    /// # Errors
    ///
    /// `SessionActive` while a session runs.
    pub fn plug_monitor(&mut self, monitor: Option<MonitorSpec>) -> Result<bool, StreamError> {
        self.ensure_idle("plug_monitor")?;
        if monitor.is_some() {
            self.external_monitor = None;
        }
        self.monitor = monitor;
        Ok(self.monitor.is_some())
    }

    /// Hands the monitor queue of every future session to the caller.
    ///
    /// Each session sends one [`MonitorFeed`]; the feed ends when the
    /// session's status reports finished and the queue is empty. Replaces
    /// any attached monitor.
    ///
    /// # Errors
    ///
    /// `SessionActive` while a session runs.
    pub fn use_external_monitor(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<MonitorFeed>, StreamError> {
        self.ensure_idle("use_external_monitor")?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.monitor = None;
        self.external_monitor = Some(tx);
        Ok(rx)
    }

    /// Plays `data` on the selected outputs.
    ///
    /// Mono data is played on every output; multichannel data on a single
    /// output is downmixed. With `block`, returns once playback completed.
    ///
    /// # Errors
    ///
    /// `InvalidData` for empty or mismatched data, `SessionActive` if a
    /// finite session is still running, backend errors if the stream cannot
    /// be opened, and `DeviceFailed` when blocking on a failed session.
    pub async fn play(&mut self, data: SampleBlock, block: bool) -> Result<Transfer, StreamError> {
        self.require_outputs()?;
        let frames = data.frames() as u64;
        let generator = ArrayGenerator::new(data, self.outputs.count())?;
        let playback = PlaybackRequest {
            generator: Box::new(generator),
            frames: Some(frames),
        };
        self.submit(Some(playback), None, block, "play").await
    }

    /// Plays whatever `generator` produces.
    ///
    /// Outside continuous mode the generator must report its length through
    /// [`BlockGenerator::total_frames`].
    ///
    /// # Errors
    ///
    /// As [`play`](Self::play).
    pub async fn play_generator<G>(&mut self, generator: G, block: bool) -> Result<Transfer, StreamError>
    where
        G: BlockGenerator + 'static,
    {
        self.require_outputs()?;
        if generator.channels() != self.outputs.count() {
            return Err(StreamError::InvalidData {
                reason: format!(
                    "generator produces {} channels but {} outputs are active",
                    generator.channels(),
                    self.outputs.count()
                ),
            });
        }
        let frames = generator.total_frames().map(|f| f as u64);
        let playback = PlaybackRequest {
            generator: Box::new(generator),
            frames,
        };
        self.submit(Some(playback), None, block, "play_generator").await
    }

    /// Records `duration` from the selected inputs into memory.
    ///
    /// The length is rounded to the nearest frame. Fetch the result with
    /// [`Transfer::recording`].
    ///
    /// # Errors
    ///
    /// `InvalidData` for a zero duration or one too long to hold in memory,
    /// otherwise as [`play`](Self::play).
    pub async fn record(&mut self, duration: Duration, block: bool) -> Result<Transfer, StreamError> {
        self.require_inputs()?;
        let frames = self.frames_in(duration)?;
        let receiver = Arc::new(BufferAccumulator::new(frames, self.inputs.count()));
        let frames = frames as u64;
        self.record_into(receiver, frames, block).await
    }

    /// Records `frames` frames into `receiver`.
    ///
    /// # Errors
    ///
    /// As [`record`](Self::record).
    pub async fn record_into(
        &mut self,
        receiver: Arc<dyn CaptureReceiver>,
        frames: u64,
        block: bool,
    ) -> Result<Transfer, StreamError> {
        self.require_inputs()?;
        if frames == 0 {
            return Err(StreamError::InvalidData {
                reason: "recording length must be non-zero".to_string(),
            });
        }
        let capture = CaptureRequest { receiver, frames };
        self.submit(None, Some(capture), block, "record").await
    }

    /// Plays `data` and records the same number of frames on the same
    /// clock.
    ///
    /// # Errors
    ///
    /// As [`play`](Self::play) and [`record`](Self::record).
    pub async fn playrec(&mut self, data: SampleBlock, block: bool) -> Result<Transfer, StreamError> {
        self.require_outputs()?;
        self.require_inputs()?;
        let frames = data.frames() as u64;
        let generator = ArrayGenerator::new(data, self.outputs.count())?;
        let playback = PlaybackRequest {
            generator: Box::new(generator),
            frames: Some(frames),
        };
        let capture = CaptureRequest {
            receiver: Arc::new(BufferAccumulator::new(frames as usize, self.inputs.count())),
            frames,
        };
        self.submit(Some(playback), Some(capture), block, "playrec")
            .await
    }

    /// Opens a stream that stays on until [`turn_off`](Self::turn_off).
    ///
    /// Outputs play silence and inputs are discarded until a request
    /// arrives. Does nothing if continuous mode is already on.
    ///
    /// # Errors
    ///
    /// `SessionActive` if a finite session is running, backend errors if
    /// the stream cannot be opened.
    pub async fn turn_on(&mut self) -> Result<(), StreamError> {
        if self.is_continuous() {
            return Ok(());
        }
        let direction = Direction::from_counts(self.inputs.count(), self.outputs.count())
            .ok_or_else(|| StreamError::invalid_channels(&[], "no channels are selected"))?;
        self.start_session(SessionMode::Continuous, direction, None, None, "turn_on")
            .await?;
        Ok(())
    }

    /// Closes the continuous stream. Does nothing if it is off.
    ///
    /// Pending requests are abandoned; their transfers report finished.
    ///
    /// # Errors
    ///
    /// `ContinuousModeInactive` if a finite session is running instead.
    pub async fn turn_off(&mut self) -> Result<(), StreamError> {
        let Some((mode, settled)) = self.session.as_ref().map(|s| (s.mode, s.is_settled())) else {
            return Ok(());
        };
        match mode {
            SessionMode::Continuous => {
                self.end_session("turned off").await;
                Ok(())
            }
            SessionMode::Finite { .. } if !settled => Err(StreamError::ContinuousModeInactive),
            SessionMode::Finite { .. } => Ok(()),
        }
    }

    /// Stops the current session, finite or continuous, and releases the
    /// device.
    ///
    /// Returns the final counters, or `None` if there was no session.
    pub async fn stop(&mut self) -> Option<SessionStats> {
        if self.session.is_none() {
            return None;
        }
        self.end_session("stopped").await
    }

    fn require_outputs(&self) -> Result<(), StreamError> {
        if self.outputs.is_empty() {
            return Err(StreamError::invalid_channels(&[], "no output channels are selected"));
        }
        Ok(())
    }

    fn require_inputs(&self) -> Result<(), StreamError> {
        if self.inputs.is_empty() {
            return Err(StreamError::invalid_channels(&[], "no input channels are selected"));
        }
        Ok(())
    }

    /// Frames in `duration` at the current rate, rounded to the nearest.
    fn frames_in(&self, duration: Duration) -> Result<usize, StreamError> {
        let too_long = || StreamError::InvalidData {
            reason: format!("a recording of {duration:?} does not fit in memory"),
        };
        let frames = (duration.as_secs_f64() * f64::from(self.sample_rate)).round();
        if frames >= usize::MAX as f64 {
            return Err(too_long());
        }
        let frames = frames as usize;
        frames
            .checked_mul(usize::from(self.inputs.count()))
            .ok_or_else(too_long)?;
        Ok(frames)
    }

    /// Waits between polls: half a block period.
    fn poll_interval(&self) -> Duration {
        (self.config.block_duration(self.sample_rate) / 2).max(MIN_POLL)
    }

    async fn end_session(&mut self, reason: &str) -> Option<SessionStats> {
        let session = self.session.take()?;
        let failure = session.state.failure();
        let stats = session.shutdown().await;
        let reason = match failure {
            Some(failure) => format!("failed: {failure}"),
            None => reason.to_string(),
        };
        emit(
            self.events.as_ref(),
            StreamEvent::SessionStopped { reason },
        );
        Some(stats)
    }

    /// Releases a finished session so a new one can start.
    async fn reap(&mut self, operation: &'static str) -> Result<(), StreamError> {
        match self.session.as_ref().map(ActiveSession::is_settled) {
            Some(false) => Err(StreamError::SessionActive { operation }),
            Some(true) => {
                self.end_session("completed").await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn submit(
        &mut self,
        playback: Option<PlaybackRequest>,
        capture: Option<CaptureRequest>,
        block: bool,
        operation: &'static str,
    ) -> Result<Transfer, StreamError> {
        let transfer = if self.is_continuous() {
            self.queue_requests(playback, capture).await?
        } else {
            self.run_finite(playback, capture, operation).await?
        };
        if block {
            transfer.wait().await?;
        }
        Ok(transfer)
    }

    async fn run_finite(
        &mut self,
        playback: Option<PlaybackRequest>,
        capture: Option<CaptureRequest>,
        operation: &'static str,
    ) -> Result<Transfer, StreamError> {
        let frames = match (&playback, &capture) {
            (Some(p), _) => p.frames.ok_or_else(|| StreamError::InvalidData {
                reason: "generator length is unknown; turn continuous mode on to stream it"
                    .to_string(),
            })?,
            (None, Some(c)) => c.frames,
            (None, None) => 0,
        };
        if frames == 0 {
            return Err(StreamError::InvalidData {
                reason: "nothing to stream".to_string(),
            });
        }

        let direction = match (capture.is_some(), playback.is_some()) {
            (true, true) => Direction::Duplex,
            (true, false) => Direction::Capture,
            _ => Direction::Playback,
        };
        let receiver = capture.map(|c| c.receiver);
        let mode = SessionMode::Finite { frames };
        let (state, item) = self
            .start_session(
                mode,
                direction,
                playback.map(|p| p.generator),
                receiver.clone(),
                operation,
            )
            .await?;

        Ok(Transfer::new(state, mode, item, None, receiver, self.poll_interval()))
    }

    async fn queue_requests(
        &mut self,
        playback: Option<PlaybackRequest>,
        capture: Option<CaptureRequest>,
    ) -> Result<Transfer, StreamError> {
        let poll = self.poll_interval();
        let Some(session) = self.session.as_ref() else {
            return Err(StreamError::ContinuousModeInactive);
        };
        if playback.is_some() && session.source_tx.is_none() {
            return Err(StreamError::invalid_channels(
                &[],
                "continuous stream was opened without outputs",
            ));
        }
        if capture.is_some() && session.sink_tx.is_none() {
            return Err(StreamError::invalid_channels(
                &[],
                "continuous stream was opened without inputs",
            ));
        }

        let mut item = None;
        if let (Some(request), Some(tx)) = (playback, session.source_tx.as_ref()) {
            let playing = Arc::new(PlaybackItem::new());
            tx.send(SourceCommand::Replace {
                generator: request.generator,
                item: Arc::clone(&playing),
            })
            .await
            .map_err(|_| StreamError::BackendError("source worker stopped".to_string()))?;
            item = Some(playing);
        }

        let mut receiver = None;
        let mut recording = None;
        if let (Some(request), Some(tx)) = (capture, session.sink_tx.as_ref()) {
            let capture = Arc::new(CaptureItem::new());
            tx.send(SinkCommand::Replace {
                receiver: Arc::clone(&request.receiver),
                frames: request.frames,
                item: Arc::clone(&capture),
            })
            .await
            .map_err(|_| StreamError::BackendError("sink worker stopped".to_string()))?;
            receiver = Some(request.receiver);
            recording = Some(capture);
        }

        tracing::debug!(
            playback = item.is_some(),
            capture = receiver.is_some(),
            "queued request on continuous stream"
        );
        Ok(Transfer::new(
            Arc::clone(&session.state),
            SessionMode::Continuous,
            item,
            recording,
            receiver,
            poll,
        ))
    }

    /// Starts the monitor of a session, if one is configured.
    fn start_monitor(
        &self,
        state: &Arc<SessionState>,
        capture_channels: u16,
        playback_channels: u16,
        poll: Duration,
    ) -> Result<(Option<BlockProducer>, Option<MonitorHandle>), StreamError> {
        if self.monitor.is_none() && self.external_monitor.is_none() {
            return Ok((None, None));
        }
        let (tx, rx) = block_queue(
            self.config.monitor_queue_blocks,
            self.config.block_size,
            capture_channels + playback_channels,
        );
        let rx = rx.with_poll_interval(poll);

        if let Some(spec) = &self.monitor {
            let info = MonitorInfo {
                sample_rate: self.sample_rate,
                window_frames: spec.window().frames(self.sample_rate).max(1),
                capture_channels,
                playback_channels,
            };
            let handle = spawn_monitor(
                spec,
                rx,
                info,
                Arc::clone(state),
                self.config.start_timeout,
                poll,
            )?;
            return Ok((Some(tx), Some(handle)));
        }

        if let Some(external) = &self.external_monitor {
            let feed = MonitorFeed {
                consumer: rx,
                capture_channels,
                playback_channels,
                sample_rate: self.sample_rate,
                status: SessionStatus::new(Arc::clone(state)),
            };
            if external.send(feed).is_ok() {
                return Ok((Some(tx), None));
            }
            tracing::debug!("external monitor receiver dropped; monitoring disabled");
        }
        Ok((None, None))
    }

    async fn start_session(
        &mut self,
        mode: SessionMode,
        direction: Direction,
        generator: Option<Box<dyn BlockGenerator>>,
        receiver: Option<Arc<dyn CaptureReceiver>>,
        operation: &'static str,
    ) -> Result<(Arc<SessionState>, Option<Arc<PlaybackItem>>), StreamError> {
        self.reap(operation).await?;
        self.config.validate()?;

        let sample_rate = self.sample_rate;
        let block_size = self.config.block_size;
        let queue_blocks = self.config.queue_blocks;
        let poll = self.poll_interval();
        let timing = WorkerTiming {
            block_size,
            timeout: self.config.worker_timeout,
            start_timeout: self.config.start_timeout,
            poll,
        };
        let inputs = if direction.captures() {
            self.inputs.clone()
        } else {
            ChannelSelection::none()
        };
        let outputs = if direction.plays() {
            self.outputs.clone()
        } else {
            ChannelSelection::none()
        };

        let state = Arc::new(SessionState::new());
        let mut callback = StreamCallback::new(
            Arc::clone(&state),
            mode,
            inputs.clone(),
            outputs.clone(),
            block_size,
        );
        let mut workers = Vec::new();
        let mut item = None;

        let source_tx = if direction.plays() {
            let (tx, rx) = block_queue(queue_blocks, block_size, outputs.count());
            callback = callback.with_playback(rx);
            let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
            let mut worker = SourceWorker::new(
                tx.with_poll_interval(poll),
                Arc::clone(&state),
                cmd_rx,
                timing,
                self.events.clone(),
            );
            if let Some(generator) = generator {
                let playing = Arc::new(PlaybackItem::new());
                worker = worker.with_generator(generator, Arc::clone(&playing));
                item = Some(playing);
            }
            workers.push(spawn_source(worker));
            Some(cmd_tx)
        } else {
            None
        };

        let sink_tx = if direction.captures() {
            let (tx, rx) = block_queue(queue_blocks, block_size, inputs.count());
            callback = callback.with_capture(tx);
            let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
            let mut worker = SinkWorker::new(
                rx.with_poll_interval(poll),
                Arc::clone(&state),
                mode,
                cmd_rx,
                sample_rate,
                timing,
                self.events.clone(),
            );
            if let Some(receiver) = receiver {
                worker = worker.with_receiver(receiver);
            }
            workers.push(spawn_sink(worker));
            Some(cmd_tx)
        } else {
            None
        };

        let monitor = match self.start_monitor(&state, inputs.count(), outputs.count(), poll) {
            Ok((tx, handle)) => {
                if let Some(tx) = tx {
                    callback = callback.with_monitor(tx);
                }
                handle
            }
            Err(e) => {
                abandon(&state, workers, None).await;
                return Err(e);
            }
        };

        let params = StreamParams {
            sample_rate,
            block_size,
            device: self.backend.device().id.clone(),
            input_channels: inputs.device_width(),
            output_channels: outputs.device_width(),
            sample_format: self.config.sample_format,
            latency: self.config.latency,
        };
        let backend = Arc::clone(&self.backend);
        let start_state = Arc::clone(&state);
        let started = tokio::task::spawn_blocking(move || {
            Streamer::start_streaming(backend.as_ref(), &params, callback, start_state)
        })
        .await;
        let streamer = match started {
            Ok(Ok(streamer)) => streamer,
            Ok(Err(e)) => {
                tracing::error!("failed to start stream: {e}");
                abandon(&state, workers, monitor).await;
                return Err(e);
            }
            Err(e) => {
                abandon(&state, workers, monitor).await;
                return Err(StreamError::BackendError(format!(
                    "stream start task failed: {e}"
                )));
            }
        };

        tracing::info!(
            device = %self.backend.device().name,
            ?direction,
            ?mode,
            sample_rate,
            block_size,
            inputs = ?inputs.indices(),
            outputs = ?outputs.indices(),
            "session started"
        );
        emit(
            self.events.as_ref(),
            StreamEvent::SessionStarted {
                direction,
                sample_rate,
            },
        );

        self.session = Some(ActiveSession {
            state: Arc::clone(&state),
            mode,
            direction,
            streamer,
            source_tx,
            sink_tx,
            workers,
            monitor,
        });
        Ok((state, item))
    }
}

/// Winds down workers of a session whose stream never started.
async fn abandon(
    state: &SessionState,
    workers: Vec<tokio::task::JoinHandle<()>>,
    monitor: Option<MonitorHandle>,
) {
    state.mark_finishing();
    state
        .stream_ended
        .store(true, std::sync::atomic::Ordering::SeqCst);
    futures::future::join_all(workers).await;
    if let Some(monitor) = monitor {
        monitor.join().await;
    }
}

/// Builder for [`StreamContext`].
///
/// Without an explicit backend, the default cpal device is opened.
///
/// # Example
///
/// ```
/// use realtime_sound::{SimulatedBackend, StreamConfig, StreamContext};
///
/// let ctx = StreamContext::builder()
///     .backend(SimulatedBackend::builder().inputs(4).outputs(2).build())
///     .sample_rate(44100)
///     .inputs(&[0, 2])
///     .with_config(StreamConfig { block_size: 128, ..Default::default() })
///     .on_event(|event| tracing::warn!(?event, "stream event"))
///     .build()?;
/// assert_eq!(ctx.inputs().count(), 2);
/// assert_eq!(ctx.outputs().count(), 2);
/// # Ok::<(), realtime_sound::StreamError>(())
/// ```
#[must_use]
pub struct StreamContextBuilder {
    backend: Option<Arc<dyn AudioBackend>>,
    sample_rate: Option<u32>,
    inputs: Option<Vec<usize>>,
    outputs: Option<Vec<usize>>,
    config: StreamConfig,
    events: Option<EventCallback>,
    monitor: Option<MonitorSpec>,
}

impl Default for StreamContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamContextBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            backend: None,
            sample_rate: None,
            inputs: None,
            outputs: None,
            config: StreamConfig::default(),
            events: None,
            monitor: None,
        }
    }

    /// Streams through `backend` instead of the default cpal device.
    pub fn backend<B: AudioBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Streams through an already shared backend.
    pub fn shared_backend(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the sample rate.
    ///
    /// Default: the device's default rate
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Selects the device inputs to record from.
    ///
    /// Default: every input
    pub fn inputs(mut self, channels: &[usize]) -> Self {
        self.inputs = Some(channels.to_vec());
        self
    }

    /// Selects the device outputs to play on.
    ///
    /// Default: every output
    pub fn outputs(mut self, channels: &[usize]) -> Self {
        self.outputs = Some(channels.to_vec());
        self
    }

    /// Set custom stream configuration.
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include underruns, overruns, receiver errors and session
    /// start/stop.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        self.events = Some(event_callback(callback));
        self
    }

    /// Attaches a monitor to every session.
    pub fn monitor(mut self, monitor: MonitorSpec) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Validates the settings against the device and creates the context.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No backend was given and no default device exists
    /// - The sample rate is not supported by the device
    /// - A channel selection is out of range or has duplicates
    /// - The stream configuration is invalid
    pub fn build(self) -> Result<StreamContext, StreamError> {
        self.config.validate()?;
        let backend: Arc<dyn AudioBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(CpalBackend::open_default()?),
        };
        let device = backend.device().clone();

        let sample_rate = self.sample_rate.unwrap_or(device.default_sample_rate);
        if !backend.supports_sample_rate(sample_rate) {
            return Err(StreamError::UnsupportedSampleRate {
                requested: sample_rate,
            });
        }
        let inputs = match &self.inputs {
            Some(channels) => ChannelSelection::new(channels, device.max_input_channels)?,
            None => ChannelSelection::all(device.max_input_channels),
        };
        let outputs = match &self.outputs {
            Some(channels) => ChannelSelection::new(channels, device.max_output_channels)?,
            None => ChannelSelection::all(device.max_output_channels),
        };

        tracing::debug!(
            device = %device.name,
            sample_rate,
            inputs = ?inputs.indices(),
            outputs = ?outputs.indices(),
            "stream context ready"
        );

        Ok(StreamContext {
            backend,
            sample_rate,
            inputs,
            outputs,
            config: self.config,
            events: self.events,
            monitor: self.monitor,
            external_monitor: None,
            session: None,
        })
    }
}
