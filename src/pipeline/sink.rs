//! Sink worker: drains the capture queue into the active receiver.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::emit;
use crate::pipeline::{BlockConsumer, WorkerTiming};
use crate::receiver::CaptureReceiver;
use crate::session::{wait_for_start, CaptureItem, SessionMode, SessionState};
use crate::{EventCallback, SampleBlock, SinkError, StreamEvent};

/// Request sent to a running Sink worker.
pub(crate) enum SinkCommand {
    /// Delivers the next `frames` captured frames to `receiver`.
    Replace {
        receiver: Arc<dyn CaptureReceiver>,
        frames: u64,
        item: Arc<CaptureItem>,
    },
}

/// A continuous-mode request still waiting for its frames.
struct PendingCapture {
    item: Arc<CaptureItem>,
    /// Value of `captured_frames` once the callback took the whole budget.
    until: u64,
}

/// Moves captured blocks from the callback to a [`CaptureReceiver`].
///
/// With no receiver installed, captured blocks are discarded.
pub(crate) struct SinkWorker {
    consumer: BlockConsumer,
    state: Arc<SessionState>,
    mode: SessionMode,
    commands: mpsc::Receiver<SinkCommand>,
    receiver: Option<Arc<dyn CaptureReceiver>>,
    pending: Option<PendingCapture>,
    sample_rate: u32,
    timing: WorkerTiming,
    events: Option<EventCallback>,
    reported_overruns: u64,
    reported_warnings: u64,
}

impl SinkWorker {
    pub fn new(
        consumer: BlockConsumer,
        state: Arc<SessionState>,
        mode: SessionMode,
        commands: mpsc::Receiver<SinkCommand>,
        sample_rate: u32,
        timing: WorkerTiming,
        events: Option<EventCallback>,
    ) -> Self {
        Self {
            consumer,
            state,
            mode,
            commands,
            receiver: None,
            pending: None,
            sample_rate,
            timing,
            events,
            reported_overruns: 0,
            reported_warnings: 0,
        }
    }

    /// Installs the receiver of a finite session.
    pub fn with_receiver(mut self, receiver: Arc<dyn CaptureReceiver>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    async fn start_receiver(&mut self, receiver: &Arc<dyn CaptureReceiver>) {
        if let Err(e) = receiver.on_start(self.sample_rate).await {
            self.report_receiver_error(receiver.name(), &e);
        }
    }

    async fn stop_receiver(&mut self, receiver: &Arc<dyn CaptureReceiver>) {
        if let Err(e) = receiver.on_stop().await {
            self.report_receiver_error(receiver.name(), &e);
        }
    }

    fn report_receiver_error(&self, name: &str, error: &SinkError) {
        tracing::warn!(receiver = name, %error, "receiver error");
        emit(
            self.events.as_ref(),
            StreamEvent::ReceiverError {
                receiver_name: name.to_string(),
                error: error.to_string(),
            },
        );
    }

    async fn handle(&mut self, command: SinkCommand) {
        match command {
            SinkCommand::Replace {
                receiver,
                frames,
                item,
            } => {
                self.flush().await;
                if let Some(previous) = self.receiver.take() {
                    self.stop_receiver(&previous).await;
                }
                if let Some(previous) = self.pending.take() {
                    previous.item.complete();
                }
                self.start_receiver(&receiver).await;
                tracing::debug!(receiver = receiver.name(), frames, "sink: receiver installed");
                self.receiver = Some(receiver);
                if self.mode == SessionMode::Continuous {
                    let until = self.state.captured_frames.load(Ordering::Acquire) + frames;
                    self.state.capture_budget.store(frames, Ordering::SeqCst);
                    self.pending = Some(PendingCapture { item, until });
                }
            }
        }
    }

    async fn deliver(&mut self, block: SampleBlock) {
        let Some(receiver) = self.receiver.clone() else {
            return;
        };
        match receiver.write(&block).await {
            Ok(_) => {}
            Err(SinkError::Overrun { dropped_frames }) => {
                self.state
                    .receiver_overrun_frames
                    .fetch_add(dropped_frames as u64, Ordering::Relaxed);
                self.report_receiver_error(
                    receiver.name(),
                    &SinkError::Overrun { dropped_frames },
                );
            }
            Err(e) => self.report_receiver_error(receiver.name(), &e),
        }
    }

    /// Closes the pending request once the callback accounted its whole
    /// budget and every captured frame of it was delivered.
    async fn settle_request(&mut self) {
        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        if self.state.captured_frames.load(Ordering::Acquire) < pending.until
            || self.consumer.available_frames() > 0
        {
            return;
        }
        if let Some(receiver) = self.receiver.take() {
            self.stop_receiver(&receiver).await;
            tracing::debug!(receiver = receiver.name(), "sink: request delivered");
        }
        if let Some(pending) = self.pending.take() {
            pending.item.complete();
        }
    }

    /// Delivers everything already queued.
    async fn flush(&mut self) {
        while let Some(block) = self.consumer.try_pop_block(self.timing.block_size) {
            self.deliver(block).await;
        }
    }

    fn report_counters(&mut self) {
        let overruns = self.state.capture_overrun_frames.load(Ordering::Relaxed);
        let delta = overruns - self.reported_overruns;
        if delta > 0 {
            self.reported_overruns = overruns;
            tracing::warn!(dropped_frames = delta, total = overruns, "capture overrun");
            emit(
                self.events.as_ref(),
                StreamEvent::Overrun {
                    dropped_frames: delta,
                },
            );
        }

        let warnings = self.state.device_warnings.load(Ordering::Relaxed);
        if warnings > self.reported_warnings {
            self.reported_warnings = warnings;
            let status = self.state.last_status().to_string();
            tracing::warn!(warnings, %status, "device reported stream problems");
            emit(
                self.events.as_ref(),
                StreamEvent::DeviceStatus { warnings, status },
            );
        }
    }

    async fn run(mut self) {
        if wait_for_start(&self.state, self.timing.start_timeout, self.timing.poll).await {
            tracing::debug!("sink worker started");
            if let Some(receiver) = self.receiver.clone() {
                self.start_receiver(&receiver).await;
            }

            loop {
                while let Ok(command) = self.commands.try_recv() {
                    self.handle(command).await;
                }
                match self
                    .consumer
                    .pop_block(self.timing.block_size, self.timing.timeout)
                    .await
                {
                    Some(block) => self.deliver(block).await,
                    None if !self.state.is_running() => break,
                    None => {}
                }
                self.settle_request().await;
                self.report_counters();
            }

            self.flush().await;
            self.report_counters();
            if let Some(receiver) = self.receiver.take() {
                self.stop_receiver(&receiver).await;
            }
            if let Some(pending) = self.pending.take() {
                pending.item.complete();
            }
        } else {
            tracing::warn!("sink worker gave up waiting for the stream to start");
        }

        tracing::debug!("sink worker stopped");
        self.state.workers_live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawns a Sink worker on the tokio runtime.
pub(crate) fn spawn_sink(worker: SinkWorker) -> JoinHandle<()> {
    worker.state.workers_live.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(worker.run())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::block_queue;
    use crate::{event_callback, BufferAccumulator, ChannelReceiver};
    use parking_lot::Mutex;

    fn timing() -> WorkerTiming {
        WorkerTiming {
            block_size: 4,
            timeout: Duration::from_millis(5),
            start_timeout: Duration::from_millis(200),
            poll: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_sink_drains_after_finish() {
        let state = Arc::new(SessionState::new());
        let (mut tx, rx) = block_queue(8, 4, 1);
        let (_cmd_tx, cmd_rx) = mpsc::channel(4);
        let buffer = Arc::new(BufferAccumulator::new(12, 1));

        let samples: Vec<f32> = (0..12).map(|i| i as f32).collect();
        assert!(tx.try_push(&samples));
        state.mark_finishing();

        let worker = SinkWorker::new(
            rx,
            Arc::clone(&state),
            SessionMode::Finite { frames: 12 },
            cmd_rx,
            48000,
            timing(),
            None,
        )
        .with_receiver(Arc::clone(&buffer) as Arc<dyn CaptureReceiver>);
        spawn_sink(worker).await.unwrap();

        assert!(buffer.is_complete());
        assert_eq!(buffer.take().samples(), samples.as_slice());
        assert_eq!(state.workers_live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sink_counts_receiver_overrun() {
        let state = Arc::new(SessionState::new());
        let (mut tx, rx) = block_queue(8, 4, 1);
        let (_cmd_tx, cmd_rx) = mpsc::channel(4);
        let buffer = Arc::new(BufferAccumulator::new(6, 1));
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);

        assert!(tx.try_push(&[0.5; 8]));
        state.mark_finishing();

        let worker = SinkWorker::new(
            rx,
            Arc::clone(&state),
            SessionMode::Finite { frames: 6 },
            cmd_rx,
            48000,
            timing(),
            Some(event_callback(move |e| seen.lock().push(e))),
        )
        .with_receiver(Arc::clone(&buffer) as Arc<dyn CaptureReceiver>);
        spawn_sink(worker).await.unwrap();

        assert_eq!(buffer.frames(), 6);
        assert_eq!(state.stats().receiver_overrun_frames, 2);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, StreamEvent::ReceiverError { receiver_name, .. } if receiver_name == "buffer")));
    }

    #[tokio::test]
    async fn test_sink_replace_arms_capture_budget() {
        let state = Arc::new(SessionState::new());
        state.running.store(true, Ordering::SeqCst);
        let (mut tx, rx) = block_queue(8, 4, 1);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        let worker = SinkWorker::new(
            rx,
            Arc::clone(&state),
            SessionMode::Continuous,
            cmd_rx,
            48000,
            timing(),
            None,
        );
        let handle = spawn_sink(worker);

        // Nothing installed: captured blocks are discarded.
        assert!(tx.try_push(&[0.1; 4]));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let buffer = Arc::new(BufferAccumulator::new(8, 1));
        cmd_tx
            .send(SinkCommand::Replace {
                receiver: Arc::clone(&buffer) as Arc<dyn CaptureReceiver>,
                frames: 8,
                item: Arc::new(CaptureItem::new()),
            })
            .await
            .unwrap();
        while state.capture_budget.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(state.capture_budget.load(Ordering::SeqCst), 8);

        assert!(tx.try_push(&[0.7; 8]));
        while !buffer.is_complete() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(buffer.take().samples(), &[0.7; 8]);

        state.mark_finishing();
        handle.await.unwrap();
    }

    #[test]
    fn test_sink_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let (_tx, rx) = block_queue(4, 4, 1);
        let (_cmd_tx, cmd_rx) = mpsc::channel(4);
        let worker = SinkWorker::new(
            rx,
            Arc::new(SessionState::new()),
            SessionMode::Continuous,
            cmd_rx,
            48000,
            timing(),
            None,
        );
        let run = worker.run();
        assert_send(&run);
    }

    #[tokio::test]
    async fn test_sink_completes_request_for_open_ended_receiver() {
        let state = Arc::new(SessionState::new());
        state.running.store(true, Ordering::SeqCst);
        let (mut tx, rx) = block_queue(8, 4, 1);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let worker = SinkWorker::new(
            rx,
            Arc::clone(&state),
            SessionMode::Continuous,
            cmd_rx,
            48000,
            timing(),
            None,
        );
        let handle = spawn_sink(worker);

        let (block_tx, mut block_rx) = mpsc::channel(16);
        let receiver = Arc::new(ChannelReceiver::new(block_tx));
        assert!(!receiver.is_complete());
        let item = Arc::new(CaptureItem::new());
        cmd_tx
            .send(SinkCommand::Replace {
                receiver: receiver as Arc<dyn CaptureReceiver>,
                frames: 8,
                item: Arc::clone(&item),
            })
            .await
            .unwrap();
        while state.capture_budget.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Stand in for the callback: push the budget, then account it.
        state.capture_budget.store(0, Ordering::SeqCst);
        assert!(tx.try_push(&[0.2; 8]));
        state.captured_frames.fetch_add(8, Ordering::Release);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !item.is_done() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let mut delivered = 0;
        while let Ok(block) = block_rx.try_recv() {
            delivered += block.frames();
        }
        assert_eq!(delivered, 8);

        state.mark_finishing();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sink_replace_completes_previous_request() {
        let state = Arc::new(SessionState::new());
        state.running.store(true, Ordering::SeqCst);
        let (_tx, rx) = block_queue(8, 4, 1);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let handle = spawn_sink(SinkWorker::new(
            rx,
            Arc::clone(&state),
            SessionMode::Continuous,
            cmd_rx,
            48000,
            timing(),
            None,
        ));

        let first = Arc::new(CaptureItem::new());
        let second = Arc::new(CaptureItem::new());
        for item in [&first, &second] {
            cmd_tx
                .send(SinkCommand::Replace {
                    receiver: Arc::new(BufferAccumulator::new(100, 1)),
                    frames: 100,
                    item: Arc::clone(item),
                })
                .await
                .unwrap();
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            while !first.is_done() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert!(!second.is_done());

        state.mark_finishing();
        handle.await.unwrap();
        assert!(second.is_done());
    }

    #[tokio::test]
    async fn test_sink_exits_when_never_started() {
        let state = Arc::new(SessionState::new());
        let (_tx, rx) = block_queue(4, 4, 1);
        let (_cmd_tx, cmd_rx) = mpsc::channel(4);
        let worker = SinkWorker::new(
            rx,
            Arc::clone(&state),
            SessionMode::Finite { frames: 4 },
            cmd_rx,
            48000,
            timing(),
            None,
        );
        spawn_sink(worker).await.unwrap();
        assert_eq!(state.workers_live.load(Ordering::SeqCst), 0);
    }
}
