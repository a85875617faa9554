//! Source worker: feeds playback material into the playback queue.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::emit;
use crate::generator::BlockGenerator;
use crate::pipeline::BlockProducer;
use crate::session::{wait_for_start, PlaybackItem, SessionState};
use crate::{EventCallback, SampleBlock, StreamEvent};

/// Request sent to a running Source worker.
pub(crate) enum SourceCommand {
    /// Plays `generator` next, abandoning whatever is playing.
    Replace {
        generator: Box<dyn BlockGenerator>,
        item: Arc<PlaybackItem>,
    },
}

/// Timing knobs shared by the workers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerTiming {
    pub block_size: usize,
    pub timeout: Duration,
    pub start_timeout: Duration,
    pub poll: Duration,
}

struct Current {
    generator: Box<dyn BlockGenerator>,
    item: Arc<PlaybackItem>,
    pushed: bool,
}

/// Pulls blocks from the active generator and pushes them for the callback.
pub(crate) struct SourceWorker {
    producer: BlockProducer,
    state: Arc<SessionState>,
    commands: mpsc::Receiver<SourceCommand>,
    current: Option<Current>,
    timing: WorkerTiming,
    events: Option<EventCallback>,
    reported_underruns: u64,
}

impl SourceWorker {
    pub fn new(
        producer: BlockProducer,
        state: Arc<SessionState>,
        commands: mpsc::Receiver<SourceCommand>,
        timing: WorkerTiming,
        events: Option<EventCallback>,
    ) -> Self {
        Self {
            producer,
            state,
            commands,
            current: None,
            timing,
            events,
            reported_underruns: 0,
        }
    }

    /// Installs the first item before the worker starts.
    pub fn with_generator(
        mut self,
        generator: Box<dyn BlockGenerator>,
        item: Arc<PlaybackItem>,
    ) -> Self {
        self.install(generator, item);
        self
    }

    fn position(&self) -> u64 {
        self.state.source_position.load(Ordering::SeqCst)
    }

    fn install(&mut self, generator: Box<dyn BlockGenerator>, item: Arc<PlaybackItem>) {
        if let Some(previous) = self.current.take() {
            tracing::debug!("source: replacing unfinished item");
            previous.item.set_end(self.position());
        }
        self.state
            .generator_installed
            .store(false, Ordering::SeqCst);
        self.current = Some(Current {
            generator,
            item,
            pushed: false,
        });
    }

    fn handle(&mut self, command: SourceCommand) {
        match command {
            SourceCommand::Replace { generator, item } => self.install(generator, item),
        }
    }

    fn report_underruns(&mut self) {
        let total = self.state.underrun_frames.load(Ordering::Relaxed);
        let delta = total - self.reported_underruns;
        if delta > 0 {
            self.reported_underruns = total;
            tracing::warn!(frames = delta, total, "playback underrun");
            emit(
                self.events.as_ref(),
                StreamEvent::Underrun { frames: delta },
            );
        }
    }

    /// Pushes one block, retrying while the session runs.
    ///
    /// Returns `false` if the session ended before the block fit.
    async fn push(&mut self, block: SampleBlock) -> bool {
        let frames = block.frames() as u64;
        let mut pending = block;
        loop {
            match self.producer.push_block(pending, self.timing.timeout).await {
                Ok(()) => {
                    self.state
                        .source_position
                        .fetch_add(frames, Ordering::SeqCst);
                    return true;
                }
                Err(back) => {
                    if !self.state.is_running() {
                        return false;
                    }
                    pending = back;
                }
            }
        }
    }

    async fn produce(&mut self) {
        let block_size = self.timing.block_size;
        let Some(current) = self.current.as_mut() else {
            return;
        };

        match current.generator.next_block(block_size) {
            Some(block) if !block.is_empty() => {
                let block = if block.frames() > block_size {
                    block.slice_frames(0, block_size)
                } else {
                    block
                };
                if self.push(block).await {
                    if let Some(current) = self.current.as_mut() {
                        if !current.pushed {
                            current.pushed = true;
                            self.state
                                .generator_installed
                                .store(true, Ordering::SeqCst);
                        }
                    }
                }
            }
            _ => self.finish_item().await,
        }
    }

    async fn finish_item(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        self.state
            .generator_installed
            .store(false, Ordering::SeqCst);

        let end = self.position();
        current.item.set_end(end);
        tracing::debug!(position = end, "source: item exhausted");
        emit(
            self.events.as_ref(),
            StreamEvent::PlaybackDrained { position: end },
        );

        let silence = SampleBlock::zeros(self.timing.block_size, self.producer.channels());
        self.push(silence).await;
    }

    async fn idle(&mut self) {
        match tokio::time::timeout(self.timing.timeout, self.commands.recv()).await {
            Ok(Some(command)) => self.handle(command),
            Ok(None) => tokio::time::sleep(self.timing.timeout).await,
            Err(_) => {}
        }
    }

    async fn run(mut self) {
        if wait_for_start(&self.state, self.timing.start_timeout, self.timing.poll).await {
            tracing::debug!("source worker started");
            while self.state.is_running() {
                while let Ok(command) = self.commands.try_recv() {
                    self.handle(command);
                }
                self.report_underruns();
                if self.current.is_some() {
                    self.produce().await;
                } else {
                    self.idle().await;
                }
            }
        } else {
            tracing::warn!("source worker gave up waiting for the stream to start");
        }

        self.report_underruns();
        if let Some(current) = self.current.take() {
            current.item.set_end(self.position());
        }
        tracing::debug!(position = self.position(), "source worker stopped");
        self.state.workers_live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawns a Source worker on the tokio runtime.
pub(crate) fn spawn_source(worker: SourceWorker) -> JoinHandle<()> {
    worker.state.workers_live.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(worker.run())
}
