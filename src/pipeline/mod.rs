//! Audio pipeline components.
//!
//! The pipeline connects application buffers to the audio callback through
//! lock-free queues:
//!
//! ```text
//! Generator → Source task → playback queue ┐
//!                                          ├→ audio callback ⇄ device
//! Receiver  ← Sink task   ← capture queue  ┘        │
//!                                       monitor queue → Monitor
//! ```
//!
//! - **Block queue**: lock-free SPSC queue, the only path across the
//!   real-time boundary besides atomics
//! - **Streamer**: the stream state machine and the callback itself
//! - **Source / Sink**: tokio tasks doing everything the callback must not
//!
//! The callback never blocks: a missing playback block becomes silence and
//! a full capture queue drops the block, both counted.

mod queue;
mod sink;
mod source;
mod streamer;

pub use queue::{block_queue, BlockConsumer, BlockProducer};
pub(crate) use sink::{spawn_sink, SinkCommand, SinkWorker};
pub(crate) use source::{spawn_source, SourceCommand, SourceWorker, WorkerTiming};
pub(crate) use streamer::{StreamCallback, Streamer};
pub use streamer::StreamState;
