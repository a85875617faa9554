//! # realtime-sound
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time block streaming between an audio device and application buffers.
//!
//! `realtime-sound` plays, records and play-records fixed-size blocks of
//! `f32` samples through a device, either as finite sessions that stop by
//! themselves or in a continuous mode that keeps the stream open and
//! accepts new requests on the fly. A rolling-window monitor can observe
//! the streamed audio without ever stalling it.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use realtime_sound::{SampleBlock, StreamContext};
//!
//! let mut ctx = StreamContext::builder()
//!     .sample_rate(48000)
//!     .outputs(&[0, 1])
//!     .on_event(|e| tracing::warn!(?e, "stream event"))
//!     .build()?;
//!
//! // Play one second of silence and record both inputs at the same time
//! let transfer = ctx.playrec(SampleBlock::zeros(48000, 2), true).await?;
//! let recording = transfer.recording().unwrap();
//!
//! // Or keep the device open and queue requests
//! ctx.turn_on().await?;
//! ctx.play(recording, true).await?;
//! ctx.turn_off().await?;
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Audio callback**: runs on the backend's real-time thread and never
//!   blocks, allocates or locks
//! - **Block queues**: lock-free SPSC queues carry blocks across the boundary
//! - **Tokio runtime**: Source and Sink tasks feed and drain the queues,
//!   a Monitor task (or thread) samples the stream at a bounded rate
//!
//! Starved playback turns into silence and a full capture queue drops the
//! block; both are counted in [`SessionStats`] and reported as
//! [`StreamEvent`]s instead of interrupting the stream.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod backend;
mod block;
mod channels;
mod config;
mod context;
mod error;
mod event;
pub mod format;
mod generator;
pub mod monitor;
mod pipeline;
pub mod receiver;
mod session;

pub use backend::{
    default_device_name, list_devices, AudioBackend, CallbackFlow, CallbackStatus, CpalBackend,
    CaptureSignal, DeviceId, DeviceInfo, SimulatedBackend, SimulatedBackendBuilder,
    SimulatedDevice,
};
pub use block::SampleBlock;
pub use channels::ChannelSelection;
pub use config::{LatencyHint, SampleFormat, StreamConfig, WindowSize};
pub use context::{MonitorFeed, StreamContext, StreamContextBuilder};
pub use error::{SinkError, StreamError};
pub use event::{event_callback, EventCallback, StreamEvent};
pub use generator::{ArrayGenerator, BlockGenerator, FnGenerator};
pub use monitor::{
    Level, LevelMonitor, MonitorInfo, MonitorMode, MonitorSink, MonitorSpec, ProbeLog,
    ProbeMonitor, ProbeSession, RollingWindow,
};
pub use pipeline::{block_queue, BlockConsumer, BlockProducer, StreamState};
pub use receiver::{BufferAccumulator, CaptureReceiver, ChannelReceiver, Fill, WavFileReceiver};
pub use session::{Direction, SessionMode, SessionStats, SessionStatus, Transfer};
