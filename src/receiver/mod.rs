//! Capture receivers fed by the Sink worker.
//!
//! A [`CaptureReceiver`] is any destination for captured blocks. The crate
//! provides three:
//!
//! - [`BufferAccumulator`]: fixed-length in-memory recording
//! - [`ChannelReceiver`]: forwards blocks to a tokio mpsc channel
//! - [`WavFileReceiver`]: writes a 16-bit PCM WAV file
//!
//! Implement the trait for custom destinations such as analysers or network
//! endpoints.

mod buffer;
mod channel;
mod file;

pub use buffer::BufferAccumulator;
pub use channel::ChannelReceiver;
pub use file::WavFileReceiver;

use crate::{SampleBlock, SinkError};
use async_trait::async_trait;

/// Fill state reported after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The receiver accepts more data.
    Partial,
    /// The receiver reached its target length.
    Complete,
}

/// A destination for captured audio.
///
/// # Implementation Notes
///
/// - Methods take `&self` - use interior mutability if needed
/// - `write` runs on the Sink worker, never in the audio callback
/// - `on_start` is called before the first block of a recording
/// - `on_stop` is called once the recording ended, even after errors
///
/// # Example
///
/// ```
/// use realtime_sound::{CaptureReceiver, Fill, SampleBlock, SinkError};
/// use async_trait::async_trait;
///
/// struct PrintReceiver;
///
/// #[async_trait]
/// impl CaptureReceiver for PrintReceiver {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     async fn write(&self, block: &SampleBlock) -> Result<Fill, SinkError> {
///         println!("Received {} frames", block.frames());
///         Ok(Fill::Partial)
///     }
/// }
/// ```
#[async_trait]
pub trait CaptureReceiver: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Called once before the first block, with the session sample rate.
    ///
    /// Default implementation does nothing.
    async fn on_start(&self, _sample_rate: u32) -> Result<(), SinkError> {
        Ok(())
    }

    /// Writes one captured block.
    ///
    /// Errors are recoverable: the Sink worker reports them and keeps
    /// draining. [`SinkError::Overrun`] signals data beyond the target length.
    async fn write(&self, block: &SampleBlock) -> Result<Fill, SinkError>;

    /// Called once after the recording ended.
    ///
    /// Default implementation does nothing.
    async fn on_stop(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Returns `true` once the receiver holds everything it asked for.
    ///
    /// Unbounded receivers never complete.
    fn is_complete(&self) -> bool {
        false
    }

    /// Copy of the data received so far, for receivers that keep it.
    fn snapshot(&self) -> Option<SampleBlock> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingReceiver {
        name: String,
        count: AtomicUsize,
    }

    #[async_trait]
    impl CaptureReceiver for CountingReceiver {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&self, _block: &SampleBlock) -> Result<Fill, SinkError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(Fill::Partial)
        }
    }

    #[tokio::test]
    async fn test_receiver_lifecycle() {
        let receiver = CountingReceiver {
            name: "test".to_string(),
            count: AtomicUsize::new(0),
        };

        receiver.on_start(48000).await.unwrap();
        let block = SampleBlock::zeros(64, 2);
        receiver.write(&block).await.unwrap();
        receiver.write(&block).await.unwrap();
        receiver.on_stop().await.unwrap();

        assert_eq!(receiver.count.load(Ordering::SeqCst), 2);
        assert!(!receiver.is_complete());
        assert!(receiver.snapshot().is_none());
    }

    #[test]
    fn test_receiver_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<dyn CaptureReceiver>>();
    }
}
