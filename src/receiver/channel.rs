//! Tokio mpsc channel receiver implementation.

use crate::receiver::{CaptureReceiver, Fill};
use crate::{SampleBlock, SinkError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A receiver that forwards captured blocks to a tokio mpsc channel.
///
/// This is the way to process captured audio live (analysis, streaming to
/// a network peer, etc.).
///
/// # Example
///
/// ```
/// use realtime_sound::{ChannelReceiver, SampleBlock};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<SampleBlock>(100);
/// let receiver = ChannelReceiver::new(tx);
///
/// // Hand the receiver to StreamContext::record_into...
/// // Then consume blocks:
/// // while let Some(block) = rx.recv().await { ... }
/// ```
pub struct ChannelReceiver {
    name: String,
    sender: mpsc::Sender<SampleBlock>,
}

impl ChannelReceiver {
    /// Creates a new channel receiver with the given sender.
    ///
    /// A full channel applies backpressure to the Sink worker; give it
    /// enough capacity to absorb the consumer's jitter.
    pub fn new(sender: mpsc::Sender<SampleBlock>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a new channel receiver with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<SampleBlock>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

#[async_trait]
impl CaptureReceiver for ChannelReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, block: &SampleBlock) -> Result<Fill, SinkError> {
        self.sender
            .send(block.clone())
            .await
            .map_err(|_| SinkError::ChannelClosed)?;
        Ok(Fill::Partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_receiver_sends_blocks() {
        let (tx, mut rx) = mpsc::channel::<SampleBlock>(10);
        let receiver = ChannelReceiver::new(tx);

        let block = SampleBlock::new(vec![1.0, 2.0, 3.0], 1);
        receiver.write(&block).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.samples(), &[1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_channel_receiver_closed() {
        let (tx, rx) = mpsc::channel::<SampleBlock>(10);
        let receiver = ChannelReceiver::new(tx);
        drop(rx);

        let result = receiver.write(&SampleBlock::zeros(4, 1)).await;
        assert!(matches!(result, Err(SinkError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_channel_receiver_custom_name() {
        let (tx, _rx) = mpsc::channel::<SampleBlock>(10);
        let receiver = ChannelReceiver::with_name("analysis", tx);
        assert_eq!(receiver.name(), "analysis");
    }
}
