//! Fixed-length in-memory recording.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CaptureReceiver, Fill};
use crate::{SampleBlock, SinkError};

/// Records captured audio into memory until a target length is reached.
///
/// Frames arriving after the target are dropped and reported as
/// [`SinkError::Overrun`]; the recorded data is never touched again.
///
/// # Example
///
/// ```
/// use realtime_sound::BufferAccumulator;
///
/// let buffer = BufferAccumulator::new(48000, 2);
/// assert_eq!(buffer.target_frames(), 48000);
/// assert_eq!(buffer.frames(), 0);
/// ```
pub struct BufferAccumulator {
    target_frames: usize,
    channels: u16,
    data: Mutex<SampleBlock>,
    overrun_frames: AtomicU64,
}

impl BufferAccumulator {
    /// Creates an empty accumulator for `target_frames` frames.
    ///
    /// Storage grows as blocks arrive.
    pub fn new(target_frames: usize, channels: u16) -> Self {
        Self {
            target_frames,
            channels,
            data: Mutex::new(SampleBlock::new(Vec::new(), channels)),
            overrun_frames: AtomicU64::new(0),
        }
    }

    /// Declared length in frames.
    pub fn target_frames(&self) -> usize {
        self.target_frames
    }

    /// Frames recorded so far.
    pub fn frames(&self) -> usize {
        self.data.lock().frames()
    }

    /// Frames dropped after the target was reached.
    pub fn overrun_frames(&self) -> u64 {
        self.overrun_frames.load(Ordering::SeqCst)
    }

    /// Takes the recording, leaving the accumulator empty.
    pub fn take(&self) -> SampleBlock {
        std::mem::replace(
            &mut *self.data.lock(),
            SampleBlock::zeros(0, self.channels),
        )
    }
}

#[async_trait]
impl CaptureReceiver for BufferAccumulator {
    fn name(&self) -> &str {
        "buffer"
    }

    async fn write(&self, block: &SampleBlock) -> Result<Fill, SinkError> {
        let mut data = self.data.lock();
        let room = self.target_frames - data.frames();
        let take = room.min(block.frames());
        let appended = if take == block.frames() {
            data.append(block)
        } else {
            data.append(&block.slice_frames(0, take))
        };
        appended.map_err(|channels| {
            SinkError::write_failed(format!(
                "expected {} channels, got {channels}",
                self.channels
            ))
        })?;

        let dropped = block.frames() - take;
        if dropped > 0 {
            self.overrun_frames
                .fetch_add(dropped as u64, Ordering::SeqCst);
            return Err(SinkError::Overrun {
                dropped_frames: dropped,
            });
        }

        if data.frames() >= self.target_frames {
            Ok(Fill::Complete)
        } else {
            Ok(Fill::Partial)
        }
    }

    fn is_complete(&self) -> bool {
        self.data.lock().frames() >= self.target_frames
    }

    fn snapshot(&self) -> Option<SampleBlock> {
        Some(self.data.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fills_to_target() {
        let buffer = BufferAccumulator::new(10, 1);
        let block = SampleBlock::from_fn(4, 1, |f, _| f as f32);

        assert_eq!(buffer.write(&block).await.unwrap(), Fill::Partial);
        assert_eq!(buffer.write(&block).await.unwrap(), Fill::Partial);
        assert!(!buffer.is_complete());

        let last = SampleBlock::from_fn(2, 1, |f, _| f as f32);
        assert_eq!(buffer.write(&last).await.unwrap(), Fill::Complete);
        assert!(buffer.is_complete());
        assert_eq!(buffer.frames(), 10);
    }

    #[tokio::test]
    async fn test_overrun_keeps_fitting_part() {
        let buffer = BufferAccumulator::new(6, 2);
        let block = SampleBlock::from_fn(4, 2, |f, c| (f * 2 + c) as f32);

        buffer.write(&block).await.unwrap();
        let err = buffer.write(&block).await.unwrap_err();
        assert!(matches!(err, SinkError::Overrun { dropped_frames: 2 }));

        let data = buffer.snapshot().unwrap();
        assert_eq!(data.frames(), 6);
        assert_eq!(data.frame(5), &[2.0, 3.0]);
        assert_eq!(buffer.overrun_frames(), 2);
        assert!(buffer.is_complete());
    }

    #[tokio::test]
    async fn test_rejects_wrong_channels() {
        let buffer = BufferAccumulator::new(6, 2);
        let result = buffer.write(&SampleBlock::zeros(2, 1)).await;
        assert!(matches!(result, Err(SinkError::WriteFailed { .. })));
        assert_eq!(buffer.frames(), 0);
    }

    #[tokio::test]
    async fn test_wrong_channels_on_full_buffer_is_not_an_overrun() {
        let buffer = BufferAccumulator::new(2, 2);
        buffer.write(&SampleBlock::zeros(2, 2)).await.unwrap();
        let result = buffer.write(&SampleBlock::zeros(3, 1)).await;
        assert!(matches!(result, Err(SinkError::WriteFailed { .. })));
        assert_eq!(buffer.overrun_frames(), 0);
        assert_eq!(buffer.frames(), 2);
    }

    #[test]
    fn test_huge_target_does_not_allocate_up_front() {
        let buffer = BufferAccumulator::new(usize::MAX, 8);
        assert_eq!(buffer.target_frames(), usize::MAX);
        assert_eq!(buffer.frames(), 0);
        assert!(!buffer.is_complete());
    }

    #[tokio::test]
    async fn test_take_empties() {
        let buffer = BufferAccumulator::new(4, 1);
        buffer.write(&SampleBlock::zeros(4, 1)).await.unwrap();
        assert_eq!(buffer.take().frames(), 4);
        assert_eq!(buffer.frames(), 0);
    }
}
