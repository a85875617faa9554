//! Bounded block queue across the real-time boundary.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::time::Duration;
use tokio::time::Instant;

use crate::SampleBlock;

const DEFAULT_POLL: Duration = Duration::from_millis(2);

/// Creates a queue holding `capacity_blocks` blocks of `block_frames` frames.
///
/// The queue stores interleaved samples; every operation moves whole frames
/// of `channels` samples. One side may live inside the audio callback: the
/// `try_*` and `pop_into` operations never block or allocate.
pub fn block_queue(
    capacity_blocks: usize,
    block_frames: usize,
    channels: u16,
) -> (BlockProducer, BlockConsumer) {
    let capacity_frames = (capacity_blocks * block_frames).max(1);
    let width = (channels as usize).max(1);
    let ring = HeapRb::<f32>::new(capacity_frames * width);
    let (producer, consumer) = ring.split();

    (
        BlockProducer {
            inner: producer,
            width,
            channels,
            capacity_frames,
            dropped_blocks: 0,
            dropped_frames: 0,
            poll: DEFAULT_POLL,
        },
        BlockConsumer {
            inner: consumer,
            width,
            channels,
            poll: DEFAULT_POLL,
        },
    )
}

/// Writing half of a [`block_queue`].
pub struct BlockProducer {
    inner: HeapProd<f32>,
    width: usize,
    channels: u16,
    capacity_frames: usize,
    dropped_blocks: u64,
    dropped_frames: u64,
    poll: Duration,
}

impl BlockProducer {
    /// Sets how often async waits re-check the queue.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll.max(Duration::from_millis(1));
        self
    }

    /// Channels per frame.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Capacity in frames.
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Frames that can be pushed right now.
    pub fn vacant_frames(&self) -> usize {
        self.inner.vacant_len() / self.width
    }

    /// Blocks dropped because the queue was full.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }

    /// Frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Pushes interleaved samples without blocking.
    ///
    /// Either the whole slice is enqueued or nothing is; a rejected block is
    /// counted as dropped. Safe to call from the audio callback.
    #[inline]
    pub fn try_push(&mut self, samples: &[f32]) -> bool {
        if self.inner.vacant_len() < samples.len() {
            self.dropped_blocks += 1;
            self.dropped_frames += (samples.len() / self.width) as u64;
            return false;
        }
        self.inner.push_slice(samples);
        true
    }

    /// Interleaves two blocks of `frames` frames into one frame stream.
    ///
    /// Each queued frame holds `a_channels` samples of `a` followed by
    /// `b_channels` samples of `b`. All-or-nothing like [`try_push`].
    ///
    /// [`try_push`]: BlockProducer::try_push
    #[inline]
    pub fn try_push_pair(
        &mut self,
        a: &[f32],
        a_channels: usize,
        b: &[f32],
        b_channels: usize,
        frames: usize,
    ) -> bool {
        let needed = frames * (a_channels + b_channels);
        if self.inner.vacant_len() < needed {
            self.dropped_blocks += 1;
            self.dropped_frames += frames as u64;
            return false;
        }
        for f in 0..frames {
            self.inner
                .push_slice(&a[f * a_channels..(f + 1) * a_channels]);
            self.inner
                .push_slice(&b[f * b_channels..(f + 1) * b_channels]);
        }
        true
    }

    /// Pushes a block, waiting up to `timeout` for room.
    ///
    /// On timeout the block is handed back so the caller can retry or drop
    /// it. Blocks larger than the queue are returned immediately.
    pub async fn push_block(
        &mut self,
        block: SampleBlock,
        timeout: Duration,
    ) -> Result<(), SampleBlock> {
        let needed = block.samples().len();
        if block.frames() > self.capacity_frames {
            return Err(block);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.vacant_len() >= needed {
                self.inner.push_slice(block.samples());
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(block);
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

/// Reading half of a [`block_queue`].
pub struct BlockConsumer {
    inner: HeapCons<f32>,
    width: usize,
    channels: u16,
    poll: Duration,
}

impl BlockConsumer {
    /// Sets how often async waits re-check the queue.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll.max(Duration::from_millis(1));
        self
    }

    /// Channels per frame.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames ready to be popped.
    pub fn available_frames(&self) -> usize {
        self.inner.occupied_len() / self.width
    }

    /// Pops as many whole frames as fit into `dst` without blocking.
    ///
    /// Returns the number of frames written; the rest of `dst` is left
    /// untouched. Safe to call from the audio callback.
    #[inline]
    pub fn pop_into(&mut self, dst: &mut [f32]) -> usize {
        let frames = self.available_frames().min(dst.len() / self.width);
        if frames == 0 {
            return 0;
        }
        self.inner.pop_slice(&mut dst[..frames * self.width]);
        frames
    }

    /// Pops up to `max_frames` frames if any are queued.
    pub fn try_pop_block(&mut self, max_frames: usize) -> Option<SampleBlock> {
        let frames = self.available_frames().min(max_frames);
        if frames == 0 {
            return None;
        }
        let mut samples = vec![0.0; frames * self.width];
        self.inner.pop_slice(&mut samples);
        Some(SampleBlock::new(samples, self.channels))
    }

    /// Pops up to `max_frames` frames, waiting up to `timeout` for data.
    pub async fn pop_block(&mut self, max_frames: usize, timeout: Duration) -> Option<SampleBlock> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(block) = self.try_pop_block(max_frames) {
                return Some(block);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    /// Discards everything queued and returns the number of frames dropped.
    pub fn clear(&mut self) -> usize {
        self.inner.clear() / self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: usize, frames: usize, channels: u16) -> SampleBlock {
        SampleBlock::from_fn(frames, channels, |f, c| ((start + f) * 10 + c) as f32)
    }

    #[test]
    fn test_try_push_pop_in_order() {
        let (mut tx, mut rx) = block_queue(4, 8, 2);
        assert!(tx.try_push(ramp(0, 8, 2).samples()));
        assert!(tx.try_push(ramp(8, 8, 2).samples()));

        let mut dst = [0.0; 32];
        assert_eq!(rx.pop_into(&mut dst), 16);
        assert_eq!(&dst[..16], ramp(0, 8, 2).samples());
        assert_eq!(&dst[16..], ramp(8, 8, 2).samples());
    }

    #[test]
    fn test_overrun_accounting() {
        let capacity = 4;
        let pushes = 7;
        let (mut tx, mut rx) = block_queue(capacity, 16, 1);

        for i in 0..pushes {
            tx.try_push(ramp(i * 16, 16, 1).samples());
        }
        assert_eq!(tx.dropped_blocks(), (pushes - capacity) as u64);
        assert_eq!(tx.dropped_frames(), ((pushes - capacity) * 16) as u64);

        for i in 0..capacity {
            let block = rx.try_pop_block(16).unwrap();
            assert_eq!(block, ramp(i * 16, 16, 1));
        }
        assert!(rx.try_pop_block(16).is_none());
    }

    #[test]
    fn test_pop_into_partial() {
        let (mut tx, mut rx) = block_queue(2, 4, 1);
        tx.try_push(&[1.0, 2.0]);
        let mut dst = [9.0; 4];
        assert_eq!(rx.pop_into(&mut dst), 2);
        assert_eq!(dst, [1.0, 2.0, 9.0, 9.0]);
    }

    #[test]
    fn test_try_push_pair_interleaves() {
        let (mut tx, mut rx) = block_queue(2, 4, 3);
        let capture = [1.0, 2.0];
        let playback = [10.0, 11.0, 20.0, 21.0];
        assert!(tx.try_push_pair(&capture, 1, &playback, 2, 2));

        let block = rx.try_pop_block(8).unwrap();
        assert_eq!(block.samples(), &[1.0, 10.0, 11.0, 2.0, 20.0, 21.0]);
    }

    #[test]
    fn test_clear() {
        let (mut tx, mut rx) = block_queue(2, 4, 2);
        tx.try_push(&[0.5; 8]);
        assert_eq!(rx.clear(), 4);
        assert_eq!(rx.available_frames(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_block_times_out_when_full() {
        let (mut tx, _rx) = block_queue(2, 4, 1);
        tx.push_block(ramp(0, 4, 1), Duration::from_millis(10))
            .await
            .unwrap();
        tx.push_block(ramp(4, 4, 1), Duration::from_millis(10))
            .await
            .unwrap();

        let rejected = tx
            .push_block(ramp(8, 4, 1), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(rejected, ramp(8, 4, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_block_times_out_when_empty() {
        let (_tx, mut rx) = block_queue(2, 4, 1);
        assert!(rx.pop_block(4, Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_push_block_waits_for_room() {
        let (mut tx, mut rx) = block_queue(2, 4, 1);
        tx.try_push(&[0.0; 8]);

        let reader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let first = rx.pop_block(4, Duration::from_millis(100)).await;
            (rx, first)
        });

        tx.push_block(ramp(0, 4, 1), Duration::from_secs(1))
            .await
            .unwrap();
        let (_rx, first) = reader.await.unwrap();
        assert_eq!(first.unwrap().frames(), 4);
    }
}
