//! Playback material consumed by the Source worker.

use crate::format::adapt_channels;
use crate::{SampleBlock, StreamError};

/// Produces playback blocks on demand.
///
/// The Source worker calls [`next_block`](BlockGenerator::next_block) off the
/// real-time path, so implementations may allocate. Returning `None` marks
/// the generator as exhausted; it is not called again.
pub trait BlockGenerator: Send {
    /// Channels of every produced block.
    fn channels(&self) -> u16;

    /// Total frames this generator will produce, if known.
    fn total_frames(&self) -> Option<usize> {
        None
    }

    /// Produces the next block of at most `frames` frames.
    fn next_block(&mut self, frames: usize) -> Option<SampleBlock>;
}

/// Plays back an in-memory block from start to end.
///
/// # Example
///
/// ```
/// use realtime_sound::{ArrayGenerator, BlockGenerator, SampleBlock};
///
/// let mono = SampleBlock::zeros(1000, 1);
/// let mut generator = ArrayGenerator::new(mono, 2)?;
/// assert_eq!(generator.channels(), 2);
/// assert_eq!(generator.next_block(256).unwrap().frames(), 256);
/// # Ok::<(), realtime_sound::StreamError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ArrayGenerator {
    data: SampleBlock,
    position: usize,
}

impl ArrayGenerator {
    /// Prepares `data` for `output_channels` active outputs.
    ///
    /// Mono data is duplicated onto every output and multichannel data is
    /// averaged for a single output.
    pub fn new(data: SampleBlock, output_channels: u16) -> Result<Self, StreamError> {
        if data.is_empty() {
            return Err(StreamError::InvalidData {
                reason: "playback data holds no frames".to_string(),
            });
        }
        Ok(Self {
            data: adapt_channels(data, output_channels)?,
            position: 0,
        })
    }

    /// Frames already handed out.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl BlockGenerator for ArrayGenerator {
    fn channels(&self) -> u16 {
        self.data.channels()
    }

    fn total_frames(&self) -> Option<usize> {
        Some(self.data.frames())
    }

    fn next_block(&mut self, frames: usize) -> Option<SampleBlock> {
        if self.position >= self.data.frames() {
            return None;
        }
        let end = (self.position + frames).min(self.data.frames());
        let block = self.data.slice_frames(self.position, end);
        self.position = end;
        Some(block)
    }
}

/// Wraps a closure as an unbounded [`BlockGenerator`].
///
/// The closure receives the requested frame count.
pub struct FnGenerator<F> {
    channels: u16,
    f: F,
}

impl<F> FnGenerator<F>
where
    F: FnMut(usize) -> Option<SampleBlock> + Send,
{
    /// Creates a generator producing `channels`-channel blocks from `f`.
    pub fn new(channels: u16, f: F) -> Self {
        Self { channels, f }
    }
}

impl<F> BlockGenerator for FnGenerator<F>
where
    F: FnMut(usize) -> Option<SampleBlock> + Send,
{
    fn channels(&self) -> u16 {
        self.channels
    }

    fn next_block(&mut self, frames: usize) -> Option<SampleBlock> {
        (self.f)(frames).filter(|block| block.channels() == self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_generator_blocks() {
        let data = SampleBlock::from_fn(600, 2, |f, c| (f * 2 + c) as f32);
        let mut generator = ArrayGenerator::new(data.clone(), 2).unwrap();
        assert_eq!(generator.total_frames(), Some(600));

        let mut out = SampleBlock::zeros(0, 2);
        while let Some(block) = generator.next_block(256) {
            assert!(block.frames() <= 256);
            out.append(&block).unwrap();
        }
        assert_eq!(out, data);
        assert_eq!(generator.position(), 600);
        assert!(generator.next_block(256).is_none());
    }

    #[test]
    fn test_array_generator_upmixes_mono() {
        let mono = SampleBlock::new(vec![0.25; 10], 1);
        let mut generator = ArrayGenerator::new(mono, 3).unwrap();
        let block = generator.next_block(4).unwrap();
        assert_eq!(block.channels(), 3);
        assert_eq!(block.frame(0), &[0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_array_generator_rejects_empty() {
        assert!(ArrayGenerator::new(SampleBlock::zeros(0, 2), 2).is_err());
    }

    #[test]
    fn test_fn_generator_filters_wrong_shape() {
        let mut calls = 0;
        let mut generator = FnGenerator::new(2, move |frames| {
            calls += 1;
            if calls == 1 {
                Some(SampleBlock::zeros(frames, 2))
            } else {
                Some(SampleBlock::zeros(frames, 1))
            }
        });
        assert!(generator.next_block(8).is_some());
        assert!(generator.next_block(8).is_none());
    }
}
