//! Sample blocks exchanged across the real-time boundary.

/// A block of interleaved `f32` samples with a fixed channel count.
///
/// `SampleBlock` is the unit of audio data moved between the application and
/// the streaming workers. Its logical shape is `(frames, channels)`; samples
/// are stored frame-major (`[f0c0, f0c1, f1c0, f1c1, ...]`).
///
/// # Example
///
/// ```
/// use realtime_sound::SampleBlock;
///
/// let block = SampleBlock::zeros(256, 2);
/// assert_eq!(block.frames(), 256);
/// assert_eq!(block.samples().len(), 512);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    samples: Vec<f32>,
    channels: u16,
}

impl SampleBlock {
    /// Creates a block from interleaved samples.
    ///
    /// Trailing samples that do not form a whole frame are discarded.
    pub fn new(mut samples: Vec<f32>, channels: u16) -> Self {
        if channels == 0 {
            samples.clear();
        } else {
            let whole = samples.len() - samples.len() % channels as usize;
            samples.truncate(whole);
        }
        Self { samples, channels }
    }

    /// Creates a zero-filled block of the given shape.
    pub fn zeros(frames: usize, channels: u16) -> Self {
        Self {
            samples: vec![0.0; frames * channels as usize],
            channels,
        }
    }

    /// Creates a block by evaluating `f(frame, channel)` for every sample.
    pub fn from_fn(frames: usize, channels: u16, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for frame in 0..frames {
            for channel in 0..channels as usize {
                samples.push(f(frame, channel));
            }
        }
        Self { samples, channels }
    }

    /// Creates a block from a slice of per-frame rows.
    pub fn from_rows<const C: usize>(rows: &[[f32; C]]) -> Self {
        Self {
            samples: rows.iter().flatten().copied().collect(),
            channels: C as u16,
        }
    }

    /// Number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (one sample per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Returns `true` if the block holds no frames.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable interleaved samples.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Consumes the block and returns its interleaved samples.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Returns the samples of one frame.
    pub fn frame(&self, index: usize) -> &[f32] {
        let width = self.channels as usize;
        &self.samples[index * width..(index + 1) * width]
    }

    /// Iterates over the samples of a single channel.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels.max(1) as usize)
            .copied()
    }

    /// Copies the frame range `start..end` into a new block.
    pub fn slice_frames(&self, start: usize, end: usize) -> SampleBlock {
        let width = self.channels as usize;
        let end = end.min(self.frames());
        let start = start.min(end);
        Self {
            samples: self.samples[start * width..end * width].to_vec(),
            channels: self.channels,
        }
    }

    /// Appends the frames of `other`.
    ///
    /// Blocks with a different channel count are rejected and returned.
    pub fn append(&mut self, other: &SampleBlock) -> Result<(), u16> {
        if other.channels != self.channels {
            return Err(other.channels);
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    /// Returns `true` if every sample is exactly zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }

    /// Duration of the block at the given sample rate.
    pub fn duration(&self, sample_rate: u32) -> std::time::Duration {
        if sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.frames() as f64 / f64::from(sample_rate))
    }
}
