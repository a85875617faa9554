//! Sample format and channel conversion.

use crate::{SampleBlock, StreamError};

/// Converts f32 samples to i16.
///
/// Input should be in the range [-1.0, 1.0].
/// Values outside this range are clamped.
///
/// Uses × 32767 (not 32768) for symmetric scaling. This means -1.0 maps
/// to -32767 rather than -32768, losing 1 LSB at the negative extreme.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts i16 samples to f32.
///
/// Output will be in the range [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Averages all channels of a block into a single channel.
pub fn downmix_to_mono(block: &SampleBlock) -> SampleBlock {
    let width = block.channels() as usize;
    if width <= 1 {
        return block.clone();
    }
    let scale = 1.0 / width as f32;
    let samples = block
        .samples()
        .chunks_exact(width)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect();
    SampleBlock::new(samples, 1)
}

/// Duplicates a mono block onto `channels` channels.
pub fn upmix_mono(block: &SampleBlock, channels: u16) -> SampleBlock {
    let samples = block
        .samples()
        .iter()
        .flat_map(|&s| std::iter::repeat(s).take(channels as usize))
        .collect();
    SampleBlock::new(samples, channels)
}

/// Adapts playback data to the number of active output channels.
///
/// Mono data is duplicated onto every output, multichannel data is
/// averaged down for a single output. Any other mismatch is rejected.
pub fn adapt_channels(block: SampleBlock, channels: u16) -> Result<SampleBlock, StreamError> {
    match (block.channels(), channels) {
        (have, want) if have == want => Ok(block),
        (1, want) => Ok(upmix_mono(&block, want)),
        (_, 1) => Ok(downmix_to_mono(&block)),
        (have, want) => Err(StreamError::InvalidData {
            reason: format!("audio has {have} channels but {want} outputs are active"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_i16_to_f32_full_range() {
        let max = i16_to_f32(32767);
        assert!((max - 0.99997).abs() < 0.001);

        let min = i16_to_f32(-32768);
        assert!((min - (-1.0)).abs() < 0.001);

        assert_eq!(i16_to_f32(0), 0.0);
    }

    #[test]
    fn test_roundtrip() {
        for &original in &[0i16, 1000, -1000, 32767, -32768] {
            let back = f32_to_i16(i16_to_f32(original));
            assert!((original - back).abs() <= 1);
        }
    }

    #[test]
    fn test_downmix_to_mono() {
        let stereo = SampleBlock::from_rows(&[[0.2, 0.4], [1.0, -1.0]]);
        let mono = downmix_to_mono(&stereo);
        assert_eq!(mono.channels(), 1);
        assert!((mono.samples()[0] - 0.3).abs() < 1e-6);
        assert_eq!(mono.samples()[1], 0.0);
    }

    #[test]
    fn test_upmix_mono() {
        let mono = SampleBlock::new(vec![0.1, 0.2], 1);
        let quad = upmix_mono(&mono, 4);
        assert_eq!(quad.frames(), 2);
        assert_eq!(quad.frame(1), &[0.2, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn test_adapt_channels_passthrough() {
        let block = SampleBlock::zeros(8, 2);
        assert_eq!(adapt_channels(block.clone(), 2).unwrap(), block);
    }

    #[test]
    fn test_adapt_channels_rejects_mismatch() {
        let block = SampleBlock::zeros(8, 2);
        let err = adapt_channels(block, 3).unwrap_err();
        assert!(err.to_string().contains("2 channels"));
    }
}
