//! Rolling windows over the most recent streamed frames.

use crate::SampleBlock;

/// Keeps the last `frames` frames of each stream direction.
///
/// Incoming frames arrive interleaved across directions, the way the
/// callback pushes them onto the monitor queue: each frame holds the
/// capture channels followed by the playback channels. New frames enter at
/// the end of every window and the oldest frames fall off the front.
///
/// # Example
///
/// ```
/// use realtime_sound::RollingWindow;
///
/// let mut window = RollingWindow::new(3, &[1, 1]);
/// window.push_interleaved(&[1.0, -1.0, 2.0, -2.0]);
/// assert_eq!(window.windows()[0].samples(), &[0.0, 1.0, 2.0]);
/// assert_eq!(window.windows()[1].samples(), &[0.0, -1.0, -2.0]);
/// ```
#[derive(Debug, Clone)]
pub struct RollingWindow {
    frames: usize,
    width: usize,
    windows: Vec<SampleBlock>,
}

impl RollingWindow {
    /// Creates zeroed windows of `frames` frames, one per entry of `channels`.
    pub fn new(frames: usize, channels: &[u16]) -> Self {
        Self {
            frames,
            width: channels.iter().map(|&c| c as usize).sum(),
            windows: channels
                .iter()
                .map(|&c| SampleBlock::zeros(frames, c))
                .collect(),
        }
    }

    /// Window length in frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples per interleaved input frame.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Current windows, oldest frame first.
    pub fn windows(&self) -> &[SampleBlock] {
        &self.windows
    }

    /// Shifts interleaved frames into the windows.
    ///
    /// Trailing samples that do not form a whole frame are ignored.
    pub fn push_interleaved(&mut self, samples: &[f32]) {
        if self.width == 0 || self.frames == 0 {
            return;
        }
        let incoming = samples.len() / self.width;
        let shift = incoming.min(self.frames);
        let skip = incoming - shift;

        let mut offset = 0;
        for window in &mut self.windows {
            let ch = window.channels() as usize;
            if ch == 0 {
                continue;
            }
            let data = window.samples_mut();
            data.copy_within(shift * ch.., 0);
            let tail = (self.frames - shift) * ch;
            for f in 0..shift {
                let src = (skip + f) * self.width + offset;
                let dst = tail + f * ch;
                data[dst..dst + ch].copy_from_slice(&samples[src..src + ch]);
            }
            offset += ch;
        }
    }

    /// Zeroes every window.
    pub fn reset(&mut self) {
        for window in &mut self.windows {
            window.samples_mut().fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keeps_latest_frames() {
        let mut window = RollingWindow::new(4, &[1]);
        window.push_interleaved(&[1.0, 2.0, 3.0]);
        assert_eq!(window.windows()[0].samples(), &[0.0, 1.0, 2.0, 3.0]);

        window.push_interleaved(&[4.0, 5.0]);
        assert_eq!(window.windows()[0].samples(), &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_window_longer_input_keeps_tail() {
        let mut window = RollingWindow::new(2, &[1, 2]);
        let samples: Vec<f32> = (0..15).map(|i| i as f32).collect();
        window.push_interleaved(&samples);
        assert_eq!(window.windows()[0].samples(), &[9.0, 12.0]);
        assert_eq!(window.windows()[1].samples(), &[10.0, 11.0, 13.0, 14.0]);
    }

    #[test]
    fn test_window_inactive_direction() {
        let mut window = RollingWindow::new(2, &[0, 1]);
        window.push_interleaved(&[0.5, 0.25]);
        assert!(window.windows()[0].is_empty());
        assert_eq!(window.windows()[1].samples(), &[0.5, 0.25]);

        window.reset();
        assert_eq!(window.windows()[1].samples(), &[0.0, 0.0]);
    }
}
