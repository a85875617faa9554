//! Mapping between device channels and session channels.

use crate::StreamError;

/// Device channel indices used by a session, in ascending order.
///
/// Position `i` of a session block maps to device channel `indices()[i]`.
/// Indices are distinct and always below the device's channel count.
///
/// # Example
///
/// ```
/// use realtime_sound::ChannelSelection;
///
/// let outputs = ChannelSelection::new(&[3, 0], 4)?;
/// assert_eq!(outputs.indices(), &[0, 3]);
/// assert_eq!(outputs.device_width(), 4);
/// # Ok::<(), realtime_sound::StreamError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSelection {
    indices: Vec<usize>,
}

impl ChannelSelection {
    /// Validates `channels` against a device exposing `max` channels.
    ///
    /// The indices are sorted; duplicates and out-of-range indices are
    /// rejected.
    pub fn new(channels: &[usize], max: u16) -> Result<Self, StreamError> {
        let mut indices = channels.to_vec();
        indices.sort_unstable();

        if let Some(&bad) = indices.iter().find(|&&c| c >= max as usize) {
            return Err(StreamError::invalid_channels(
                channels,
                format!("channel {bad} exceeds device maximum {max}"),
            ));
        }
        if indices.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(StreamError::invalid_channels(
                channels,
                "channels must be distinct",
            ));
        }
        Ok(Self { indices })
    }

    /// Selects every channel of a device exposing `max` channels.
    pub fn all(max: u16) -> Self {
        Self {
            indices: (0..max as usize).collect(),
        }
    }

    /// Selects no channel; the direction is inactive.
    pub fn none() -> Self {
        Self {
            indices: Vec::new(),
        }
    }

    /// The selected device channels, ascending.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Number of session channels.
    pub fn count(&self) -> u16 {
        self.indices.len() as u16
    }

    /// Returns `true` when no channel is selected.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Device channels that must be opened to reach every selected index.
    pub fn device_width(&self) -> u16 {
        self.indices.last().map_or(0, |&last| last as u16 + 1)
    }

    /// Copies the selected channels of `frames` device frames into `dst`.
    ///
    /// `src` holds `device_width` interleaved channels, `dst` receives
    /// `count()` interleaved channels.
    #[inline]
    pub(crate) fn gather(&self, src: &[f32], device_width: usize, dst: &mut [f32], frames: usize) {
        let count = self.indices.len();
        for f in 0..frames {
            let row = &src[f * device_width..(f + 1) * device_width];
            let out = &mut dst[f * count..(f + 1) * count];
            for (slot, &ch) in out.iter_mut().zip(&self.indices) {
                *slot = row[ch];
            }
        }
    }

    /// Writes `frames` session frames from `src` onto the selected channels
    /// of `dst`. Unselected device channels are left untouched.
    #[inline]
    pub(crate) fn scatter(&self, src: &[f32], dst: &mut [f32], device_width: usize, frames: usize) {
        let count = self.indices.len();
        for f in 0..frames {
            let row = &src[f * count..(f + 1) * count];
            let out = &mut dst[f * device_width..(f + 1) * device_width];
            for (&sample, &ch) in row.iter().zip(&self.indices) {
                out[ch] = sample;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts() {
        let sel = ChannelSelection::new(&[2, 0, 1], 4).unwrap();
        assert_eq!(sel.indices(), &[0, 1, 2]);
        assert_eq!(sel.count(), 3);
        assert_eq!(sel.device_width(), 3);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = ChannelSelection::new(&[0, 2], 2).unwrap_err();
        assert!(err.to_string().contains("channel 2 exceeds device maximum 2"));
    }

    #[test]
    fn test_rejects_duplicates() {
        assert!(ChannelSelection::new(&[1, 1], 4).is_err());
    }

    #[test]
    fn test_all_and_none() {
        assert_eq!(ChannelSelection::all(2).indices(), &[0, 1]);
        assert!(ChannelSelection::none().is_empty());
        assert_eq!(ChannelSelection::none().device_width(), 0);
    }

    #[test]
    fn test_gather_selects_channels() {
        let sel = ChannelSelection::new(&[1, 3], 4).unwrap();
        let src = [0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0];
        let mut dst = [0.0; 4];
        sel.gather(&src, 4, &mut dst, 2);
        assert_eq!(dst, [1.0, 3.0, 11.0, 13.0]);
    }

    #[test]
    fn test_scatter_leaves_inactive_channels() {
        let sel = ChannelSelection::new(&[0, 2], 3).unwrap();
        let src = [1.0, 2.0, 3.0, 4.0];
        let mut dst = [0.0; 6];
        sel.scatter(&src, &mut dst, 3, 2);
        assert_eq!(dst, [1.0, 0.0, 2.0, 3.0, 0.0, 4.0]);
    }
}
