//! Device identification type.

use std::sync::Arc;

/// Identifier of an audio device.
///
/// `DeviceId` is a cheap-to-clone handle (`Arc<str>`) naming the device a
/// backend opens streams on.
///
/// # Example
///
/// ```
/// use realtime_sound::DeviceId;
///
/// let id = DeviceId::new("hw:1,0");
/// assert_eq!(id.as_str(), "hw:1,0");
/// assert_eq!(id, DeviceId::from("hw:1,0"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    /// Creates a device ID from a string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
