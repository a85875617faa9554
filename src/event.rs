//! Runtime events for monitoring stream health.
//!
//! Events are non-fatal notifications about stream behavior. The session
//! continues running after events are emitted - they're for logging/metrics,
//! not error handling. Events are raised by the non-real-time workers, never
//! from inside the audio callback.

use std::sync::Arc;

use crate::Direction;

/// Runtime events emitted during a stream session.
///
/// # Example
///
/// ```
/// use realtime_sound::StreamEvent;
///
/// fn handle_event(event: StreamEvent) {
///     match event {
///         StreamEvent::Underrun { frames } => {
///             eprintln!("playback starved for {frames} frames");
///         }
///         StreamEvent::Overrun { dropped_frames } => {
///             eprintln!("dropped {dropped_frames} captured frames");
///         }
///         StreamEvent::DeviceStatus { warnings, status } => {
///             eprintln!("device reported {status} ({warnings} so far)");
///         }
///         StreamEvent::ReceiverError { receiver_name, error } => {
///             eprintln!("receiver '{receiver_name}' error: {error}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The backend opened the stream and the session is running.
    SessionStarted {
        /// Active directions of the session.
        direction: Direction,
        /// Sample rate of the stream.
        sample_rate: u32,
    },

    /// The session ended and all workers were joined.
    SessionStopped {
        /// Why the session ended.
        reason: String,
    },

    /// Playback was starved and silence was substituted.
    Underrun {
        /// Frames substituted with silence since the last report.
        frames: u64,
    },

    /// Captured audio was dropped because the capture queue was full.
    Overrun {
        /// Frames dropped since the last report.
        dropped_frames: u64,
    },

    /// The backend flagged a glitch such as a late callback.
    DeviceStatus {
        /// Total warnings counted this session.
        warnings: u64,
        /// Last reported status.
        status: String,
    },

    /// A capture receiver failed a write.
    ReceiverError {
        /// Name of the receiver that errored.
        receiver_name: String,
        /// Description of the error.
        error: String,
    },

    /// A playback item finished and the Source is idle.
    PlaybackDrained {
        /// Total frames produced by the Source so far.
        position: u64,
    },
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via
/// [`StreamContextBuilder::on_event()`](crate::StreamContextBuilder::on_event).
///
/// # Example
///
/// ```ignore
/// use realtime_sound::StreamContext;
///
/// let ctx = StreamContext::builder()
///     .on_event(|event| {
///         tracing::warn!(?event, "stream event");
///     })
///     .build()?;
/// ```
pub type EventCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use realtime_sound::{event_callback, StreamEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn emit(callback: Option<&EventCallback>, event: StreamEvent) {
    if let Some(cb) = callback {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_debug() {
        let event = StreamEvent::Overrun {
            dropped_frames: 256,
        };
        let debug = format!("{:?}", event);
        assert!(debug.contains("Overrun"));
        assert!(debug.contains("256"));
    }

    #[test]
    fn test_stream_event_clone() {
        let event = StreamEvent::ReceiverError {
            receiver_name: "file".to_string(),
            error: "disk full".to_string(),
        };
        let cloned = event.clone();
        if let StreamEvent::ReceiverError {
            receiver_name,
            error,
        } = cloned
        {
            assert_eq!(receiver_name, "file");
            assert_eq!(error, "disk full");
        } else {
            panic!("Expected ReceiverError variant");
        }
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        emit(Some(&callback), StreamEvent::Underrun { frames: 0 });
        assert!(called.load(Ordering::SeqCst));
    }
}
