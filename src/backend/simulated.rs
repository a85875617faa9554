//! Timer-driven backend for testing without hardware.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    AudioBackend, BackendStream, CallbackFlow, CallbackStatus, DeviceId, DeviceInfo,
    FinishedCallback, RealtimeCallback, StreamEnd, StreamParams,
};
use crate::StreamError;

/// Deterministic signal fed to the capture side of a [`SimulatedBackend`].
#[derive(Clone, Default)]
pub enum CaptureSignal {
    /// All zeros.
    #[default]
    Silence,
    /// The absolute frame index, on every channel.
    Ramp,
    /// A sine wave, identical on every channel.
    Tone {
        /// Frequency in Hz.
        frequency: f64,
        /// Peak amplitude.
        amplitude: f32,
    },
    /// `f(frame, channel)`.
    Custom(Arc<dyn Fn(u64, usize) -> f32 + Send + Sync>),
}

impl CaptureSignal {
    /// Sample of device channel `channel` at absolute frame `frame`.
    pub fn sample(&self, frame: u64, channel: usize, sample_rate: u32) -> f32 {
        match self {
            Self::Silence => 0.0,
            Self::Ramp => frame as f32,
            Self::Tone {
                frequency,
                amplitude,
            } => {
                let t = frame as f64 / f64::from(sample_rate.max(1));
                (std::f64::consts::TAU * frequency * t).sin() as f32 * amplitude
            }
            Self::Custom(f) => f(frame, channel),
        }
    }
}

impl fmt::Debug for CaptureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Silence => f.write_str("Silence"),
            Self::Ramp => f.write_str("Ramp"),
            Self::Tone {
                frequency,
                amplitude,
            } => f
                .debug_struct("Tone")
                .field("frequency", frequency)
                .field("amplitude", amplitude)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Observable state of a simulated device.
///
/// Everything the device played is kept, interleaved at the width of the
/// last opened stream.
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    played: Mutex<Vec<f32>>,
    output_width: AtomicU64,
    callbacks: AtomicU64,
    streams_opened: AtomicU64,
}

impl SimulatedDevice {
    /// Copy of every sample played so far.
    pub fn played(&self) -> Vec<f32> {
        self.played.lock().clone()
    }

    /// Takes the played samples, leaving the record empty.
    pub fn take_played(&self) -> Vec<f32> {
        std::mem::take(&mut *self.played.lock())
    }

    /// Device output channels of the last opened stream.
    pub fn output_width(&self) -> usize {
        self.output_width.load(Ordering::SeqCst) as usize
    }

    /// Frames played so far.
    pub fn played_frames(&self) -> usize {
        let width = self.output_width().max(1);
        self.played.lock().len() / width
    }

    /// Callback invocations across all streams.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::SeqCst)
    }

    /// Streams opened on this device.
    pub fn streams_opened(&self) -> u64 {
        self.streams_opened.load(Ordering::SeqCst)
    }
}

/// A backend whose "hardware" is a timer thread.
///
/// Each stream gets a thread that invokes the callback once per block at
/// the block rate (scaled by the configured speed), feeds the configured
/// [`CaptureSignal`] as input and records all output on the shared
/// [`SimulatedDevice`].
///
/// # Example
///
/// ```
/// use realtime_sound::{CaptureSignal, SimulatedBackend};
///
/// let backend = SimulatedBackend::builder()
///     .inputs(2)
///     .outputs(2)
///     .capture_signal(CaptureSignal::Ramp)
///     .build();
/// let device = backend.handle();
/// assert_eq!(device.streams_opened(), 0);
/// ```
pub struct SimulatedBackend {
    info: DeviceInfo,
    sample_rates: Vec<u32>,
    signal: CaptureSignal,
    speed: f64,
    fail_after: Option<u64>,
    status_every: Option<u64>,
    device: Arc<SimulatedDevice>,
}

impl SimulatedBackend {
    /// Creates a builder with a stereo in/out device at 48kHz.
    pub fn builder() -> SimulatedBackendBuilder {
        SimulatedBackendBuilder::default()
    }

    /// Shared observable device state.
    pub fn handle(&self) -> Arc<SimulatedDevice> {
        Arc::clone(&self.device)
    }
}

/// Builder for [`SimulatedBackend`].
#[derive(Debug, Clone)]
pub struct SimulatedBackendBuilder {
    name: String,
    inputs: u16,
    outputs: u16,
    default_sample_rate: u32,
    sample_rates: Vec<u32>,
    signal: CaptureSignal,
    speed: f64,
    fail_after: Option<u64>,
    status_every: Option<u64>,
}

impl Default for SimulatedBackendBuilder {
    fn default() -> Self {
        Self {
            name: "simulated".to_string(),
            inputs: 2,
            outputs: 2,
            default_sample_rate: 48000,
            sample_rates: vec![22050, 44100, 48000, 96000],
            signal: CaptureSignal::Silence,
            speed: 1.0,
            fail_after: None,
            status_every: None,
        }
    }
}

impl SimulatedBackendBuilder {
    /// Sets the device name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the number of device input channels.
    pub fn inputs(mut self, channels: u16) -> Self {
        self.inputs = channels;
        self
    }

    /// Sets the number of device output channels.
    pub fn outputs(mut self, channels: u16) -> Self {
        self.outputs = channels;
        self
    }

    /// Sets the default sample rate; it is always supported.
    pub fn default_sample_rate(mut self, sample_rate: u32) -> Self {
        self.default_sample_rate = sample_rate;
        self
    }

    /// Sets the supported sample rates.
    pub fn sample_rates(mut self, rates: impl Into<Vec<u32>>) -> Self {
        self.sample_rates = rates.into();
        self
    }

    /// Sets the signal fed to the capture side.
    pub fn capture_signal(mut self, signal: CaptureSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Runs the device clock `speed` times faster than real time.
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Fails every stream after `callbacks` callback invocations.
    pub fn fail_after_callbacks(mut self, callbacks: u64) -> Self {
        self.fail_after = Some(callbacks);
        self
    }

    /// Reports an output underflow status every `callbacks` invocations.
    pub fn status_every(mut self, callbacks: u64) -> Self {
        self.status_every = Some(callbacks.max(1));
        self
    }

    /// Builds the backend.
    pub fn build(self) -> SimulatedBackend {
        let mut sample_rates = self.sample_rates;
        if !sample_rates.contains(&self.default_sample_rate) {
            sample_rates.push(self.default_sample_rate);
        }
        SimulatedBackend {
            info: DeviceInfo {
                id: DeviceId::new(self.name.as_str()),
                name: self.name,
                max_input_channels: self.inputs,
                max_output_channels: self.outputs,
                default_sample_rate: self.default_sample_rate,
            },
            sample_rates,
            signal: self.signal,
            speed: if self.speed > 0.0 { self.speed } else { 1.0 },
            fail_after: self.fail_after,
            status_every: self.status_every,
            device: Arc::new(SimulatedDevice::default()),
        }
    }
}

impl AudioBackend for SimulatedBackend {
    fn device(&self) -> &DeviceInfo {
        &self.info
    }

    fn supports_sample_rate(&self, sample_rate: u32) -> bool {
        self.sample_rates.contains(&sample_rate)
    }

    fn open_stream(
        &self,
        params: &StreamParams,
        mut callback: Box<dyn RealtimeCallback>,
        on_finished: FinishedCallback,
    ) -> Result<Box<dyn BackendStream>, StreamError> {
        if params.input_channels > self.info.max_input_channels
            || params.output_channels > self.info.max_output_channels
        {
            return Err(StreamError::BackendError(format!(
                "{} cannot open {} inputs and {} outputs",
                self.info.name, params.input_channels, params.output_channels
            )));
        }
        if params.block_size == 0 || !self.supports_sample_rate(params.sample_rate) {
            return Err(StreamError::UnsupportedSampleRate {
                requested: params.sample_rate,
            });
        }

        let block = params.block_size;
        let in_ch = params.input_channels as usize;
        let out_ch = params.output_channels as usize;
        let sample_rate = params.sample_rate;
        let period = Duration::from_secs_f64(block as f64 / f64::from(sample_rate) / self.speed);

        let signal = self.signal.clone();
        let fail_after = self.fail_after;
        let status_every = self.status_every;
        let device = Arc::clone(&self.device);
        device.output_width.store(out_ch as u64, Ordering::SeqCst);
        device.streams_opened.fetch_add(1, Ordering::SeqCst);

        let stop = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicBool::new(true));
        let thread_stop = Arc::clone(&stop);
        let thread_active = Arc::clone(&active);

        let thread = std::thread::Builder::new()
            .name("realtime-sound-sim".to_string())
            .spawn(move || {
                let mut input = vec![0.0f32; block * in_ch];
                let mut output = vec![0.0f32; block * out_ch];
                let mut position: u64 = 0;
                let mut ticks: u64 = 0;
                let mut next = Instant::now();

                let end = loop {
                    if thread_stop.load(Ordering::SeqCst) {
                        break StreamEnd::Closed;
                    }
                    if fail_after.is_some_and(|n| ticks >= n) {
                        break StreamEnd::Failed("simulated device failure".to_string());
                    }

                    for (i, slot) in input.iter_mut().enumerate() {
                        let frame = position + (i / in_ch) as u64;
                        *slot = signal.sample(frame, i % in_ch, sample_rate);
                    }
                    output.fill(0.0);
                    let status = CallbackStatus {
                        output_underflow: status_every.is_some_and(|n| (ticks + 1) % n == 0),
                        ..Default::default()
                    };

                    let flow = callback.process(&input, &mut output, block, status);
                    device.callbacks.fetch_add(1, Ordering::SeqCst);
                    if out_ch > 0 {
                        device.played.lock().extend_from_slice(&output);
                    }
                    position += block as u64;
                    ticks += 1;

                    if flow == CallbackFlow::Stop {
                        break StreamEnd::Completed;
                    }

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    }
                };

                thread_active.store(false, Ordering::SeqCst);
                tracing::debug!(?end, ticks, "simulated stream ended");
                on_finished(end);
            })
            .map_err(|e| StreamError::BackendError(e.to_string()))?;

        Ok(Box::new(SimulatedStream {
            stop,
            active,
            thread: Some(thread),
        }))
    }
}

struct SimulatedStream {
    stop: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BackendStream for SimulatedStream {
    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("simulated stream thread panicked");
            }
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LatencyHint, SampleFormat};
    use std::sync::mpsc;

    struct StopAfter {
        remaining: usize,
        seen: Arc<Mutex<Vec<f32>>>,
    }

    impl RealtimeCallback for StopAfter {
        fn process(
            &mut self,
            input: &[f32],
            output: &mut [f32],
            _frames: usize,
            _status: CallbackStatus,
        ) -> CallbackFlow {
            self.seen.lock().extend_from_slice(input);
            output.fill(0.25);
            self.remaining -= 1;
            if self.remaining == 0 {
                CallbackFlow::Stop
            } else {
                CallbackFlow::Continue
            }
        }
    }

    fn params(inputs: u16, outputs: u16) -> StreamParams {
        StreamParams {
            sample_rate: 48000,
            block_size: 64,
            device: DeviceId::new("simulated"),
            input_channels: inputs,
            output_channels: outputs,
            sample_format: SampleFormat::F32,
            latency: LatencyHint::Low,
        }
    }

    #[test]
    fn test_capture_signal_ramp_and_tone() {
        assert_eq!(CaptureSignal::Ramp.sample(42, 1, 48000), 42.0);
        let tone = CaptureSignal::Tone {
            frequency: 12000.0,
            amplitude: 0.5,
        };
        assert!((tone.sample(1, 0, 48000) - 0.5).abs() < 1e-6);
        assert_eq!(CaptureSignal::Silence.sample(7, 0, 48000), 0.0);
    }

    #[test]
    fn test_runs_until_callback_stops() {
        let backend = SimulatedBackend::builder()
            .inputs(1)
            .capture_signal(CaptureSignal::Ramp)
            .speed(20.0)
            .build();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();

        let mut stream = backend
            .open_stream(
                &params(1, 2),
                Box::new(StopAfter {
                    remaining: 3,
                    seen: Arc::clone(&seen),
                }),
                Box::new(move |end| {
                    let _ = tx.send(end);
                }),
            )
            .unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            StreamEnd::Completed
        );
        stream.close();
        assert!(!stream.is_active());

        let expected: Vec<f32> = (0..192).map(|i| i as f32).collect();
        assert_eq!(*seen.lock(), expected);
        let device = backend.handle();
        assert_eq!(device.played_frames(), 192);
        assert!(device.played().iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_injected_failure() {
        let backend = SimulatedBackend::builder()
            .fail_after_callbacks(2)
            .speed(20.0)
            .build();
        let (tx, rx) = mpsc::channel();
        let _stream = backend
            .open_stream(
                &params(2, 2),
                Box::new(StopAfter {
                    remaining: 100,
                    seen: Arc::new(Mutex::new(Vec::new())),
                }),
                Box::new(move |end| {
                    let _ = tx.send(end);
                }),
            )
            .unwrap();

        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            StreamEnd::Failed(_)
        ));
        assert_eq!(backend.handle().callbacks(), 2);
    }

    #[test]
    fn test_rejects_too_many_channels() {
        let backend = SimulatedBackend::builder().inputs(1).build();
        let result = backend.open_stream(
            &params(2, 0),
            Box::new(StopAfter {
                remaining: 1,
                seen: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(|_| {}),
        );
        assert!(result.is_err());
    }
}
