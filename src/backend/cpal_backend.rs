//! Hardware backend over CPAL.
//!
//! CPAL streams are not `Send` on every host, so each session gets a
//! dedicated thread that builds the streams, keeps them alive and drops them
//! once the callback completes or the session closes the handle.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SizedSample};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};

use super::{
    AudioBackend, BackendStream, CallbackFlow, CallbackStatus, DeviceId, DeviceInfo,
    FinishedCallback, RealtimeCallback, StreamEnd, StreamParams,
};
use crate::{LatencyHint, SampleFormat, StreamError};

/// Blocks of capture buffered between the input and output streams of a
/// duplex session.
const DUPLEX_RING_BLOCKS: usize = 4;

const INPUT_OVERFLOW: u8 = 1;
const INPUT_UNDERFLOW: u8 = 2;
const BACKEND_WARNING: u8 = 8;

enum Control {
    Completed,
    Close,
    Failed(String),
}

/// Backend for real audio devices.
///
/// Capture and playback may use different CPAL devices (the host's default
/// input and output), exposed together as one [`DeviceInfo`].
pub struct CpalBackend {
    info: DeviceInfo,
    input: Option<Device>,
    output: Option<Device>,
}

impl CpalBackend {
    /// Opens the host's default input and output devices.
    ///
    /// # Errors
    ///
    /// Returns `NoDefaultDevice` if the host has neither.
    pub fn open_default() -> Result<Self, StreamError> {
        let host = cpal::default_host();
        let input = host.default_input_device();
        let output = host.default_output_device();
        if input.is_none() && output.is_none() {
            return Err(StreamError::NoDefaultDevice);
        }
        Ok(Self::from_devices(input, output))
    }

    /// Opens a specific device by name, for every direction it supports.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no device with the given name exists.
    pub fn open_by_name(name: &str) -> Result<Self, StreamError> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| StreamError::BackendError(e.to_string()))?;

        for device in devices {
            if device.name().is_ok_and(|n| n == name) {
                let input = (max_input_channels(&device) > 0).then(|| device.clone());
                let output = (max_output_channels(&device) > 0).then_some(device);
                return Ok(Self::from_devices(input, output));
            }
        }

        Err(StreamError::DeviceNotFound {
            name: name.to_string(),
        })
    }

    fn from_devices(input: Option<Device>, output: Option<Device>) -> Self {
        let name = output
            .as_ref()
            .or(input.as_ref())
            .and_then(|d| d.name().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let default_sample_rate = output
            .as_ref()
            .and_then(|d| d.default_output_config().ok())
            .or_else(|| input.as_ref().and_then(|d| d.default_input_config().ok()))
            .map_or(48000, |c| c.sample_rate().0);

        let info = DeviceInfo {
            id: DeviceId::new(name.as_str()),
            name,
            max_input_channels: input.as_ref().map_or(0, max_input_channels),
            max_output_channels: output.as_ref().map_or(0, max_output_channels),
            default_sample_rate,
        };
        tracing::debug!(?info, "opened cpal device");

        Self {
            info,
            input,
            output,
        }
    }
}

fn max_input_channels(device: &Device) -> u16 {
    device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

fn max_output_channels(device: &Device) -> u16 {
    device
        .supported_output_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

impl AudioBackend for CpalBackend {
    fn device(&self) -> &DeviceInfo {
        &self.info
    }

    fn supports_sample_rate(&self, sample_rate: u32) -> bool {
        let in_range = |min: cpal::SampleRate, max: cpal::SampleRate| {
            min.0 <= sample_rate && sample_rate <= max.0
        };
        let input_ok = self.input.as_ref().map_or(true, |d| {
            d.supported_input_configs()
                .map(|mut c| c.any(|r| in_range(r.min_sample_rate(), r.max_sample_rate())))
                .unwrap_or(false)
        });
        let output_ok = self.output.as_ref().map_or(true, |d| {
            d.supported_output_configs()
                .map(|mut c| c.any(|r| in_range(r.min_sample_rate(), r.max_sample_rate())))
                .unwrap_or(false)
        });
        sample_rate > 0 && input_ok && output_ok
    }

    fn open_stream(
        &self,
        params: &StreamParams,
        callback: Box<dyn RealtimeCallback>,
        on_finished: FinishedCallback,
    ) -> Result<Box<dyn BackendStream>, StreamError> {
        if params.input_channels > 0 && self.input.is_none() {
            return Err(StreamError::BackendError(format!(
                "{} has no input device",
                self.info.name
            )));
        }
        if params.output_channels > 0 && self.output.is_none() {
            return Err(StreamError::BackendError(format!(
                "{} has no output device",
                self.info.name
            )));
        }

        let (control_tx, control_rx) = sync_channel::<Control>(4);
        let (ready_tx, ready_rx) = sync_channel::<Result<(), StreamError>>(1);
        let active = Arc::new(AtomicBool::new(false));

        let input = self.input.clone();
        let output = self.output.clone();
        let params = params.clone();
        let thread_control = control_tx.clone();
        let thread_active = Arc::clone(&active);

        tracing::info!(
            device = %self.info.name,
            sample_rate = params.sample_rate,
            block_size = params.block_size,
            inputs = params.input_channels,
            outputs = params.output_channels,
            "opening cpal stream"
        );

        let thread = std::thread::Builder::new()
            .name("realtime-sound-cpal".to_string())
            .spawn(move || {
                let driver = Driver::new(callback, &params, thread_control.clone());
                let built = match params.sample_format {
                    SampleFormat::F32 => build_streams::<f32>(
                        input.as_ref(),
                        output.as_ref(),
                        &params,
                        driver,
                        &thread_control,
                    ),
                    SampleFormat::I16 => build_streams::<i16>(
                        input.as_ref(),
                        output.as_ref(),
                        &params,
                        driver,
                        &thread_control,
                    ),
                };
                let streams = match built {
                    Ok(streams) => streams,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                for stream in &streams {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(StreamError::BackendError(e.to_string())));
                        return;
                    }
                }

                thread_active.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));

                let end = wait_for_end(&control_rx);
                drop(streams);
                thread_active.store(false, Ordering::SeqCst);
                tracing::debug!(?end, "cpal stream thread exiting");
                on_finished(end);
            })
            .map_err(|e| StreamError::BackendError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                control: control_tx,
                active,
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(StreamError::BackendError(
                    "stream thread exited before opening".to_string(),
                ))
            }
        }
    }
}

fn wait_for_end(control: &Receiver<Control>) -> StreamEnd {
    match control.recv() {
        Ok(Control::Completed) => StreamEnd::Completed,
        Ok(Control::Failed(reason)) => StreamEnd::Failed(reason),
        Ok(Control::Close) | Err(_) => StreamEnd::Closed,
    }
}

fn stream_config(params: &StreamParams, channels: u16) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: match params.latency {
            LatencyHint::Low => cpal::BufferSize::Fixed(params.block_size as u32),
            LatencyHint::High => cpal::BufferSize::Default,
        },
    }
}

fn error_handler(
    control: SyncSender<Control>,
    flags: Arc<AtomicU8>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| match err {
        cpal::StreamError::DeviceNotAvailable => {
            tracing::error!("Audio stream error: {}", err);
            let _ = control.try_send(Control::Failed(err.to_string()));
        }
        cpal::StreamError::BackendSpecific { .. } => {
            tracing::warn!("Audio stream warning: {}", err);
            flags.fetch_or(BACKEND_WARNING, Ordering::Relaxed);
        }
    }
}

fn build_streams<T>(
    input: Option<&Device>,
    output: Option<&Device>,
    params: &StreamParams,
    mut driver: Driver,
    control: &SyncSender<Control>,
) -> Result<Vec<cpal::Stream>, StreamError>
where
    T: SizedSample + FromSample<f32>,
    f32: FromSample<T>,
{
    let backend_err = |e: cpal::BuildStreamError| StreamError::BackendError(e.to_string());
    let missing = || StreamError::BackendError("device direction unavailable".to_string());
    let flags = Arc::clone(&driver.flags);

    match (params.input_channels > 0, params.output_channels > 0) {
        (true, false) => {
            let device = input.ok_or_else(missing)?;
            let stream = device
                .build_input_stream(
                    &stream_config(params, params.input_channels),
                    move |data: &[T], _: &cpal::InputCallbackInfo| driver.capture(data),
                    error_handler(control.clone(), flags),
                    None,
                )
                .map_err(backend_err)?;
            Ok(vec![stream])
        }
        (false, true) => {
            let device = output.ok_or_else(missing)?;
            let stream = device
                .build_output_stream(
                    &stream_config(params, params.output_channels),
                    move |data: &mut [T], _: &cpal::OutputCallbackInfo| driver.render(data, None),
                    error_handler(control.clone(), flags),
                    None,
                )
                .map_err(backend_err)?;
            Ok(vec![stream])
        }
        (true, true) => {
            let in_device = input.ok_or_else(missing)?;
            let out_device = output.ok_or_else(missing)?;

            let ring = HeapRb::<f32>::new(
                params.block_size * params.input_channels as usize * DUPLEX_RING_BLOCKS,
            );
            let (mut producer, mut consumer) = ring.split();
            let input_flags = Arc::clone(&flags);

            let input_stream = in_device
                .build_input_stream(
                    &stream_config(params, params.input_channels),
                    move |data: &[T], _: &cpal::InputCallbackInfo| {
                        // Whole callbacks only, so frames stay aligned
                        if producer.vacant_len() < data.len() {
                            input_flags.fetch_or(INPUT_OVERFLOW, Ordering::Relaxed);
                            return;
                        }
                        for &sample in data {
                            let _ = producer.try_push(f32::from_sample(sample));
                        }
                    },
                    error_handler(control.clone(), Arc::clone(&flags)),
                    None,
                )
                .map_err(backend_err)?;

            let output_stream = out_device
                .build_output_stream(
                    &stream_config(params, params.output_channels),
                    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                        driver.render(data, Some(&mut consumer));
                    },
                    error_handler(control.clone(), flags),
                    None,
                )
                .map_err(backend_err)?;

            Ok(vec![input_stream, output_stream])
        }
        (false, false) => Err(StreamError::invalid_config(
            "stream has neither inputs nor outputs",
        )),
    }
}

/// Adapts CPAL's buffers to [`RealtimeCallback`] blocks.
///
/// Scratch buffers are sized once for one block; host buffers of any size
/// are processed in block-sized pieces.
struct Driver {
    callback: Box<dyn RealtimeCallback>,
    block: usize,
    in_ch: usize,
    out_ch: usize,
    input: Vec<f32>,
    output: Vec<f32>,
    flags: Arc<AtomicU8>,
    control: SyncSender<Control>,
    done: bool,
}

impl Driver {
    fn new(
        callback: Box<dyn RealtimeCallback>,
        params: &StreamParams,
        control: SyncSender<Control>,
    ) -> Self {
        let block = params.block_size.max(1);
        let in_ch = params.input_channels as usize;
        let out_ch = params.output_channels as usize;
        Self {
            callback,
            block,
            in_ch,
            out_ch,
            input: vec![0.0; block * in_ch],
            output: vec![0.0; block * out_ch],
            flags: Arc::new(AtomicU8::new(0)),
            control,
            done: false,
        }
    }

    fn take_status(&self) -> CallbackStatus {
        CallbackStatus::from_bits(self.flags.swap(0, Ordering::Relaxed))
    }

    fn finish(&mut self) {
        self.done = true;
        let _ = self.control.try_send(Control::Completed);
    }

    fn capture<T>(&mut self, data: &[T])
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        if self.done || self.in_ch == 0 {
            return;
        }
        let total = data.len() / self.in_ch;
        let mut offset = 0;
        while offset < total {
            let n = (total - offset).min(self.block);
            let src = &data[offset * self.in_ch..(offset + n) * self.in_ch];
            for (dst, &s) in self.input.iter_mut().zip(src) {
                *dst = f32::from_sample(s);
            }
            let status = self.take_status();
            let flow = self.callback.process(
                &self.input[..n * self.in_ch],
                &mut self.output[..0],
                n,
                status,
            );
            offset += n;
            if flow == CallbackFlow::Stop {
                self.finish();
                return;
            }
        }
    }

    fn render<T>(&mut self, data: &mut [T], mut capture: Option<&mut HeapCons<f32>>)
    where
        T: SizedSample + FromSample<f32>,
    {
        if self.done || self.out_ch == 0 {
            data.fill(T::EQUILIBRIUM);
            return;
        }
        let total = data.len() / self.out_ch;
        let mut offset = 0;
        while offset < total {
            let n = (total - offset).min(self.block);
            let in_len = n * self.in_ch;
            let out_len = n * self.out_ch;

            if let Some(consumer) = capture.as_deref_mut() {
                let ready = consumer.occupied_len() / self.in_ch * self.in_ch;
                let got = consumer.pop_slice(&mut self.input[..in_len.min(ready)]);
                if got < in_len {
                    self.input[got..in_len].fill(0.0);
                    self.flags.fetch_or(INPUT_UNDERFLOW, Ordering::Relaxed);
                }
            }

            self.output[..out_len].fill(0.0);
            let status = self.take_status();
            let flow = self.callback.process(
                &self.input[..in_len],
                &mut self.output[..out_len],
                n,
                status,
            );

            let dst = &mut data[offset * self.out_ch..(offset + n) * self.out_ch];
            for (d, &s) in dst.iter_mut().zip(&self.output[..out_len]) {
                *d = T::from_sample(s);
            }
            offset += n;

            if flow == CallbackFlow::Stop {
                data[offset * self.out_ch..].fill(T::EQUILIBRIUM);
                self.finish();
                return;
            }
        }
    }
}

struct CpalStream {
    control: SyncSender<Control>,
    active: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BackendStream for CpalStream {
    fn close(&mut self) {
        let _ = self.control.try_send(Control::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("cpal stream thread panicked");
            }
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Lists the names of all devices of the default host.
///
/// # Errors
///
/// Returns an error if the audio host cannot be accessed.
pub fn list_devices() -> Result<Vec<String>, StreamError> {
    let host = cpal::default_host();
    let devices = host
        .devices()
        .map_err(|e| StreamError::BackendError(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Gets the name of the default output device, falling back to the default
/// input device.
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device()
        .or_else(|| host.default_input_device())
        .and_then(|d| d.name().ok())
}
