//! WAV file receiver implementation.

use crate::format::f32_to_i16;
use crate::receiver::{CaptureReceiver, Fill};
use crate::{SampleBlock, SinkError};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

// Canonical 44-byte PCM header: RIFF, fmt and data chunk headers.
const HEADER_LEN: u32 = 44;
const RIFF_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 40;
const FMT_CHUNK_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Records captured audio into a 16-bit PCM WAV file.
///
/// The file is created on the first block, once the channel count is known,
/// and its header is patched with the final sizes in `on_stop()`. File I/O
/// runs on the blocking thread pool.
///
/// # Example
///
/// ```no_run
/// use realtime_sound::WavFileReceiver;
///
/// let receiver = WavFileReceiver::new("take.wav");
/// // Hand it to StreamContext::record_into...
/// ```
pub struct WavFileReceiver {
    name: String,
    path: Arc<PathBuf>,
    sample_rate: AtomicU32,
    writer: Arc<Mutex<Option<WavWriter>>>,
}

struct WavWriter {
    out: BufWriter<File>,
    data_bytes: u32,
}

impl WavWriter {
    fn create(path: &Path, sample_rate: u32, channels: u16) -> std::io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        let block_align = channels * (BITS_PER_SAMPLE / 8);
        let byte_rate = sample_rate * u32::from(block_align);

        out.write_all(b"RIFF")?;
        out.write_all(&(HEADER_LEN - 8).to_le_bytes())?;
        out.write_all(b"WAVE")?;
        out.write_all(b"fmt ")?;
        out.write_all(&FMT_CHUNK_LEN.to_le_bytes())?;
        out.write_all(&FORMAT_PCM.to_le_bytes())?;
        out.write_all(&channels.to_le_bytes())?;
        out.write_all(&sample_rate.to_le_bytes())?;
        out.write_all(&byte_rate.to_le_bytes())?;
        out.write_all(&block_align.to_le_bytes())?;
        out.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;
        out.write_all(b"data")?;
        out.write_all(&0u32.to_le_bytes())?;

        Ok(Self { out, data_bytes: 0 })
    }

    fn append(&mut self, samples: &[f32]) -> std::io::Result<()> {
        for &sample in samples {
            self.out.write_all(&f32_to_i16(sample).to_le_bytes())?;
        }
        self.data_bytes += (samples.len() * 2) as u32;
        Ok(())
    }

    fn finalize(mut self) -> std::io::Result<()> {
        self.out.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
        self.out
            .write_all(&(HEADER_LEN - 8 + self.data_bytes).to_le_bytes())?;
        self.out.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        self.out.write_all(&self.data_bytes.to_le_bytes())?;
        self.out.flush()
    }
}

impl WavFileReceiver {
    /// Creates a receiver writing to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            name: format!("wav:{}", path.as_ref().display()),
            path: Arc::new(path.as_ref().to_path_buf()),
            sample_rate: AtomicU32::new(48000),
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// Path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CaptureReceiver for WavFileReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_start(&self, sample_rate: u32) -> Result<(), SinkError> {
        self.sample_rate.store(sample_rate, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, block: &SampleBlock) -> Result<Fill, SinkError> {
        tracing::trace!("{}: writing {} frames", self.name, block.frames());

        let block = block.clone();
        let sample_rate = self.sample_rate.load(Ordering::SeqCst);
        let writer = Arc::clone(&self.writer);
        let path = Arc::clone(&self.path);

        tokio::task::spawn_blocking(move || {
            let mut writer = writer.blocking_lock();
            if writer.is_none() {
                let created = WavWriter::create(&path, sample_rate, block.channels())
                    .map_err(|e| SinkError::file_error(&*path, e))?;
                *writer = Some(created);
            }
            if let Some(w) = writer.as_mut() {
                w.append(block.samples())
                    .map_err(|e| SinkError::file_error(&*path, e))?;
            }
            Ok(Fill::Partial)
        })
        .await
        .map_err(|e| SinkError::custom(format!("write task panicked: {e}")))?
    }

    async fn on_stop(&self) -> Result<(), SinkError> {
        let writer = Arc::clone(&self.writer);
        let path = Arc::clone(&self.path);

        tokio::task::spawn_blocking(move || {
            if let Some(w) = writer.blocking_lock().take() {
                w.finalize().map_err(|e| SinkError::file_error(&*path, e))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| SinkError::custom(format!("finalize task panicked: {e}")))?
    }
}
