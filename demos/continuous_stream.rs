//! Continuous mode example.
//!
//! Keeps the default device open, streams a generated sweep, records a
//! short take while it plays, and writes that take to a WAV file.
//!
//! Run with: cargo run --example continuous_stream

use std::sync::Arc;
use std::time::Duration;

use realtime_sound::{FnGenerator, SampleBlock, StreamContext, WavFileReceiver};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut ctx = StreamContext::builder()
        .outputs(&[0])
        .on_event(|event| tracing::info!(?event, "stream event"))
        .build()?;
    let rate = ctx.sample_rate() as f32;

    ctx.turn_on().await?;
    println!("Continuous mode on; outputs play silence until asked otherwise.");
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Two second sweep from 200 Hz to 2 kHz
    let total = (rate * 2.0) as usize;
    let mut position = 0usize;
    let mut phase = 0.0f32;
    let sweep = FnGenerator::new(1, move |frames| {
        if position >= total {
            return None;
        }
        let frames = frames.min(total - position);
        let block = SampleBlock::from_fn(frames, 1, |_, _| {
            let progress = position as f32 / total as f32;
            let freq = 200.0 + 1800.0 * progress;
            phase = (phase + std::f32::consts::TAU * freq / rate) % std::f32::consts::TAU;
            position += 1;
            phase.sin() * 0.2
        });
        Some(block)
    });

    println!("Playing a sweep...");
    let playing = ctx.play_generator(sweep, false).await?;

    if !ctx.inputs().is_empty() {
        let frames = (rate * 1.5) as u64;
        println!("Recording 1.5 s to continuous.wav...");
        ctx.record_into(Arc::new(WavFileReceiver::new("continuous.wav")), frames, true)
            .await?;
    }

    playing.wait().await?;
    println!("Sweep finished; stream still open.");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats = ctx.stats();
    ctx.turn_off().await?;
    println!("Stats: {stats:?}");

    Ok(())
}
