//! Play-record example.
//!
//! Plays a one second 440 Hz tone on the default output while recording
//! the default inputs on the same clock, then plays the recording back.
//!
//! Run with: cargo run --example default_playrec

use realtime_sound::{SampleBlock, StreamContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt::init();

    let mut ctx = StreamContext::builder()
        .on_event(|event| tracing::warn!(?event, "stream event"))
        .build()?;

    let rate = ctx.sample_rate();
    println!(
        "Device: {} ({} in / {} out @ {} Hz)",
        ctx.device().name,
        ctx.inputs().count(),
        ctx.outputs().count(),
        rate
    );

    let tone = SampleBlock::from_fn(rate as usize, 1, |frame, _| {
        let t = frame as f32 / rate as f32;
        (std::f32::consts::TAU * 440.0 * t).sin() * 0.2
    });

    println!("Playing a tone and recording for one second...");
    let take = ctx.playrec(tone, true).await?;
    let stats = take.stats();
    let Some(recording) = take.recording() else {
        return Err("no recording".into());
    };

    println!(
        "Recorded {} frames on {} channels (underruns: {}, overruns: {})",
        recording.frames(),
        recording.channels(),
        stats.underrun_frames,
        stats.capture_overrun_frames
    );

    // Play back the first input on every output
    let first: Vec<f32> = recording.channel(0).collect();
    println!("Playing the recording back...");
    ctx.play(SampleBlock::new(first, 1), true).await?;

    Ok(())
}
