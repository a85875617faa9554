//! Level monitor example.
//!
//! Attaches a rolling-window level meter to the default device and records
//! for five seconds. Levels are logged ten times per second.
//!
//! Run with: cargo run --example level_monitor

use std::time::Duration;

use realtime_sound::{LevelMonitor, MonitorSpec, StreamContext, WindowSize};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Show the monitor's info-level events
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_sound=info".into()),
        )
        .init();

    let monitor = MonitorSpec::new(10, WindowSize::Seconds(0.3), LevelMonitor::new)?;
    let mut ctx = StreamContext::builder().monitor(monitor).build()?;

    println!("Recording for 5 seconds, watch the levels...");
    let take = ctx.record(Duration::from_secs(5), true).await?;

    let stats = take.stats();
    println!(
        "Captured {} frames, monitor dropped {} blocks",
        stats.captured_frames, stats.monitor_drops
    );

    Ok(())
}
