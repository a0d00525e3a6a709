//! List what a camera offers, then grab a few frames and report throughput.
//!
//!     cargo run --example probe -- /dev/video0

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use redface_capture::{probe, Camera, CaptureConfig};
use tokio_stream::StreamExt;

const FRAMES: usize = 30;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let config = CaptureConfig::default();
    let device = std::env::args()
        .nth(1)
        .map(Into::into)
        .unwrap_or_else(|| config.device.clone());

    for report in probe(&device).with_context(|| format!("probing {}", device.display()))? {
        let sizes: Vec<String> = report
            .sizes
            .iter()
            .map(|s| format!("{}x{}", s.max_width, s.max_height))
            .collect();
        println!(
            "{} {:<24} {} [{}]",
            if report.supported { "*" } else { " " },
            report.description,
            report.format,
            sizes.join(", ")
        );
    }

    let mut cam = Camera::open_with(&device, &config);
    let mut frames = cam.stream()?;
    let start = Instant::now();
    let mut got = 0;
    while got < FRAMES {
        match tokio::time::timeout(Duration::from_secs(5), frames.next()).await {
            Ok(Some(frame)) => {
                got += 1;
                println!(
                    "#{:<4} {}x{} from {} (slot {})",
                    frame.sequence(),
                    frame.width(),
                    frame.height(),
                    frame.source_format(),
                    frame.slot()
                );
            }
            Ok(None) => break,
            Err(_) => {
                println!("no frame for 5s, giving up");
                break;
            }
        }
    }
    cam.close();
    while frames.next().await.is_some() {}

    let elapsed = start.elapsed().as_secs_f64();
    let stats = cam.stats();
    println!(
        "{got} frames in {elapsed:.2}s ({:.1} fps), {} dropped",
        got as f64 / elapsed,
        stats.dropped()
    );
    if let Some(err) = cam.err() {
        anyhow::bail!("capture failed: {err}");
    }
    Ok(())
}
