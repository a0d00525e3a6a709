use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use image::RgbImage;
use log::{info, warn};
use redface_capture::{probe, Camera, CaptureConfig, FormatRegistry, Frame, PixelFormat};
use tokio_stream::StreamExt;

/// Camera capture tool for redface.
#[derive(Parser)]
#[command(version, about)]
struct CliArgs {
    /// Capture config (JSON); defaults are used if it does not exist
    #[arg(long, default_value = CaptureConfig::DEFAULT_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the pixel formats and frame sizes a device offers
    Probe {
        /// Overrides the configured device
        #[arg(long)]
        device: Option<PathBuf>,
    },
    /// Capture frames, optionally saving the last one as PNG
    Capture {
        #[arg(long)]
        device: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Stop after this many delivered frames
        #[arg(long, default_value = "1")]
        frames: usize,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    let mut config = CaptureConfig::load_or_default(&args.config)?;

    match args.command {
        Command::Probe { device } => {
            if let Some(device) = device {
                config.device = device;
            }
            run_probe(&config)
        }
        Command::Capture {
            device,
            timeout,
            frames,
            output,
        } => {
            if let Some(device) = device {
                config.device = device;
            }
            run_capture(&config, Duration::from_secs(timeout), frames, output.as_deref()).await
        }
    }
}

fn run_probe(config: &CaptureConfig) -> Result<()> {
    let reports = probe(&config.device)?;
    println!("{}:", config.device.display());
    for report in &reports {
        println!(
            "  {} {} ({}){}",
            if report.supported { "+" } else { "-" },
            report.format,
            report.description,
            if report.supported { "" } else { " unsupported" }
        );
        for size in &report.sizes {
            if size.min_width == size.max_width && size.min_height == size.max_height {
                println!("      {}x{}", size.max_width, size.max_height);
            } else {
                println!(
                    "      {}x{} - {}x{}",
                    size.min_width, size.min_height, size.max_width, size.max_height
                );
            }
        }
    }

    let offered: Vec<PixelFormat> = reports.iter().map(|r| r.format).collect();
    match FormatRegistry::with_defaults().select(&offered) {
        Some((format, _)) => println!("would capture {format}"),
        None => println!("no supported format"),
    }
    Ok(())
}

async fn run_capture(
    config: &CaptureConfig,
    deadline: Duration,
    wanted: usize,
    output: Option<&Path>,
) -> Result<()> {
    let mut cam = Camera::from_config(config);
    let mut frames = cam.stream()?;

    let stop = cam.stop_handle();
    ctrlc::set_handler(move || stop.stop()).context("installing Ctrl-C handler")?;

    let mut last: Option<Frame> = None;
    let mut got = 0;
    let collect = async {
        while let Some(frame) = frames.next().await {
            got += 1;
            info!(
                "frame {} {}x{} from {}",
                frame.sequence(),
                frame.width(),
                frame.height(),
                frame.source_format()
            );
            // Keep only the newest; the old one goes back to the driver here.
            last = Some(frame);
            if got >= wanted {
                break;
            }
        }
    };
    if tokio::time::timeout(deadline, collect).await.is_err() {
        warn!("no more frames after {}s", deadline.as_secs());
    }
    cam.close();
    // drain so the capture thread can finish
    while frames.next().await.is_some() {}

    let stats = cam.stats();
    println!(
        "{} delivered, {} rejected by exposure, {} dropped while busy, {} discarded on stop",
        stats.delivered, stats.quality_dropped, stats.saturation_dropped, stats.discarded
    );
    if let Some(err) = cam.err() {
        return Err(anyhow!("capture failed: {err}"));
    }

    let Some(output) = output else {
        return Ok(());
    };
    let frame = last.ok_or_else(|| anyhow!("no frame captured from {}", config.device.display()))?;
    let (width, height) = (frame.width(), frame.height());
    let image = RgbImage::from_raw(width, height, frame.into_buffer())
        .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height}"))?;
    image
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("saved {}", output.display());
    Ok(())
}
