// redface-capture/src/lib.rs
// ============================================================
// Webcam capture pipeline for redface face authentication.
// Opens a V4L2 node, negotiates a pixel format we can convert,
// drops under/over-exposed frames and hands RGB24 frames to a
// single consumer through a drop-newest mailbox.
// ------------------------------------------------------------
// Public API:
//   * Camera::open()    – remember the device, nothing touched yet
//   * Camera::stream()  – spawn the capture thread, get frames
//   * Camera::close()   – cooperative stop, never blocks
//   * Camera::err()     – why the stream ended
// ============================================================

//! redface – camera capture layer
//!
//! One capture thread per [`Camera`] owns the device handle. It negotiates a
//! format from the [`FormatRegistry`], then loops on wait → dequeue → exposure
//! check → convert → publish. Publishing never blocks: if the consumer has not
//! taken the previous [`Frame`] yet, the new one is dropped and its driver
//! slot is handed straight back.
//!
//! ```no_run
//! use redface_capture::Camera;
//!
//! let mut cam = Camera::open("/dev/video2");
//! let mut frames = cam.stream()?;
//! while let Some(frame) = frames.blocking_next() {
//!     println!("{}x{} from slot {}", frame.width(), frame.height(), frame.slot());
//!     frame.release();
//!     cam.close();
//! }
//! if let Some(err) = cam.err() {
//!     eprintln!("capture failed: {err}");
//! }
//! # Ok::<(), redface_capture::CaptureError>(())
//! ```

use std::io;
use std::path::PathBuf;

use thiserror::Error;

mod camera;
mod capture;
pub mod color;
mod config;
mod device;
mod format;
mod frame;
mod negotiate;
mod quality;
mod slots;
mod stream;
mod v4l2;

#[cfg(test)]
mod fake;

pub use camera::Camera;
pub use capture::{StatsSnapshot, StopHandle};
pub use config::{CaptureConfig, ConfigError};
pub use device::{
    CaptureDevice, DeviceBackend, FormatDescription, FrameSizeRange, NegotiatedFormat, RawBuffer,
};
pub use format::{Converter, FormatRegistry, PixelFormat};
pub use frame::Frame;
pub use negotiate::{describe, largest_size, negotiate, probe, FormatReport, Negotiated};
pub use quality::{Exposure, QualityFilter};
pub use slots::{SlotArena, SlotLease};
pub use stream::FrameStream;
pub use v4l2::{V4l2Backend, V4l2Device, DEFAULT_BUFFER_COUNT};

/// Everything that can end a capture run.
///
/// Negotiation errors and read/wait errors are fatal and recorded on the
/// [`Camera`]; wait timeouts, exposure rejections and mailbox saturation are
/// not errors and never show up here.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Can not open device {}: {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to query device formats: {0}")]
    FormatQuery(#[source] io::Error),
    #[error("Device offers no pixel formats")]
    NoFormats,
    #[error("No supported pixel format, device offers: {}", offered.join(", "))]
    UnsupportedFormat { offered: Vec<String> },
    #[error("Device rejected {format} at {width}x{height}: {source}")]
    FormatConfig {
        format: PixelFormat,
        width: u32,
        height: u32,
        #[source]
        source: io::Error,
    },
    #[error("Can not start streaming: {0}")]
    StreamStart(#[source] io::Error),
    #[error("Frame wait failed: {0}")]
    FrameWait(#[source] io::Error),
    #[error("Read frame failed: {0}")]
    FrameRead(#[source] io::Error),
    #[error("Camera is already streaming; open it again to restart capture")]
    AlreadyStreaming,
    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
