//! The boundary to the OS capture device.
//!
//! [`CaptureDevice`] is the small set of driver operations the capture loop
//! needs; [`V4l2Backend`](crate::V4l2Backend) implements it on top of Video4Linux.

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::PixelFormat;

/// One pixel format advertised by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub format: PixelFormat,
    /// Driver supplied, e.g. "YUYV 4:2:2".
    pub description: String,
}

/// Frame size entry as enumerated by the driver. Discrete sizes have
/// `min == max` in both dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSizeRange {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

impl FrameSizeRange {
    pub fn discrete(width: u32, height: u32) -> Self {
        Self {
            min_width: width,
            max_width: width,
            min_height: height,
            max_height: height,
        }
    }
}

/// What the driver actually configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

/// A ready driver buffer, borrowed until the next call on the device.
#[derive(Debug)]
pub struct RawBuffer<'a> {
    pub slot: usize,
    pub bytes: &'a [u8],
}

/// Driver operations used by the capture loop.
///
/// A device is created, used and dropped on the capture thread only;
/// dropping it closes the handle.
pub trait CaptureDevice {
    fn formats(&mut self) -> io::Result<Vec<FormatDescription>>;

    fn frame_sizes(&mut self, format: PixelFormat) -> io::Result<Vec<FrameSizeRange>>;

    fn current_format(&mut self) -> io::Result<NegotiatedFormat>;

    /// Request `format` at `width`×`height`; returns what the driver settled on.
    fn set_format(&mut self, format: PixelFormat, width: u32, height: u32)
        -> io::Result<NegotiatedFormat>;

    fn start(&mut self) -> io::Result<()>;

    fn stop(&mut self) -> io::Result<()>;

    /// Block until a buffer is ready. Returns an error of kind
    /// [`io::ErrorKind::TimedOut`] when `timeout` elapses first.
    fn wait(&mut self, timeout: Duration) -> io::Result<()>;

    /// Take ownership of the next ready buffer slot.
    fn dequeue(&mut self) -> io::Result<RawBuffer<'_>>;

    /// Hand `slot` back to the driver.
    fn release(&mut self, slot: usize) -> io::Result<()>;
}

/// Opens devices by path. Moved onto the capture thread by
/// [`Camera::stream`](crate::Camera::stream).
pub trait DeviceBackend: Send + 'static {
    type Device: CaptureDevice;

    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}
