use std::fmt;

use crate::slots::SlotLease;
use crate::PixelFormat;

/// One exposure-checked image converted to packed RGB24.
///
/// The frame owns the driver buffer slot it was captured into. Call
/// [`release`](Frame::release) as soon as the pixels have been consumed so the
/// driver can reuse the slot; a dropped frame releases its slot as well.
pub struct Frame {
    buffer: Vec<u8>,
    width: u32,
    height: u32,
    source_format: PixelFormat,
    sequence: u64,
    lease: SlotLease,
}

impl Frame {
    pub(crate) fn new(
        buffer: Vec<u8>,
        width: u32,
        height: u32,
        source_format: PixelFormat,
        sequence: u64,
        lease: SlotLease,
    ) -> Self {
        Self {
            buffer,
            width,
            height,
            source_format,
            sequence,
            lease,
        }
    }

    /// RGB24 pixels, row-major, 3 bytes per pixel.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Driver format the pixels were converted from.
    pub fn source_format(&self) -> PixelFormat {
        self.source_format
    }

    /// Position of this frame among the buffers the device produced, starting at 0.
    /// Gaps mean frames were dropped in between.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Driver buffer slot held by this frame.
    pub fn slot(&self) -> usize {
        self.lease.slot()
    }

    /// Return the slot to the device.
    pub fn release(self) {
        self.lease.release();
    }

    /// Return the slot and keep the pixels.
    pub fn into_buffer(self) -> Vec<u8> {
        let Frame { buffer, lease, .. } = self;
        lease.release();
        buffer
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("source_format", &self.source_format)
            .field("sequence", &self.sequence)
            .field("slot", &self.lease.slot())
            .field("bytes", &self.buffer.len())
            .finish()
    }
}
