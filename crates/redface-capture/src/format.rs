use std::fmt;

use crate::color;

/// Four-character driver pixel format code (V4L2 `fourcc`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat([u8; 4]);

impl PixelFormat {
    /// 8-bit grayscale (`GREY`), what most infrared face cameras emit.
    pub const GREY: PixelFormat = PixelFormat(*b"GREY");
    /// Packed 24-bit RGB (`RGB3`).
    pub const RGB24: PixelFormat = PixelFormat(*b"RGB3");
    /// Packed YUV 4:2:2 (`YUYV`).
    pub const YUYV: PixelFormat = PixelFormat(*b"YUYV");

    pub const fn new(code: [u8; 4]) -> Self {
        Self(code)
    }

    pub const fn code(&self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelFormat({self})")
    }
}

/// Converts one raw driver buffer into packed RGB24.
pub type Converter = fn(&[u8]) -> Vec<u8>;

/// Ordered table of the pixel formats we know how to turn into RGB24.
///
/// Registration order is negotiation priority: when a device offers several
/// known formats, the one registered first wins. The registry is built once
/// and handed to the negotiator; there is no process-wide table.
#[derive(Clone)]
pub struct FormatRegistry {
    entries: Vec<(PixelFormat, Converter)>,
}

impl FormatRegistry {
    /// An empty registry. Mostly useful for tests and custom pipelines.
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// RGB24, then YUYV, then GREY.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(PixelFormat::RGB24, color::rgb_passthrough);
        registry.register(PixelFormat::YUYV, color::yuyv_to_rgb);
        registry.register(PixelFormat::GREY, color::gray_to_rgb);
        registry
    }

    /// Append `format` at the lowest priority. Re-registering a format
    /// replaces its converter but keeps its original priority.
    pub fn register(&mut self, format: PixelFormat, converter: Converter) -> &mut Self {
        match self.entries.iter_mut().find(|(f, _)| *f == format) {
            Some(entry) => entry.1 = converter,
            None => self.entries.push((format, converter)),
        }
        self
    }

    pub fn converter(&self, format: PixelFormat) -> Option<Converter> {
        self.entries
            .iter()
            .find(|(f, _)| *f == format)
            .map(|(_, conv)| *conv)
    }

    pub fn contains(&self, format: PixelFormat) -> bool {
        self.converter(format).is_some()
    }

    /// Highest-priority registered format that appears in `offered`.
    pub fn select(&self, offered: &[PixelFormat]) -> Option<(PixelFormat, Converter)> {
        self.entries
            .iter()
            .find(|(f, _)| offered.contains(f))
            .copied()
    }

    /// Known formats in priority order.
    pub fn formats(&self) -> impl Iterator<Item = PixelFormat> + '_ {
        self.entries.iter().map(|(f, _)| *f)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.formats()).finish()
    }
}
