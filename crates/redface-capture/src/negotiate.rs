//! One-time format negotiation with a freshly opened device.

use std::fmt;
use std::path::Path;

use log::{debug, info, warn};

use crate::device::{CaptureDevice, DeviceBackend, FrameSizeRange, NegotiatedFormat};
use crate::{CaptureError, Converter, FormatRegistry, PixelFormat, Result, V4l2Backend};

/// Format the device was configured with plus the converter for it.
#[derive(Clone, Copy)]
pub struct Negotiated {
    pub format: NegotiatedFormat,
    pub converter: Converter,
}

impl fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiated")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Largest width and largest height over all entries, maximised independently.
pub fn largest_size(sizes: &[FrameSizeRange]) -> Option<(u32, u32)> {
    sizes.iter().fold(None, |acc, s| match acc {
        None => Some((s.max_width, s.max_height)),
        Some((w, h)) => Some((w.max(s.max_width), h.max(s.max_height))),
    })
}

/// Pick the highest-priority registered format the device offers and
/// configure it at the largest advertised size.
pub fn negotiate<D: CaptureDevice>(device: &mut D, registry: &FormatRegistry) -> Result<Negotiated> {
    let offered = device.formats().map_err(CaptureError::FormatQuery)?;
    if offered.is_empty() {
        return Err(CaptureError::NoFormats);
    }
    let codes: Vec<PixelFormat> = offered.iter().map(|d| d.format).collect();
    let (format, converter) = registry.select(&codes).ok_or_else(|| {
        CaptureError::UnsupportedFormat {
            offered: offered
                .iter()
                .map(|d| format!("{} ({})", d.format, d.description))
                .collect(),
        }
    })?;

    let sizes = match device.frame_sizes(format) {
        Ok(sizes) => sizes,
        Err(e) => {
            warn!("can not enumerate frame sizes for {format}: {e}");
            Vec::new()
        }
    };
    let (width, height) = match largest_size(&sizes) {
        Some(size) => size,
        None => {
            let current = device.current_format().map_err(CaptureError::FormatQuery)?;
            debug!("no frame sizes for {format}, keeping {}x{}", current.width, current.height);
            (current.width, current.height)
        }
    };

    let actual = device
        .set_format(format, width, height)
        .map_err(|source| CaptureError::FormatConfig {
            format,
            width,
            height,
            source,
        })?;
    info!(
        "negotiated {} at {}x{} (requested {}x{})",
        actual.format, actual.width, actual.height, width, height
    );
    Ok(Negotiated {
        format: actual,
        converter,
    })
}

/// Open `path`, negotiate and start streaming. Any failure is fatal for the run.
pub(crate) fn open_device<B: DeviceBackend>(
    backend: &B,
    path: &Path,
    registry: &FormatRegistry,
) -> Result<(B::Device, Negotiated)> {
    let mut device = backend
        .open(path)
        .map_err(|source| CaptureError::DeviceOpen {
            path: path.to_path_buf(),
            source,
        })?;
    let negotiated = negotiate(&mut device, registry)?;
    device.start().map_err(CaptureError::StreamStart)?;
    Ok((device, negotiated))
}

/// A format the device offers, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatReport {
    pub format: PixelFormat,
    pub description: String,
    pub sizes: Vec<FrameSizeRange>,
    /// The registry can convert this format.
    pub supported: bool,
}

pub fn describe<D: CaptureDevice>(
    device: &mut D,
    registry: &FormatRegistry,
) -> Result<Vec<FormatReport>> {
    let offered = device.formats().map_err(CaptureError::FormatQuery)?;
    let mut reports = Vec::with_capacity(offered.len());
    for d in offered {
        let sizes = device.frame_sizes(d.format).unwrap_or_default();
        reports.push(FormatReport {
            supported: registry.contains(d.format),
            format: d.format,
            description: d.description,
            sizes,
        });
    }
    Ok(reports)
}

/// Describe a V4L2 node without configuring it.
pub fn probe(path: impl AsRef<Path>) -> Result<Vec<FormatReport>> {
    let path = path.as_ref();
    let mut device = V4l2Backend::default()
        .open(path)
        .map_err(|source| CaptureError::DeviceOpen {
            path: path.to_path_buf(),
            source,
        })?;
    describe(&mut device, &FormatRegistry::with_defaults())
}
