use serde::Deserialize;

/// Coarse exposure verdict for one raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    Acceptable,
    /// Too many dark samples: lens cap, covered sensor, IR emitter off.
    TooDark,
    /// Too few dark samples: blown-out or saturated sensor.
    TooBright,
}

/// Rejects frames whose dark-sample ratio is outside `(min, max)` percent.
///
/// Runs on the raw capture bytes before conversion, so for YUYV the chroma
/// bytes are counted along with luma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QualityFilter {
    /// Samples strictly below this value count as dark.
    pub dark_threshold: u8,
    pub min_dark_percent: u8,
    pub max_dark_percent: u8,
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self {
            dark_threshold: 80,
            min_dark_percent: 10,
            max_dark_percent: 90,
        }
    }
}

impl QualityFilter {
    pub fn classify(&self, raw: &[u8]) -> Exposure {
        let total = raw.len() as u64;
        if total == 0 {
            return Exposure::TooDark;
        }
        let dark = raw.iter().filter(|&&b| b < self.dark_threshold).count() as u64;

        // Exact comparison of dark/total against the percent bounds.
        if dark * 100 >= u64::from(self.max_dark_percent) * total {
            Exposure::TooDark
        } else if dark * 100 <= u64::from(self.min_dark_percent) * total {
            Exposure::TooBright
        } else {
            Exposure::Acceptable
        }
    }

    pub fn accepts(&self, raw: &[u8]) -> bool {
        self.classify(raw) == Exposure::Acceptable
    }

    /// Fraction of dark samples in `raw`, for diagnostics.
    pub fn dark_ratio(&self, raw: &[u8]) -> f64 {
        if raw.is_empty() {
            return 0.0;
        }
        let dark = raw.iter().filter(|&&b| b < self.dark_threshold).count();
        dark as f64 / raw.len() as f64
    }
}
