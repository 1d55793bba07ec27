use std::fmt;

use serde::{Serialize, Serializer};

/// Discrete aspect-ratio label used only to group the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectRatioBucket {
    Ultrawide,
    Widescreen,
    Classic,
    Square,
    Portrait,
    Tall,
    Vertical,
    UltraTall,
}

/// Breakpoints checked in order, first match wins. `UltraTall` catches
/// everything else, including ratios at or above 2.3.
const BREAKPOINTS: [(f64, f64, AspectRatioBucket); 7] = [
    (1.9, 2.3, AspectRatioBucket::Ultrawide),
    (1.5, 1.9, AspectRatioBucket::Widescreen),
    (1.25, 1.5, AspectRatioBucket::Classic),
    (0.9, 1.25, AspectRatioBucket::Square),
    (0.75, 0.9, AspectRatioBucket::Portrait),
    (0.6, 0.75, AspectRatioBucket::Tall),
    (0.4, 0.6, AspectRatioBucket::Vertical),
];

impl AspectRatioBucket {
    pub fn label(self) -> &'static str {
        match self {
            AspectRatioBucket::Ultrawide => "21:9",
            AspectRatioBucket::Widescreen => "16:9",
            AspectRatioBucket::Classic => "3:2",
            AspectRatioBucket::Square => "1:1",
            AspectRatioBucket::Portrait => "4:5",
            AspectRatioBucket::Tall => "2:3",
            AspectRatioBucket::Vertical => "9:16",
            AspectRatioBucket::UltraTall => "9:21",
        }
    }

    pub fn from_ratio(ratio: f64) -> Self {
        BREAKPOINTS
            .iter()
            .find(|(low, high, _)| *low <= ratio && ratio < *high)
            .map(|(_, _, bucket)| *bucket)
            .unwrap_or(AspectRatioBucket::UltraTall)
    }
}

/// Buckets an image by `width / height`. A zero height counts as an
/// infinitely wide ratio.
pub fn classify(width: u32, height: u32) -> AspectRatioBucket {
    let ratio = if height == 0 {
        f64::INFINITY
    } else {
        width as f64 / height as f64
    };
    AspectRatioBucket::from_ratio(ratio)
}

impl fmt::Display for AspectRatioBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for AspectRatioBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}
