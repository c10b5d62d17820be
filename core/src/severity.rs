use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity tier derived from a CVSS score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    None,
    Unknown,
}

/// Display color attached to a severity tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Severity {
    pub const ALL: [Severity; 6] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::None,
        Severity::Unknown,
    ];

    /// Tier for an already parsed score. Non-finite and out-of-range values
    /// are `Unknown`.
    ///
    /// Tiers are contiguous: a score between two published bounds (8.95)
    /// falls to the lower tier, so it is `High`, not `None`. Scores below 0
    /// or above 10 are `Unknown` rather than `None`.
    pub fn from_score(score: f64) -> Self {
        if !score.is_finite() || !(0.0..=10.0).contains(&score) {
            Severity::Unknown
        } else if score >= 9.0 {
            Severity::Critical
        } else if score >= 7.0 {
            Severity::High
        } else if score >= 4.0 {
            Severity::Medium
        } else if score > 0.0 {
            Severity::Low
        } else {
            Severity::None
        }
    }

    pub fn color(self) -> Rgb {
        match self {
            Severity::Critical => Rgb::new(217, 83, 79),
            Severity::High => Rgb::new(240, 173, 78),
            Severity::Medium => Rgb::new(182, 109, 255),
            Severity::Low => Rgb::new(119, 119, 119),
            Severity::None => Rgb::new(200, 200, 200),
            Severity::Unknown => Rgb::new(150, 150, 150),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::None => "None",
            Severity::Unknown => "Unknown",
        }
    }

    /// Label written into the spreadsheet export. Same tiers, bilingual text.
    pub fn export_label(self) -> &'static str {
        match self {
            Severity::Critical => "Crítica (Critical)",
            Severity::High => "Alta (High)",
            Severity::Medium => "Media (Medium)",
            Severity::Low => "Baja (Low)",
            Severity::None => "None",
            Severity::Unknown => "Desconocida (Unknown)",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses raw CVSS text. Surrounding whitespace is ignored; `NaN` and
/// infinities are rejected.
pub fn parse_score(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|score| score.is_finite())
}

/// Maps raw CVSS text to its tier and color. Never fails: anything that is
/// not a usable score is `Unknown`.
pub fn classify(raw_score: &str) -> (Severity, Rgb) {
    let severity = parse_score(raw_score)
        .map(Severity::from_score)
        .unwrap_or(Severity::Unknown);
    (severity, severity.color())
}
