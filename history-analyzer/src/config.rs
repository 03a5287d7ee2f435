//! Analyzer configuration types
//!
//! The analyzer needs very little configuration: how windows are cut, whether
//! string pool names are scrubbed, and whether timeline entries are produced.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How aggregation windows are delimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummaryFormat {
    /// A new window starts on every battery level change
    #[default]
    #[serde(rename = "batteryLevel")]
    BatteryLevel,
    /// Windows only close on charging, resets, reboots and end of log
    #[serde(rename = "totalTime")]
    TotalTime,
}

impl fmt::Display for SummaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryFormat::BatteryLevel => write!(f, "batteryLevel"),
            SummaryFormat::TotalTime => write!(f, "totalTime"),
        }
    }
}

impl FromStr for SummaryFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "batteryLevel" | "battery-level" | "level" => Ok(SummaryFormat::BatteryLevel),
            "totalTime" | "total-time" | "total" => Ok(SummaryFormat::TotalTime),
            other => Err(format!("unknown summary format: {}", other)),
        }
    }
}

/// Configuration for one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Window delimiting mode
    #[serde(default)]
    pub summary_format: SummaryFormat,

    /// Replace account names in string pool entries with XXX
    #[serde(default = "default_true")]
    pub scrub_pii: bool,

    /// Whether timeline entries are emitted to the sink
    #[serde(default = "default_true")]
    pub track_timeline: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            summary_format: SummaryFormat::default(),
            scrub_pii: true,
            track_timeline: true,
        }
    }
}

impl AnalyzerConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the window delimiting mode
    pub fn with_summary_format(mut self, format: SummaryFormat) -> Self {
        self.summary_format = format;
        self
    }

    /// Builder method: enable or disable PII scrubbing
    pub fn with_scrub_pii(mut self, enabled: bool) -> Self {
        self.scrub_pii = enabled;
        self
    }

    /// Builder method: enable or disable timeline emission
    pub fn with_timeline(mut self, enabled: bool) -> Self {
        self.track_timeline = enabled;
        self
    }
}
