//! Battery History Analyzer Library
//!
//! A stateless, reusable library that reconstructs device state intervals
//! from an Android checkin battery history dump and aggregates them into
//! per-window statistics.
//!
//! # Architecture
//!
//! One analysis is a sequential fold over the history lines:
//! - TIME values are re-derived backwards so the clock is consistent
//! - Each line advances the clock and updates the device state
//! - Windows close on battery level changes, charging, resets, reboots and
//!   at the end of the log, folding every open interval into the window
//! - Timeline intervals are reported to a [`TimelineSink`]
//!
//! The library does NOT:
//! - Read files or checkin dumps from disk
//! - Render text reports
//!
//! Those live in the application layer (history-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use history_analyzer::{Analyzer, AnalyzerConfig, CsvTimeline, SummaryFormat, UidPackageMap};
//!
//! let history = std::fs::read_to_string("history.txt").unwrap();
//! let checkin = std::fs::read_to_string("checkin.txt").unwrap();
//! let (packages, _errors) = UidPackageMap::from_checkin(&checkin);
//!
//! let analyzer = Analyzer::new()
//!     .with_config(AnalyzerConfig::new().with_summary_format(SummaryFormat::TotalTime))
//!     .with_resolver(packages);
//!
//! let mut timeline = CsvTimeline::new();
//! let report = analyzer.analyze(&history, &mut timeline);
//! for err in &report.errors {
//!     eprintln!("{}", err);
//! }
//! ```

// Public modules
pub mod analyzer;
pub mod config;
pub mod cpu;
pub mod formats;
pub mod human_readable;
pub mod packages;
pub mod power;
pub mod report;
pub mod state;
pub mod summary;
pub mod timeline;
pub mod types;

// Re-export main types for convenience
pub use analyzer::{analyze_history, AnalysisReport, Analyzer};
pub use config::{AnalyzerConfig, SummaryFormat};
pub use packages::{NoPackages, PackageResolver, UidPackageMap};
pub use power::{PowerState, PowerStateError, Voter};
pub use summary::{ActivitySummary, BoolMetric, CloseReason, ServiceMetric, ValueMetric};
pub use timeline::{CsvTimeline, NullTimeline, TimelineEntry, TimelineSink};
pub use types::{AnalyzerError, Dist, EntityRef, Result, TimestampMs, TokenError, Transition};

// Internal modules (not exposed in public API)
mod interpreter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
