//! Main analyzer API
//!
//! This module provides the primary interface of the library. The Analyzer
//! struct holds the configuration and the package resolver, and turns a
//! complete battery history dump into an [`AnalysisReport`].

use crate::config::AnalyzerConfig;
use crate::formats::normalize;
use crate::interpreter::Interpreter;
use crate::packages::{NoPackages, PackageResolver};
use crate::summary::ActivitySummary;
use crate::timeline::{NullTimeline, TimelineSink};
use crate::types::{AnalyzerError, EntityRef, TimestampMs};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Result of analyzing one history log
#[derive(Debug, Default, Serialize)]
pub struct AnalysisReport {
    /// Closed windows in chronological order
    pub summaries: Vec<ActivitySummary>,
    /// Whether TIME values were rewritten during normalization
    pub timestamps_altered: bool,
    #[serde(serialize_with = "errors_as_strings")]
    pub errors: Vec<AnalyzerError>,
    /// Checkin version declared by the log, if any
    pub device_version: Option<i32>,
    /// Time of the first overflow marker
    pub overflow_ms: Option<TimestampMs>,
    /// Absolute time to human-readable cumulative delta
    pub time_to_delta: BTreeMap<TimestampMs, String>,
    /// String pool entries of the last pool epoch
    pub pool: BTreeMap<String, EntityRef>,
}

fn errors_as_strings<S: Serializer>(errors: &[AnalyzerError], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

impl AnalysisReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// The main analyzer struct - entry point for all analysis operations
pub struct Analyzer {
    config: AnalyzerConfig,
    resolver: Box<dyn PackageResolver>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    /// Create an analyzer with the default configuration and no package data
    pub fn new() -> Self {
        Self {
            config: AnalyzerConfig::default(),
            resolver: Box::new(NoPackages),
        }
    }

    /// Builder method: replace the configuration
    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder method: resolve string pool entries with `resolver`
    pub fn with_resolver(mut self, resolver: impl PackageResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze a complete history dump
    ///
    /// Timeline entries are written to `sink` unless the configuration turns
    /// them off. A history that cannot be normalized yields a report holding
    /// only that error.
    ///
    /// # Arguments
    /// * `history` - The raw checkin battery history
    /// * `sink` - Receiver for timeline entries
    ///
    /// # Returns
    /// * `AnalysisReport` - Windows, errors and auxiliary mappings
    ///
    /// # Example
    /// ```no_run
    /// use history_analyzer::{Analyzer, CsvTimeline};
    ///
    /// let history = std::fs::read_to_string("history.txt").unwrap();
    /// let mut timeline = CsvTimeline::new();
    /// let report = Analyzer::new().analyze(&history, &mut timeline);
    ///
    /// for summary in &report.summaries {
    ///     println!("{} -> {}", summary.start_ms, summary.end_ms);
    /// }
    /// print!("{}", timeline.to_csv());
    /// ```
    pub fn analyze(&self, history: &str, sink: &mut dyn TimelineSink) -> AnalysisReport {
        log::info!("Analyzing history ({} bytes, format {})", history.len(), self.config.summary_format);

        let mut errors = Vec::new();
        let normalized = match normalize(history) {
            Ok(normalized) => normalized,
            Err(err) => {
                log::warn!("history could not be normalized: {}", err);
                errors.push(err);
                Default::default()
            }
        };
        if normalized.changed {
            log::debug!("TIME values were corrected");
        }

        let mut null = NullTimeline;
        let sink: &mut dyn TimelineSink = if self.config.track_timeline { sink } else { &mut null };

        let result = Interpreter::new(&self.config, self.resolver.as_ref(), sink).run(&normalized.lines);
        errors.extend(result.errors);

        log::info!(
            "Analysis complete: {} lines, {} windows, {} errors",
            normalized.lines.len(),
            result.summaries.len(),
            errors.len()
        );

        AnalysisReport {
            summaries: result.summaries,
            timestamps_altered: normalized.changed,
            errors,
            device_version: result.device_version,
            overflow_ms: result.overflow_ms,
            time_to_delta: result.time_to_delta,
            pool: result.pool,
        }
    }
}

/// Analyze `history` with `config` and no package data, discarding the timeline
pub fn analyze_history(history: &str, config: AnalyzerConfig) -> AnalysisReport {
    Analyzer::new()
        .with_config(config)
        .analyze(history, &mut NullTimeline)
}
