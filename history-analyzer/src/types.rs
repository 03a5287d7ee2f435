//! Core types for the battery history analyzer
//!
//! This module defines the fundamental types shared by the interpreter: the
//! duration accumulator used by every summary, edge transitions, resolved
//! string-pool entities and the error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch (or since boot, before the first TIME line)
pub type TimestampMs = i64;

/// Result type for analyzer operations
pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Errors collected while normalizing or interpreting a history log
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalyzerError {
    #[error("negative time calculated")]
    NegativeTime,

    #[error("malformed {field} in line: {line}")]
    MalformedNumber { field: &'static str, line: String },

    #[error("unknown line format: {0}")]
    UnknownLineFormat(String),

    #[error("time out of range in line: {0}")]
    TimeOutOfRange(String),

    #[error("invalid uid {uid:?} for string pool index {index}")]
    InvalidUid { index: String, uid: String },

    #[error("invalid UID in checkin 'apk' line: {0:?}")]
    InvalidCheckinUid(String),

    #[error("error in {line} at {token}: {source}")]
    Token {
        line: String,
        token: String,
        #[source]
        source: TokenError,
    },
}

/// Domain errors raised by a single key/transition/value token
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("unknown key {0}")]
    UnknownKey(String),

    #[error("unsupported event {0}")]
    Unsupported(String),

    #[error("unknown transition for {desc:?}: {transition:?}")]
    UnknownTransition { desc: &'static str, transition: String },

    #[error("two positive transitions seen for {0:?}")]
    TwoPositive(&'static str),

    #[error("two negative transitions for {0:?}")]
    TwoNegative(&'static str),

    #[error("unknown {desc} = {value:?}")]
    UnknownValue { desc: &'static str, value: String },

    #[error("parsing int error for {desc:?}: {value:?}")]
    ParseInt { desc: &'static str, value: String },

    #[error("unable to find index {index:?} in string pool for {desc}")]
    MissingPoolEntry { desc: &'static str, index: String },

    #[error("-r received without a corresponding +r")]
    CpuNotRunning,

    #[error("two holders of the wakelock")]
    TwoWakelockHolders,

    #[error("wakelock already held by an unidentified holder")]
    UnidentifiedWakelockHolder,

    #[error("got w state in the middle of the summary")]
    WakelockMidWindow,

    #[error("screen wake reason already set to {0:?}")]
    ScreenReasonTwice(String),

    #[error("unknown connectivity change {0:?}")]
    UnknownConnectivity(String),

    #[error("incomplete {record} record: {detail}")]
    IncompleteRecord { record: &'static str, detail: String },

    #[error("malformed {record} value {value:?}")]
    MalformedRecord { record: &'static str, value: String },

    #[error("time delta {0} overflows the clock")]
    ClockOverflow(i64),

    #[error(transparent)]
    PowerState(#[from] crate::power::PowerStateError),
}

/// Edge carried by a data token (`+key`, `-key`, or `key`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No sign: a plain assignment, or "active since the window started"
    None,
    Positive,
    Negative,
}

impl Transition {
    pub fn parse(sign: &str) -> Option<Self> {
        match sign {
            "" => Some(Transition::None),
            "+" => Some(Transition::Positive),
            "-" => Some(Transition::Negative),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::None => "",
            Transition::Positive => "+",
            Transition::Negative => "-",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count/total/max accumulator for closed intervals
///
/// `total_ms >= max_ms` holds whenever `num > 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    pub num: u32,
    pub total_ms: i64,
    pub max_ms: i64,
}

impl Dist {
    /// Fold one closed interval into the accumulator
    pub fn add(&mut self, duration_ms: i64) {
        self.num += 1;
        self.total_ms += duration_ms;
        if duration_ms > self.max_ms {
            self.max_ms = duration_ms;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    /// Rate per hour of `num` and of the total duration (seconds), over `window_ms`
    pub fn rates_per_hour(&self, window_ms: i64) -> (f64, f64) {
        let hours = window_ms as f64 / 3_600_000.0;
        if hours <= 0.0 {
            return (0.0, 0.0);
        }
        (self.num as f64 / hours, self.total_ms as f64 / 1000.0 / hours)
    }
}

/// A resolved string pool entry (`9,hsp,<index>,<uid>,<service>`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Service, wakelock or sync adapter name as reported by the device
    pub service: String,
    /// UID kept verbatim, it is also used as the connectivity network type
    pub uid: String,
    /// Owning package, when the resolver could identify one
    pub package: Option<String>,
}

impl EntityRef {
    pub fn new(service: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            uid: uid.into(),
            package: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dist_accumulates_count_total_and_max() {
        let mut d = Dist::default();
        assert!(d.is_empty());
        for duration in [300, 1200, 0, 500] {
            d.add(duration);
        }
        assert_eq!(d.num, 4);
        assert_eq!(d.total_ms, 2000);
        assert_eq!(d.max_ms, 1200);
        assert!(d.total_ms >= d.max_ms);
    }

    #[test]
    fn test_transition_parse() {
        assert_eq!(Transition::parse(""), Some(Transition::None));
        assert_eq!(Transition::parse("+"), Some(Transition::Positive));
        assert_eq!(Transition::parse("-"), Some(Transition::Negative));
        assert_eq!(Transition::parse("*"), None);
        assert_eq!(format!("{}", Transition::Negative), "-");
    }

    #[test]
    fn test_rates_per_hour() {
        let mut d = Dist::default();
        d.add(1_800_000);
        let (count_rate, secs_rate) = d.rates_per_hour(3_600_000);
        assert_eq!(count_rate, 1.0);
        assert_eq!(secs_rate, 1800.0);
        assert_eq!(Dist::default().rates_per_hour(0), (0.0, 0.0));
    }

    #[test]
    fn test_token_error_display() {
        let err = AnalyzerError::Token {
            line: "9,h,4000,-S".to_string(),
            token: "-S".to_string(),
            source: TokenError::TwoNegative("screen"),
        };
        assert_eq!(
            err.to_string(),
            "error in 9,h,4000,-S at -S: two negative transitions for \"screen\""
        );
    }
}
