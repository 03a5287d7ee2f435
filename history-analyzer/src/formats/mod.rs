//! Checkin battery history line grammar
//!
//! Classifies raw history lines (control, data, string pool, version) and
//! splits data line payloads into `[+-]?key[=value]` tokens.
//!
//! ```text
//! 9,hsp,28,1000,"com.android.phone"
//! 9,h,0:RESET:TIME:1400165448955
//! 9,h,15954,+r,+w=37,+Wl,+Ws,Wr=28
//! ```

use crate::types::{AnalyzerError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

pub mod normalize;

pub use normalize::{normalize, NormalizedHistory};

/// Checkin format version understood by the grammar
pub const CHECKIN_VERSION: &str = "9";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("history grammar pattern is valid")
}

pub(crate) static RESET_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"^9,h,(?P<delta>\d+):RESET:TIME:(?P<timestamp>\d+)"));

pub(crate) static SHUTDOWN_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"^9,h,(?P<delta>\d+):SHUTDOWN"));

pub(crate) static START_RE: Lazy<Regex> = Lazy::new(|| compile(r"^9,h,(?P<delta>\d+):START"));

pub(crate) static TIME_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"^9,h,(?P<delta>\d+):TIME:(?P<timestamp>\d+)"));

pub(crate) static OVERFLOW_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"^9,h,(?P<delta>\d+):\*OVERFLOW\*"));

pub(crate) static HISTORY_LINE_RE: Lazy<Regex> = Lazy::new(|| compile(r"^9,h,(?P<delta>\d+).+"));

pub(crate) static STRING_POOL_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"^9,hsp,(?P<index>\d+),(?P<uid>-?\d+),(?P<service>.+)")
});

pub(crate) static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"^9,\d+,i,vers,(?P<version>\d+),\d+,.*"));

pub(crate) static NEXT_RE: Lazy<Regex> = Lazy::new(|| compile(r"^NEXT: (\d+)"));

static LEGACY_HISTORY_RE: Lazy<Regex> = Lazy::new(|| compile(r"^7,h"));

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?P<transition>[+-]?)(?P<key>[0-9A-Za-z_]+)(,?(=?(?P<value>\S+))?)")
});

static PII_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"(?P<prefix>\S+/)(?P<account>\S+)(?P<site>@)(?P<suffix>\S*)"));

/// Keys that the device sometimes glues to a following `w=` token
const GLUED_WAKELOCK_KEYS: [&str; 11] = [
    "Wsw", "Ww", "Wlw", "Wmw", "sw", "Sw", "rw", "Prw", "Pclw", "BPw", "gw",
];

/// One classified history line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryLine<'a> {
    /// `9,hsp,<index>,<uid>,<service>`
    StringPool {
        index: &'a str,
        uid: &'a str,
        service: &'a str,
    },
    /// `9,h,<delta>:RESET:TIME:<abs>`
    Reset { delta: i64, time: i64 },
    /// `9,h,<delta>:SHUTDOWN`
    Shutdown { delta: i64 },
    /// `9,h,<delta>:START`
    Start { delta: i64 },
    /// `9,h,<delta>:TIME:<abs>`
    Time { delta: i64, time: i64 },
    /// `9,h,<delta>:*OVERFLOW*`
    Overflow { delta: i64 },
    /// `9,h,<delta>[,<token>]*`; `body` is everything after the delta
    Data { delta: i64, body: Option<&'a str> },
    /// `NEXT: <n>` starts a new string pool epoch
    Next,
    /// `9,<n>,i,vers,<version>,...`
    Version { version: Option<i32> },
    /// History lines from older checkin versions, ignored
    Legacy,
}

impl HistoryLine<'_> {
    /// Delta carried by an `h` line, if any
    pub fn delta(&self) -> Option<i64> {
        match self {
            HistoryLine::Reset { delta, .. }
            | HistoryLine::Shutdown { delta }
            | HistoryLine::Start { delta }
            | HistoryLine::Time { delta, .. }
            | HistoryLine::Overflow { delta }
            | HistoryLine::Data { delta, .. } => Some(*delta),
            _ => None,
        }
    }
}

fn parse_i64(value: &str, field: &'static str, line: &str) -> Result<i64> {
    value.parse::<i64>().map_err(|_| AnalyzerError::MalformedNumber {
        field,
        line: line.to_string(),
    })
}

/// Classify a single (already trimmed) history line
pub fn classify(line: &str) -> Result<HistoryLine<'_>> {
    if let Some(caps) = STRING_POOL_RE.captures(line) {
        let group = |name: &str| caps.name(name).map_or("", |m| m.as_str());
        return Ok(HistoryLine::StringPool {
            index: group("index"),
            uid: group("uid"),
            service: group("service"),
        });
    }

    if HISTORY_LINE_RE.is_match(line) {
        if let Some(caps) = RESET_RE.captures(line) {
            return Ok(HistoryLine::Reset {
                delta: parse_i64(&caps["delta"], "time delta", line)?,
                time: parse_i64(&caps["timestamp"], "TIME", line)?,
            });
        }
        if let Some(caps) = SHUTDOWN_RE.captures(line) {
            return Ok(HistoryLine::Shutdown {
                delta: parse_i64(&caps["delta"], "time delta", line)?,
            });
        }
        if let Some(caps) = START_RE.captures(line) {
            return Ok(HistoryLine::Start {
                delta: parse_i64(&caps["delta"], "time delta", line)?,
            });
        }
        if let Some(caps) = TIME_RE.captures(line) {
            return Ok(HistoryLine::Time {
                delta: parse_i64(&caps["delta"], "time delta", line)?,
                time: parse_i64(&caps["timestamp"], "TIME", line)?,
            });
        }
        if let Some(caps) = OVERFLOW_RE.captures(line) {
            return Ok(HistoryLine::Overflow {
                delta: parse_i64(&caps["delta"], "time delta", line)?,
            });
        }

        let mut parts = line.splitn(4, ',');
        let delta_part = parts.nth(2).unwrap_or_default();
        let delta = parse_i64(delta_part, "time delta", line)?;
        return Ok(HistoryLine::Data {
            delta,
            body: parts.next(),
        });
    }

    if NEXT_RE.is_match(line) {
        return Ok(HistoryLine::Next);
    }
    if LEGACY_HISTORY_RE.is_match(line) {
        return Ok(HistoryLine::Legacy);
    }
    if let Some(caps) = VERSION_RE.captures(line) {
        return Ok(HistoryLine::Version {
            version: caps["version"].parse().ok(),
        });
    }
    Err(AnalyzerError::UnknownLineFormat(line.to_string()))
}

/// A `[+-]?key[=value]` token from a data line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub transition: &'a str,
    pub key: &'a str,
    pub value: &'a str,
    /// The whole comma-separated part the token was read from
    pub raw: &'a str,
}

impl<'a> Token<'a> {
    /// Parse one comma-separated part; `None` when the part holds no key
    pub fn parse(part: &'a str) -> Option<Self> {
        let caps = TOKEN_RE.captures(part)?;
        Some(Token {
            transition: caps.name("transition").map_or("", |m| m.as_str()),
            key: caps.name("key")?.as_str(),
            value: caps.name("value").map_or("", |m| m.as_str()),
            raw: part,
        })
    }

    /// Raw text following `key=`, spaces included
    pub fn raw_value(&self) -> &'a str {
        match self.raw.find('=') {
            Some(idx) => self.raw[idx + 1..].trim(),
            None => "",
        }
    }
}

/// Split a data line body into parts, undoing glued `w=` tokens
///
/// `+r,+w=27,Wr=28,Pss=0w=105w=10,+Sw=12` becomes
/// `+r,+w=27,Wr=28,Pss=0,w=105,w=10,+S,w=12`.
pub fn sanitize(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in body.split(',') {
        if part.matches('=').count() > 1 {
            if part.contains("w=") {
                let mut pieces = part.split("w=");
                let first = pieces.next().unwrap_or_default();
                if !first.is_empty() {
                    out.push(first.to_string());
                }
                out.extend(pieces.map(|p| format!("w={}", p)));
                continue;
            }
            out.push(part.to_string());
            continue;
        }

        let unsigned = part.trim_start_matches(['+', '-']);
        let sign = &part[..part.len() - unsigned.len()];
        let glued = GLUED_WAKELOCK_KEYS
            .iter()
            .find(|key| unsigned.starts_with(&format!("{}=", key)));
        match glued {
            Some(key) => {
                let real_key = &key[..key.len() - 1];
                out.push(format!("{}{}", sign, real_key));
                out.push(unsigned[real_key.len()..].to_string());
            }
            None => out.push(part.to_string()),
        }
    }
    out
}

/// Replace the account in `prefix/account@site` style names with `XXX`
///
/// ```
/// use history_analyzer::formats::scrub_pii;
///
/// assert_eq!(
///     scrub_pii("com.google.android.apps.plus.content.EsProvider/com.google/john.doe@gmail.com/extra"),
///     "com.google.android.apps.plus.content.EsProvider/com.google/XXX@gmail.com/extra"
/// );
/// ```
pub fn scrub_pii(input: &str) -> String {
    PII_RE
        .replace(input, "${prefix}XXX${site}${suffix}")
        .into_owned()
}
