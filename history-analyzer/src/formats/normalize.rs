//! Timestamp normalization
//!
//! Devices occasionally write TIME lines whose absolute value disagrees with
//! the deltas around them. Absolute times are re-derived backwards from the
//! last trustworthy anchor so that the interpreter sees a consistent clock.

use super::{
    HISTORY_LINE_RE, NEXT_RE, OVERFLOW_RE, RESET_RE, SHUTDOWN_RE, START_RE, STRING_POOL_RE,
    TIME_RE, VERSION_RE,
};
use crate::types::{AnalyzerError, Result};

const TIME_MARKER: &str = ":TIME:";

/// Filtered and re-anchored history lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedHistory {
    pub lines: Vec<String>,
    /// True when at least one TIME value was rewritten
    pub changed: bool,
}

fn parse_i64(value: &str, field: &'static str, line: &str) -> Result<i64> {
    value.parse::<i64>().map_err(|_| AnalyzerError::MalformedNumber {
        field,
        line: line.to_string(),
    })
}

/// Time of the line before one at `time` that carries `delta`
fn earlier(time: i64, delta: i64, line: &str) -> Result<i64> {
    time.checked_sub(delta)
        .ok_or_else(|| AnalyzerError::TimeOutOfRange(line.to_string()))
}

/// Keep only history, string pool, version and NEXT lines, then rewrite
/// TIME values so they agree with the deltas that follow them.
///
/// Running the result through `normalize` again changes nothing.
pub fn normalize(history: &str) -> Result<NormalizedHistory> {
    let mut lines: Vec<String> = history
        .lines()
        .map(str::trim)
        .filter(|l| {
            HISTORY_LINE_RE.is_match(l)
                || STRING_POOL_RE.is_match(l)
                || VERSION_RE.is_match(l)
                || NEXT_RE.is_match(l)
        })
        .map(str::to_string)
        .collect();

    let mut changed = false;
    let mut anchor: Option<i64> = None;

    for line in lines.iter_mut().rev() {
        let Some(time) = anchor else {
            // Look for an anchor: the latest TIME or RESET line
            let caps = TIME_RE.captures(line).or_else(|| RESET_RE.captures(line));
            if let Some(caps) = caps {
                let delta = parse_i64(&caps["delta"], "time delta", line)?;
                let abs = parse_i64(&caps["timestamp"], "TIME", line)?;
                anchor = Some(earlier(abs, delta, line)?);
            }
            continue;
        };

        if START_RE.is_match(line) || SHUTDOWN_RE.is_match(line) || OVERFLOW_RE.is_match(line) {
            anchor = None;
            continue;
        }

        if let Some(idx) = line.find(TIME_MARKER) {
            if time < 0 {
                return Err(AnalyzerError::NegativeTime);
            }
            let stored = &line[idx + TIME_MARKER.len()..];
            let stored = parse_i64(stored, "TIME", line)?;
            if stored != time {
                log::debug!("rewriting TIME {} -> {} in {}", stored, time, line);
                *line = format!("{}{}{}", &line[..idx], TIME_MARKER, time);
                changed = true;
            }
        }

        if let Some(caps) = HISTORY_LINE_RE.captures(line) {
            let delta = parse_i64(&caps["delta"], "time delta", line)?;
            anchor = Some(earlier(time, delta, line)?);
        }
    }

    Ok(NormalizedHistory { lines, changed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_inconsistent_time() {
        let input = [
            "9,h,0:RESET:TIME:1000000",
            "9,h,2000:TIME:5000",
            "9,h,1000,+r",
            "9,h,3000:TIME:1006000",
        ]
        .join("\n");

        let out = normalize(&input).unwrap();
        assert!(out.changed);
        assert_eq!(out.lines[0], "9,h,0:RESET:TIME:1000000");
        assert_eq!(out.lines[1], "9,h,2000:TIME:1002000");
        assert_eq!(out.lines[3], "9,h,3000:TIME:1006000");
    }

    #[test]
    fn test_consistent_history_is_untouched() {
        let input = "9,h,0:RESET:TIME:1000000\n9,h,500,+r\n9,h,500:TIME:1001000";
        let out = normalize(input).unwrap();
        assert!(!out.changed);
        assert_eq!(out.lines.join("\n"), input);
    }

    #[test]
    fn test_idempotent() {
        let input = "9,h,0:RESET:TIME:1000\n9,h,100:TIME:5000\n9,h,200,+S\n9,h,300:TIME:9000";
        let first = normalize(input).unwrap();
        let second = normalize(&first.lines.join("\n")).unwrap();
        assert_eq!(first.lines, second.lines);
        assert!(!second.changed);
    }

    #[test]
    fn test_reboot_breaks_anchor() {
        let input = "9,h,0:RESET:TIME:1000\n9,h,10:START\n9,h,0:TIME:50000";
        let out = normalize(input).unwrap();
        assert!(!out.changed);
        assert_eq!(out.lines[0], "9,h,0:RESET:TIME:1000");
    }

    #[test]
    fn test_filters_foreign_lines() {
        let input = "9,0,l,br,1,2\n9,hsp,0,1000,\"a\"\nNEXT: 4\n7,h,1,+r\n  9,h,0,+r  ";
        let out = normalize(input).unwrap();
        assert_eq!(out.lines, vec!["9,hsp,0,1000,\"a\"", "NEXT: 4", "9,h,0,+r"]);
    }

    #[test]
    fn test_negative_time_is_fatal() {
        let input = "9,h,0:RESET:TIME:1000\n9,h,5000,+r\n9,h,0:TIME:2000";
        assert_eq!(normalize(input), Err(AnalyzerError::NegativeTime));
    }

    #[test]
    fn test_huge_deltas_are_out_of_range() {
        let huge = format!("9,h,{},+r", i64::MAX);
        let input = ["9,h,0:RESET:TIME:1000", huge.as_str(), huge.as_str(), "9,h,0:TIME:0"].join("\n");
        assert_eq!(normalize(&input), Err(AnalyzerError::TimeOutOfRange(huge)));
    }
}
