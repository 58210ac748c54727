//! Best-effort progress extraction from the external tool's output.
//!
//! The tool's output format is not a contract: lines that carry no
//! recognizable percentage are still forwarded, they just don't move the
//! percent.

use crate::constants::defaults;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

static PERCENT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})%").expect("valid percent pattern"));

static FRACTION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+)\s*/\s*(\d+)\b").expect("valid fraction pattern"));

/// Largest denominator accepted for `A/B` tokens.
const MAX_DENOMINATOR: u64 = 10_000;

/// A normalized progress event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub line: String,
}

impl ProgressUpdate {
    pub fn new(percent: u8, line: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            line: line.into(),
        }
    }
}

/// Extracts a percentage from one line of tool output.
///
/// A literal `NN%` token wins; otherwise an `A/B` fraction with
/// `0 < B <= 10000` and `A <= B` maps to `floor(A * 100 / B)`.
pub fn parse_percent(line: &str) -> Option<u8> {
    if let Some(caps) = PERCENT_TOKEN.captures(line) {
        let value: u16 = caps[1].parse().ok()?;
        return Some(value.min(100) as u8);
    }

    let caps = FRACTION_TOKEN.captures(line)?;
    let done: u64 = caps[1].parse().ok()?;
    let total: u64 = caps[2].parse().ok()?;
    if total == 0 || total > MAX_DENOMINATOR || done > total {
        return None;
    }
    Some((done * 100 / total) as u8)
}

/// Rate limiter between the tool's output and progress consumers.
///
/// A changed percent is always emitted immediately. An unchanged percent is
/// emitted only when the line text changed and the throttle interval has
/// passed since the last emission.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_percent: Option<u8>,
    last_line: Option<String>,
    last_emit: Option<Instant>,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(defaults::PROGRESS_THROTTLE)
    }
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_percent: None,
            last_line: None,
            last_emit: None,
        }
    }

    /// The last percent seen, or 0 before any.
    pub fn percent(&self) -> u8 {
        self.last_percent.unwrap_or(0)
    }

    /// Feeds one line observed at `now`, returning the update to emit, if any.
    pub fn observe(&mut self, line: &str, now: Instant) -> Option<ProgressUpdate> {
        let parsed = parse_percent(line);
        let percent_changed = parsed.is_some() && parsed != self.last_percent;

        if percent_changed {
            self.last_percent = parsed;
        } else {
            let line_changed = self.last_line.as_deref() != Some(line);
            let interval_passed = self
                .last_emit
                .is_none_or(|at| now.saturating_duration_since(at) >= self.interval);
            if !(line_changed && interval_passed) {
                return None;
            }
        }

        self.last_emit = Some(now);
        self.last_line = Some(line.to_string());
        Some(ProgressUpdate::new(self.percent(), line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_percent_tokens() {
        assert_eq!(parse_percent("... 42% ..."), Some(42));
        assert_eq!(parse_percent("100%|##########|"), Some(100));
        assert_eq!(parse_percent("0%"), Some(0));
    }

    #[test]
    fn percent_token_wins_over_fraction() {
        assert_eq!(parse_percent("35%| step 1/20"), Some(35));
    }

    #[test]
    fn parses_fractions() {
        assert_eq!(parse_percent("7/20 done"), Some(35));
        assert_eq!(parse_percent("case 3 / 3"), Some(100));
        assert_eq!(parse_percent("1/3"), Some(33));
    }

    #[test]
    fn rejects_invalid_fractions() {
        assert_eq!(parse_percent("no numbers here"), None);
        assert_eq!(parse_percent("5/0"), None);
        assert_eq!(parse_percent("21/20"), None);
        assert_eq!(parse_percent("1/20000"), None);
    }

    #[test]
    fn oversized_percent_is_clamped() {
        assert_eq!(parse_percent("999%"), Some(100));
    }

    #[test]
    fn throttle_emits_every_percent_change() {
        let mut throttle = ProgressThrottle::default();
        let start = Instant::now();

        assert_eq!(
            throttle.observe("10%", start),
            Some(ProgressUpdate::new(10, "10%"))
        );
        assert_eq!(
            throttle.observe("11%", start),
            Some(ProgressUpdate::new(11, "11%"))
        );
    }

    #[test]
    fn throttle_holds_back_chatter_within_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(200));
        let start = Instant::now();

        assert!(throttle.observe("10%", start).is_some());
        // Same percent, new text, too soon.
        assert!(throttle.observe("10% eta 5s", start + Duration::from_millis(50)).is_none());
        // Same text again, interval passed: nothing new to show.
        assert!(throttle.observe("10%", start + Duration::from_millis(300)).is_none());
        // New text after the interval.
        assert_eq!(
            throttle.observe("10% eta 4s", start + Duration::from_millis(300)),
            Some(ProgressUpdate::new(10, "10% eta 4s"))
        );
    }

    #[test]
    fn throttle_forwards_lines_without_percent() {
        let mut throttle = ProgressThrottle::default();
        let start = Instant::now();

        assert_eq!(
            throttle.observe("loading model", start),
            Some(ProgressUpdate::new(0, "loading model"))
        );
        assert!(throttle.observe("50%", start).is_some());
        assert_eq!(
            throttle.observe("writing output", start + Duration::from_secs(1)),
            Some(ProgressUpdate::new(50, "writing output"))
        );
    }

    #[test]
    fn percent_may_go_backwards() {
        let mut throttle = ProgressThrottle::default();
        let start = Instant::now();

        throttle.observe("90%", start);
        assert_eq!(
            throttle.observe("5%", start),
            Some(ProgressUpdate::new(5, "5%"))
        );
    }
}
