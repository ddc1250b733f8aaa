//! Usage-limit detection and reset-time resolution.
//!
//! When the agent hits its usage limit it reports when usage resumes in one of
//! two encodings:
//!
//! ```text
//! {"error": "usage limit", "reset_at": 1737000000}        -> UsageLimitInfo::Unix
//! "Usage limit reached. try again at 7pm (America/Chicago)" -> UsageLimitInfo::NaturalLanguage
//! ```
//!
//! [`UsageLimitResolver::wait_seconds`] turns either form into a number of
//! seconds to sleep, never less than the configured minimum.

use crate::config::MIN_WAIT_TIME;
use crate::error::{AutodevError, Result};
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Longest plausible wait for a Unix reset. Anything later is corrupted
/// input, such as a timestamp in milliseconds.
pub const MAX_UNIX_WAIT_SECS: u64 = 24 * 60 * 60;

/// Pattern for the natural-language reset time.
const RESET_TIME_PATTERN: &str = r"try again at (\w+) \(([^)]+)\)";

/// When usage resumes, as reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum UsageLimitInfo {
    /// Absolute reset instant in seconds since the epoch.
    Unix { reset_at: f64 },
    /// Wall-clock hour in a named zone. Both fields are empty when the
    /// output mentioned a usage limit but carried no recognizable time.
    NaturalLanguage { reset_time: String, timezone: String },
}

/// Parses usage-limit output and computes how long to wait.
#[derive(Debug, Clone)]
pub struct UsageLimitResolver {
    min_wait: u64,
}

impl Default for UsageLimitResolver {
    fn default() -> Self {
        Self {
            min_wait: MIN_WAIT_TIME,
        }
    }
}

impl UsageLimitResolver {
    /// Create a resolver that never waits less than `min_wait` seconds when
    /// the reset instant is already past.
    #[must_use]
    pub fn new(min_wait: u64) -> Self {
        Self { min_wait }
    }

    #[must_use]
    pub fn min_wait(&self) -> u64 {
        self.min_wait
    }

    /// Whether the output reports a usage limit.
    #[must_use]
    pub fn detect(&self, raw_output: &str) -> bool {
        raw_output.to_lowercase().contains("usage limit")
    }

    /// Extract the reset information.
    ///
    /// A JSON payload with a numeric `reset_at` wins, either as the whole
    /// output or on a line of its own. Otherwise the natural-language pattern
    /// is tried. When neither matches the result is a `NaturalLanguage` with
    /// blank fields, which [`wait_seconds`](Self::wait_seconds) rejects.
    #[must_use]
    pub fn parse(&self, raw_output: &str) -> UsageLimitInfo {
        let trimmed = raw_output.trim();
        let unix = std::iter::once(trimmed)
            .chain(trimmed.lines().map(str::trim))
            .find_map(reset_at_from_json);
        if let Some(reset_at) = unix {
            return UsageLimitInfo::Unix { reset_at };
        }

        if let Ok(re) = Regex::new(RESET_TIME_PATTERN) {
            if let Some(caps) = re.captures(raw_output) {
                return UsageLimitInfo::NaturalLanguage {
                    reset_time: caps[1].to_string(),
                    timezone: caps[2].to_string(),
                };
            }
        }

        UsageLimitInfo::NaturalLanguage {
            reset_time: String::new(),
            timezone: String::new(),
        }
    }

    /// Seconds to wait from `now` until usage resumes.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error for an unknown timezone, an unparseable
    /// hour, blank natural-language fields, or a Unix reset more than
    /// [`MAX_UNIX_WAIT_SECS`] away.
    pub fn wait_seconds(&self, info: &UsageLimitInfo, now: DateTime<Utc>) -> Result<u64> {
        match info {
            UsageLimitInfo::Unix { reset_at } => {
                let now_secs = now.timestamp_micros() as f64 / 1_000_000.0;
                if !reset_at.is_finite() {
                    return Err(AutodevError::validation(format!(
                        "reset_at is not a finite timestamp: {reset_at}"
                    )));
                }
                if *reset_at <= now_secs {
                    return Ok(self.min_wait);
                }
                let wait = (reset_at - now_secs).floor();
                if wait > MAX_UNIX_WAIT_SECS as f64 {
                    return Err(AutodevError::validation(format!(
                        "reset_at {reset_at} is more than {MAX_UNIX_WAIT_SECS}s away"
                    )));
                }
                Ok(wait as u64)
            }
            UsageLimitInfo::NaturalLanguage {
                reset_time,
                timezone,
            } => self.natural_language_wait(reset_time, timezone, now),
        }
    }

    fn natural_language_wait(
        &self,
        reset_time: &str,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if reset_time.trim().is_empty() || timezone.trim().is_empty() {
            return Err(AutodevError::validation(
                "usage limit reported without a reset time",
            ));
        }

        let tz: Tz = timezone
            .trim()
            .parse()
            .map_err(|_| AutodevError::validation(format!("Invalid timezone: {timezone}")))?;
        let hour = parse_hour(reset_time)?;

        let local_now = now.with_timezone(&tz);
        let fallback = local_now.offset().fix();
        let today = local_now.date_naive();

        let mut reset = at_hour(&tz, today, hour, fallback)?;
        if reset <= now {
            let tomorrow = today
                .succ_opt()
                .ok_or_else(|| AutodevError::validation("reset date out of range"))?;
            reset = at_hour(&tz, tomorrow, hour, fallback)?;
        }

        let wait = (reset - now).num_seconds().max(0) as u64;
        debug!(
            "Usage resumes at {} ({}), {}s from now",
            reset.with_timezone(&tz),
            timezone,
            wait
        );
        Ok(wait.max(self.min_wait))
    }
}

fn reset_at_from_json(text: &str) -> Option<f64> {
    if !text.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("reset_at")?.as_f64()
}

/// The instant `hour:00:00` on `date` in `tz`.
///
/// An ambiguous local time resolves to the earlier instant. A time skipped by
/// a DST jump uses the offset in effect at `now`.
fn at_hour(tz: &Tz, date: NaiveDate, hour: u32, fallback: FixedOffset) -> Result<DateTime<Utc>> {
    let naive = date
        .and_hms_opt(hour, 0, 0)
        .ok_or_else(|| AutodevError::validation(format!("Invalid hour: {hour}")))?;
    let resolved = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => fallback
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
    };
    resolved.ok_or_else(|| AutodevError::validation(format!("Cannot resolve {naive} in {tz}")))
}

/// Convert a reset time to a 24-hour clock hour.
///
/// `12pm` is 12, `12am` is 0, `Npm` is N+12, `Nam` is N, and a bare number is
/// already on the 24-hour clock.
///
/// # Errors
///
/// Returns a `Validation` error if the text is not an hour or falls outside
/// 0..=23.
pub fn parse_hour(reset_time: &str) -> Result<u32> {
    let text = reset_time.trim().to_lowercase();
    let invalid = || AutodevError::validation(format!("Invalid time format '{reset_time}'"));

    let hour = if let Some(digits) = text.strip_suffix("pm") {
        let hour: u32 = digits.trim().parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&hour) {
            return Err(invalid());
        }
        if hour == 12 {
            12
        } else {
            hour + 12
        }
    } else if let Some(digits) = text.strip_suffix("am") {
        let hour: u32 = digits.trim().parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&hour) {
            return Err(invalid());
        }
        if hour == 12 {
            0
        } else {
            hour
        }
    } else {
        text.parse().map_err(|_| invalid())?
    };

    if hour > 23 {
        return Err(invalid());
    }
    Ok(hour)
}
