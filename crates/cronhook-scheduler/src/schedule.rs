//! Cadence classification.
//!
//! Only one family of schedules gets genuine numeric semantics: six-field
//! expressions that fire every N seconds (`*/N * * * * *`). Everything else
//! that is still a valid cron expression is *irregular*; the engine keeps the
//! parsed form around so it can re-check whether a given second belongs to
//! the expression, but it never computes next-fire times from it.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Result of classifying a job's schedule text.
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Fires every N milliseconds (N is a whole number of seconds).
    FixedIntervalMs(u64),
    /// A valid expression with no fixed interval.
    Irregular(Arc<cron::Schedule>),
    /// Empty or unparsable; the reason is kept for logging.
    Invalid(String),
}

impl Cadence {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Cadence::Invalid(_))
    }

    /// Whether `at` falls on a second the expression selects.
    ///
    /// Fixed intervals match every second; invalid schedules match nothing.
    pub fn includes(&self, at: DateTime<Utc>) -> bool {
        match self {
            Cadence::FixedIntervalMs(_) => true,
            Cadence::Irregular(schedule) => schedule.includes(at),
            Cadence::Invalid(_) => false,
        }
    }
}

/// Classify `schedule` into a [`Cadence`].
///
/// Five-field (minute-resolution) expressions are accepted by prefixing a
/// `0` seconds field.
pub fn classify(schedule: &str) -> Cadence {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    let normalized = match fields.len() {
        0 => return Cadence::Invalid("schedule is empty".to_string()),
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => return Cadence::Invalid(format!("expected 5-7 fields, got {n}")),
    };

    // Checked before parsing: cron caps a seconds step at 59.
    if let Some(secs) = fixed_interval_secs(&fields) {
        return Cadence::FixedIntervalMs(secs.saturating_mul(1_000));
    }

    match cron::Schedule::from_str(&normalized) {
        Ok(parsed) => Cadence::Irregular(Arc::new(parsed)),
        Err(e) => Cadence::Invalid(e.to_string()),
    }
}

/// `*/N * * * * *` → N, `* * * * * *` → 1.
fn fixed_interval_secs(fields: &[&str]) -> Option<u64> {
    if fields.len() != 6 || fields[1..].iter().any(|f| *f != "*") {
        return None;
    }
    match fields[0] {
        "*" => Some(1),
        sec => sec
            .strip_prefix("*/")
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|n| *n >= 1),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn every_n_seconds_is_fixed() {
        assert!(matches!(
            classify("*/10 * * * * *"),
            Cadence::FixedIntervalMs(10_000)
        ));
        assert!(matches!(
            classify("  */2   * * * * * "),
            Cadence::FixedIntervalMs(2_000)
        ));
        assert!(matches!(
            classify("* * * * * *"),
            Cadence::FixedIntervalMs(1_000)
        ));
    }

    #[test]
    fn steps_of_a_minute_or_more_stay_fixed() {
        assert!(matches!(
            classify("*/59 * * * * *"),
            Cadence::FixedIntervalMs(59_000)
        ));
        assert!(matches!(
            classify("*/60 * * * * *"),
            Cadence::FixedIntervalMs(60_000)
        ));
        assert!(matches!(
            classify("*/90 * * * * *"),
            Cadence::FixedIntervalMs(90_000)
        ));
        assert!(matches!(
            classify("*/300 * * * * *"),
            Cadence::FixedIntervalMs(300_000)
        ));
    }

    #[test]
    fn other_valid_expressions_are_irregular() {
        assert!(matches!(classify("0 */5 * * * *"), Cadence::Irregular(_)));
        assert!(matches!(classify("*/10 * 9 * * *"), Cadence::Irregular(_)));
        // Five-field form is minute resolution.
        assert!(matches!(classify("*/15 * * * *"), Cadence::Irregular(_)));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(!classify("").is_valid());
        assert!(!classify("   ").is_valid());
        assert!(!classify("every ten seconds").is_valid());
        assert!(!classify("* * *").is_valid());
        assert!(!classify("a b c d e f").is_valid());
    }

    #[test]
    fn irregular_membership_is_rechecked() {
        let cadence = classify("0 */5 * * * *");
        let on = Utc.with_ymd_and_hms(2026, 3, 1, 12, 10, 0).unwrap();
        let off = Utc.with_ymd_and_hms(2026, 3, 1, 12, 11, 0).unwrap();
        assert!(cadence.includes(on));
        assert!(!cadence.includes(off));
    }
}
