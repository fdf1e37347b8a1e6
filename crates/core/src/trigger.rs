//! Schedule trigger expressions.
//!
//! Wraps a parsed cron expression (seconds-resolution, 6 or 7 fields) and
//! answers the one question the scheduler beat asks: "what is the most
//! recent tick that became due after a given anchor?". Firing decisions
//! compare that tick against the schedule's `last_fired_at`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::CoreError;

/// Upper bound on ticks walked when computing the latest due tick.
///
/// Protects against pathological expressions combined with very old
/// anchors (e.g. an every-second trigger not fired for months).
const MAX_TICK_SCAN: usize = 100_000;

/// A parsed, validated trigger expression.
#[derive(Debug, Clone)]
pub struct Trigger {
    expr: String,
    schedule: Schedule,
}

impl Trigger {
    /// Parse a cron expression (`sec min hour dom mon dow [year]`).
    pub fn parse(expr: &str) -> Result<Self, CoreError> {
        let schedule = Schedule::from_str(expr).map_err(|e| {
            CoreError::Validation(format!("Invalid trigger expression '{expr}': {e}"))
        })?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First tick strictly after `t`.
    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&t).next()
    }

    /// The most recent tick in `(anchor, now]`, or `None` when no tick is
    /// due yet.
    ///
    /// Walks forward from the anchor; a long outage therefore collapses to
    /// the single latest window rather than a burst of catch-up fires.
    pub fn latest_due(
        &self,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut latest = None;
        for (i, tick) in self.schedule.after(&anchor).enumerate() {
            if tick > now || i >= MAX_TICK_SCAN {
                break;
            }
            latest = Some(tick);
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, s).unwrap()
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Trigger::parse("not a cron line").is_err());
        assert!(Trigger::parse("").is_err());
    }

    #[test]
    fn parse_accepts_every_minute() {
        let trigger = Trigger::parse("0 * * * * *").unwrap();
        assert_eq!(trigger.expression(), "0 * * * * *");
    }

    #[test]
    fn next_after_advances_to_the_next_tick() {
        let trigger = Trigger::parse("0 */5 * * * *").unwrap();
        let next = trigger.next_after(at(12, 3, 10)).unwrap();
        assert_eq!(next, at(12, 5, 0));
    }

    #[test]
    fn latest_due_none_before_first_tick() {
        let trigger = Trigger::parse("0 0 * * * *").unwrap();
        // Anchor at 12:00:01, now at 12:30 -- next hourly tick is 13:00.
        assert_eq!(trigger.latest_due(at(12, 0, 1), at(12, 30, 0)), None);
    }

    #[test]
    fn latest_due_returns_most_recent_window_only() {
        let trigger = Trigger::parse("0 * * * * *").unwrap();
        // Anchor at 12:00:00, now at 12:05:30 -- five ticks elapsed,
        // only the latest (12:05:00) is due.
        let due = trigger.latest_due(at(12, 0, 0), at(12, 5, 30)).unwrap();
        assert_eq!(due, at(12, 5, 0));
    }

    #[test]
    fn latest_due_is_exclusive_of_anchor() {
        let trigger = Trigger::parse("0 * * * * *").unwrap();
        // Anchor exactly on a tick: that tick was already accounted for.
        assert_eq!(trigger.latest_due(at(12, 0, 0), at(12, 0, 59)), None);
    }
}
