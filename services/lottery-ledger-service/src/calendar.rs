// =============================================================================
// CALENDAR MODULE
// =============================================================================
// Business-day rollover policy shared by the box ledger and the ticket pack
// tracker.
//
// NOTES:
// - A "day" is the store's calendar day, not the UTC day. The store's day is
//   defined by a fixed UTC offset loaded from configuration.
// - Commands never call Utc::now() directly; they ask a Clock. Tests swap in
//   a fixed clock to cross midnight deterministically.
// =============================================================================

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

// -----------------------------------------------------------------------------
// BUSINESS CALENDAR
// -----------------------------------------------------------------------------
/// Maps instants to the store's calendar day.
#[derive(Debug, Clone, Copy)]
pub struct BusinessCalendar {
    offset: FixedOffset,
}

impl BusinessCalendar {
    /// Build a calendar from an offset in minutes east of UTC.
    ///
    /// Returns `None` when the offset is outside +/- 24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    /// Calendar pinned to UTC
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// The business day an instant falls on
    pub fn business_day(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset).date_naive()
    }

    /// True when both instants fall on the same business day
    pub fn same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.business_day(a) == self.business_day(b)
    }

    /// Day-rollover predicate: a missing `last` always counts as a new day.
    pub fn is_new_day(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last {
            Some(last) => !self.same_day(last, now),
            None => true,
        }
    }
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

// -----------------------------------------------------------------------------
// CLOCK
// -----------------------------------------------------------------------------
/// Source of "now" for ledger commands.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests
#[cfg(test)]
#[derive(Debug)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: std::sync::Mutex::new(now) }
    }

    /// Move the clock to a new instant
    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn same_day_in_utc() {
        let cal = BusinessCalendar::utc();
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 1).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap();
        assert!(cal.same_day(a, b));
        assert!(!cal.is_new_day(Some(a), b));
    }

    #[test]
    fn midnight_crossing_is_a_new_day() {
        let cal = BusinessCalendar::utc();
        let before = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 2, 0, 1, 0).unwrap();
        assert!(cal.is_new_day(Some(before), after));
    }

    #[test]
    fn missing_timestamp_is_a_new_day() {
        let cal = BusinessCalendar::utc();
        assert!(cal.is_new_day(None, Utc::now()));
    }

    #[test]
    fn offset_shifts_the_day_boundary() {
        // UTC-5: 03:00 UTC on the 2nd is still the evening of the 1st
        let cal = BusinessCalendar::from_offset_minutes(-300).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 2, 3, 0, 0).unwrap();
        assert!(cal.same_day(evening, late));
        assert_eq!(
            cal.business_day(late),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn rejects_out_of_range_offsets() {
        assert!(BusinessCalendar::from_offset_minutes(24 * 60).is_none());
        assert!(BusinessCalendar::from_offset_minutes(i32::MAX).is_none());
    }

    #[test]
    fn fixed_clock_moves_when_set() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);

        let later = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}
