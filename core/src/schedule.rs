//! Calendar-day boundaries for the daily cache refresh.

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};

/// The first instant of the next calendar day in `tz`, strictly after `now`.
///
/// Where local midnight does not exist (a DST gap at 00:00), the first valid
/// local time after it is used. Where it occurs twice, the earlier one wins.
pub fn next_midnight<Tz: TimeZone>(tz: &Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.with_timezone(tz).date_naive() + Days::new(1);
    let midnight = tomorrow.and_time(NaiveTime::MIN);

    // Gaps are at most a few hours; probe forward in quarter-hour steps.
    (0..=24 * 4)
        .map(|step| midnight + chrono::Duration::minutes(15 * step))
        .find_map(|local| tz.from_local_datetime(&local).earliest())
        .map_or_else(
            || now + chrono::Duration::days(1),
            |at| at.with_timezone(&Utc),
        )
}

/// How long to sleep from `now` until `at`; zero when `at` has passed.
pub fn delay_until(at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (at - now).to_std().unwrap_or_default()
}

/// Daily schedule that fires at local midnight in a fixed timezone.
#[derive(Debug, Clone)]
pub struct MidnightSchedule<Tz: TimeZone> {
    tz: Tz,
}

impl<Tz: TimeZone> MidnightSchedule<Tz> {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> &Tz {
        &self.tz
    }

    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_midnight(&self.tz, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::{New_York, Santiago};
    use chrono_tz::Europe::Berlin;

    #[test]
    fn test_next_midnight_utc() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 15, 30, 0).unwrap();
        let next = next_midnight(&Utc, now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_next_midnight_at_exact_midnight_is_next_day() {
        let now = Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap();
        let next = next_midnight(&Utc, now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_next_midnight_in_offset_zone() {
        // 20:00 UTC is 22:00 in Berlin (CEST, UTC+2); midnight there is 22:00 UTC
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 20, 0, 0).unwrap();
        let next = next_midnight(&Berlin, now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 3, 22, 0, 0).unwrap());
    }

    #[test]
    fn test_next_midnight_behind_utc() {
        // 02:00 UTC on the 4th is still 22:00 on the 3rd in New York (EDT)
        let now = Utc.with_ymd_and_hms(2024, 6, 4, 2, 0, 0).unwrap();
        let next = next_midnight(&New_York, now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 4, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_next_midnight_skips_dst_gap() {
        // Chile springs forward at local midnight: 2024-09-08 00:00 does not exist
        let now = Utc.with_ymd_and_hms(2024, 9, 7, 12, 0, 0).unwrap();
        let next = next_midnight(&Santiago, now);
        assert!(next > now);
        let local = next.with_timezone(&Santiago);
        assert_eq!(
            local.date_naive(),
            chrono::NaiveDate::from_ymd_opt(2024, 9, 8).unwrap()
        );
        assert_eq!(local.time(), NaiveTime::from_hms_opt(1, 0, 0).unwrap());
    }

    #[test]
    fn test_delay_until() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 23, 0, 0).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap();
        assert_eq!(delay_until(at, now), std::time::Duration::from_secs(3600));
        assert_eq!(delay_until(now, at), std::time::Duration::ZERO);
    }

    #[test]
    fn test_schedule_fires_after_now() {
        let schedule = MidnightSchedule::new(Berlin);
        let now = Utc.with_ymd_and_hms(2024, 3, 30, 23, 30, 0).unwrap();
        let next = schedule.next_fire_after(now);
        assert!(next > now);
        assert_eq!(next.with_timezone(&Berlin).time(), NaiveTime::MIN);
    }
}
