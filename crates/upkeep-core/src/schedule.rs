//! Scheduled-trigger decisions for backups.
//!
//! Resolution is one hour: a schedule fires at `hour_of_day:00` UTC.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use upkeep_state::Granularity;

use crate::domain::BackupSchedule;

impl BackupSchedule {
    /// First slot at least `frequency_days` after the day of `last`, moved
    /// forward to `day_of_week` when one is set.
    pub fn next_run_after(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = last.date_naive() + Duration::days(i64::from(self.frequency_days));
        if let Some(day) = self.day_of_week {
            while date.weekday().num_days_from_sunday() != day {
                date += Duration::days(1);
            }
        }
        let time = NaiveTime::from_hms_opt(self.hour_of_day, 0, 0).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&date.and_time(time))
    }

    /// Whether a scheduled run at `now` should take a backup.
    ///
    /// With no previous backup, due once `now` has reached the scheduled hour.
    pub fn is_due(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last {
            Some(last) => now >= self.next_run_after(last),
            None => {
                let fire_at =
                    NaiveTime::from_hms_opt(self.hour_of_day, 0, 0).unwrap_or(NaiveTime::MIN);
                now.time() >= fire_at
            }
        }
    }
}

/// Bucket for a backup taken by a scheduled run at `now`.
///
/// Monthly when the catalog holds no monthly backup from the current calendar
/// month, weekly when it holds no weekly backup from the current week
/// (weeks start on Sunday), daily otherwise.
pub fn scheduled_granularity(
    now: DateTime<Utc>,
    last_monthly: Option<DateTime<Utc>>,
    last_weekly: Option<DateTime<Utc>>,
) -> Granularity {
    let same_month = |t: DateTime<Utc>| t.year() == now.year() && t.month() == now.month();
    if !last_monthly.is_some_and(same_month) {
        Granularity::Monthly
    } else if !last_weekly.is_some_and(|t| week_start(t) == week_start(now)) {
        Granularity::Weekly
    } else {
        Granularity::Daily
    }
}

fn week_start(t: DateTime<Utc>) -> NaiveDate {
    let date = t.date_naive();
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}
