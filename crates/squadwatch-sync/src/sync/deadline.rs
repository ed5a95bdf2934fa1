use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

/// A deadline recurring every week at a fixed UTC weekday and time, e.g.
/// the upstream weekly server reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyDeadline {
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
}

impl Default for WeeklyDeadline {
    /// Thursday 10:30 UTC.
    fn default() -> Self {
        Self {
            weekday: Weekday::Thu,
            hour: 10,
            minute: 30,
        }
    }
}

impl WeeklyDeadline {
    /// The latest occurrence strictly before `now`.
    ///
    /// On the deadline's own weekday this is today's instant once it has
    /// passed, and last week's until then.
    pub fn most_recent(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let days_since = (now.weekday().num_days_from_monday() + 7
            - self.weekday.num_days_from_monday())
            % 7;
        let day = now.date_naive() - Duration::days(i64::from(days_since));
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or_default();
        let candidate = day.and_time(time).and_utc();

        if now > candidate {
            candidate
        } else {
            candidate - Duration::weeks(1)
        }
    }
}
