use std::fmt;

use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

/// The selectable calendar windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowKey {
    #[default]
    All,
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
}

impl WindowKey {
    pub const EVERY: [WindowKey; 7] = [
        WindowKey::All,
        WindowKey::Today,
        WindowKey::Yesterday,
        WindowKey::ThisWeek,
        WindowKey::LastWeek,
        WindowKey::ThisMonth,
        WindowKey::LastMonth,
    ];

    /// Lenient: a few short aliases are accepted and anything else is `All`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "today" => WindowKey::Today,
            "yesterday" => WindowKey::Yesterday,
            "this-week" | "thisweek" | "week" => WindowKey::ThisWeek,
            "last-week" | "lastweek" => WindowKey::LastWeek,
            "this-month" | "thismonth" | "month" => WindowKey::ThisMonth,
            "last-month" | "lastmonth" => WindowKey::LastMonth,
            _ => WindowKey::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKey::All => "all",
            WindowKey::Today => "today",
            WindowKey::Yesterday => "yesterday",
            WindowKey::ThisWeek => "this-week",
            WindowKey::LastWeek => "last-week",
            WindowKey::ThisMonth => "this-month",
            WindowKey::LastMonth => "last-month",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WindowKey::All => "All time",
            WindowKey::Today => "Today",
            WindowKey::Yesterday => "Yesterday",
            WindowKey::ThisWeek => "This week",
            WindowKey::LastWeek => "Last week",
            WindowKey::ThisMonth => "This month",
            WindowKey::LastMonth => "Last month",
        }
    }

    /// The (current, previous) pair a trend column compares for this key.
    pub fn comparison(&self) -> Option<(WindowKey, WindowKey)> {
        match self {
            WindowKey::All => None,
            WindowKey::Today | WindowKey::Yesterday => {
                Some((WindowKey::Today, WindowKey::Yesterday))
            }
            WindowKey::ThisWeek | WindowKey::LastWeek => {
                Some((WindowKey::ThisWeek, WindowKey::LastWeek))
            }
            WindowKey::ThisMonth | WindowKey::LastMonth => {
                Some((WindowKey::ThisMonth, WindowKey::LastMonth))
            }
        }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open `[start, end)` interval of UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Span {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Every window's boundaries for one aggregation pass, computed from the
/// local calendar of `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowBounds {
    pub today: Span,
    pub yesterday: Span,
    pub this_week: Span,
    pub last_week: Span,
    pub this_month: Span,
    pub last_month: Span,
}

impl WindowBounds {
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let tz = now.timezone();
        let today = now.date_naive();
        let tomorrow = shift_days(today, 1);
        let yesterday = shift_days(today, -1);
        let monday = shift_days(today, -i64::from(today.weekday().num_days_from_monday()));
        let prev_monday = shift_days(monday, -7);
        let first = today.with_day(1).unwrap_or(today);
        let prev_first = first.checked_sub_months(Months::new(1)).unwrap_or(first);

        let start = |day: NaiveDate| start_of_day(&tz, day);
        let span = |from: NaiveDate, to: NaiveDate| Span {
            start: start(from),
            end: start(to),
        };

        Self {
            today: span(today, tomorrow),
            yesterday: span(yesterday, today),
            this_week: span(monday, tomorrow),
            last_week: span(prev_monday, monday),
            this_month: span(first, tomorrow),
            last_month: span(prev_first, first),
        }
    }

    /// `None` for `All`, which has no bounds.
    pub fn span(&self, key: WindowKey) -> Option<Span> {
        match key {
            WindowKey::All => None,
            WindowKey::Today => Some(self.today),
            WindowKey::Yesterday => Some(self.yesterday),
            WindowKey::ThisWeek => Some(self.this_week),
            WindowKey::LastWeek => Some(self.last_week),
            WindowKey::ThisMonth => Some(self.this_month),
            WindowKey::LastMonth => Some(self.last_month),
        }
    }
}

fn shift_days(day: NaiveDate, days: i64) -> NaiveDate {
    let shifted = if days >= 0 {
        day.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        day.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.unwrap_or(day)
}

/// First instant of `day` in `tz`. A day whose midnight falls in a DST gap
/// starts at the first local hour that exists.
fn start_of_day<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    (0..24)
        .find_map(|h| {
            tz.from_local_datetime(&(midnight + TimeDelta::hours(h)))
                .earliest()
        })
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Parses a record timestamp; empty or malformed values are `None`.
/// ISO-8601 values without an offset, date-only ones included, read as UTC.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(ts) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(naive) = ts.parse::<NaiveDateTime>() {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    ts.parse::<NaiveDate>()
        .ok()
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
}
