use std::collections::{BTreeMap, HashSet};

use core_model::{CaseRecord, UNSPECIFIED_OFFICER};
use serde::Serialize;
use tracing::debug;

mod view;
mod window;

pub use view::{Trend, sorted_view, trend};
pub use window::{Span, WindowBounds, WindowKey, parse_timestamp};

/// Per-officer case counts for every window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficerStats {
    pub officer_name: String,
    pub total: usize,
    pub today: usize,
    pub yesterday: usize,
    pub this_week: usize,
    pub last_week: usize,
    pub this_month: usize,
    pub last_month: usize,
}

impl OfficerStats {
    fn new(officer_name: &str) -> Self {
        Self {
            officer_name: officer_name.to_string(),
            ..Self::default()
        }
    }

    pub fn count(&self, key: WindowKey) -> usize {
        match key {
            WindowKey::All => self.total,
            WindowKey::Today => self.today,
            WindowKey::Yesterday => self.yesterday,
            WindowKey::ThisWeek => self.this_week,
            WindowKey::LastWeek => self.last_week,
            WindowKey::ThisMonth => self.this_month,
            WindowKey::LastMonth => self.last_month,
        }
    }

    fn tally(&mut self, bounds: &WindowBounds, ts: Option<chrono::DateTime<chrono::Utc>>) {
        self.total += 1;
        let Some(ts) = ts else {
            return;
        };
        for (span, slot) in [
            (bounds.today, &mut self.today),
            (bounds.yesterday, &mut self.yesterday),
            (bounds.this_week, &mut self.this_week),
            (bounds.last_week, &mut self.last_week),
            (bounds.this_month, &mut self.this_month),
            (bounds.last_month, &mut self.last_month),
        ] {
            if span.contains(ts) {
                *slot += 1;
            }
        }
    }
}

/// Dashboard headline numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickStats {
    pub today_count: usize,
    pub week_count: usize,
    pub officer_count: usize,
    pub total_count: usize,
}

/// Everything one aggregation pass produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollup {
    pub officers: Vec<OfficerStats>,
    pub quick: QuickStats,
}

/// Single pass over the collection. Each timestamp is parsed once; records
/// whose timestamp does not parse count toward totals only.
pub fn aggregate(records: &[CaseRecord], bounds: &WindowBounds) -> Rollup {
    let mut officers: BTreeMap<&str, OfficerStats> = BTreeMap::new();
    let mut named: HashSet<&str> = HashSet::new();
    let mut quick = QuickStats {
        total_count: records.len(),
        ..QuickStats::default()
    };
    let mut undated = 0usize;

    for record in records {
        let name = record.officer_name.as_str();
        let ts = parse_timestamp(&record.timestamp);
        if ts.is_none() {
            undated += 1;
        }
        officers
            .entry(name)
            .or_insert_with(|| OfficerStats::new(name))
            .tally(bounds, ts);
        if name != UNSPECIFIED_OFFICER {
            named.insert(name);
        }
        if let Some(ts) = ts {
            if bounds.today.contains(ts) {
                quick.today_count += 1;
            }
            if bounds.this_week.contains(ts) {
                quick.week_count += 1;
            }
        }
    }
    quick.officer_count = named.len();

    if undated > 0 {
        debug!(undated, "records without a usable timestamp");
    }
    Rollup {
        officers: officers.into_values().collect(),
        quick,
    }
}

pub fn officer_stats(records: &[CaseRecord], bounds: &WindowBounds) -> Vec<OfficerStats> {
    aggregate(records, bounds).officers
}

pub fn quick_stats(records: &[CaseRecord], bounds: &WindowBounds) -> QuickStats {
    aggregate(records, bounds).quick
}

/// The cases falling in `window`, in collection order. `All` keeps
/// everything, including records without a timestamp.
pub fn cases_in_window<'a>(
    records: &'a [CaseRecord],
    window: WindowKey,
    bounds: &WindowBounds,
) -> Vec<&'a CaseRecord> {
    match bounds.span(window) {
        None => records.iter().collect(),
        Some(span) => records
            .iter()
            .filter(|c| parse_timestamp(&c.timestamp).is_some_and(|ts| span.contains(ts)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bounds() -> WindowBounds {
        // Wednesday 15 May 2024.
        WindowBounds::at(&Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap())
    }

    fn case(id: &str, officer: &str, ts: &str) -> CaseRecord {
        CaseRecord::new(id, officer, ts)
    }

    fn sample() -> Vec<CaseRecord> {
        vec![
            case("1", "A", "2024-05-15T09:00:00Z"),
            case("2", "A", "2024-05-15T08:00:00Z"),
            case("3", "A", "2024-05-15T01:00:00Z"),
            case("4", "A", "2024-05-14T20:00:00Z"),
            case("5", "B", "2024-05-06T10:00:00Z"),
            case("6", "B", "2024-04-20T10:00:00Z"),
            case("7", UNSPECIFIED_OFFICER, "2024-05-15T10:00:00Z"),
            case("8", "C", ""),
            case("9", "C", "not a date"),
        ]
    }

    fn by_name(stats: &[OfficerStats], name: &str) -> OfficerStats {
        stats
            .iter()
            .find(|s| s.officer_name == name)
            .cloned()
            .unwrap()
    }

    #[test]
    fn counts_every_window() {
        let stats = officer_stats(&sample(), &bounds());
        assert_eq!(stats.len(), 4);

        let a = by_name(&stats, "A");
        assert_eq!((a.total, a.today, a.yesterday), (4, 3, 1));
        assert_eq!((a.this_week, a.last_week), (4, 0));
        assert_eq!((a.this_month, a.last_month), (4, 0));

        let b = by_name(&stats, "B");
        assert_eq!((b.total, b.this_week, b.last_week), (2, 0, 1));
        assert_eq!((b.this_month, b.last_month), (1, 1));
    }

    #[test]
    fn undated_records_count_toward_total_only() {
        let c = by_name(&officer_stats(&sample(), &bounds()), "C");
        assert_eq!(c.total, 2);
        for key in WindowKey::EVERY.into_iter().skip(1) {
            assert_eq!(c.count(key), 0, "{key}");
        }
    }

    #[test]
    fn quick_stats_headline() {
        let quick = quick_stats(&sample(), &bounds());
        assert_eq!(
            quick,
            QuickStats {
                today_count: 4,
                week_count: 5,
                officer_count: 3,
                total_count: 9,
            }
        );
    }

    #[test]
    fn offsetless_timestamps_land_in_windows() {
        let records = vec![
            case("1", "A", "2024-05-15T09:00:00"),
            case("2", "A", "2024-05-15T09:00:00.000"),
            case("3", "A", "2024-05-14"),
        ];
        let a = by_name(&officer_stats(&records, &bounds()), "A");
        assert_eq!((a.total, a.today, a.yesterday, a.this_week), (3, 2, 1, 3));
        assert_eq!(quick_stats(&records, &bounds()).today_count, 2);
    }

    #[test]
    fn future_cases_fall_outside_this_week() {
        let records = vec![case("1", "A", "2024-05-20T10:00:00Z")];
        let quick = quick_stats(&records, &bounds());
        assert_eq!(quick.week_count, 0);
        assert_eq!(quick.total_count, 1);
    }

    #[test]
    fn empty_collection() {
        let rollup = aggregate(&[], &bounds());
        assert!(rollup.officers.is_empty());
        assert_eq!(rollup.quick, QuickStats::default());
    }

    #[test]
    fn cases_in_window_filters_by_span() {
        let records = sample();
        let b = bounds();
        let today: Vec<_> = cases_in_window(&records, WindowKey::Today, &b)
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(today, vec!["1", "2", "3", "7"]);
        assert_eq!(cases_in_window(&records, WindowKey::All, &b).len(), 9);
        assert_eq!(cases_in_window(&records, WindowKey::LastMonth, &b).len(), 1);
    }

    #[test]
    fn rollup_serializes_camel_case() {
        let rollup = aggregate(&sample(), &bounds());
        let json = serde_json::to_string(&rollup).unwrap();
        assert!(json.contains("\"officerName\":\"A\""));
        assert!(json.contains("\"thisWeek\":4"));
        assert!(json.contains("\"todayCount\":4"));
    }
}
