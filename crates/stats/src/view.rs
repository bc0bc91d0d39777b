use std::cmp::Ordering;

use serde::Serialize;

use crate::{OfficerStats, WindowKey};

/// Direction of change between two window counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "direction", content = "by", rename_all = "lowercase")]
pub enum Trend {
    Increase(usize),
    Decrease(usize),
    Unchanged,
}

impl Trend {
    /// Signed difference, current minus previous.
    pub fn delta(&self) -> i64 {
        match *self {
            Trend::Increase(n) => n as i64,
            Trend::Decrease(n) => -(n as i64),
            Trend::Unchanged => 0,
        }
    }
}

pub fn trend(current: usize, previous: usize) -> Trend {
    match current.cmp(&previous) {
        Ordering::Greater => Trend::Increase(current - previous),
        Ordering::Less => Trend::Decrease(previous - current),
        Ordering::Equal => Trend::Unchanged,
    }
}

/// Officers ordered by their count in `window`, highest first, ties by name.
/// A non-empty `filter` keeps names containing it verbatim, ignoring case.
pub fn sorted_view<'a>(
    stats: &'a [OfficerStats],
    window: WindowKey,
    filter: &str,
) -> Vec<&'a OfficerStats> {
    let mut view: Vec<&OfficerStats> = stats.iter().collect();
    view.sort_by(|a, b| {
        b.count(window)
            .cmp(&a.count(window))
            .then_with(|| a.officer_name.cmp(&b.officer_name))
    });

    if filter.is_empty() {
        return view;
    }
    let needle = filter.to_lowercase();
    view.into_iter()
        .filter(|s| s.officer_name.to_lowercase().contains(&needle))
        .collect()
}
