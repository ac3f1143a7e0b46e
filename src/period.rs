use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

/// The institutional attendance/billing cycle: Wednesday through the
/// following Tuesday. Every weekly query, printed summons, and rollup
/// buckets dates into this window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl WeekWindow {
    pub fn contains(&self, d: NaiveDate) -> bool {
        d >= self.start && d <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..7).map(move |i| start + Duration::days(i))
    }
}

/// Resolve the Wednesday–Tuesday window containing `reference`.
///
/// Day indexing is Sunday=0; Wednesday is 3. If the reference day index is
/// below 3 it belongs to the week whose Wednesday fell in the previous
/// calendar week, so it is shifted by 7 before subtracting the offset.
pub fn week_of(reference: NaiveDate) -> WeekWindow {
    let mut idx = reference.weekday().num_days_from_sunday() as i64;
    if idx < 3 {
        idx += 7;
    }
    let start = reference - Duration::days(idx - 3);
    WeekWindow {
        start,
        end: start + Duration::days(6),
    }
}
