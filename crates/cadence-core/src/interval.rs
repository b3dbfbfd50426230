use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::datetime::local_date;

/// Closed-interval intersection. Touching boundaries overlap.
///
/// An inverted range (`range_start > range_end`) is not rejected here; callers
/// validate entities before asking.
pub fn overlaps<T: PartialOrd>(range_start: T, range_end: T, window_start: T, window_end: T) -> bool {
    range_end >= window_start && range_start <= window_end
}

pub fn contains<T: PartialOrd>(window_start: T, window_end: T, instant: T) -> bool {
    instant >= window_start && instant <= window_end
}

/// Same-calendar-day equality in the calendar timezone.
pub fn same_local_day(instant: DateTime<Utc>, day: NaiveDate, tz: Tz) -> bool {
    local_date(instant, tz) == day
}
