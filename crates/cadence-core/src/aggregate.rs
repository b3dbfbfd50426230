use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::datetime::{date_key, day_bounds};
use crate::entity::{DeadlineEvent, EntitySnapshot, TimedEvent};
use crate::interval::{contains, overlaps, same_local_day};
use crate::window::ViewWindow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayBucket {
    pub ranged_count: usize,
    pub point_count: usize,
    pub deadline_count: usize,
}

impl DayBucket {
    pub fn total(&self) -> usize {
        self.ranged_count + self.point_count + self.deadline_count
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Counts per category across a window's buckets. A ranged event spanning
/// three days contributes three `ranged_day_hits`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowSummary {
    pub days: usize,
    pub busy_days: usize,
    pub ranged_day_hits: usize,
    pub point_day_hits: usize,
    pub deadlines: usize,
}

/// Entities touching one day, ordered by occurrence.
#[derive(Debug, Clone, Default)]
pub struct DayEntries<'a> {
    pub ranged: Vec<&'a TimedEvent>,
    pub point: Vec<&'a TimedEvent>,
    pub deadlines: Vec<&'a DeadlineEvent>,
}

impl DayEntries<'_> {
    pub fn is_empty(&self) -> bool {
        self.ranged.is_empty() && self.point.is_empty() && self.deadlines.is_empty()
    }
}

/// Buckets entities per day, keyed `YYYY-MM-DD`.
///
/// Cost is days × entities; both stay small for a calendar grid, so nothing
/// is cached. Entities with inverted ranges are skipped.
#[instrument(skip_all, fields(days = days.len()))]
pub fn aggregate(
    days: &[NaiveDate],
    ranged_events: &[TimedEvent],
    point_events: &[TimedEvent],
    deadline_events: &[DeadlineEvent],
    tz: Tz,
) -> BTreeMap<String, DayBucket> {
    let ranged = well_formed("ranged", ranged_events);
    let point = well_formed("point", point_events);
    let deadlines: Vec<DateTime<Utc>> =
        deadline_events.iter().filter_map(|event| event.deadline).collect();

    let mut buckets = BTreeMap::new();
    for &day in days {
        let (day_start, day_end) = day_bounds(day, tz);
        let bucket = DayBucket {
            ranged_count: ranged
                .iter()
                .filter(|event| overlaps(event.start, event.end, day_start, day_end))
                .count(),
            point_count: point
                .iter()
                .filter(|event| overlaps(event.start, event.end, day_start, day_end))
                .count(),
            deadline_count: deadlines
                .iter()
                .filter(|deadline| same_local_day(**deadline, day, tz))
                .count(),
        };
        buckets.insert(date_key(day), bucket);
    }

    debug!(
        buckets = buckets.len(),
        ranged = ranged.len(),
        point = point.len(),
        deadlines = deadlines.len(),
        "aggregated day buckets"
    );
    buckets
}

pub fn aggregate_window(
    window: &ViewWindow,
    snapshot: &EntitySnapshot,
    tz: Tz,
) -> BTreeMap<String, DayBucket> {
    aggregate(
        &window.days(),
        &snapshot.programs,
        &snapshot.agenda,
        &snapshot.kpis,
        tz,
    )
}

pub fn entries_for_day<'a>(
    day: NaiveDate,
    snapshot: &'a EntitySnapshot,
    tz: Tz,
) -> DayEntries<'a> {
    let (day_start, day_end) = day_bounds(day, tz);
    let touches_day =
        |event: &&TimedEvent| overlaps(event.start, event.end, day_start, day_end);

    let mut entries = DayEntries {
        ranged: well_formed("ranged", &snapshot.programs)
            .into_iter()
            .filter(touches_day)
            .collect(),
        point: well_formed("point", &snapshot.agenda)
            .into_iter()
            .filter(touches_day)
            .collect(),
        deadlines: snapshot
            .kpis
            .iter()
            .filter(|kpi| kpi.deadline.is_some_and(|d| same_local_day(d, day, tz)))
            .collect(),
    };

    entries.ranged.sort_by_key(|event| event.start);
    entries.point.sort_by_key(|event| event.start);
    entries.deadlines.sort_by_key(|kpi| kpi.deadline);
    entries
}

/// Narrows a snapshot to what a window shows.
pub fn filter_snapshot(window: &ViewWindow, snapshot: &EntitySnapshot) -> EntitySnapshot {
    let in_window = |event: &&TimedEvent| {
        event.validate().is_ok() && overlaps(event.start, event.end, window.start, window.end)
    };

    EntitySnapshot {
        programs: snapshot.programs.iter().filter(in_window).cloned().collect(),
        agenda: snapshot.agenda.iter().filter(in_window).cloned().collect(),
        kpis: snapshot
            .kpis
            .iter()
            .filter(|kpi| {
                kpi.deadline
                    .is_some_and(|d| contains(window.start, window.end, d))
            })
            .cloned()
            .collect(),
    }
}

pub fn summarize(buckets: &BTreeMap<String, DayBucket>) -> WindowSummary {
    buckets
        .values()
        .fold(WindowSummary::default(), |mut summary, bucket| {
            summary.days += 1;
            if !bucket.is_empty() {
                summary.busy_days += 1;
            }
            summary.ranged_day_hits += bucket.ranged_count;
            summary.point_day_hits += bucket.point_count;
            summary.deadlines += bucket.deadline_count;
            summary
        })
}

fn well_formed<'a>(kind: &'static str, events: &'a [TimedEvent]) -> Vec<&'a TimedEvent> {
    events
        .iter()
        .filter(|event| match event.validate() {
            Ok(()) => true,
            Err(err) => {
                warn!(kind, error = %err, "skipping malformed entity");
                false
            }
        })
        .collect()
}
