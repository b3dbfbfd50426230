use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use super::dedup::DedupStore;
use super::notify::{Notification, NotificationSink, deliver};
use super::{LeadTime, ReminderCategory, ReminderKey};
use crate::entity::{DeadlineEvent, EntitySnapshot, TimedEvent};

/// Outcome of one pass over the entities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub fired: Vec<ReminderKey>,
    pub suppressed: usize,
    pub skipped: usize,
}

struct Occurrence<'a> {
    category: ReminderCategory,
    id: &'a str,
    label: &'a str,
    at: DateTime<Utc>,
}

/// Evaluates every entity against both lead times and fires what is due.
pub struct ReminderChecker {
    store: Box<dyn DedupStore>,
    sink: Box<dyn NotificationSink>,
    tz: Tz,
}

impl ReminderChecker {
    pub fn new(store: Box<dyn DedupStore>, sink: Box<dyn NotificationSink>, tz: Tz) -> Self {
        Self { store, sink, tz }
    }

    /// For each occurrence with `0 < occurrence - now <= lead`, fires the
    /// lead's reminder unless the dedup store already holds its key.
    #[instrument(skip_all, fields(now = %now))]
    pub fn run_check(
        &mut self,
        now: DateTime<Utc>,
        ranged_events: &[TimedEvent],
        point_events: &[TimedEvent],
        deadline_events: &[DeadlineEvent],
    ) -> CheckReport {
        let mut report = CheckReport::default();
        let mut occurrences = Vec::new();

        for (category, events) in [
            (ReminderCategory::Program, ranged_events),
            (ReminderCategory::Agenda, point_events),
        ] {
            for event in events {
                if let Err(err) = event.validate() {
                    warn!(category = category.as_key(), error = %err, "skipping malformed entity");
                    report.skipped += 1;
                    continue;
                }
                occurrences.push(Occurrence {
                    category,
                    id: &event.id,
                    label: &event.label,
                    at: event.start,
                });
            }
        }

        occurrences.extend(deadline_events.iter().filter_map(|kpi| {
            kpi.deadline.map(|deadline| Occurrence {
                category: ReminderCategory::Kpi,
                id: &kpi.id,
                label: &kpi.label,
                at: deadline,
            })
        }));

        for occurrence in &occurrences {
            self.evaluate(occurrence, now, &mut report);
        }

        debug!(
            candidates = occurrences.len(),
            fired = report.fired.len(),
            suppressed = report.suppressed,
            skipped = report.skipped,
            "reminder check finished"
        );
        report
    }

    pub fn run_snapshot(&mut self, now: DateTime<Utc>, snapshot: &EntitySnapshot) -> CheckReport {
        self.run_check(now, &snapshot.programs, &snapshot.agenda, &snapshot.kpis)
    }

    fn evaluate(&mut self, occurrence: &Occurrence<'_>, now: DateTime<Utc>, report: &mut CheckReport) {
        let delta = occurrence.at - now;
        if delta <= Duration::zero() {
            return;
        }

        for lead in LeadTime::ALL {
            if delta > lead.duration() {
                continue;
            }

            let key = ReminderKey::new(occurrence.category, occurrence.id, lead);
            if self.store.is_shown(&key, now) {
                report.suppressed += 1;
                continue;
            }

            let notification = Notification::new(key.clone(), occurrence.label, occurrence.at, self.tz);
            deliver(self.sink.as_mut(), &notification);
            self.store.mark_shown(&key, now);

            info!(
                key = %key,
                occurrence = %occurrence.at,
                minutes_ahead = delta.num_minutes(),
                "fired reminder"
            );
            report.fired.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use parking_lot::Mutex;

    use super::*;
    use crate::reminder::dedup::MemoryDedupStore;
    use crate::reminder::notify::NotificationPermission;

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<Notification>>>,
    }

    impl NotificationSink for Recorder {
        fn toast(&mut self, notification: &Notification) {
            self.seen.lock().push(notification.clone());
        }

        fn permission(&self) -> NotificationPermission {
            NotificationPermission::Unsupported
        }

        fn system(&mut self, _notification: &Notification) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid")
    }

    fn checker() -> (ReminderChecker, Recorder) {
        let recorder = Recorder::default();
        let checker = ReminderChecker::new(
            Box::new(MemoryDedupStore::default()),
            Box::new(recorder.clone()),
            chrono_tz::UTC,
        );
        (checker, recorder)
    }

    fn program(id: &str, starts_in: Duration) -> TimedEvent {
        let start = now() + starts_in;
        TimedEvent::new(id, start, start + Duration::hours(10), id)
    }

    #[test]
    fn fires_day_ahead_reminder_once() {
        let (mut checker, recorder) = checker();
        let p = program("p1", Duration::hours(23) + Duration::minutes(59));

        let first = checker.run_check(now(), std::slice::from_ref(&p), &[], &[]);
        let second = checker.run_check(now(), std::slice::from_ref(&p), &[], &[]);

        assert_eq!(first.fired.len(), 1);
        assert_eq!(first.fired[0].lead, LeadTime::Hours24);
        assert!(second.fired.is_empty());
        assert_eq!(second.suppressed, 1);
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn three_hour_tier_fires_later_without_repeating_day_ahead() {
        let (mut checker, recorder) = checker();
        let p = program("p1", Duration::hours(20));

        let early = checker.run_check(now(), std::slice::from_ref(&p), &[], &[]);
        let late = checker.run_check(
            now() + Duration::hours(17) + Duration::minutes(10),
            std::slice::from_ref(&p),
            &[],
            &[],
        );

        let early_keys: Vec<String> = early.fired.iter().map(ToString::to_string).collect();
        let late_keys: Vec<String> = late.fired.iter().map(ToString::to_string).collect();
        assert_eq!(early_keys, vec!["program:p1:24h"]);
        assert_eq!(late_keys, vec!["program:p1:3h"]);
        assert_eq!(late.suppressed, 1);
        assert_eq!(recorder.seen.lock().len(), 2);
    }

    #[test]
    fn both_tiers_fire_inside_three_hours() {
        let (mut checker, _recorder) = checker();
        let p = program("p1", Duration::hours(2) + Duration::minutes(50));

        let report = checker.run_check(now(), &[p], &[], &[]);

        let tags: Vec<&str> = report.fired.iter().map(|key| key.lead.tag()).collect();
        assert_eq!(tags, vec!["24h", "3h"]);
    }

    #[test]
    fn past_and_distant_occurrences_stay_quiet() {
        let (mut checker, recorder) = checker();
        let started = program("started", -Duration::minutes(1));
        let exactly_now = program("now", Duration::zero());
        let distant = program("distant", Duration::hours(24) + Duration::seconds(1));

        let report = checker.run_check(now(), &[started, exactly_now, distant], &[], &[]);

        assert!(report.fired.is_empty());
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn boundary_of_lead_time_fires() {
        let (mut checker, _recorder) = checker();
        let report = checker.run_check(now(), &[program("edge", Duration::hours(24))], &[], &[]);
        assert_eq!(report.fired.len(), 1);
    }

    #[test]
    fn categories_key_their_own_reminders() {
        let (mut checker, recorder) = checker();
        let soon = now() + Duration::hours(5);
        let agenda = TimedEvent::new("x", soon, soon + Duration::minutes(30), "Sync");
        let kpi = DeadlineEvent::new("x", Some(soon), "Retention");
        let no_deadline = DeadlineEvent::new("y", None, "Backlog");

        let report = checker.run_check(now(), &[], &[agenda], &[kpi, no_deadline]);

        let keys: Vec<String> = report.fired.iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["agenda:x:24h", "kpi:x:24h"]);
        assert_eq!(recorder.seen.lock()[1].title, "KPI deadline in 24 hours");
    }

    #[test]
    fn malformed_entity_does_not_stop_the_pass() {
        let (mut checker, _recorder) = checker();
        let start = now() + Duration::hours(1);
        let inverted = TimedEvent::new("bad", start, start - Duration::hours(2), "Bad");
        let good = program("good", Duration::hours(1));

        let report = checker.run_check(now(), &[inverted, good], &[], &[]);

        assert_eq!(report.skipped, 1);
        assert_eq!(report.fired.len(), 2);
    }
}
