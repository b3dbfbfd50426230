use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::DEFAULT_CHECK_INTERVAL_MINUTES;
use super::check::{CheckReport, ReminderChecker};
use crate::entity::EntitySource;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Owns the recurring reminder timer.
///
/// Enabling runs a check immediately and then once per period on the
/// blocking pool; disabling aborts the timer task. The checker sits behind
/// one mutex, so the timer and `check_now` never interleave.
pub struct ReminderScheduler {
    checker: Arc<Mutex<ReminderChecker>>,
    source: Arc<dyn EntitySource>,
    clock: Arc<dyn Clock>,
    period: StdDuration,
    enabled: bool,
    handle: Option<JoinHandle<()>>,
}

impl ReminderScheduler {
    pub fn new(checker: ReminderChecker, source: Arc<dyn EntitySource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            checker: Arc::new(Mutex::new(checker)),
            source,
            clock,
            period: StdDuration::from_secs(DEFAULT_CHECK_INTERVAL_MINUTES * 60),
            enabled: false,
            handle: None,
        }
    }

    /// Zero periods are clamped to one second.
    pub fn with_period(mut self, period: StdDuration) -> Self {
        self.period = period.max(StdDuration::from_secs(1));
        self
    }

    pub fn period(&self) -> StdDuration {
        self.period
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn set_enabled(&mut self, enabled: bool) -> anyhow::Result<()> {
        if enabled == self.enabled && enabled == self.is_running() {
            return Ok(());
        }
        if enabled {
            return self.start();
        }
        self.enabled = false;
        self.stop();
        Ok(())
    }

    /// Spawns the timer on the current tokio runtime. A running timer is
    /// replaced rather than duplicated.
    pub fn start(&mut self) -> anyhow::Result<()> {
        let runtime = Handle::try_current().context("reminder scheduler needs a tokio runtime")?;
        self.stop();
        self.enabled = true;

        let checker = Arc::clone(&self.checker);
        let source = Arc::clone(&self.source);
        let clock = Arc::clone(&self.clock);
        let period = self.period;

        self.handle = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let cycle_checker = Arc::clone(&checker);
                let cycle_source = Arc::clone(&source);
                let cycle_clock = Arc::clone(&clock);
                // Notifier commands block; keep them off the runtime thread.
                let cycle = tokio::task::spawn_blocking(move || {
                    run_cycle(&cycle_checker, cycle_source.as_ref(), cycle_clock.as_ref());
                });
                if let Err(err) = cycle.await {
                    warn!(error = %err, "reminder cycle did not complete");
                }
            }
        }));

        info!(period_secs = period.as_secs(), "reminder scheduler started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("reminder scheduler stopped");
        }
    }

    /// Runs one check outside the timer.
    pub fn check_now(&self) -> Option<CheckReport> {
        run_cycle(&self.checker, self.source.as_ref(), self.clock.as_ref())
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_cycle(
    checker: &Mutex<ReminderChecker>,
    source: &dyn EntitySource,
    clock: &dyn Clock,
) -> Option<CheckReport> {
    let snapshot = match source.snapshot() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "entity snapshot unavailable; skipping reminder cycle");
            return None;
        }
    };

    let now = clock.now();
    debug!(entities = snapshot.len(), now = %now, "running reminder cycle");
    Some(checker.lock().run_snapshot(now, &snapshot))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::entity::{EntitySnapshot, TimedEvent};
    use crate::reminder::{LogSink, MemoryDedupStore};

    struct CountingSource {
        calls: AtomicUsize,
        snapshot: EntitySnapshot,
    }

    impl EntitySource for CountingSource {
        fn snapshot(&self) -> anyhow::Result<EntitySnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.clone())
        }
    }

    struct GatedSource {
        entered: AtomicBool,
        released: AtomicBool,
        done: AtomicBool,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl EntitySource for GatedSource {
        fn snapshot(&self) -> anyhow::Result<EntitySnapshot> {
            self.entered.store(true, Ordering::SeqCst);
            let opened = self.gate.lock().recv_timeout(StdDuration::from_secs(5)).is_ok();
            self.released.store(opened, Ordering::SeqCst);
            self.done.store(true, Ordering::SeqCst);
            Ok(EntitySnapshot::default())
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn scheduler() -> (ReminderScheduler, Arc<CountingSource>) {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid");
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            snapshot: EntitySnapshot {
                programs: vec![TimedEvent::new(
                    "p1",
                    now + Duration::hours(20),
                    now + Duration::hours(30),
                    "Rollout",
                )],
                ..EntitySnapshot::default()
            },
        });
        let checker = ReminderChecker::new(
            Box::new(MemoryDedupStore::default()),
            Box::new(LogSink),
            chrono_tz::UTC,
        );
        let scheduler = ReminderScheduler::new(checker, source.clone(), Arc::new(FixedClock(now)));
        (scheduler, source)
    }

    #[test]
    fn start_without_runtime_is_an_error() {
        let (mut scheduler, _source) = scheduler();
        assert!(scheduler.start().is_err());
        assert!(scheduler.set_enabled(true).is_err());
        assert!(!scheduler.is_enabled());
        assert!(!scheduler.is_running());
    }

    #[test]
    fn check_now_dedups_across_calls() {
        let (scheduler, _source) = scheduler();
        let first = scheduler.check_now().expect("report");
        let second = scheduler.check_now().expect("report");
        assert_eq!(first.fired.len(), 1);
        assert!(second.fired.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_every_period_until_stopped() {
        let (mut scheduler, source) = scheduler();

        scheduler.set_enabled(true).expect("enable");
        tokio::time::sleep(StdDuration::from_millis(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(StdDuration::from_secs(5 * 60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        scheduler.set_enabled(false).expect("disable");
        tokio::time::sleep(StdDuration::from_secs(30 * 60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn re_enabling_checks_right_away() {
        let (mut scheduler, source) = scheduler();

        scheduler.set_enabled(true).expect("enable");
        tokio::time::sleep(StdDuration::from_secs(60)).await;
        scheduler.set_enabled(false).expect("disable");
        scheduler.set_enabled(true).expect("re-enable");
        tokio::time::sleep(StdDuration::from_millis(1)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_does_not_double_the_timer() {
        let (mut scheduler, source) = scheduler();

        scheduler.start().expect("start");
        scheduler.start().expect("restart");
        tokio::time::sleep(StdDuration::from_millis(1)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_cycle_leaves_the_runtime_responsive() {
        let (open, gate) = mpsc::channel();
        let source = Arc::new(GatedSource {
            entered: AtomicBool::new(false),
            released: AtomicBool::new(false),
            done: AtomicBool::new(false),
            gate: Mutex::new(gate),
        });
        let checker = ReminderChecker::new(
            Box::new(MemoryDedupStore::default()),
            Box::new(LogSink),
            chrono_tz::UTC,
        );
        let mut scheduler = ReminderScheduler::new(checker, source.clone(), Arc::new(SystemClock));

        scheduler.set_enabled(true).expect("enable");
        while !source.entered.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        open.send(()).expect("open gate");
        while !source.done.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        scheduler.stop();

        assert!(source.released.load(Ordering::SeqCst));
    }
}
