use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::aggregate::{aggregate_window, entries_for_day, filter_snapshot, summarize};
use crate::cli::{Command, ReminderAction, ViewArgs};
use crate::config::Config;
use crate::datetime::parse_date_expr;
use crate::entity::{EntitySnapshot, JsonFileSource};
use crate::preferences::Preferences;
use crate::reminder::{
    CommandSink, FileDedupStore, NotificationSink, ReminderChecker, ReminderScheduler, SystemClock,
};
use crate::render::Renderer;
use crate::window::{Calendar, ViewMode, ViewWindow, shift_reference};

/// Everything a command needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct Session {
    pub cfg: Config,
    pub calendar: Calendar,
    pub data_dir: PathBuf,
    pub prefs: Preferences,
}

impl Session {
    pub fn new(cfg: Config, data_dir: PathBuf) -> Self {
        let calendar = cfg.calendar();
        let prefs = Preferences::load(&data_dir);
        Self {
            cfg,
            calendar,
            data_dir,
            prefs,
        }
    }

    fn view_or_default(&self, requested: Option<ViewMode>) -> ViewMode {
        requested
            .or(self.prefs.default_view)
            .unwrap_or_else(|| self.cfg.default_view())
    }

    fn today(&self) -> NaiveDate {
        self.calendar.today(Utc::now())
    }

    fn reference(&self, expr: &str) -> anyhow::Result<NaiveDate> {
        parse_date_expr(expr, self.today())
            .with_context(|| format!("invalid date expression: {expr}"))
    }

    fn resolve_window(&self, args: &ViewArgs) -> anyhow::Result<(ViewWindow, NaiveDate)> {
        let view = self.view_or_default(args.view);
        let reference = shift_reference(self.reference(&args.date)?, view, args.step);
        Ok((self.calendar.compute_window(reference, view), reference))
    }

    fn load_snapshot(&self, path: &Path) -> anyhow::Result<EntitySnapshot> {
        EntitySnapshot::load(path, self.calendar.tz)
    }

    fn checker(&self) -> ReminderChecker {
        let store = FileDedupStore::open(&self.data_dir, self.cfg.reminder_expiry());
        let sink = CommandSink::new(self.cfg.notify_command());
        ReminderChecker::new(Box::new(store), Box::new(sink), self.calendar.tz)
    }
}

#[instrument(skip(session, renderer, command))]
pub fn dispatch(
    session: &mut Session,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    debug!(
        tz = %session.calendar.tz,
        week_start = ?session.calendar.week_start,
        data_dir = %session.data_dir.display(),
        "dispatching command"
    );

    match command {
        Command::Window(args) => cmd_window(session, renderer, &args),
        Command::Days { view, entities } => cmd_days(session, renderer, &view, &entities),
        Command::Day { entities, date } => cmd_day(session, renderer, &entities, &date),
        Command::Check { entities } => cmd_check(session, renderer, &entities),
        Command::Watch { entities } => cmd_watch(session, entities),
        Command::Reminders { action } => cmd_reminders(session, action),
    }
}

#[instrument(skip(session, renderer, args))]
fn cmd_window(session: &Session, renderer: &mut Renderer, args: &ViewArgs) -> anyhow::Result<()> {
    info!("command window");
    let (window, reference) = session.resolve_window(args)?;
    renderer.print_window(&window, reference, session.calendar.tz)
}

#[instrument(skip(session, renderer, args, entities))]
fn cmd_days(
    session: &Session,
    renderer: &mut Renderer,
    args: &ViewArgs,
    entities: &Path,
) -> anyhow::Result<()> {
    info!("command days");
    let (window, reference) = session.resolve_window(args)?;
    let snapshot = filter_snapshot(&window, &session.load_snapshot(entities)?);
    let buckets = aggregate_window(&window, &snapshot, session.calendar.tz);
    let summary = summarize(&buckets);

    renderer.print_window(&window, reference, session.calendar.tz)?;
    println!();
    renderer.print_day_table(&buckets, &summary, session.today())
}

#[instrument(skip(session, renderer, entities, date))]
fn cmd_day(
    session: &Session,
    renderer: &mut Renderer,
    entities: &Path,
    date: &str,
) -> anyhow::Result<()> {
    info!("command day");
    let day = session.reference(date)?;
    let snapshot = session.load_snapshot(entities)?;
    let entries = entries_for_day(day, &snapshot, session.calendar.tz);
    renderer.print_day_entries(day, &entries, session.calendar.tz)
}

#[instrument(skip(session, renderer, entities))]
fn cmd_check(session: &Session, renderer: &mut Renderer, entities: &Path) -> anyhow::Result<()> {
    info!("command check");
    if !session.prefs.reminders_enabled {
        println!("Reminders are off. Run `cadence reminders on` to enable them.");
        return Ok(());
    }

    let snapshot = session.load_snapshot(entities)?;
    let report = session.checker().run_snapshot(Utc::now(), &snapshot);
    renderer.print_check_report(&report)
}

#[instrument(skip(session, entities))]
fn cmd_watch(session: &Session, entities: PathBuf) -> anyhow::Result<()> {
    info!("command watch");
    if !session.prefs.reminders_enabled {
        println!("Reminders are off. Run `cadence reminders on` to enable them.");
        return Ok(());
    }

    let source = Arc::new(JsonFileSource::new(entities, session.calendar.tz));
    let mut scheduler =
        ReminderScheduler::new(session.checker(), source, Arc::new(SystemClock))
            .with_period(session.cfg.reminder_interval());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        scheduler.set_enabled(true)?;
        println!(
            "Watching for reminders every {}s. Press Ctrl-C to stop.",
            scheduler.period().as_secs()
        );
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        scheduler.set_enabled(false)?;
        anyhow::Ok(())
    })?;

    info!("watch stopped");
    Ok(())
}

#[instrument(skip(session))]
fn cmd_reminders(session: &mut Session, action: ReminderAction) -> anyhow::Result<()> {
    info!("command reminders");
    match action {
        ReminderAction::On | ReminderAction::Off => {
            let enabled = action == ReminderAction::On;
            if session.prefs.reminders_enabled == enabled {
                warn!(enabled, "reminders preference unchanged");
            }
            session.prefs.reminders_enabled = enabled;
            session.prefs.save(&session.data_dir)?;
            println!("Reminders {}.", if enabled { "enabled" } else { "disabled" });
        }
        ReminderAction::Status => {
            let sink = CommandSink::new(session.cfg.notify_command());
            let store = FileDedupStore::open(&session.data_dir, session.cfg.reminder_expiry());
            println!(
                "reminders  {}",
                if session.prefs.reminders_enabled { "on" } else { "off" }
            );
            println!("system     {}", sink.permission().as_label());
            println!("interval   {}s", session.cfg.reminder_interval().as_secs());
            println!("expiry     {}h", session.cfg.reminder_expiry().num_hours());
            println!("records    {} ({})", store.len(), store.path().display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn reminders_toggle_is_persisted() {
        let temp = tempdir().expect("tempdir");
        let mut session = Session::new(Config::default(), temp.path().to_path_buf());
        assert!(session.prefs.reminders_enabled);

        cmd_reminders(&mut session, ReminderAction::Off).expect("toggle off");

        let reloaded = Session::new(Config::default(), temp.path().to_path_buf());
        assert!(!reloaded.prefs.reminders_enabled);
    }

    #[test]
    fn view_falls_back_to_preference_then_config() {
        let temp = tempdir().expect("tempdir");
        let mut cfg = Config::default();
        cfg.apply_overrides(vec![("calendar.default_view".to_string(), "day".to_string())]);
        let mut session = Session::new(cfg, temp.path().to_path_buf());

        assert_eq!(session.view_or_default(None), ViewMode::Day);
        session.prefs.default_view = Some(ViewMode::Agenda);
        assert_eq!(session.view_or_default(None), ViewMode::Agenda);
        assert_eq!(session.view_or_default(Some(ViewMode::Week)), ViewMode::Week);
    }

    #[test]
    fn window_args_apply_navigation_steps() {
        let temp = tempdir().expect("tempdir");
        let session = Session::new(Config::default(), temp.path().to_path_buf());
        let args = ViewArgs {
            view: Some(ViewMode::Month),
            date: "2024-01-31".to_string(),
            step: 1,
        };

        let (window, reference) = session.resolve_window(&args).expect("window");

        assert_eq!(reference, NaiveDate::from_ymd_opt(2024, 2, 29).expect("valid"));
        assert_eq!(window.first_day, NaiveDate::from_ymd_opt(2024, 1, 28).expect("valid"));
        assert_eq!(window.last_day, NaiveDate::from_ymd_opt(2024, 3, 2).expect("valid"));
    }
}
