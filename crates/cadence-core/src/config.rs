use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration as StdDuration;

use anyhow::{
  Context,
  anyhow
};
use chrono::Duration;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::{
  parse_week_start,
  resolve_timezone
};
use crate::reminder::{
  DEFAULT_CHECK_INTERVAL_MINUTES,
  DEFAULT_EXPIRY_HOURS
};
use crate::window::{
  Calendar,
  ViewMode
};

pub const RC_ENV_VAR: &str =
  "CADENCERC";
pub const RC_FILE_NAME: &str =
  ".cadencerc";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", "~/.cadence"),
      ("calendar.week_start", "sunday"),
      ("calendar.default_view", "month"),
      ("reminders.interval_minutes", "5"),
      ("reminders.expiry_hours", "48"),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading cadencerc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no cadencerc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn calendar(&self) -> Calendar {
    let tz = resolve_timezone(
      self
        .map
        .get("calendar.timezone")
        .map(String::as_str)
    );
    let week_start = parse_week_start(
      self
        .map
        .get("calendar.week_start")
        .map(String::as_str)
        .unwrap_or("sunday")
    );
    Calendar::new(tz, week_start)
  }

  pub fn default_view(
    &self
  ) -> ViewMode {
    self
      .map
      .get("calendar.default_view")
      .and_then(|raw| {
        let parsed =
          ViewMode::from_key(raw);
        if parsed.is_none() {
          warn!(value = %raw, "invalid calendar.default_view; using month");
        }
        parsed
      })
      .unwrap_or(ViewMode::Month)
  }

  /// Falls back to the default when the
  /// value is missing, zero or garbage.
  pub fn reminder_interval(
    &self
  ) -> StdDuration {
    let minutes = self
      .positive_number(
        "reminders.interval_minutes"
      )
      .unwrap_or(
        DEFAULT_CHECK_INTERVAL_MINUTES
      );
    StdDuration::from_secs(
      minutes.saturating_mul(60)
    )
  }

  pub fn reminder_expiry(
    &self
  ) -> Duration {
    let hours = self
      .positive_number(
        "reminders.expiry_hours"
      )
      .and_then(|hours| {
        i64::try_from(hours).ok()
      })
      .unwrap_or(DEFAULT_EXPIRY_HOURS);
    Duration::hours(hours)
  }

  pub fn notify_command(
    &self
  ) -> Option<String> {
    self
      .map
      .get("reminders.notify_command")
      .map(|raw| raw.trim().to_string())
      .filter(|raw| !raw.is_empty())
  }

  fn positive_number(
    &self,
    key: &str
  ) -> Option<u64> {
    let raw = self.map.get(key)?;
    match raw.trim().parse::<u64>() {
      | Ok(0) | Err(_) => {
        warn!(key, value = %raw, "expected a positive number; using default");
        None
      }
      | Ok(value) => Some(value)
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .to_path_buf();

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let line = parse_rc_line(raw_line)
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            idx + 1,
            raw_line
          )
        })?;

      match line {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let include =
            resolve_include_path(
              &base_dir, target
            )?;
          if self
            .loaded_files
            .contains(&include)
            || !include.exists()
          {
            warn!(include = %include.display(), "include already loaded or missing; skipping");
            continue;
          }
          debug!(include = %include.display(), "processing include");
          self.load_file(&include)?;
        }
        | RcLine::Entry(key, value) => {
          if !KNOWN_KEYS.contains(&key) {
            warn!(key, file = %path.display(), "unknown cadencerc key");
          }
          trace!(key, value, "loaded config key");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }
}

const KNOWN_KEYS: [&str; 8] = [
  "data.location",
  "calendar.timezone",
  "calendar.week_start",
  "calendar.default_view",
  "reminders.interval_minutes",
  "reminders.expiry_hours",
  "reminders.notify_command",
  "color"
];

#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Blank,
  Include(&'a str),
  Entry(&'a str, &'a str)
}

/// `None` for a line that is neither a
/// comment, an include nor `key = value`.
fn parse_rc_line(
  raw: &str
) -> Option<RcLine<'_>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Some(RcLine::Blank);
  }
  if let Some(target) =
    line.strip_prefix("include ")
  {
    return Some(RcLine::Include(
      target.trim()
    ));
  }
  let (key, value) =
    line.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  Some(RcLine::Entry(key, value.trim()))
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping cadencerc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".cadence"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use chrono::Weekday;
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn loads_keys_comments_and_includes()
  {
    let temp =
      tempdir().expect("tempdir");
    let extra =
      temp.path().join("extra.rc");
    fs::write(
      &extra,
      "reminders.notify_command = \
       notify-send\n"
    )
    .expect("write include");
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# calendar\ncalendar.week_start \
       = monday  # trailing\n\ninclude \
       extra.rc\nreminders.\
       interval_minutes=10\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(rc.as_path()))
      .expect("load config");

    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.calendar().week_start,
      Weekday::Mon
    );
    assert_eq!(
      cfg.reminder_interval(),
      StdDuration::from_secs(600)
    );
    assert_eq!(
      cfg.notify_command().as_deref(),
      Some("notify-send")
    );
  }

  #[test]
  fn rc_lines_classify() {
    assert_eq!(
      parse_rc_line("  # note"),
      Some(RcLine::Blank)
    );
    assert_eq!(
      parse_rc_line(
        "include ~/shared.rc # team"
      ),
      Some(RcLine::Include(
        "~/shared.rc"
      ))
    );
    assert_eq!(
      parse_rc_line("color=off"),
      Some(RcLine::Entry("color", "off"))
    );
    assert_eq!(
      parse_rc_line(" = off"),
      None
    );
  }

  #[test]
  fn rejects_line_without_equals() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "week_start monday\n")
      .expect("write rc");
    assert!(
      Config::load(Some(rc.as_path())).is_err()
    );
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![
      (
        "rc.calendar.default_view"
          .to_string(),
        "agenda".to_string()
      ),
      (
        "reminders.expiry_hours"
          .to_string(),
        "72".to_string()
      ),
    ]);
    assert_eq!(
      cfg.default_view(),
      ViewMode::Agenda
    );
    assert_eq!(
      cfg.reminder_expiry(),
      Duration::hours(72)
    );
  }

  #[test]
  fn bad_numbers_fall_back_to_defaults()
  {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![
      (
        "reminders.interval_minutes"
          .to_string(),
        "0".to_string()
      ),
      (
        "reminders.expiry_hours"
          .to_string(),
        "soon".to_string()
      ),
    ]);
    assert_eq!(
      cfg.reminder_interval(),
      StdDuration::from_secs(300)
    );
    assert_eq!(
      cfg.reminder_expiry(),
      Duration::hours(48)
    );
    assert_eq!(
      cfg.get_bool("color"),
      Some(true)
    );
  }
}
