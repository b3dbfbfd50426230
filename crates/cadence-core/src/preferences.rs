use std::fs;
use std::io::Write;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use serde::{
  Deserialize,
  Serialize
};
use tempfile::NamedTempFile;

use crate::window::ViewMode;

pub const PREFERENCES_FILE: &str =
  "preferences.toml";

fn default_reminders_enabled() -> bool
{
  true
}

/// User toggles that outlive a single
/// run.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct Preferences {
  #[serde(
    default = "default_reminders_enabled"
  )]
  pub reminders_enabled: bool,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub default_view: Option<ViewMode>
}

impl Default for Preferences {
  fn default() -> Self {
    Self {
      reminders_enabled: true,
      default_view:      None
    }
  }
}

impl Preferences {
  pub fn path(
    data_dir: &Path
  ) -> PathBuf {
    data_dir.join(PREFERENCES_FILE)
  }

  /// Missing or unreadable files load
  /// as defaults.
  pub fn load(data_dir: &Path) -> Self {
    let path = Self::path(data_dir);
    if !path.exists() {
      return Self::default();
    }

    let parsed = fs::read_to_string(
      &path
    )
    .map_err(anyhow::Error::new)
    .and_then(|raw| {
      toml::from_str::<Preferences>(
        &raw
      )
      .map_err(anyhow::Error::new)
    });

    match parsed {
      | Ok(prefs) => {
        tracing::debug!(
          file = %path.display(),
          reminders_enabled = prefs.reminders_enabled,
          "loaded preferences"
        );
        prefs
      }
      | Err(error) => {
        tracing::warn!(
          file = %path.display(),
          error = %format!("{error:#}"),
          "failed parsing preferences; using defaults"
        );
        Self::default()
      }
    }
  }

  #[tracing::instrument(skip(self))]
  pub fn save(
    &self,
    data_dir: &Path
  ) -> anyhow::Result<()> {
    let path = Self::path(data_dir);
    let body = toml::to_string_pretty(
      self
    )
    .context(
      "failed to serialize preferences"
    )?;

    fs::create_dir_all(data_dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          data_dir.display()
        )
      })?;
    let mut temp =
      NamedTempFile::new_in(data_dir)?;
    temp.write_all(body.as_bytes())?;
    temp.flush()?;
    temp.persist(&path).map_err(
      |err| {
        anyhow!(
          "failed to persist {}: {}",
          path.display(),
          err
        )
      }
    )?;

    tracing::info!(
      file = %path.display(),
      reminders_enabled = self.reminders_enabled,
      "saved preferences"
    );
    Ok(())
  }
}
