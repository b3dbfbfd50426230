use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{DEFAULT_EXPIRY_HOURS, ReminderKey, ReminderRecord};

/// Remembers which reminders already fired.
///
/// A record older than the expiry no longer suppresses its key. Lookups
/// delete the expired record they hit; writes sweep every expired record.
pub trait DedupStore: Send {
    fn is_shown(&mut self, key: &ReminderKey, now: DateTime<Utc>) -> bool;

    fn mark_shown(&mut self, key: &ReminderKey, now: DateTime<Utc>);
}

#[derive(Debug, Clone)]
struct Records {
    entries: BTreeMap<String, ReminderRecord>,
    expiry: Duration,
}

impl Records {
    fn new(entries: BTreeMap<String, ReminderRecord>, expiry: Duration) -> Self {
        Self { entries, expiry }
    }

    fn expired(&self, record: &ReminderRecord, now: DateTime<Utc>) -> bool {
        now - record.fired_at > self.expiry
    }

    /// Returns `(shown, changed)`.
    fn lookup(&mut self, key: &str, now: DateTime<Utc>) -> (bool, bool) {
        let Some(record) = self.entries.get(key).copied() else {
            return (false, false);
        };
        if self.expired(&record, now) {
            debug!(key, fired_at = %record.fired_at, "evicting expired reminder record");
            self.entries.remove(key);
            return (false, true);
        }
        (true, false)
    }

    fn upsert(&mut self, key: String, now: DateTime<Utc>) {
        let expiry = self.expiry;
        let before = self.entries.len();
        self.entries.retain(|_, record| now - record.fired_at <= expiry);
        let swept = before - self.entries.len();
        if swept > 0 {
            debug!(swept, "swept expired reminder records");
        }
        self.entries.insert(key, ReminderRecord { fired_at: now });
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDedupStore {
    records: Records,
}

impl Default for MemoryDedupStore {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_EXPIRY_HOURS))
    }
}

impl MemoryDedupStore {
    pub fn new(expiry: Duration) -> Self {
        Self {
            records: Records::new(BTreeMap::new(), expiry),
        }
    }

    pub fn len(&self) -> usize {
        self.records.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.entries.is_empty()
    }
}

impl DedupStore for MemoryDedupStore {
    fn is_shown(&mut self, key: &ReminderKey, now: DateTime<Utc>) -> bool {
        self.records.lookup(&key.to_string(), now).0
    }

    fn mark_shown(&mut self, key: &ReminderKey, now: DateTime<Utc>) {
        self.records.upsert(key.to_string(), now);
    }
}

/// JSON file of `key -> {fired_at}` records, rewritten atomically.
///
/// Unreadable or corrupt files open as empty, so at worst a reminder fires
/// twice. Failed writes are logged and the in-memory view carries on.
#[derive(Debug)]
pub struct FileDedupStore {
    path: PathBuf,
    records: Records,
}

impl FileDedupStore {
    pub const FILE_NAME: &'static str = "reminders.json";

    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, expiry: Duration) -> Self {
        let path = data_dir.join(Self::FILE_NAME);
        let entries = match load_records(&path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    file = %path.display(),
                    error = %format!("{err:#}"),
                    "reminder records unreadable; starting empty"
                );
                BTreeMap::new()
            }
        };
        info!(
            file = %path.display(),
            records = entries.len(),
            "opened reminder dedup store"
        );
        Self {
            path,
            records: Records::new(entries, expiry),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.entries.is_empty()
    }

    fn persist(&self) {
        if let Err(err) = save_records_atomic(&self.path, &self.records.entries) {
            warn!(
                file = %self.path.display(),
                error = %format!("{err:#}"),
                "failed to persist reminder records"
            );
        }
    }
}

impl DedupStore for FileDedupStore {
    fn is_shown(&mut self, key: &ReminderKey, now: DateTime<Utc>) -> bool {
        let (shown, changed) = self.records.lookup(&key.to_string(), now);
        if changed {
            self.persist();
        }
        shown
    }

    fn mark_shown(&mut self, key: &ReminderKey, now: DateTime<Utc>) {
        self.records.upsert(key.to_string(), now);
        self.persist();
    }
}

fn load_records(path: &Path) -> anyhow::Result<BTreeMap<String, ReminderRecord>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    debug!(file = %path.display(), "loading reminder records");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

fn save_records_atomic(
    path: &Path,
    records: &BTreeMap<String, ReminderRecord>,
) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving reminder records atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, records)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
