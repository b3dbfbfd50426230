use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::datetime::parse_instant;

#[derive(Debug, Error)]
pub enum EntityError {
    #[error("entity {id}: start {start} is after end {end}")]
    InvertedRange {
        id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("entity {id}: invalid {field} timestamp {raw:?}: {reason}")]
    BadTimestamp {
        id: String,
        field: &'static str,
        raw: String,
        reason: String,
    },

    #[error("{section} record {index}: {reason}")]
    Malformed {
        section: &'static str,
        index: usize,
        reason: String,
    },
}

/// A program or team agenda item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub label: String,
}

impl TimedEvent {
    pub fn new(
        id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            label: label.into(),
        }
    }

    pub fn validate(&self) -> Result<(), EntityError> {
        if self.start > self.end {
            return Err(EntityError::InvertedRange {
                id: self.id.clone(),
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

/// A KPI. Without a deadline it never shows up on the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineEvent {
    pub id: String,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub label: String,
}

impl DeadlineEvent {
    pub fn new(
        id: impl Into<String>,
        deadline: Option<DateTime<Utc>>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            deadline,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    #[serde(default)]
    pub programs: Vec<TimedEvent>,
    #[serde(default)]
    pub agenda: Vec<TimedEvent>,
    #[serde(default)]
    pub kpis: Vec<DeadlineEvent>,
}

impl EntitySnapshot {
    pub fn len(&self) -> usize {
        self.programs.len() + self.agenda.len() + self.kpis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses an exported snapshot. Only a document that is not a JSON object
    /// fails; individual records with bad ids or timestamps are logged and
    /// dropped.
    #[tracing::instrument(skip(raw, tz))]
    pub fn from_json_str(raw: &str, tz: Tz) -> anyhow::Result<Self> {
        let doc: RawSnapshot =
            serde_json::from_str(raw).context("entity snapshot is not a valid JSON object")?;

        let programs = convert_section("programs", doc.programs, |record: RawTimedRecord| {
            timed_from_raw(record, tz)
        });
        let agenda = convert_section("agenda", doc.agenda, |record: RawTimedRecord| {
            timed_from_raw(record, tz)
        });
        let kpis = convert_section("kpis", doc.kpis, |record: RawDeadlineRecord| {
            deadline_from_raw(record, tz)
        });

        debug!(
            programs = programs.len(),
            agenda = agenda.len(),
            kpis = kpis.len(),
            "parsed entity snapshot"
        );

        Ok(Self {
            programs,
            agenda,
            kpis,
        })
    }

    #[tracing::instrument(skip(tz))]
    pub fn load(path: &Path, tz: Tz) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Self::from_json_str(&raw, tz)
            .with_context(|| format!("failed parsing {}", path.display()))
    }
}

/// Read accessor for the entity collections owned by the remote data layer.
pub trait EntitySource: Send + Sync {
    fn snapshot(&self) -> anyhow::Result<EntitySnapshot>;
}

/// Holds a snapshot in memory; callers swap it as their data refreshes.
#[derive(Debug, Default)]
pub struct StaticSource {
    snapshot: RwLock<EntitySnapshot>,
}

impl StaticSource {
    pub fn new(snapshot: EntitySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn replace(&self, snapshot: EntitySnapshot) {
        *self.snapshot.write() = snapshot;
    }
}

impl EntitySource for StaticSource {
    fn snapshot(&self) -> anyhow::Result<EntitySnapshot> {
        Ok(self.snapshot.read().clone())
    }
}

/// Re-reads a JSON export on every call so edits show up on the next cycle.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    tz: Tz,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            path: path.into(),
            tz,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntitySource for JsonFileSource {
    fn snapshot(&self) -> anyhow::Result<EntitySnapshot> {
        EntitySnapshot::load(&self.path, self.tz)
    }
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    programs: Vec<Value>,
    #[serde(default)]
    agenda: Vec<Value>,
    #[serde(default)]
    kpis: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(text) => text,
            RawId::Number(num) => num.to_string(),
        }
    }
}

/// Epoch milliseconds or any form `parse_instant` accepts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInstant {
    Millis(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawTimedRecord {
    id: RawId,
    start: RawInstant,
    #[serde(default)]
    end: Option<RawInstant>,
    #[serde(default, alias = "name", alias = "title")]
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDeadlineRecord {
    id: RawId,
    #[serde(default)]
    deadline: Option<RawInstant>,
    #[serde(default, alias = "name", alias = "title")]
    label: Option<String>,
}

fn convert_section<R, T>(
    section: &'static str,
    values: Vec<Value>,
    convert: impl Fn(R) -> Result<T, EntityError>,
) -> Vec<T>
where
    R: for<'de> Deserialize<'de>,
{
    let mut out = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        let converted = serde_json::from_value::<R>(value)
            .map_err(|err| EntityError::Malformed {
                section,
                index,
                reason: err.to_string(),
            })
            .and_then(&convert);

        match converted {
            Ok(entity) => out.push(entity),
            Err(err) => warn!(section, index, error = %err, "skipping malformed entity"),
        }
    }
    out
}

fn timed_from_raw(record: RawTimedRecord, tz: Tz) -> Result<TimedEvent, EntityError> {
    let id = record.id.into_string();
    let start = resolve_instant(&id, "start", record.start, tz)?;
    let end = match record.end {
        Some(raw) => resolve_instant(&id, "end", raw, tz)?,
        None => start,
    };
    let event = TimedEvent {
        label: record.label.unwrap_or_else(|| id.clone()),
        id,
        start,
        end,
    };
    event.validate()?;
    Ok(event)
}

fn deadline_from_raw(record: RawDeadlineRecord, tz: Tz) -> Result<DeadlineEvent, EntityError> {
    let id = record.id.into_string();
    let deadline = record
        .deadline
        .map(|raw| resolve_instant(&id, "deadline", raw, tz))
        .transpose()?;
    Ok(DeadlineEvent {
        label: record.label.unwrap_or_else(|| id.clone()),
        id,
        deadline,
    })
}

fn resolve_instant(
    id: &str,
    field: &'static str,
    raw: RawInstant,
    tz: Tz,
) -> Result<DateTime<Utc>, EntityError> {
    match raw {
        RawInstant::Millis(millis) => {
            DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| EntityError::BadTimestamp {
                id: id.to_string(),
                field,
                raw: millis.to_string(),
                reason: "epoch milliseconds out of range".to_string(),
            })
        }
        RawInstant::Text(text) => parse_instant(&text, tz).map_err(|err| EntityError::BadTimestamp {
            id: id.to_string(),
            field,
            raw: text.clone(),
            reason: err.to_string(),
        }),
    }
}
