//! Two-tier (24h / 3h) reminders over programs, agenda items and KPI
//! deadlines, fired at most once per entity and lead time.

mod check;
mod dedup;
mod notify;
mod scheduler;

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use check::{CheckReport, ReminderChecker};
pub use dedup::{DedupStore, FileDedupStore, MemoryDedupStore};
pub use notify::{CommandSink, LogSink, Notification, NotificationPermission, NotificationSink, deliver};
pub use scheduler::{Clock, ReminderScheduler, SystemClock};

pub const DEFAULT_CHECK_INTERVAL_MINUTES: u64 = 5;
pub const DEFAULT_EXPIRY_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderCategory {
    Program,
    Agenda,
    Kpi,
}

impl ReminderCategory {
    pub fn as_key(self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::Agenda => "agenda",
            Self::Kpi => "kpi",
        }
    }

    pub fn noun(self) -> &'static str {
        match self {
            Self::Program => "Program",
            Self::Agenda => "Agenda item",
            Self::Kpi => "KPI deadline",
        }
    }

    fn from_key(raw: &str) -> Option<Self> {
        match raw {
            "program" => Some(Self::Program),
            "agenda" => Some(Self::Agenda),
            "kpi" => Some(Self::Kpi),
            _ => None,
        }
    }
}

/// How far ahead of an occurrence a reminder fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LeadTime {
    #[serde(rename = "24h")]
    Hours24,
    #[serde(rename = "3h")]
    Hours3,
}

impl LeadTime {
    pub const ALL: [LeadTime; 2] = [LeadTime::Hours24, LeadTime::Hours3];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Hours24 => "24h",
            Self::Hours3 => "3h",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            Self::Hours24 => Duration::hours(24),
            Self::Hours3 => Duration::hours(3),
        }
    }

    fn from_tag(raw: &str) -> Option<Self> {
        match raw {
            "24h" => Some(Self::Hours24),
            "3h" => Some(Self::Hours3),
            _ => None,
        }
    }
}

/// One reminder opportunity: `category:entity_id:lead`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReminderKey {
    pub category: ReminderCategory,
    pub entity_id: String,
    pub lead: LeadTime,
}

impl ReminderKey {
    pub fn new(category: ReminderCategory, entity_id: impl Into<String>, lead: LeadTime) -> Self {
        Self {
            category,
            entity_id: entity_id.into(),
            lead,
        }
    }
}

impl fmt::Display for ReminderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.category.as_key(),
            self.entity_id,
            self.lead.tag()
        )
    }
}

impl FromStr for ReminderKey {
    type Err = anyhow::Error;

    // Entity ids may contain ':', so the category and lead are peeled off the ends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, rest) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("reminder key missing category: {s}"))?;
        let (entity_id, lead) = rest
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("reminder key missing lead time: {s}"))?;
        let category = ReminderCategory::from_key(category)
            .ok_or_else(|| anyhow!("unknown reminder category {category:?} in {s}"))?;
        let lead =
            LeadTime::from_tag(lead).ok_or_else(|| anyhow!("unknown lead time {lead:?} in {s}"))?;
        if entity_id.is_empty() {
            return Err(anyhow!("reminder key missing entity id: {s}"));
        }
        Ok(Self::new(category, entity_id, lead))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub fired_at: DateTime<Utc>,
}
