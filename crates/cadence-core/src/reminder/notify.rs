use std::io::{self, Write};
use std::process::{Command, Stdio};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{LeadTime, ReminderCategory, ReminderKey};
use crate::datetime::format_local;

/// Host permission for OS-level notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationPermission {
    Default,
    Granted,
    Denied,
    Unsupported,
}

impl NotificationPermission {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Default => "Permission not requested",
            Self::Granted => "Permission granted",
            Self::Denied => "Permission denied",
            Self::Unsupported => "Notifications unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(serialize_with = "serialize_key")]
    pub key: ReminderKey,
    pub label: String,
    pub occurrence: DateTime<Utc>,
    pub lead: LeadTime,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(key: ReminderKey, label: &str, occurrence: DateTime<Utc>, tz: Tz) -> Self {
        let hours = key.lead.duration().num_hours();
        let title = format!("{} in {hours} hours", key.category.noun());
        let label = if label.trim().is_empty() {
            key.entity_id.clone()
        } else {
            label.trim().to_string()
        };
        let verb = match key.category {
            ReminderCategory::Program | ReminderCategory::Agenda => "Starts",
            ReminderCategory::Kpi => "Due",
        };
        let body = format!("{label}\n{verb} {} ({tz})", format_local(occurrence, tz));

        Self {
            id: Uuid::new_v4(),
            lead: key.lead,
            key,
            label,
            occurrence,
            title,
            body,
        }
    }
}

fn serialize_key<S: serde::Serializer>(key: &ReminderKey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(key)
}

/// Where fired reminders go. The toast always shows; the OS notification
/// only when the host grants permission.
pub trait NotificationSink: Send {
    fn toast(&mut self, notification: &Notification);

    fn permission(&self) -> NotificationPermission;

    fn system(&mut self, notification: &Notification) -> anyhow::Result<()>;
}

/// Fire and forget: OS notification failures are logged and swallowed.
pub fn deliver(sink: &mut dyn NotificationSink, notification: &Notification) {
    sink.toast(notification);

    let permission = sink.permission();
    if permission != NotificationPermission::Granted {
        debug!(
            key = %notification.key,
            permission = permission.as_label(),
            "skipping system notification"
        );
        return;
    }

    if let Err(err) = sink.system(notification) {
        warn!(
            key = %notification.key,
            error = %format!("{err:#}"),
            "failed to emit system notification"
        );
    }
}

/// Toasts into the log; no OS notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn toast(&mut self, notification: &Notification) {
        info!(
            key = %notification.key,
            title = %notification.title,
            body = %notification.body,
            "reminder"
        );
    }

    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Unsupported
    }

    fn system(&mut self, _notification: &Notification) -> anyhow::Result<()> {
        Err(anyhow!("system notifications unsupported"))
    }
}

/// Prints toasts to stdout and hands OS notifications to an external
/// notifier invoked as `<command> <title> <body>` (e.g. `notify-send`).
#[derive(Debug, Clone, Default)]
pub struct CommandSink {
    command: Option<String>,
}

impl CommandSink {
    pub fn new(command: Option<String>) -> Self {
        let command = command
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty());
        Self { command }
    }
}

impl NotificationSink for CommandSink {
    fn toast(&mut self, notification: &Notification) {
        let mut out = io::stdout().lock();
        let body = notification.body.replace('\n', " - ");
        if let Err(err) = writeln!(out, "[{}] {}: {body}", notification.key, notification.title) {
            warn!(error = %err, "failed writing reminder toast");
        }
    }

    fn permission(&self) -> NotificationPermission {
        if self.command.is_some() {
            NotificationPermission::Granted
        } else {
            NotificationPermission::Unsupported
        }
    }

    fn system(&mut self, notification: &Notification) -> anyhow::Result<()> {
        let command = self
            .command
            .as_deref()
            .ok_or_else(|| anyhow!("no notification command configured"))?;
        let output = Command::new(command)
            .arg(&notification.title)
            .arg(&notification.body)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("failed to run notifier {command}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(anyhow!(
                "notifier {command} failed with status {}: {stderr}",
                output
                    .status
                    .code()
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ));
        }

        info!(command, key = %notification.key, "emitted system notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[derive(Default)]
    struct FlakySink {
        permission: Option<NotificationPermission>,
        toasts: usize,
        system_calls: usize,
    }

    impl NotificationSink for FlakySink {
        fn toast(&mut self, _notification: &Notification) {
            self.toasts += 1;
        }

        fn permission(&self) -> NotificationPermission {
            self.permission.unwrap_or(NotificationPermission::Default)
        }

        fn system(&mut self, _notification: &Notification) -> anyhow::Result<()> {
            self.system_calls += 1;
            Err(anyhow!("display server gone"))
        }
    }

    fn sample() -> Notification {
        let occurrence = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).single().expect("valid");
        Notification::new(
            ReminderKey::new(ReminderCategory::Kpi, "k1", LeadTime::Hours3),
            "Quarterly revenue",
            occurrence,
            chrono_tz::UTC,
        )
    }

    #[test]
    fn notification_text_names_entity_and_time() {
        let notification = sample();
        assert_eq!(notification.title, "KPI deadline in 3 hours");
        assert_eq!(notification.body, "Quarterly revenue\nDue 2026-03-02 15:00 (UTC)");
    }

    #[test]
    fn system_notification_needs_permission() {
        let mut sink = FlakySink {
            permission: Some(NotificationPermission::Denied),
            ..FlakySink::default()
        };
        deliver(&mut sink, &sample());
        assert_eq!((sink.toasts, sink.system_calls), (1, 0));
    }

    #[test]
    fn system_failure_is_swallowed() {
        let mut sink = FlakySink {
            permission: Some(NotificationPermission::Granted),
            ..FlakySink::default()
        };
        deliver(&mut sink, &sample());
        assert_eq!((sink.toasts, sink.system_calls), (1, 1));
    }

    #[test]
    fn blank_command_is_unsupported() {
        assert_eq!(
            CommandSink::new(Some("  ".to_string())).permission(),
            NotificationPermission::Unsupported
        );
        assert_eq!(
            CommandSink::new(Some("notify-send".to_string())).permission(),
            NotificationPermission::Granted
        );
    }
}
