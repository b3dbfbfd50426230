use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::aggregate::{DayBucket, DayEntries, WindowSummary};
use crate::config::Config;
use crate::datetime::{date_key, format_local};
use crate::reminder::CheckReport;
use crate::window::{ViewWindow, window_title};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, window))]
    pub fn print_window(
        &mut self,
        window: &ViewWindow,
        reference: NaiveDate,
        tz: Tz,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "{}", self.paint(&window_title(window, reference), "1"))?;
        writeln!(out, "view      {}", window.view)?;
        writeln!(out, "timezone  {tz}")?;
        writeln!(out, "start     {}", window.start.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S%.3f %Z"))?;
        writeln!(out, "end       {}", window.end.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S%.3f %Z"))?;
        writeln!(
            out,
            "days      {} ({} .. {})",
            window.days().len(),
            date_key(window.first_day),
            date_key(window.last_day)
        )?;

        Ok(())
    }

    #[tracing::instrument(skip(self, buckets, summary))]
    pub fn print_day_table(
        &mut self,
        buckets: &BTreeMap<String, DayBucket>,
        summary: &WindowSummary,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let today_key = date_key(today);

        let headers = vec![
            "Date".to_string(),
            "Programs".to_string(),
            "Agenda".to_string(),
            "KPIs".to_string(),
            "Total".to_string(),
        ];

        let rows = buckets
            .iter()
            .map(|(key, bucket)| {
                let date = if *key == today_key {
                    self.paint(key, "33")
                } else {
                    key.clone()
                };
                let total = bucket.total().to_string();
                let total = if bucket.is_empty() {
                    total
                } else {
                    self.paint(&total, "32")
                };
                vec![
                    date,
                    bucket.ranged_count.to_string(),
                    bucket.point_count.to_string(),
                    bucket.deadline_count.to_string(),
                    total,
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        writeln!(
            out,
            "\n{} days, {} busy: {} program-days, {} agenda-days, {} KPI deadlines",
            summary.days,
            summary.busy_days,
            summary.ranged_day_hits,
            summary.point_day_hits,
            summary.deadlines
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, entries))]
    pub fn print_day_entries(
        &mut self,
        day: NaiveDate,
        entries: &DayEntries<'_>,
        tz: Tz,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "{}", self.paint(&day.format("%A, %Y-%m-%d").to_string(), "1"))?;
        if entries.is_empty() {
            writeln!(out, "No entries.")?;
            return Ok(());
        }

        let headers = vec![
            "Kind".to_string(),
            "ID".to_string(),
            "When".to_string(),
            "Label".to_string(),
        ];

        let mut rows = Vec::new();
        for (kind, events) in [("program", &entries.ranged), ("agenda", &entries.point)] {
            for event in events.iter() {
                rows.push(vec![
                    kind.to_string(),
                    self.paint(&event.id, "33"),
                    format!("{} .. {}", format_local(event.start, tz), format_local(event.end, tz)),
                    event.label.clone(),
                ]);
            }
        }
        for kpi in &entries.deadlines {
            let when = kpi
                .deadline
                .map(|deadline| format_local(deadline, tz))
                .unwrap_or_default();
            rows.push(vec![
                "kpi".to_string(),
                self.paint(&kpi.id, "33"),
                self.paint(&when, "31"),
                kpi.label.clone(),
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_check_report(&mut self, report: &CheckReport) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "fired {} reminder(s), {} already shown, {} malformed skipped",
            report.fired.len(),
            report.suppressed,
            report.skipped
        )?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(widths.iter().copied()) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for width in widths.iter().copied() {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(widths.iter().copied()) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
