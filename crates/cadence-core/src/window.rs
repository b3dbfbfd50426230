use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};

use crate::datetime::{
  add_days,
  add_months,
  end_of_day,
  end_of_week,
  first_day_of_month,
  last_day_of_month,
  local_date,
  start_of_day,
  start_of_week
};

pub const AGENDA_SPAN_DAYS: i64 = 14;
pub const AGENDA_STEP_DAYS: i64 = 7;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
  Month,
  Week,
  Day,
  Agenda
}

impl ViewMode {
  pub const ALL: [ViewMode; 4] = [
    ViewMode::Month,
    ViewMode::Week,
    ViewMode::Day,
    ViewMode::Agenda
  ];

  pub fn as_key(
    self
  ) -> &'static str {
    match self {
      | Self::Month => "month",
      | Self::Week => "week",
      | Self::Day => "day",
      | Self::Agenda => "agenda"
    }
  }

  pub fn from_key(
    raw: &str
  ) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "month" => Some(Self::Month),
      | "week" => Some(Self::Week),
      | "day" => Some(Self::Day),
      | "agenda" => Some(Self::Agenda),
      | _ => None
    }
  }
}

impl fmt::Display for ViewMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

impl FromStr for ViewMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    Self::from_key(s).ok_or_else(|| {
      anyhow!(
        "unknown view mode {s:?}; \
         expected month, week, day or \
         agenda"
      )
    })
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Navigation {
  Previous,
  Next,
  Today
}

/// The inclusive instant range a view
/// renders, plus the calendar days it
/// paints.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct ViewWindow {
  pub view:      ViewMode,
  pub start:     DateTime<Utc>,
  pub end:       DateTime<Utc>,
  pub first_day: NaiveDate,
  pub last_day:  NaiveDate
}

impl ViewWindow {
  pub fn days(&self) -> Vec<NaiveDate> {
    self
      .first_day
      .iter_days()
      .take_while(|day| {
        *day <= self.last_day
      })
      .collect()
  }
}

/// Timezone and week convention shared
/// by every window computation.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct Calendar {
  pub tz:         Tz,
  pub week_start: Weekday
}

impl Default for Calendar {
  fn default() -> Self {
    Self {
      tz:         chrono_tz::UTC,
      week_start: Weekday::Sun
    }
  }
}

impl Calendar {
  pub fn new(
    tz: Tz,
    week_start: Weekday
  ) -> Self {
    Self { tz, week_start }
  }

  pub fn today(
    &self,
    now: DateTime<Utc>
  ) -> NaiveDate {
    local_date(now, self.tz)
  }

  #[tracing::instrument(skip(self))]
  pub fn compute_window(
    &self,
    reference: NaiveDate,
    view: ViewMode
  ) -> ViewWindow {
    let (first_day, last_day, end) =
      match view {
        | ViewMode::Month => {
          let first = start_of_week(
            first_day_of_month(
              reference
            ),
            self.week_start
          );
          let last = end_of_week(
            last_day_of_month(
              reference
            ),
            self.week_start
          );
          (
            first,
            last,
            end_of_day(last, self.tz)
          )
        }
        | ViewMode::Week => {
          let first = start_of_week(
            reference,
            self.week_start
          );
          let last = add_days(first, 6);
          (
            first,
            last,
            end_of_day(last, self.tz)
          )
        }
        | ViewMode::Day => {
          (
            reference,
            reference,
            end_of_day(
              reference, self.tz
            )
          )
        }
        | ViewMode::Agenda => {
          let bound = add_days(
            reference,
            AGENDA_SPAN_DAYS
          );
          (
            reference,
            add_days(bound, -1),
            start_of_day(bound, self.tz)
          )
        }
      };

    let window = ViewWindow {
      view,
      start: start_of_day(
        first_day, self.tz
      ),
      end,
      first_day,
      last_day
    };

    tracing::debug!(
      view = %view,
      reference = %reference,
      start = %window.start,
      end = %window.end,
      "computed view window"
    );
    window
  }

  pub fn navigate(
    &self,
    reference: NaiveDate,
    view: ViewMode,
    nav: Navigation,
    now: DateTime<Utc>
  ) -> NaiveDate {
    match nav {
      | Navigation::Previous => {
        shift_reference(
          reference, view, -1
        )
      }
      | Navigation::Next => {
        shift_reference(
          reference, view, 1
        )
      }
      | Navigation::Today => {
        self.today(now)
      }
    }
  }
}

/// Moves the reference date by `step`
/// units of the view.
pub fn shift_reference(
  reference: NaiveDate,
  view: ViewMode,
  step: i32
) -> NaiveDate {
  match view {
    | ViewMode::Month => {
      add_months(reference, step)
    }
    | ViewMode::Week => {
      add_days(
        reference,
        i64::from(step) * 7
      )
    }
    | ViewMode::Day => {
      add_days(
        reference,
        i64::from(step)
      )
    }
    | ViewMode::Agenda => {
      add_days(
        reference,
        i64::from(step)
          * AGENDA_STEP_DAYS
      )
    }
  }
}

pub fn window_title(
  window: &ViewWindow,
  reference: NaiveDate
) -> String {
  match window.view {
    | ViewMode::Month => {
      format!(
        "Month View {}",
        reference.format("%B %Y")
      )
    }
    | ViewMode::Week => {
      format!(
        "Week View {} - {}",
        window
          .first_day
          .format("%Y-%m-%d"),
        window
          .last_day
          .format("%Y-%m-%d")
      )
    }
    | ViewMode::Day => {
      format!(
        "Day View {}",
        reference
          .format("%A, %Y-%m-%d")
      )
    }
    | ViewMode::Agenda => {
      format!(
        "Agenda {} - {}",
        window
          .first_day
          .format("%b %d"),
        window
          .last_day
          .format("%b %d, %Y")
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    Datelike,
    TimeZone,
    Timelike,
    Utc,
    Weekday
  };

  use super::*;

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn month_window_is_whole_weeks() {
    let calendar = Calendar::default();
    for year in [2024, 2025, 2026] {
      for month in 1..=12 {
        let reference =
          date(year, month, 15);
        let window = calendar
          .compute_window(
            reference,
            ViewMode::Month
          );
        assert_eq!(
          window.first_day.weekday(),
          Weekday::Sun
        );
        assert_eq!(
          window.last_day.weekday(),
          Weekday::Sat
        );
        assert!(
          window.first_day
            <= date(year, month, 1)
        );
        assert!(
          window.last_day
            >= last_day_of_month(
              reference
            )
        );
        assert_eq!(
          window.days().len() % 7,
          0
        );
      }
    }
  }

  #[test]
  fn month_window_pads_adjacent_months(
  ) {
    let window = Calendar::default()
      .compute_window(
        date(2026, 2, 10),
        ViewMode::Month
      );
    assert_eq!(
      window.first_day,
      date(2026, 2, 1)
    );
    assert_eq!(
      window.last_day,
      date(2026, 2, 28)
    );

    let window = Calendar::default()
      .compute_window(
        date(2026, 3, 10),
        ViewMode::Month
      );
    assert_eq!(
      window.first_day,
      date(2026, 3, 1)
    );
    assert_eq!(
      window.last_day,
      date(2026, 4, 4)
    );
    assert_eq!(
      window.end,
      Utc
        .with_ymd_and_hms(
          2026, 4, 4, 23, 59, 59
        )
        .single()
        .expect("valid")
        + chrono::Duration::milliseconds(
          999
        )
    );
  }

  #[test]
  fn week_window_runs_sunday_to_saturday(
  ) {
    let window = Calendar::default()
      .compute_window(
        date(2026, 2, 18),
        ViewMode::Week
      );
    assert_eq!(
      window.first_day,
      date(2026, 2, 15)
    );
    assert_eq!(
      window.last_day,
      date(2026, 2, 21)
    );
  }

  #[test]
  fn monday_week_start_is_respected() {
    let calendar = Calendar::new(
      chrono_tz::UTC,
      Weekday::Mon
    );
    let window = calendar
      .compute_window(
        date(2026, 2, 15),
        ViewMode::Week
      );
    assert_eq!(
      window.first_day,
      date(2026, 2, 9)
    );
  }

  #[test]
  fn day_window_spans_local_day() {
    let tz: Tz = "Europe/Berlin"
      .parse()
      .expect("valid tz");
    let window =
      Calendar::new(tz, Weekday::Sun)
        .compute_window(
          date(2026, 6, 1),
          ViewMode::Day
        );
    let start =
      window.start.with_timezone(&tz);
    let end =
      window.end.with_timezone(&tz);
    assert_eq!(
      (start.hour(), start.minute()),
      (0, 0)
    );
    assert_eq!(
      (end.hour(), end.minute()),
      (23, 59)
    );
    assert_eq!(window.days().len(), 1);
  }

  #[test]
  fn agenda_window_crosses_month_boundary(
  ) {
    let window = Calendar::default()
      .compute_window(
        date(2026, 1, 25),
        ViewMode::Agenda
      );
    assert_eq!(
      window.start,
      Utc
        .with_ymd_and_hms(
          2026, 1, 25, 0, 0, 0
        )
        .single()
        .expect("valid")
    );
    assert_eq!(
      window.end,
      Utc
        .with_ymd_and_hms(
          2026, 2, 8, 0, 0, 0
        )
        .single()
        .expect("valid")
    );
    assert_eq!(
      window.days().len(),
      AGENDA_SPAN_DAYS as usize
    );
  }

  #[test]
  fn navigation_respects_month_lengths()
  {
    assert_eq!(
      shift_reference(
        date(2024, 1, 31),
        ViewMode::Month,
        1
      ),
      date(2024, 2, 29)
    );
    assert_eq!(
      shift_reference(
        date(2025, 3, 31),
        ViewMode::Month,
        -1
      ),
      date(2025, 2, 28)
    );
    assert_eq!(
      shift_reference(
        date(2026, 12, 28),
        ViewMode::Week,
        1
      ),
      date(2027, 1, 4)
    );
    assert_eq!(
      shift_reference(
        date(2026, 1, 25),
        ViewMode::Agenda,
        -1
      ),
      date(2026, 1, 18)
    );
  }

  #[test]
  fn today_navigation_uses_calendar_timezone(
  ) {
    let tz: Tz = "Pacific/Auckland"
      .parse()
      .expect("valid tz");
    let calendar =
      Calendar::new(tz, Weekday::Sun);
    let now = Utc
      .with_ymd_and_hms(
        2026, 5, 1, 20, 0, 0
      )
      .single()
      .expect("valid");
    assert_eq!(
      calendar.navigate(
        date(2020, 1, 1),
        ViewMode::Day,
        Navigation::Today,
        now
      ),
      date(2026, 5, 2)
    );
  }

  #[test]
  fn view_mode_parses_keys() {
    for view in ViewMode::ALL {
      assert_eq!(
        view
          .as_key()
          .parse::<ViewMode>()
          .expect("parse view"),
        view
      );
    }
    assert!(
      "quarter"
        .parse::<ViewMode>()
        .is_err()
    );
  }
}
