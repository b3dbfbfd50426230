use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  Months,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

pub const TIMEZONE_ENV_VAR: &str =
  "CADENCE_TIMEZONE";
pub const DEFAULT_TIMEZONE: &str =
  "UTC";
pub const DATE_KEY_FORMAT: &str =
  "%Y-%m-%d";

/// Picks the calendar timezone: the
/// environment wins over the configured
/// id, and both fall back to UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) = parse_timezone(
      raw,
      "calendar.timezone"
    )
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_TIMEZONE,
    "DEFAULT_TIMEZONE"
  )
  .unwrap_or(chrono_tz::UTC)
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "resolved calendar timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Maps a wall-clock time to an instant.
/// Ambiguous times take the earliest
/// reading; times inside a DST gap move
/// forward to the first valid minute.
pub fn local_instant(
  tz: Tz,
  naive: NaiveDateTime
) -> DateTime<Utc> {
  let mut probe = naive;
  for _ in 0..=(4 * 60) {
    match tz.from_local_datetime(&probe)
    {
      | LocalResult::Single(local) => {
        return local
          .with_timezone(&Utc);
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        let chosen = if first <= second
        {
          first
        } else {
          second
        };
        return chosen
          .with_timezone(&Utc);
      }
      | LocalResult::None => {
        probe += Duration::minutes(1);
      }
    }
  }

  tracing::warn!(
    timezone = %tz,
    local = %naive,
    "local time never resolved; \
     reading it as UTC"
  );
  DateTime::<Utc>::from_naive_utc_and_offset(
    naive, Utc
  )
}

#[must_use]
pub fn start_of_day(
  date: NaiveDate,
  tz: Tz
) -> DateTime<Utc> {
  local_instant(
    tz,
    date.and_time(NaiveTime::MIN)
  )
}

/// Last millisecond of the local day.
#[must_use]
pub fn end_of_day(
  date: NaiveDate,
  tz: Tz
) -> DateTime<Utc> {
  start_of_day(add_days(date, 1), tz)
    - Duration::milliseconds(1)
}

#[must_use]
pub fn day_bounds(
  date: NaiveDate,
  tz: Tz
) -> (DateTime<Utc>, DateTime<Utc>) {
  (
    start_of_day(date, tz),
    end_of_day(date, tz)
  )
}

#[must_use]
pub fn local_date(
  instant: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  instant.with_timezone(&tz).date_naive()
}

#[must_use]
pub fn date_key(
  date: NaiveDate
) -> String {
  date
    .format(DATE_KEY_FORMAT)
    .to_string()
}

#[must_use]
pub fn format_local(
  instant: DateTime<Utc>,
  tz: Tz
) -> String {
  instant
    .with_timezone(&tz)
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

/// `None` when the result leaves
/// chrono's date range.
pub fn checked_add_days(
  date: NaiveDate,
  days: i64
) -> Option<NaiveDate> {
  Duration::try_days(days).and_then(
    |delta| {
      date.checked_add_signed(delta)
    }
  )
}

/// Saturates at `date` when the result
/// is out of range.
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  checked_add_days(date, days)
    .unwrap_or(date)
}

/// Month arithmetic clamps to the last
/// day of shorter months.
pub fn checked_add_months(
  date: NaiveDate,
  months: i32
) -> Option<NaiveDate> {
  let step =
    Months::new(months.unsigned_abs());
  if months >= 0 {
    date.checked_add_months(step)
  } else {
    date.checked_sub_months(step)
  }
}

pub fn add_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  checked_add_months(date, months)
    .unwrap_or(date)
}

pub fn first_day_of_month(
  date: NaiveDate
) -> NaiveDate {
  date
    .with_day(1)
    .unwrap_or(date)
}

pub fn last_day_of_month(
  date: NaiveDate
) -> NaiveDate {
  add_days(
    add_months(
      first_day_of_month(date),
      1
    ),
    -1
  )
}

pub fn start_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  let day_idx = day
    .weekday()
    .num_days_from_monday()
    as i64;
  let start_idx = week_start
    .num_days_from_monday()
    as i64;
  let diff =
    (7 + day_idx - start_idx) % 7;
  add_days(day, -diff)
}

pub fn end_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  add_days(
    start_of_week(day, week_start),
    6
  )
}

pub fn parse_week_start(
  raw: &str
) -> Weekday {
  parse_weekday_name(
    &raw.trim().to_ascii_lowercase()
  )
  .unwrap_or(Weekday::Sun)
}

/// Parses an entity timestamp. Zoned
/// forms are taken as-is; bare dates
/// and wall-clock times are read in `tz`.
pub fn parse_instant(
  raw: &str,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = raw.trim();
  if token.is_empty() {
    return Err(anyhow!(
      "empty timestamp"
    ));
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(ndt) =
    NaiveDateTime::parse_from_str(
      token,
      "%Y%m%dT%H%M%SZ"
    )
  {
    return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Ok(local_instant(tz, ndt));
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token,
      DATE_KEY_FORMAT
    )
  {
    return Ok(start_of_day(date, tz));
  }

  Err(anyhow!(
    "unrecognized timestamp: {token}"
  ))
}

/// Resolves a reference-date expression
/// relative to `today`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "" | "today" | "now" => {
      return Ok(today);
    }
    | "tomorrow" => {
      return Ok(add_days(today, 1));
    }
    | "yesterday" => {
      return Ok(add_days(today, -1));
    }
    | _ => {}
  }

  if token.len() == 4
    && token
      .chars()
      .all(|c| c.is_ascii_digit())
  {
    let year: i32 =
      token.parse().context(
        "invalid 4-digit year"
      )?;
    return NaiveDate::from_ymd_opt(
      year, 1, 1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid year value: {year}"
      )
    });
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, target
    ));
  }

  if let Some(target_month) =
    parse_month_name(&lower)
  {
    let mut year = today.year();
    if target_month <= today.month() {
      year = year.saturating_add(1);
    }
    return NaiveDate::from_ymd_opt(
      year,
      target_month,
      1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid month/year \
         candidate"
      )
    });
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dwm])$")
    .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let negative = caps
      .name("sign")
      .is_some_and(|m| {
        m.as_str() == "-"
      });
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let signed =
      if negative { -num } else { num };
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let shifted = match unit {
      | "d" => {
        checked_add_days(today, signed)
      }
      | "w" => {
        signed
          .checked_mul(7)
          .and_then(|days| {
            checked_add_days(today, days)
          })
      }
      | "m" => {
        i32::try_from(signed)
          .ok()
          .and_then(|months| {
            checked_add_months(
              today, months
            )
          })
      }
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative offset out of \
         range: {token}"
      )
    });
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token,
      DATE_KEY_FORMAT
    )
  {
    return Ok(date);
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, 4-digit \
     year, weekday names (e.g. monday), \
     month names (e.g. march), \
     +Nd/+Nw/+Nm, YYYY-MM-DD"
  })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  match token.trim() {
    | "january" | "jan" => Some(1),
    | "february" | "feb" => Some(2),
    | "march" | "mar" => Some(3),
    | "april" | "apr" => Some(4),
    | "may" => Some(5),
    | "june" | "jun" => Some(6),
    | "july" | "jul" => Some(7),
    | "august" | "aug" => Some(8),
    | "september" | "sep" | "sept" => {
      Some(9)
    }
    | "october" | "oct" => Some(10),
    | "november" | "nov" => Some(11),
    | "december" | "dec" => Some(12),
    | _ => None
  }
}
