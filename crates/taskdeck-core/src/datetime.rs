use anyhow::anyhow;
use chrono::{
  DateTime,
  Days,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use serde::Serializer;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[must_use]
pub fn today_in(
  tz: &Tz,
  now: DateTime<Utc>
) -> NaiveDate {
  now.with_timezone(tz).date_naive()
}

#[must_use]
pub fn format_date(
  date: NaiveDate
) -> String {
  date.format(DATE_FORMAT).to_string()
}

#[must_use]
pub fn format_timestamp(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  dt.with_timezone(tz)
    .format("%Y-%m-%d %H:%M %Z")
    .to_string()
}

pub fn parse_timezone(
  raw: &str
) -> anyhow::Result<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(anyhow!(
      "timezone cannot be empty"
    ));
  }

  trimmed.parse::<Tz>().map_err(|err| {
    anyhow!(
      "invalid timezone {trimmed}: \
       {err}"
    )
  })
}

/// Parses the due-date forms the UI
/// accepts: `YYYY-MM-DD`, a full
/// RFC 3339 timestamp, or one of
/// `today`, `tomorrow`, `yesterday`.
#[tracing::instrument(skip(today))]
pub fn parse_due_date(
  raw: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(anyhow!(
      "due date cannot be empty"
    ));
  }

  match trimmed
    .to_ascii_lowercase()
    .as_str()
  {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return today
        .checked_add_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | "yesterday" => {
      return today
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | _ => {}
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      trimmed,
      DATE_FORMAT
    )
  {
    return Ok(date);
  }

  if let Ok(ts) =
    DateTime::parse_from_rfc3339(
      trimmed
    )
  {
    return Ok(ts.date_naive());
  }

  tracing::trace!(
    raw = %trimmed,
    "due date did not match any \
     known form"
  );
  Err(anyhow!(
    "invalid due date {trimmed:?}; \
     expected YYYY-MM-DD"
  ))
}

/// Wire form of an optional due date.
/// Output is always `YYYY-MM-DD`;
/// input also tolerates timestamps
/// and empty strings.
pub mod due_date_serde {
  use chrono::NaiveDate;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  use super::DATE_FORMAT;

  pub fn serialize<S>(
    value: &Option<NaiveDate>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match value {
      | Some(date) => serializer
        .serialize_str(
          &date
            .format(DATE_FORMAT)
            .to_string()
        ),
      | None => {
        serializer.serialize_none()
      }
    }
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<Option<NaiveDate>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = Option::<String>::deserialize(
      deserializer
    )?;
    let Some(raw) = raw else {
      return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
      return Ok(None);
    }

    if let Ok(date) =
      NaiveDate::parse_from_str(
        trimmed,
        DATE_FORMAT
      )
    {
      return Ok(Some(date));
    }

    // Servers backed by document
    // stores often emit midnight
    // timestamps for date fields.
    let prefix = trimmed
      .get(..10)
      .unwrap_or(trimmed);
    NaiveDate::parse_from_str(
      prefix,
      DATE_FORMAT
    )
    .map(Some)
    .map_err(|err| {
      serde::de::Error::custom(
        format!(
          "invalid due_date \
           {trimmed:?}: {err}"
        )
      )
    })
  }
}

pub(crate) fn serialize_due_change<S>(
  value: &Option<Option<NaiveDate>>,
  serializer: S
) -> Result<S::Ok, S::Error>
where
  S: Serializer
{
  match value {
    | Some(inner) => {
      due_date_serde::serialize(
        inner, serializer
      )
    }
    | None => serializer.serialize_none()
  }
}
