use chrono::{
  DateTime,
  NaiveDate,
  NaiveDateTime,
  SecondsFormat,
  Utc
};

const NAIVE_FORMATS: [&str; 2] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M:%S%.f"
];

/// Parses the date-time shapes the
/// backend emits. Values without an
/// offset are UTC; a bare date is
/// midnight UTC.
pub fn parse_wire_datetime(
  raw: &str
) -> Option<DateTime<Utc>> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(trimmed)
  {
    return Some(dt.with_timezone(&Utc));
  }

  for format in NAIVE_FORMATS {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        trimmed, format
      )
    {
      return Some(ndt.and_utc());
    }
  }

  NaiveDate::parse_from_str(
    trimmed, "%Y-%m-%d"
  )
  .ok()
  .and_then(|date| {
    date.and_hms_opt(0, 0, 0)
  })
  .map(|ndt| ndt.and_utc())
}

pub fn format_wire_datetime(
  dt: &DateTime<Utc>
) -> String {
  dt.to_rfc3339_opts(
    SecondsFormat::AutoSi,
    true
  )
}

pub mod wire_date {
  use chrono::{
    DateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &super::format_wire_datetime(dt)
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    super::parse_wire_datetime(&raw)
      .ok_or_else(|| {
        serde::de::Error::custom(
          format!(
            "invalid date-time: {raw}"
          )
        )
      })
  }

  pub mod option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | None => Ok(None),
        | Some(raw)
          if raw.trim().is_empty() =>
        {
          Ok(None)
        }
        | Some(raw) => {
          super::super::parse_wire_datetime(&raw)
            .map(Some)
            .ok_or_else(|| {
              serde::de::Error::custom(
                format!(
                  "invalid date-time: \
                   {raw}"
                )
              )
            })
        }
      }
    }
  }
}
