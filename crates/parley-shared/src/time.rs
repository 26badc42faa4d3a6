//! Timestamp parsing and display helpers.
//!
//! The server stores UTC and sometimes serialises it without an offset
//! (`2025-08-13T06:21:44.123`). Such naive timestamps are read as UTC; display
//! happens in a caller-supplied offset.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp as sent by the server.
pub fn parse_server_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let s = s.trim();
    let rfc3339_err = match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => return Ok(dt.with_timezone(&Utc)),
        Err(e) => e,
    };

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(rfc3339_err)
}

/// Short, human-oriented rendering of `ts` relative to `now`.
pub fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>, offset: FixedOffset) -> String {
    let elapsed = now.signed_duration_since(ts);

    if elapsed < Duration::minutes(1) {
        return "just now".to_string();
    }
    if elapsed < Duration::hours(1) {
        return format!("{} min ago", elapsed.num_minutes());
    }
    if elapsed < Duration::hours(24) {
        return format!("{} h ago", elapsed.num_hours());
    }

    let local = ts.with_timezone(&offset);
    let local_now = now.with_timezone(&offset);

    if local_now.date_naive().pred_opt() == Some(local.date_naive()) {
        return format!("Yesterday {}", local.format("%H:%M"));
    }
    if elapsed < Duration::days(7) {
        return local.format("%a %H:%M").to_string();
    }
    if local.year() == local_now.year() {
        return local.format("%b %-d %H:%M").to_string();
    }
    local.format("%b %-d, %Y %H:%M").to_string()
}

/// Full rendering used for tooltips: weekday, date, seconds and offset.
pub fn format_detailed(ts: DateTime<Utc>, offset: FixedOffset) -> String {
    ts.with_timezone(&offset)
        .format("%A, %B %-d, %Y %H:%M:%S %:z")
        .to_string()
}

/// Serde adapter for server timestamps (`#[serde(with = "server_timestamp")]`).
pub mod server_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_server_timestamp(&raw).map_err(serde::de::Error::custom)
    }

    /// Same adapter for optional fields; combine with `#[serde(default)]`.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => s.serialize_str(&ts.to_rfc3339()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) if !raw.trim().is_empty() => super::super::parse_server_timestamp(&raw)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                _ => Ok(None),
            }
        }
    }
}
