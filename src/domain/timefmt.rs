//! RFC3339 timestamps with fixed nanosecond precision.
//!
//! chrono's default serde impl trims trailing zero fractions; execution
//! records and events always carry all nine digits so lexical and
//! chronological order agree.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Format a timestamp as RFC3339 UTC with nanoseconds (`...T12:00:00.000000000Z`).
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(ts))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_keeps_all_nanos() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format(&ts), "2026-01-02T03:04:05.000000000Z");
    }

    #[test]
    fn test_deserialize_accepts_offsets() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            #[serde(with = "super")]
            at: DateTime<Utc>,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"at":"2026-01-02T05:04:05.5+02:00"}"#).unwrap();
        assert_eq!(format(&parsed.at), "2026-01-02T03:04:05.500000000Z");
    }
}
