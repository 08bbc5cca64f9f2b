//! Fixed second-precision UTC timestamp format for persisted job records.
//!
//! External tooling reads job records directly, so every timestamp is written
//! as `YYYY-MM-DDThh:mm:ssZ` and nothing else.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

use crate::error::{StateError, StateResult};

/// `strftime` pattern of every persisted timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current time truncated to whole seconds.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse(raw: &str) -> StateResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StateError::invalid_timestamp(format!("{raw:?}: {e}")))
}

/// `#[serde(with = "timestamp::serde_format")]` for `DateTime<Utc>` fields.
pub mod serde_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "timestamp::serde_format_opt")]` for `Option<DateTime<Utc>>` fields.
pub mod serde_format_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ts {
            Some(ts) => serializer.serialize_some(&super::format(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|raw| super::parse(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_trailing_z() {
        let ts = Utc.with_ymd_and_hms(2015, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(format(&ts), "2015-03-09T14:05:07Z");
        assert_eq!(parse("2015-03-09T14:05:07Z").unwrap(), ts);
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(parse("2015-03-09 14:05:07").is_err());
        assert!(parse("2015-03-09T14:05:07.123Z").is_err());
        assert!(parse("2015-03-09T14:05:07+00:00").is_err());
    }

    #[test]
    fn now_has_no_subsecond_part() {
        assert_eq!(now().timestamp_subsec_nanos(), 0);
    }
}
