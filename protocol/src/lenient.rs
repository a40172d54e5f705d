//! Field deserializers for engine output the bridge does not control.
//!
//! A field that is present but malformed decodes as absent instead of
//! rejecting the whole record.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Deserializer;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub(crate) fn optional<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.and_then(|value| serde_json::from_value(value).ok()))
}

/// RFC 3339 first; a timestamp without an offset is taken as UTC.
pub(crate) fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(JsonValue::as_str).and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Keeps every category that is a list, and only the string entries in it.
pub(crate) fn artifacts<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<PathBuf>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    let Some(JsonValue::Object(categories)) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(categories
        .into_iter()
        .filter_map(|(category, files)| match files {
            JsonValue::Array(files) => Some((
                category,
                files
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(PathBuf::from)
                    .collect(),
            )),
            _ => None,
        })
        .collect())
}
