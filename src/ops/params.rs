use std::fmt::Display;
use std::ops::RangeInclusive;

use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Deserialize an untyped request body, naming the field behind any failure.
///
/// `null` reads as absent, so defaults apply to it.
pub fn decode<T: DeserializeOwned>(raw: &Map<String, Value>) -> Result<T, ValidationError> {
    let present: Map<String, Value> = raw
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let err = match serde_json::from_value::<T>(Value::Object(present.clone())) {
        Ok(decoded) => return Ok(decoded),
        Err(err) => err.to_string(),
    };

    if let Some(field) = missing_field(&err) {
        return Err(ValidationError::new(field, "field is required"));
    }

    // Derived visitors fail on the first bad entry and only report missing
    // fields once the map is exhausted, so a lone entry that fails for any
    // other reason is the culprit.
    let field = present
        .iter()
        .find(|(key, value)| {
            let single = Map::from_iter([((*key).clone(), (*value).clone())]);
            match serde_json::from_value::<T>(Value::Object(single)) {
                Ok(_) => false,
                Err(err) => missing_field(&err.to_string()).is_none(),
            }
        })
        .map(|(key, _)| key.as_str())
        .unwrap_or("params");
    Err(ValidationError::new(field, err))
}

fn missing_field(message: &str) -> Option<&str> {
    message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split('`').next())
}

/// `deserialize_with` for optional free text; blank strings read as `None`.
pub fn non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

pub fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "field is required"));
    }
    Ok(())
}

pub fn require_url(field: &str, value: &str) -> Result<(), ValidationError> {
    require_text(field, value)?;
    let scheme_ok = ["http://", "https://", "s3://", "data:"]
        .iter()
        .any(|scheme| value.starts_with(scheme));
    if !scheme_ok {
        return Err(ValidationError::new(
            field,
            format!("expected an http(s), s3 or data URL, got `{value}`"),
        ));
    }
    Ok(())
}

pub fn within<T>(field: &str, value: T, range: RangeInclusive<T>) -> Result<(), ValidationError>
where
    T: PartialOrd + Display,
{
    if !range.contains(&value) {
        return Err(ValidationError::new(
            field,
            format!(
                "must be within [{}, {}], got {value}",
                range.start(),
                range.end()
            ),
        ));
    }
    Ok(())
}

pub fn point_within(
    field: &str,
    [x, y]: [f64; 2],
    range: RangeInclusive<f64>,
) -> Result<(), ValidationError> {
    within(field, x, range.clone())?;
    within(field, y, range)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        source_url: String,
        #[serde(default = "default_fps")]
        fps: u32,
        #[serde(default)]
        preserve_bokeh: bool,
        #[serde(default, deserialize_with = "non_blank")]
        prompt: Option<String>,
    }

    fn default_fps() -> u32 {
        24
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn null_reads_as_absent() {
        let sample: Sample = decode(&map(json!({
            "sourceUrl": "https://x.test/a.png",
            "fps": null,
            "prompt": "   ",
        })))
        .unwrap();
        assert_eq!(sample.fps, 24);
        assert!(!sample.preserve_bokeh);
        assert_eq!(sample.prompt, None);
    }

    #[test]
    fn missing_field_is_named() {
        let err = decode::<Sample>(&map(json!({"fps": 30}))).unwrap_err();
        assert_eq!(err.field, "sourceUrl");
        assert_eq!(err.reason, "field is required");
    }

    #[test]
    fn wrong_type_is_attributed_to_its_field() {
        let err = decode::<Sample>(&map(json!({
            "sourceUrl": "https://x.test/a.png",
            "fps": "fast",
        })))
        .unwrap_err();
        assert_eq!(err.field, "fps");
        assert!(err.reason.contains("invalid type"), "{}", err.reason);

        let err = decode::<Sample>(&map(json!({"preserveBokeh": 1}))).unwrap_err();
        assert_eq!(err.field, "preserveBokeh");
    }

    #[test]
    fn range_violation_names_field() {
        let err = within("strength", 5.0, 0.1..=1.0).unwrap_err();
        assert_eq!(err.field, "strength");
        assert_eq!(err.reason, "must be within [0.1, 1], got 5");
        assert!(within("fps", 24u32, 1..=120).is_ok());
    }

    #[test]
    fn urls_need_a_known_scheme() {
        assert!(require_url("a", "https://x.test/i.png").is_ok());
        assert_eq!(require_url("b", "ftp://x").unwrap_err().field, "b");
        assert_eq!(require_url("c", " ").unwrap_err().reason, "field is required");
    }

    #[test]
    fn points_need_both_coordinates_in_range() {
        assert!(point_within("ok", [0.2, 0.8], 0.0..=1.0).is_ok());
        assert_eq!(
            point_within("far", [0.5, 1.5], 0.0..=1.0).unwrap_err().field,
            "far"
        );
    }
}
