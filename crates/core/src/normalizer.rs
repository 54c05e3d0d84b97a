//! Entity normalization: `_id` and `_updated` derivation.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::args::ServiceArgs;
use crate::entity::{Entity, stringify};

static TZ_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\+\d\d:\d\d$").unwrap()
});

/// Strip a trailing `+HH:MM` timezone offset.
#[must_use]
pub fn strip_tz_offset(value: &str) -> &str {
    TZ_OFFSET
        .find(value)
        .map_or(value, |offset| &value[..offset.start()])
}

/// Add `_id` and `_updated` to an upstream entity, then merge `extra`.
///
/// Without an explicit `updated_src`, `_updated` follows the request's
/// `date_modified` watermark, so it never decreases across the output.
pub fn sesamify(mut entity: Entity, service_args: &mut ServiceArgs, extra: Option<&Entity>) -> Entity {
    if let Some(id_src) = service_args.id_src.as_deref()
        && let Some(id) = entity.get(id_src)
    {
        let id = stringify(id);
        entity.insert("_id".to_string(), Value::String(id));
    }

    if let Some(updated_src) = service_args.updated_src.as_deref() {
        if let Some(updated) = entity.get(updated_src) {
            let updated = stringify(updated);
            entity.insert(
                "_updated".to_string(),
                Value::String(strip_tz_offset(&updated).to_string()),
            );
        }
    } else if let Some(modified) = entity
        .get("date_modified")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        // Only ISO-8601 strings take part in the watermark comparison.
        let updated = if service_args.latest_date_modified.as_str() > modified {
            strip_tz_offset(&service_args.latest_date_modified).to_string()
        } else {
            let updated = strip_tz_offset(modified).to_string();
            service_args.latest_date_modified.clone_from(&updated);
            updated
        };
        entity.insert("_updated".to_string(), Value::String(updated));
    }

    if let Some(extra) = extra {
        for (key, value) in extra {
            entity.insert(key.clone(), value.clone());
        }
    }

    entity
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entity(value: Value) -> Entity {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_strip_tz_offset() {
        assert_eq!(strip_tz_offset("2020-01-01T10:00:00+00:00"), "2020-01-01T10:00:00");
        assert_eq!(strip_tz_offset("2020-01-01T10:00:00"), "2020-01-01T10:00:00");
        assert_eq!(strip_tz_offset("2020-01-01T10:00:00-05:00"), "2020-01-01T10:00:00-05:00");
    }

    #[test]
    fn test_id_from_source_field() {
        let mut args = ServiceArgs {
            id_src: Some("id".to_string()),
            ..ServiceArgs::default()
        };
        let out = sesamify(entity(json!({"id": 42})), &mut args, None);
        assert_eq!(out["_id"], "42");

        let out = sesamify(entity(json!({"name": "x"})), &mut args, None);
        assert!(!out.contains_key("_id"));
    }

    #[test]
    fn test_explicit_updated_source() {
        let mut args = ServiceArgs {
            updated_src: Some("modified_at".to_string()),
            ..ServiceArgs::default()
        };
        let out = sesamify(
            entity(json!({"modified_at": "2021-05-01T08:00:00+00:00", "date_modified": "2030-01-01"})),
            &mut args,
            None,
        );
        assert_eq!(out["_updated"], "2021-05-01T08:00:00");
        assert_eq!(args.latest_date_modified, "");
    }

    #[test]
    fn test_watermark_is_monotonic() {
        let mut args = ServiceArgs::default();
        let updated = ["2020-01-01", "2020-03-01", "2020-02-01"]
            .into_iter()
            .map(|d| sesamify(entity(json!({"date_modified": d})), &mut args, None))
            .map(|e| e["_updated"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();

        assert_eq!(updated, vec!["2020-01-01", "2020-03-01", "2020-03-01"]);
        assert_eq!(args.latest_date_modified, "2020-03-01");
    }

    #[test]
    fn test_watermark_is_offset_stripped() {
        let mut args = ServiceArgs::default();
        let out = sesamify(
            entity(json!({"date_modified": "2020-01-01T00:00:00+00:00"})),
            &mut args,
            None,
        );
        assert_eq!(out["_updated"], "2020-01-01T00:00:00");
        assert_eq!(args.latest_date_modified, "2020-01-01T00:00:00");
    }

    #[test]
    fn test_non_string_date_modified_is_ignored() {
        let mut args = ServiceArgs::default();
        let out = [
            json!({"date_modified": "2020-01-01"}),
            json!({"date_modified": null}),
            json!({"date_modified": 20_210_101}),
            json!({"date_modified": "2021-06-01"}),
        ]
        .into_iter()
        .map(|e| sesamify(entity(e), &mut args, None))
        .collect::<Vec<_>>();

        assert_eq!(out[0]["_updated"], "2020-01-01");
        assert!(!out[1].contains_key("_updated"));
        assert!(!out[2].contains_key("_updated"));
        assert_eq!(out[3]["_updated"], "2021-06-01");
        assert_eq!(args.latest_date_modified, "2021-06-01");
    }

    #[test]
    fn test_no_timestamp_source_leaves_entity_alone() {
        let mut args = ServiceArgs::default();
        let out = sesamify(entity(json!({"id": "1", "date_modified": ""})), &mut args, None);
        assert!(!out.contains_key("_updated"));
    }

    #[test]
    fn test_extra_fields_overwrite() {
        let mut args = ServiceArgs::default();
        let extra = entity(json!({"survey_id": "9"}));
        let out = sesamify(
            entity(json!({"id": "c1", "survey_id": "stale"})),
            &mut args,
            Some(&extra),
        );
        assert_eq!(out["survey_id"], "9");
        assert_eq!(out["id"], "c1");
    }
}
