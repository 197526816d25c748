//! Payload validator
//!
//! Pure function from raw bytes to a [`Validated`] payload or the first
//! [`RejectReason`] hit, checked in this order: JSON, object, `ts` present,
//! `value` present, `ts` type, `ts` format.

use serde_json::Value;

use super::{coerce, utils, CleanedPayload, Coerced, Validated};
use crate::errors::RejectReason;

/// Validate and clean one raw payload
pub fn validate(raw: &[u8]) -> Result<Validated, RejectReason> {
    validate_text(&utils::decode_utf8_ignoring_invalid(raw))
}

/// [`validate`] for a payload that is already decoded
pub fn validate_text(text: &str) -> Result<Validated, RejectReason> {
    let data: Value =
        serde_json::from_str(text).map_err(|e| RejectReason::InvalidJson(e.to_string()))?;

    let Value::Object(mut fields) = data else {
        return Err(RejectReason::NotAnObject);
    };

    let ts = fields.remove("ts").ok_or(RejectReason::MissingField("ts"))?;
    let value = fields
        .remove("value")
        .ok_or(RejectReason::MissingField("value"))?;

    let ts = match ts {
        Value::String(ts) => ts,
        other => return Err(RejectReason::InvalidTimestampType(json_type_name(&other))),
    };

    if !utils::is_iso8601_timestamp(&ts) {
        return Err(RejectReason::InvalidTimestampFormat(ts));
    }

    let Coerced { value, modified } = coerce(&value);

    Ok(Validated {
        payload: CleanedPayload { ts, value },
        modified,
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::Reading;

    const TS: &str = "2024-01-01T00:00:00";

    #[test]
    fn clean_payload_is_accepted_unmodified() {
        let validated = validate(br#"{"ts":"2024-01-01T00:00:00","value":23.5}"#).unwrap();
        assert_eq!(validated.payload.ts, TS);
        assert_eq!(validated.payload.value, Reading::from_f64(23.5));
        assert!(!validated.modified);
    }

    #[test]
    fn string_value_is_coerced() {
        let validated = validate(br#"{"ts":"2024-01-01T00:00:00","value":"23.5"}"#).unwrap();
        assert_eq!(validated.payload.value, Reading::from_f64(23.5));
        assert!(validated.modified);
    }

    #[test]
    fn extra_keys_are_dropped_from_output() {
        let validated =
            validate(br#"{"value":1,"sensor":"a","ts":"2024-01-01T00:00:00"}"#).unwrap();
        assert_eq!(
            validated.payload.canonical_json(),
            r#"{"ts":"2024-01-01T00:00:00","value":1}"#
        );
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(
            validate(b"{not json"),
            Err(RejectReason::InvalidJson(_))
        ));
        assert!(matches!(validate(b""), Err(RejectReason::InvalidJson(_))));
        assert!(matches!(
            validate(br#"{"ts":"2024-01-01T00:00:00","value":1} {}"#),
            Err(RejectReason::InvalidJson(_))
        ));
    }

    #[test]
    fn non_objects_are_rejected() {
        let cases: [&[u8]; 4] = [b"[1,2]", b"42", b"\"text\"", b"null"];
        for raw in cases {
            assert_eq!(validate(raw), Err(RejectReason::NotAnObject));
        }
    }

    #[test]
    fn missing_fields_are_named() {
        assert_eq!(
            validate(br#"{"value":1}"#),
            Err(RejectReason::MissingField("ts"))
        );
        assert_eq!(
            validate(br#"{"ts":"2024-01-01T00:00:00"}"#),
            Err(RejectReason::MissingField("value"))
        );
        // ts is checked first
        assert_eq!(validate(b"{}"), Err(RejectReason::MissingField("ts")));
    }

    #[test]
    fn timestamp_must_be_a_string() {
        assert_eq!(
            validate(br#"{"ts":1704067200,"value":1}"#),
            Err(RejectReason::InvalidTimestampType("number"))
        );
        assert_eq!(
            validate(br#"{"ts":null,"value":1}"#),
            Err(RejectReason::InvalidTimestampType("null"))
        );
    }

    #[test]
    fn timestamp_must_match_grammar() {
        assert_eq!(
            validate(br#"{"ts":"01/01/2024","value":1}"#),
            Err(RejectReason::InvalidTimestampFormat("01/01/2024".into()))
        );
    }

    #[test]
    fn zone_is_preserved_verbatim() {
        let validated = validate(br#"{"ts":"2024-01-01T08:00:00+08:00","value":null}"#).unwrap();
        assert_eq!(validated.payload.ts, "2024-01-01T08:00:00+08:00");
        assert!(validated.payload.value.is_absent());
        assert!(!validated.modified);
    }

    #[test]
    fn undecodable_bytes_are_skipped() {
        let raw = b"{\"ts\":\"2024-01-01T00:00:00\",\xff\"value\":5}";
        let validated = validate(raw).unwrap();
        assert_eq!(validated.payload.value, Reading::from(5));
    }

    #[test]
    fn revalidating_clean_output_is_stable() {
        let first = validate(br#"{"ts":"2024-01-01T00:00:00","value":"  17 "}"#).unwrap();
        assert!(first.modified);

        let second = validate(first.payload.canonical_json().as_bytes()).unwrap();
        assert_eq!(second.payload, first.payload);
        assert!(!second.modified);
    }
}
