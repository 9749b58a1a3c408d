//! Structured output validation.
//!
//! [`validate`] is pure: it parses a raw candidate, checks it field by field
//! against a [`Schema`], applies a small set of lossless coercions, and either
//! returns a [`ValidatedRecord`] or the first [`ValidationFailure`] found.
//!
//! Accepted coercions:
//! - extra fields are ignored
//! - numeric strings (`"0.8"`) become numbers
//! - `"true"` / `"false"` strings become booleans
//! - enum values match case-insensitively, with `-`, `_` and spaces treated alike
//! - ordinal enums accept a 1-based rank (`4` for the fourth variant)
//! - a single string where a list is expected becomes a list, split on commas
//! - text around a JSON object (code fences, prose) is stripped
//!
//! A required field that is absent or `null` is never defaulted.

use std::collections::BTreeMap;

use serde_json::Value;
use triage_llm::RawOutput;
use triage_types::{ValidationFailure, ValidationKind};

use crate::schema::{FieldKind, FieldSpec, Schema, TypedValue, ValidatedRecord};

/// Validate a raw candidate against `schema`.
pub fn validate(raw: &RawOutput, schema: &Schema) -> Result<ValidatedRecord, ValidationFailure> {
    let raw_text = raw.to_raw_string();
    let value = match raw {
        RawOutput::Text(text) => parse_text(text, &raw_text)?,
        RawOutput::Structured(value) => value.clone(),
    };

    let object = match value {
        Value::Object(object) => object,
        other => {
            return Err(ValidationFailure::new(
                ValidationKind::SchemaMismatch,
                None,
                format!(
                    "expected a JSON object for {}, got {}",
                    schema.name,
                    type_name(&other)
                ),
                raw_text,
            ))
        }
    };

    let mut values = BTreeMap::new();
    for spec in &schema.fields {
        let found = spec
            .names()
            .find_map(|name| object.get(name).filter(|v| !v.is_null()));
        match found {
            Some(v) => {
                let typed = coerce(spec, v).map_err(|(kind, message)| {
                    ValidationFailure::new(kind, Some(spec.name), message, raw_text.clone())
                })?;
                values.insert(spec.name, typed);
            }
            None if spec.required => {
                return Err(ValidationFailure::missing_field(spec.name, raw_text));
            }
            None => {}
        }
    }

    Ok(ValidatedRecord::new(values, raw_text))
}

// ---------------------------------------------------------------------------
// Text extraction
// ---------------------------------------------------------------------------

fn parse_text(text: &str, raw_text: &str) -> Result<Value, ValidationFailure> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let span = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(ValidationFailure::new(
                ValidationKind::Unparsable,
                None,
                "no JSON object found in text output",
                raw_text,
            ))
        }
    };

    serde_json::from_str(span).map_err(|e| {
        ValidationFailure::new(
            ValidationKind::Unparsable,
            None,
            format!("invalid JSON: {e}"),
            raw_text,
        )
    })
}

// ---------------------------------------------------------------------------
// Per-field coercion
// ---------------------------------------------------------------------------

type CoerceError = (ValidationKind, String);

fn coerce(spec: &FieldSpec, value: &Value) -> Result<TypedValue, CoerceError> {
    match &spec.kind {
        FieldKind::Text { non_empty } => {
            let Value::String(s) = value else {
                return Err(mismatch("a string", value));
            };
            if *non_empty && s.trim().is_empty() {
                return Err((ValidationKind::OutOfRange, "must not be empty".into()));
            }
            Ok(TypedValue::Text(s.clone()))
        }
        FieldKind::Number { min, max } => {
            let n = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|n| n.is_finite())
            .ok_or_else(|| mismatch("a number", value))?;
            if n < *min || n > *max {
                return Err((
                    ValidationKind::OutOfRange,
                    format!("{n} is outside [{min}, {max}]"),
                ));
            }
            Ok(TypedValue::Number(n))
        }
        FieldKind::Bool => match value {
            Value::Bool(b) => Ok(TypedValue::Bool(*b)),
            Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(TypedValue::Bool(true)),
            Value::String(s) if s.trim().eq_ignore_ascii_case("false") => {
                Ok(TypedValue::Bool(false))
            }
            _ => Err(mismatch("a boolean", value)),
        },
        FieldKind::List => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.trim().to_string()),
                    other => Err(mismatch("a list of strings", other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(TypedValue::List),
            Value::String(s) => Ok(TypedValue::List(
                s.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(String::from)
                    .collect(),
            )),
            _ => Err(mismatch("a list of strings", value)),
        },
        FieldKind::Enum { variants, ordinal } => coerce_enum(*variants, *ordinal, value),
    }
}

fn coerce_enum(
    variants: &'static [&'static str],
    ordinal: bool,
    value: &Value,
) -> Result<TypedValue, CoerceError> {
    match value {
        Value::String(s) => {
            let wanted = normalize(s);
            if let Some(v) = variants.iter().find(|v| normalize(v) == wanted) {
                return Ok(TypedValue::Enum(*v));
            }
            if ordinal {
                if let Ok(rank) = s.trim().parse::<i64>() {
                    return rank_to_variant(variants, rank);
                }
            }
            Err((
                ValidationKind::SchemaMismatch,
                format!("'{s}' is not one of {}", variants.join(", ")),
            ))
        }
        Value::Number(n) if ordinal => {
            let rank = n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            });
            match rank {
                Some(rank) => rank_to_variant(variants, rank),
                None => Err(mismatch("an integer rank", value)),
            }
        }
        _ => Err(mismatch("one of the allowed values", value)),
    }
}

fn rank_to_variant(variants: &'static [&'static str], rank: i64) -> Result<TypedValue, CoerceError> {
    usize::try_from(rank)
        .ok()
        .and_then(|r| r.checked_sub(1))
        .and_then(|i| variants.get(i))
        .map(|v| TypedValue::Enum(*v))
        .ok_or_else(|| {
            (
                ValidationKind::OutOfRange,
                format!("rank {rank} is outside 1..={}", variants.len()),
            )
        })
}

fn normalize(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '_' | ' ' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

fn mismatch(expected: &str, got: &Value) -> CoerceError {
    (
        ValidationKind::SchemaMismatch,
        format!("expected {expected}, got {}", type_name(got)),
    )
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LEVELS: &[&str] = &["low", "medium", "high", "urgent"];
    const ACTIONS: &[&str] = &["resolve", "escalate", "request-info"];

    fn schema() -> Schema {
        Schema::new(
            "test",
            vec![
                FieldSpec::required(
                    "priority",
                    FieldKind::Enum {
                        variants: LEVELS,
                        ordinal: true,
                    },
                ),
                FieldSpec::required("confidence", FieldKind::Number { min: 0.0, max: 1.0 }),
                FieldSpec::optional(
                    "action",
                    FieldKind::Enum {
                        variants: ACTIONS,
                        ordinal: false,
                    },
                ),
                FieldSpec::optional("tags", FieldKind::List).with_aliases(&["required_expertise"]),
                FieldSpec::optional("flag", FieldKind::Bool),
                FieldSpec::optional("body", FieldKind::Text { non_empty: true }),
            ],
        )
    }

    fn check(value: Value) -> Result<ValidatedRecord, ValidationFailure> {
        validate(&RawOutput::Structured(value), &schema())
    }

    #[test]
    fn extra_fields_are_ignored() {
        let record = check(json!({"priority": "high", "confidence": 0.9, "mood": "calm"})).unwrap();
        assert_eq!(record.variant("priority"), Some("high"));
        assert!(!record.contains("mood"));
    }

    #[test]
    fn missing_required_field_is_never_defaulted() {
        let err = check(json!({"priority": "high"})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::MissingField);
        assert_eq!(err.field.as_deref(), Some("confidence"));
    }

    #[test]
    fn null_required_field_is_missing() {
        let err = check(json!({"priority": null, "confidence": 0.5})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::MissingField);
        assert_eq!(err.field.as_deref(), Some("priority"));
    }

    #[test]
    fn numeric_and_boolean_strings_are_coerced() {
        let record =
            check(json!({"priority": "low", "confidence": "0.8", "flag": "TRUE"})).unwrap();
        assert_eq!(record.number("confidence"), Some(0.8));
        assert_eq!(record.boolean("flag"), Some(true));
    }

    #[test]
    fn non_numeric_string_is_schema_mismatch() {
        let err = check(json!({"priority": "low", "confidence": "very"})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::SchemaMismatch);

        let err = check(json!({"priority": "low", "confidence": "NaN"})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::SchemaMismatch);
    }

    #[test]
    fn number_outside_range_is_out_of_range() {
        let err = check(json!({"priority": "low", "confidence": 1.5})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::OutOfRange);
        assert_eq!(err.field.as_deref(), Some("confidence"));
    }

    #[test]
    fn enum_matching_is_normalised() {
        let record = check(json!({
            "priority": " URGENT ",
            "confidence": 1,
            "action": "Request_Info"
        }))
        .unwrap();
        assert_eq!(record.variant("priority"), Some("urgent"));
        assert_eq!(record.variant("action"), Some("request-info"));
    }

    #[test]
    fn ordinal_enum_accepts_rank() {
        let record = check(json!({"priority": 4, "confidence": 0.5})).unwrap();
        assert_eq!(record.variant("priority"), Some("urgent"));

        let record = check(json!({"priority": "2", "confidence": 0.5})).unwrap();
        assert_eq!(record.variant("priority"), Some("medium"));

        let err = check(json!({"priority": 5, "confidence": 0.5})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::OutOfRange);
    }

    #[test]
    fn whole_number_float_rank_is_accepted() {
        let record = check(json!({"priority": 3.0, "confidence": 0.5})).unwrap();
        assert_eq!(record.variant("priority"), Some("high"));

        let err = check(json!({"priority": 2.5, "confidence": 0.5})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::SchemaMismatch);

        let err = check(json!({"priority": 9.0, "confidence": 0.5})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::OutOfRange);
    }

    #[test]
    fn null_field_falls_through_to_alias() {
        let record = check(json!({
            "priority": "low",
            "confidence": 0.5,
            "tags": null,
            "required_expertise": ["billing"]
        }))
        .unwrap();
        assert_eq!(record.list("tags"), Some(&["billing".to_string()][..]));

        let record = validate(
            &RawOutput::Structured(json!({
                "body": null,
                "response": "Hello there",
                "next_action": "resolve"
            })),
            &crate::stages::response_schema(),
        )
        .unwrap();
        assert_eq!(record.text("body"), Some("Hello there"));
    }

    #[test]
    fn rank_is_rejected_for_plain_enum() {
        let err = check(json!({"priority": "low", "confidence": 0.5, "action": 1})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::SchemaMismatch);
        assert_eq!(err.field.as_deref(), Some("action"));
    }

    #[test]
    fn unknown_enum_member_is_schema_mismatch() {
        let err = check(json!({"priority": "critical", "confidence": 0.5})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::SchemaMismatch);
    }

    #[test]
    fn single_string_becomes_list_via_alias() {
        let record = check(json!({
            "priority": "low",
            "confidence": 0.5,
            "required_expertise": "billing, finance"
        }))
        .unwrap();
        assert_eq!(
            record.list("tags"),
            Some(&["billing".to_string(), "finance".to_string()][..])
        );
    }

    #[test]
    fn list_with_non_string_items_is_rejected() {
        let err = check(json!({"priority": "low", "confidence": 0.5, "tags": ["a", {}]}))
            .unwrap_err();
        assert_eq!(err.kind, ValidationKind::SchemaMismatch);
    }

    #[test]
    fn blank_required_text_is_out_of_range() {
        let err = check(json!({"priority": "low", "confidence": 0.5, "body": "  "})).unwrap_err();
        assert_eq!(err.kind, ValidationKind::OutOfRange);
    }

    #[test]
    fn fenced_text_is_extracted() {
        let raw = RawOutput::text(
            "Here is the analysis:\n```json\n{\"priority\": \"high\", \"confidence\": 0.7}\n```",
        );
        let record = validate(&raw, &schema()).unwrap();
        assert_eq!(record.variant("priority"), Some("high"));
        assert!(record.raw().starts_with("Here is"));
    }

    #[test]
    fn prose_without_json_is_unparsable() {
        let err = validate(&RawOutput::text("I could not decide."), &schema()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::Unparsable);
        assert_eq!(err.raw, "I could not decide.");
    }

    #[test]
    fn broken_json_is_unparsable() {
        let err = validate(&RawOutput::text("{\"priority\": \"high\","), &schema()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::Unparsable);
    }

    #[test]
    fn non_object_json_is_schema_mismatch() {
        let err = validate(&RawOutput::text("[1, 2, 3]"), &schema()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::SchemaMismatch);
        let err = check(json!("high")).unwrap_err();
        assert_eq!(err.kind, ValidationKind::SchemaMismatch);
    }
}
