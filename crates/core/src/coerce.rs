//! Coercion of wire values into typed values, driven by the result schema.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::{QueryError, QueryResult};
use crate::schema::{FieldType, Schema};
use crate::value::{TypedRow, TypedValue};

/// Coerce one raw wire value to the named field type.
///
/// - `null` yields [`TypedValue::Null`] for every field type.
/// - A boolean raw value passes through for `BOOLEAN` fields; any other
///   non-textual raw value fails with [`QueryError::TypeMismatch`].
/// - The type name is case-insensitive; anything outside the five scalar
///   types fails with [`QueryError::UnsupportedType`].
/// - `BOOLEAN` is permissive: `"true"` in any case is `true`, every other
///   string is `false`.
/// - `TIMESTAMP` values are floating-point Unix epoch seconds.
pub fn coerce(field_type: &str, raw: &JsonValue) -> QueryResult<TypedValue> {
    let text = match raw {
        JsonValue::Null => return Ok(TypedValue::Null),
        JsonValue::String(s) => s.as_str(),
        JsonValue::Bool(b) if field_type.eq_ignore_ascii_case(FieldType::Boolean.as_str()) => {
            return Ok(TypedValue::Boolean(*b));
        }
        other => {
            return Err(QueryError::type_mismatch(format!(
                "value for {field_type} field must be textual, got {other}"
            )));
        }
    };

    coerce_text(field_type.parse()?, text)
}

/// Like [`coerce`], but with the field type as it arrived on the wire.
///
/// A `null` type yields `Null`; a non-textual type is a `TypeMismatch`.
pub fn coerce_wire(field_type: &JsonValue, raw: &JsonValue) -> QueryResult<TypedValue> {
    match field_type {
        JsonValue::Null => Ok(TypedValue::Null),
        JsonValue::String(t) => coerce(t, raw),
        other => Err(QueryError::type_mismatch(format!(
            "field type must be textual, got {other}"
        ))),
    }
}

/// Parse text already known to belong to a supported field type.
pub fn coerce_text(field_type: FieldType, text: &str) -> QueryResult<TypedValue> {
    let value = match field_type {
        FieldType::String => TypedValue::String(text.to_string()),
        FieldType::Integer => text
            .trim()
            .parse::<i64>()
            .map(TypedValue::Integer)
            .map_err(|e| QueryError::parse(field_type.as_str(), text, e))?,
        FieldType::Float => text
            .trim()
            .parse::<f64>()
            .map(TypedValue::Float)
            .map_err(|e| QueryError::parse(field_type.as_str(), text, e))?,
        FieldType::Boolean => TypedValue::Boolean(text.eq_ignore_ascii_case("true")),
        FieldType::Timestamp => TypedValue::Timestamp(parse_epoch_seconds(text)?),
    };
    Ok(value)
}

fn parse_epoch_seconds(text: &str) -> QueryResult<DateTime<Utc>> {
    let err = |reason: &str| QueryError::parse(FieldType::Timestamp.as_str(), text, reason);

    let seconds: f64 = text
        .trim()
        .parse()
        .map_err(|e: std::num::ParseFloatError| err(&e.to_string()))?;
    if !seconds.is_finite() {
        return Err(err("not a finite number"));
    }

    let micros = (seconds * 1_000_000.0).round();
    if micros.abs() >= i64::MAX as f64 {
        return Err(err("out of range"));
    }
    let micros = micros as i64;

    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).ok_or_else(|| err("out of range"))
}

/// Materialize one raw row against a schema.
///
/// Fields and values pair up positionally; when their lengths differ the
/// surplus on the longer side is ignored.
pub fn materialize_row(schema: &Schema, row: &[JsonValue]) -> QueryResult<TypedRow> {
    let mut typed = TypedRow::with_capacity(schema.len().min(row.len()));
    for (field, raw) in schema.iter().zip(row) {
        typed.insert(field.name.clone(), coerce(&field.field_type, raw)?);
    }
    Ok(typed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn text(s: &str) -> JsonValue {
        JsonValue::String(s.to_string())
    }

    #[test]
    fn scalar_fixtures() {
        assert_eq!(coerce("STRING", &text("hello")).unwrap(), TypedValue::from("hello"));
        assert_eq!(coerce("INTEGER", &text("1234")).unwrap(), TypedValue::Integer(1234));
        assert_eq!(coerce("FLOAT", &text("0.123")).unwrap(), TypedValue::Float(0.123));
        assert_eq!(coerce("BOOLEAN", &text("False")).unwrap(), TypedValue::Boolean(false));
    }

    #[test]
    fn field_type_is_case_insensitive() {
        assert_eq!(coerce("integer", &text("7")).unwrap(), TypedValue::Integer(7));
        assert_eq!(coerce("Float", &text("2.5")).unwrap(), TypedValue::Float(2.5));
    }

    #[test]
    fn null_is_null_for_every_type() {
        for t in FieldType::ALL {
            assert_eq!(coerce(t.as_str(), &JsonValue::Null).unwrap(), TypedValue::Null);
        }
        assert_eq!(coerce("RECORD", &JsonValue::Null).unwrap(), TypedValue::Null);
        assert_eq!(coerce_wire(&JsonValue::Null, &text("x")).unwrap(), TypedValue::Null);
    }

    #[test]
    fn unknown_types_are_unsupported() {
        assert!(matches!(
            coerce("FOO", &text("x")),
            Err(QueryError::UnsupportedType(t)) if t == "FOO"
        ));
        assert!(matches!(
            coerce("RECORD", &text("{}")),
            Err(QueryError::UnsupportedType(_))
        ));
    }

    #[test]
    fn non_textual_inputs_are_type_mismatches() {
        assert!(matches!(coerce("INTEGER", &json!(5)), Err(QueryError::TypeMismatch(_))));
        assert!(matches!(coerce("STRING", &json!(["a"])), Err(QueryError::TypeMismatch(_))));
        assert!(matches!(coerce("STRING", &json!(true)), Err(QueryError::TypeMismatch(_))));
        assert!(matches!(
            coerce_wire(&json!(3), &text("x")),
            Err(QueryError::TypeMismatch(_))
        ));
    }

    #[test]
    fn booleans_are_permissive() {
        assert_eq!(coerce("BOOLEAN", &text("True")).unwrap(), TypedValue::Boolean(true));
        assert_eq!(coerce("BOOLEAN", &text("true")).unwrap(), TypedValue::Boolean(true));
        assert_eq!(coerce("BOOLEAN", &text("TRUE")).unwrap(), TypedValue::Boolean(true));
        assert_eq!(coerce("BOOLEAN", &text("yes")).unwrap(), TypedValue::Boolean(false));
        assert_eq!(coerce("BOOLEAN", &text("")).unwrap(), TypedValue::Boolean(false));
        assert_eq!(coerce("boolean", &json!(true)).unwrap(), TypedValue::Boolean(true));
    }

    #[test]
    fn malformed_numbers_fail_to_parse() {
        assert!(matches!(coerce("INTEGER", &text("12a")), Err(QueryError::Parse { .. })));
        assert!(matches!(coerce("INTEGER", &text("1.5")), Err(QueryError::Parse { .. })));
        assert!(matches!(coerce("FLOAT", &text("abc")), Err(QueryError::Parse { .. })));
        assert!(matches!(coerce("TIMESTAMP", &text("yesterday")), Err(QueryError::Parse { .. })));
        assert!(matches!(coerce("TIMESTAMP", &text("inf")), Err(QueryError::Parse { .. })));
        assert!(matches!(coerce("TIMESTAMP", &text("1e300")), Err(QueryError::Parse { .. })));
    }

    #[test]
    fn timestamps_are_epoch_seconds_in_utc() {
        let expected = Utc.with_ymd_and_hms(2012, 6, 21, 0, 0, 0).unwrap();
        assert_eq!(
            coerce("TIMESTAMP", &text("1340236800")).unwrap(),
            TypedValue::Timestamp(expected)
        );

        let fractional = coerce("TIMESTAMP", &text("1.5E9")).unwrap();
        assert_eq!(fractional.as_timestamp().unwrap().timestamp(), 1_500_000_000);

        let with_micros = coerce("TIMESTAMP", &text("0.000250")).unwrap();
        assert_eq!(with_micros.as_timestamp().unwrap().timestamp_subsec_micros(), 250);

        let before_epoch = coerce("TIMESTAMP", &text("-1.5")).unwrap();
        assert_eq!(before_epoch.as_timestamp().unwrap().timestamp_millis(), -1_500);
    }

    #[test]
    fn materialize_pairs_fields_positionally() {
        let schema = Schema::new(vec![Field::new("date", "STRING"), Field::new("charge", "FLOAT")]);

        let row = materialize_row(&schema, &[text("2012-06-21"), text("1.0")]).unwrap();
        assert_eq!(row.get("date"), Some(&TypedValue::from("2012-06-21")));
        assert_eq!(row.get("charge"), Some(&TypedValue::Float(1.0)));

        let short = materialize_row(&schema, &[text("2012-06-23")]).unwrap();
        assert_eq!(short.len(), 1);

        let long = materialize_row(&schema, &[text("a"), text("2"), text("extra")]).unwrap();
        assert_eq!(long.len(), 2);
    }

    #[test]
    fn materialize_fails_on_first_bad_field() {
        let schema = Schema::new(vec![Field::new("n", "INTEGER"), Field::new("nested", "RECORD")]);
        assert!(matches!(
            materialize_row(&schema, &[text("1"), text("{}")]),
            Err(QueryError::UnsupportedType(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: integers survive a trip through their wire text.
        #[test]
        fn integer_text_round_trips(n in any::<i64>()) {
            prop_assert_eq!(coerce("INTEGER", &text(&n.to_string())).unwrap(), TypedValue::Integer(n));
        }

        /// Property: finite floats survive a trip through their wire text.
        #[test]
        fn float_text_round_trips(x in prop::num::f64::NORMAL | prop::num::f64::ZERO) {
            prop_assert_eq!(coerce("FLOAT", &text(&x.to_string())).unwrap(), TypedValue::Float(x));
        }

        /// Property: any string other than a spelling of "true" is false, never an error.
        #[test]
        fn boolean_never_fails(s in ".*") {
            let expected = s.eq_ignore_ascii_case("true");
            prop_assert_eq!(coerce("BOOLEAN", &text(&s)).unwrap(), TypedValue::Boolean(expected));
        }

        /// Property: strings pass through untouched.
        #[test]
        fn strings_are_identity(s in ".*") {
            prop_assert_eq!(coerce("STRING", &text(&s)).unwrap(), TypedValue::String(s.clone()));
        }

        /// Property: whole epoch seconds map to the same instant.
        #[test]
        fn whole_second_timestamps(secs in -9_000_000_000i64..9_000_000_000i64) {
            let value = coerce("TIMESTAMP", &text(&secs.to_string())).unwrap();
            prop_assert_eq!(value.as_timestamp().unwrap().timestamp(), secs);
        }
    }
}
