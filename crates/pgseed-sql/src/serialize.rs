//! Row values to SQL literals.
//!
//! The declared column type picks the rendering rule; the runtime value only
//! supplies the payload. Every literal produced here must read back as the
//! same value when inserted into a column of that declared type.

use std::fmt::Write;

use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::{TypeKind, Value, dollar_quote, quote_literal};

/// Render one value as a SQL literal for a column of type `declared`.
///
/// ```
/// use pgseed_sql::{Value, serialize};
/// assert_eq!(serialize(&Value::Null, "text"), "NULL");
/// assert_eq!(serialize(&Value::Int(42), "integer"), "42");
/// assert_eq!(serialize(&Value::from("it's"), "text"), "'it''s'");
/// ```
pub fn serialize(value: &Value, declared: &str) -> String {
    serialize_kind(value, TypeKind::of(declared))
}

/// Render a row, pairing values with declared types by position.
///
/// Values past the end of `types` are rendered as [`TypeKind::Opaque`].
pub fn serialize_row<S: AsRef<str>>(values: &[Value], types: &[S]) -> Vec<String> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| match types.get(i) {
            Some(t) => serialize(v, t.as_ref()),
            None => serialize_kind(v, TypeKind::Opaque),
        })
        .collect()
}

/// Render one value for an already-resolved kind.
pub fn serialize_kind(value: &Value, kind: TypeKind) -> String {
    if value.is_null() {
        return "NULL".to_string();
    }

    match kind {
        k if k.is_unquoted() => unquoted(value),
        TypeKind::Binary => match value {
            Value::Bytes(bytes) => hex_literal(bytes),
            other => quote_literal(&other.to_text()),
        },
        k if k.is_temporal() => match temporal_text(value) {
            Some(text) => format!("'{text}'"),
            None => quote_literal(&value.to_text()),
        },
        TypeKind::Array => dollar_quote(&value.to_text()),
        _ => quote_literal(&value.to_text()),
    }
}

/// Numbers and booleans go out bare, except spellings that are not valid
/// bare literals (`NaN`, `Infinity`, or arbitrary text under a numeric type).
fn unquoted(value: &Value) -> String {
    match value {
        Value::Bool(_) | Value::Int(_) | Value::Decimal(_) => value.to_text(),
        Value::Float(f) if f.is_finite() => value.to_text(),
        Value::Text(t) if is_bare_literal(t) => t.clone(),
        other => quote_literal(&other.to_text()),
    }
}

fn is_bare_literal(text: &str) -> bool {
    match text {
        "true" | "false" => true,
        t => t.parse::<f64>().is_ok_and(f64::is_finite) && !t.contains(['e', 'E', 'i', 'I', 'n', 'N']),
    }
}

fn hex_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 4);
    out.push_str("'\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out.push('\'');
    out
}

/// ISO text for typed temporal values; `None` for anything else, which then
/// falls back to quoting its raw text (e.g. `infinity`).
fn temporal_text(value: &Value) -> Option<String> {
    Some(match value {
        Value::Timestamp(ts) => timestamp_text(ts),
        Value::TimestampTz(ts) => {
            let mut s = timestamp_text(&ts.naive_local());
            s.push_str(&offset_text(ts.offset()));
            s
        }
        Value::Date(d) => date_text(d),
        Value::Time(t) => time_text(t),
        Value::TimeTz(t, off) => {
            let mut s = time_text(t);
            s.push_str(&offset_text(off));
            s
        }
        _ => return None,
    })
}

fn timestamp_text(ts: &NaiveDateTime) -> String {
    format!("{} {}", date_text(&ts.date()), time_text(&ts.time()))
}

fn date_text(d: &NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day())
}

fn time_text(t: &NaiveTime) -> String {
    let mut s = format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second());
    // leap seconds are encoded as nanos >= 1e9
    let nanos = t.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        let frac = format!("{nanos:09}");
        s.push('.');
        s.push_str(frac.trim_end_matches('0'));
    }
    s
}

fn offset_text(off: &FixedOffset) -> String {
    let secs = off.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let secs = secs.unsigned_abs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if s == 0 {
        format!("{sign}{h:02}:{m:02}")
    } else {
        format!("{sign}{h:02}:{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};
    use rust_decimal::Decimal;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, micro: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_micro_opt(h, mi, s, micro)
            .unwrap()
    }

    // ==================== NULL and bare literals ====================

    #[test]
    fn test_null_under_any_type() {
        for ty in ["text", "integer", "bytea", "timestamp", "int4[]", "mood"] {
            assert_eq!(serialize(&Value::Null, ty), "NULL");
        }
    }

    #[test]
    fn test_numbers_and_booleans_are_bare() {
        assert_eq!(serialize(&Value::Bool(true), "boolean"), "true");
        assert_eq!(serialize(&Value::Int(-7), "bigint"), "-7");
        assert_eq!(serialize(&Value::Float(1.5), "double precision"), "1.5");
        assert_eq!(
            serialize(&Value::Decimal(Decimal::new(1250, 2)), "numeric(10,2)"),
            "12.50"
        );
        assert_eq!(serialize(&Value::from("12.50"), "numeric"), "12.50");
    }

    #[test]
    fn test_non_finite_floats_are_quoted() {
        assert_eq!(serialize(&Value::Float(f64::NAN), "real"), "'NaN'");
        assert_eq!(serialize(&Value::Float(f64::INFINITY), "float8"), "'Infinity'");
        assert_eq!(
            serialize(&Value::Float(f64::NEG_INFINITY), "float8"),
            "'-Infinity'"
        );
        assert_eq!(serialize(&Value::from("NaN"), "numeric"), "'NaN'");
        assert_eq!(serialize(&Value::from("Infinity"), "numeric"), "'Infinity'");
    }

    // ==================== Text ====================

    #[test]
    fn test_text_with_quote_and_backslash() {
        let v = Value::from(r"O'Brien\Co");
        assert_eq!(serialize(&v, "text"), r"E'O''Brien\\Co'");
    }

    #[test]
    fn test_opaque_types_quote_raw_text() {
        assert_eq!(serialize(&Value::from("happy"), "public.mood"), "'happy'");
        assert_eq!(
            serialize(&Value::from(r#"{"a": 1}"#), "jsonb"),
            r#"'{"a": 1}'"#
        );
        assert_eq!(
            serialize(&Value::from("1 day 02:00:00"), "interval"),
            "'1 day 02:00:00'"
        );
    }

    // ==================== Binary ====================

    #[test]
    fn test_bytea_is_lowercase_hex() {
        let v = Value::Bytes(vec![0xde, 0xad, 0xBE, 0xef, 0x00]);
        assert_eq!(serialize(&v, "bytea"), r"'\xdeadbeef00'");
        assert_eq!(serialize(&Value::Bytes(vec![]), "bytea"), r"'\x'");
    }

    // ==================== Arrays ====================

    #[test]
    fn test_array_with_embedded_quotes_is_dollar_quoted() {
        let payload = r#"{"say \"hi\"","plain"}"#;
        let out = serialize(&Value::from(payload), "text[]");
        assert_eq!(out, format!("$q${payload}$q$"));
    }

    #[test]
    fn test_array_tag_avoids_payload_sequences() {
        let payload = r#"{"$q$","$qq$"}"#;
        let out = serialize(&Value::from(payload), "character varying(10)[]");
        assert_eq!(out, format!("$qqq${payload}$qqq$"));
    }

    #[test]
    fn test_array_bytes_payload() {
        let out = serialize(&Value::Bytes(b"{1,2,3}".to_vec()), "integer[]");
        assert_eq!(out, "$q${1,2,3}$q$");
    }

    // ==================== Temporal ====================

    #[test]
    fn test_timestamp_trims_fraction() {
        let v = Value::Timestamp(ts(2024, 3, 9, 7, 5, 1, 120_000));
        assert_eq!(serialize(&v, "timestamp"), "'2024-03-09 07:05:01.12'");
        let v = Value::Timestamp(ts(2024, 3, 9, 7, 5, 1, 0));
        assert_eq!(serialize(&v, "timestamp(0) without time zone"), "'2024-03-09 07:05:01'");
    }

    #[test]
    fn test_timestamptz_keeps_offset() {
        let v = Value::TimestampTz(
            DateTime::parse_from_rfc3339("2024-01-31T23:59:59.000001-05:30").unwrap(),
        );
        assert_eq!(
            serialize(&v, "timestamp with time zone"),
            "'2024-01-31 23:59:59.000001-05:30'"
        );
    }

    #[test]
    fn test_date_and_time() {
        let d = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert_eq!(serialize(&Value::Date(d), "date"), "'1999-12-31'");

        let t = NaiveTime::from_hms_micro_opt(8, 30, 0, 500).unwrap();
        assert_eq!(serialize(&Value::Time(t), "time"), "'08:30:00.0005'");

        let off = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            serialize(&Value::TimeTz(t, off), "time with time zone"),
            "'08:30:00.0005+02:00'"
        );
    }

    #[test]
    fn test_temporal_text_falls_back_to_quoting() {
        assert_eq!(serialize(&Value::from("infinity"), "timestamptz"), "'infinity'");
        assert_eq!(serialize(&Value::from("-infinity"), "date"), "'-infinity'");
    }

    #[test]
    fn test_offset_with_seconds() {
        let off = FixedOffset::east_opt(-(53 * 60 + 28)).unwrap();
        assert_eq!(offset_text(&off), "-00:53:28");
    }

    // ==================== Rows ====================

    #[test]
    fn test_serialize_row_positional() {
        let values = vec![Value::Int(1), Value::from("a'b"), Value::Bool(false)];
        let out = serialize_row(&values, &["integer", "text"]);
        assert_eq!(out, vec!["1", "'a''b'", "'false'"]);
    }

    #[test]
    fn test_mixed_row() {
        let values = vec![
            Value::Int(7),
            Value::from(r"O'Brien\Co"),
            Value::Timestamp(ts(2024, 1, 2, 3, 4, 5, 0)),
            Value::Bytes(vec![0x01, 0xff]),
            Value::from(r#"{"a","b"}"#),
            Value::Null,
        ];
        let types = ["bigint", "text", "timestamp", "bytea", "text[]", "uuid"];
        insta::assert_snapshot!(serialize_row(&values, &types).join(", "), @r#"7, E'O''Brien\\Co', '2024-01-02 03:04:05', '\x01ff', $q${"a","b"}$q$, NULL"#);
    }
}
