//! Declared-type classification.

/// How values of a declared column type are rendered as SQL literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Boolean,
    Integer,
    Float,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    TimeTz,
    Interval,
    Array,
    Binary,
    Textual,
    /// Anything not recognized: enums, domains, json, uuid, network types...
    Opaque,
}

/// Exact names, after normalization.
const EXACT: &[(&str, TypeKind)] = &[
    ("boolean", TypeKind::Boolean),
    ("bool", TypeKind::Boolean),
    ("smallint", TypeKind::Integer),
    ("integer", TypeKind::Integer),
    ("bigint", TypeKind::Integer),
    ("int", TypeKind::Integer),
    ("int2", TypeKind::Integer),
    ("int4", TypeKind::Integer),
    ("int8", TypeKind::Integer),
    ("smallserial", TypeKind::Integer),
    ("serial", TypeKind::Integer),
    ("bigserial", TypeKind::Integer),
    ("real", TypeKind::Float),
    ("double precision", TypeKind::Float),
    ("float4", TypeKind::Float),
    ("float8", TypeKind::Float),
    ("numeric", TypeKind::Float),
    ("decimal", TypeKind::Float),
    ("timestamp", TypeKind::Timestamp),
    ("timestamp without time zone", TypeKind::Timestamp),
    ("timestamptz", TypeKind::TimestampTz),
    ("timestamp with time zone", TypeKind::TimestampTz),
    ("date", TypeKind::Date),
    ("time", TypeKind::Time),
    ("time without time zone", TypeKind::Time),
    ("timetz", TypeKind::TimeTz),
    ("time with time zone", TypeKind::TimeTz),
    ("interval", TypeKind::Interval),
    ("bytea", TypeKind::Binary),
    ("text", TypeKind::Textual),
    ("character varying", TypeKind::Textual),
    ("varchar", TypeKind::Textual),
    ("character", TypeKind::Textual),
    ("char", TypeKind::Textual),
    ("bpchar", TypeKind::Textual),
    ("name", TypeKind::Textual),
    ("citext", TypeKind::Textual),
];

/// Parameterized names, matched by prefix.
const PREFIXES: &[(&str, TypeKind)] = &[
    ("numeric(", TypeKind::Float),
    ("decimal(", TypeKind::Float),
    ("character varying(", TypeKind::Textual),
    ("varchar(", TypeKind::Textual),
    ("character(", TypeKind::Textual),
    ("char(", TypeKind::Textual),
    ("bit(", TypeKind::Textual),
    ("bit varying(", TypeKind::Textual),
    ("interval(", TypeKind::Interval),
];

impl TypeKind {
    /// Classify a declared type name such as `format_type()` returns it.
    ///
    /// ```
    /// use pgseed_sql::TypeKind;
    /// assert_eq!(TypeKind::of("INTEGER"), TypeKind::Integer);
    /// assert_eq!(TypeKind::of("numeric(10,2)"), TypeKind::Float);
    /// assert_eq!(TypeKind::of("text[]"), TypeKind::Array);
    /// assert_eq!(TypeKind::of("mood"), TypeKind::Opaque);
    /// ```
    pub fn of(declared: &str) -> TypeKind {
        let name = declared.trim().to_ascii_lowercase();

        if name.ends_with("[]") {
            return TypeKind::Array;
        }
        if let Some((_, kind)) = EXACT.iter().find(|(n, _)| *n == name) {
            return *kind;
        }
        // timestamp(p) / time(p), with or without a zone suffix
        if let Some(rest) = name.strip_prefix("timestamp(") {
            return if rest.ends_with(" with time zone") {
                TypeKind::TimestampTz
            } else {
                TypeKind::Timestamp
            };
        }
        if let Some(rest) = name.strip_prefix("time(") {
            return if rest.ends_with(" with time zone") {
                TypeKind::TimeTz
            } else {
                TypeKind::Time
            };
        }
        if let Some((_, kind)) = PREFIXES.iter().find(|(p, _)| name.starts_with(p)) {
            return *kind;
        }
        TypeKind::Opaque
    }

    /// Emitted without quotes.
    pub fn is_unquoted(self) -> bool {
        matches!(self, TypeKind::Boolean | TypeKind::Integer | TypeKind::Float)
    }

    /// Date and time kinds. Interval is not included: its text goes through
    /// the plain quoting path.
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            TypeKind::Timestamp
                | TypeKind::TimestampTz
                | TypeKind::Date
                | TypeKind::Time
                | TypeKind::TimeTz
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_names() {
        assert_eq!(TypeKind::of("boolean"), TypeKind::Boolean);
        assert_eq!(TypeKind::of("bigint"), TypeKind::Integer);
        assert_eq!(TypeKind::of("double precision"), TypeKind::Float);
        assert_eq!(TypeKind::of("bytea"), TypeKind::Binary);
        assert_eq!(TypeKind::of("text"), TypeKind::Textual);
        assert_eq!(TypeKind::of("interval"), TypeKind::Interval);
    }

    #[test]
    fn test_normalization() {
        assert_eq!(TypeKind::of("  Timestamp With Time Zone "), TypeKind::TimestampTz);
        assert_eq!(TypeKind::of("BOOL"), TypeKind::Boolean);
    }

    #[test]
    fn test_parameterized() {
        assert_eq!(TypeKind::of("character varying(255)"), TypeKind::Textual);
        assert_eq!(TypeKind::of("numeric(12)"), TypeKind::Float);
        assert_eq!(TypeKind::of("timestamp(3) without time zone"), TypeKind::Timestamp);
        assert_eq!(TypeKind::of("timestamp(3) with time zone"), TypeKind::TimestampTz);
        assert_eq!(TypeKind::of("time(0) with time zone"), TypeKind::TimeTz);
        assert_eq!(TypeKind::of("time(6)"), TypeKind::Time);
        assert_eq!(TypeKind::of("bit(8)"), TypeKind::Textual);
    }

    #[test]
    fn test_arrays_win_over_element_type() {
        assert_eq!(TypeKind::of("integer[]"), TypeKind::Array);
        assert_eq!(TypeKind::of("character varying(20)[]"), TypeKind::Array);
        assert_eq!(TypeKind::of("public.mood[]"), TypeKind::Array);
    }

    #[test]
    fn test_unknown_is_opaque() {
        assert_eq!(TypeKind::of("jsonb"), TypeKind::Opaque);
        assert_eq!(TypeKind::of("uuid"), TypeKind::Opaque);
        assert_eq!(TypeKind::of("app.status"), TypeKind::Opaque);
        // not a textual prefix match
        assert_eq!(TypeKind::of("characteristic"), TypeKind::Opaque);
    }
}
