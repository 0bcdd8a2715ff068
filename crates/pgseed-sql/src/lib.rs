//! SQL text primitives for pgseed.
//!
//! Everything in this crate is pure string work: quoting identifiers and
//! literals, picking dollar-quote tags, and turning row values into SQL
//! literals keyed on the column's declared type. Nothing here talks to a
//! database.

mod kind;
pub use kind::*;

mod serialize;
pub use serialize::*;

mod value;
pub use value::*;

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value quoted with single quotes, doubling embedded
/// quotes. Values containing a backslash are written as an escape string
/// (`E'...'`) with every backslash doubled, so the literal reads back as the
/// exact same text regardless of `standard_conforming_strings`.
///
/// Inside `E'...'` a lone backslash starts an escape sequence: `E'Brien\Co'`
/// reads back as `BrienCo`, and `\n` or `\x41` would change the text. The
/// doubled form is the only one that survives a load unchanged.
///
/// # Example
/// ```
/// use pgseed_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// assert_eq!(format!("{}", Lit(r"a\b")), r"E'a\\b'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.as_ref();
        let escape = s.contains('\\');
        if escape {
            write!(f, "E")?;
        }
        write!(f, "'")?;
        for c in s.chars() {
            match c {
                '\'' => write!(f, "''")?,
                '\\' if escape => write!(f, "\\\\")?,
                c => write!(f, "{}", c)?,
            }
        }
        write!(f, "'")
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use pgseed_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Quote a string as a SQL literal. See [`Lit`].
pub fn quote_literal(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes identifiers to avoid issues with reserved keywords like
/// `user`, `order`, `table`, `group`, etc. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Quote a schema-qualified name as `"schema"."name"`.
pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", Ident(schema), Ident(name))
}

/// Pick the dollar-quote tag for a payload.
///
/// Tags are `q`, `qq`, `qqq`, ... and the shortest one whose delimiter
/// `$tag$` first appears exactly where the closing delimiter starts wins.
/// That rules out tags already present in the payload as well as tails like
/// `...$q` that would fuse with the closing `$q$`.
pub fn dollar_tag(payload: &str) -> String {
    let mut tag = String::from("q");
    loop {
        let delim = format!("${tag}$");
        let probe = format!("{payload}{delim}");
        if probe.find(&delim) == Some(payload.len()) {
            return tag;
        }
        tag.push('q');
    }
}

/// Wrap a payload in dollar quotes using [`dollar_tag`].
///
/// # Example
/// ```
/// use pgseed_sql::dollar_quote;
/// assert_eq!(dollar_quote(r#"{"a b"}"#), r#"$q${"a b"}$q$"#);
/// assert_eq!(dollar_quote("x $q$ y"), "$qq$x $q$ y$qq$");
/// ```
pub fn dollar_quote(payload: &str) -> String {
    let tag = dollar_tag(payload);
    format!("${tag}${payload}${tag}$")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_literal_plain() {
        assert_eq!(quote_literal("hello"), "'hello'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn test_literal_quote_and_backslash() {
        assert_eq!(quote_literal(r"O'Brien\Co"), r"E'O''Brien\\Co'");
        // text that looks like an escape sequence stays literal
        assert_eq!(quote_literal(r"line\nbreak \x41"), r"E'line\\nbreak \\x41'");
    }

    #[test]
    fn test_ident_escaping() {
        assert_eq!(quote_ident("seed.public.users"), "\"seed.public.users\"");
        assert_eq!(quote_qualified("public", "order"), "\"public\".\"order\"");
    }

    #[test]
    fn test_dollar_tag_grows_until_free() {
        assert_eq!(dollar_tag("plain"), "q");
        assert_eq!(dollar_tag("has $q$ inside"), "qq");
        assert_eq!(dollar_tag("$q$ and $qq$"), "qqq");
    }

    #[test]
    fn test_dollar_tag_avoids_tail_overlap() {
        // "...$q" followed by "$q$" would close early at the payload's "$q$".
        assert_eq!(dollar_tag("ends with $q"), "qq");
        assert_eq!(dollar_quote("ends with $q"), "$qq$ends with $q$qq$");
    }

    proptest! {
        #[test]
        fn prop_dollar_quote_closes_exactly_at_the_end(payload in "[a-z $q{}\"',]{0,24}") {
            let quoted = dollar_quote(&payload);
            let tag = dollar_tag(&payload);
            let delim = format!("${tag}$");
            let body = &quoted[delim.len()..];
            // the first closing delimiter is the one we appended
            prop_assert_eq!(body.find(&delim), Some(payload.len()));
        }
    }
}
