//! Identifier and literal quoting
//!
//! These rules are a contract with other tooling that diffs or hashes the
//! generated statements: identifiers keep only `[A-Za-z0-9_]` (everything else
//! becomes `_`) and string literals double their single quotes.

/// Quote a free-text name as a PostgreSQL identifier.
///
/// Never fails. An empty input still produces a valid identifier (`"_"`),
/// since Postgres rejects zero-length quoted identifiers.
pub fn quote_identifier(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if cleaned.is_empty() {
        "\"_\"".to_string()
    } else {
        format!("\"{}\"", cleaned)
    }
}

/// Quote a possibly schema-qualified name (`schema.object`).
///
/// Only the first dot separates schema from object; any further dots are
/// part of the object name and get sanitized like any other character.
pub fn quote_qualified(name: &str) -> String {
    match name.split_once('.') {
        Some((schema, object)) if !schema.is_empty() && !object.is_empty() => {
            format!("{}.{}", quote_identifier(schema), quote_identifier(object))
        }
        _ => quote_identifier(name),
    }
}

/// Quote text as a SQL string literal.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
