//! Helpers for assembling SQL statements from declarative parameters.
//!
//! Statements are built by string concatenation from names and values the user
//! supplies, so names are validated up front and values are rendered through a
//! quoting function rather than pasted in raw.

use crate::Result;
use anyhow::bail;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Accepts any name that cannot break out of a quoted or unquoted identifier
/// position: quotes, backquotes, semicolons and NUL are rejected.
static VALID_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^[^'"`;\x00]+$"#).unwrap());

/// Matches an identifier as the server prints it in `SHOW CREATE` statements:
/// either a bare word or a backquoted name. Kept non-capturing so it can be
/// embedded in larger patterns.
pub(crate) const NAME_PATTERN: &str = r"(?:(?:`[^`]+`)|\w+)";

/// Matches a `{name}` placeholder in a query.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*\}").unwrap());

/// Fails when `name` is not usable as the name of the given kind of entity.
pub(crate) fn check_name(kind: &str, name: &str) -> Result<()> {
    if !VALID_NAME.is_match(name) {
        bail!("'{name}' is not a valid {kind} name");
    }
    Ok(())
}

/// Strips the backquotes from a possibly escaped identifier, e.g. `` `test quota` ``.
pub(crate) fn unquote(name: &str) -> &str {
    name.trim_matches('`')
}

/// Escapes a string for use inside a single-quoted SQL literal.
pub(crate) fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Renders a JSON value as a ClickHouse SQL literal.
pub(crate) fn to_sql_literal(value: &Value) -> Result<String> {
    let rendered = match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", escape_string(s)),
        Value::Array(items) => {
            let items: Vec<String> = items
                .iter()
                .map(to_sql_literal)
                .collect::<Result<Vec<String>>>()?;
            format!("[{}]", items.join(", "))
        }
        Value::Object(_) => bail!("Cannot render a JSON object as a SQL literal"),
    };
    Ok(rendered)
}

/// Replaces `{name}` placeholders in `query` with SQL literals from `params`.
///
/// Placeholders without a matching key are left untouched, so queries containing
/// literal braces (e.g. JSON) still work as long as the brace content does not
/// collide with a parameter name.
pub(crate) fn substitute_params(
    query: &str,
    params: &serde_json::Map<String, Value>,
) -> Result<String> {
    let mut out = String::with_capacity(query.len());
    let mut last = 0;
    for placeholder in PLACEHOLDER.find_iter(query) {
        let name = &query[placeholder.start() + 1..placeholder.end() - 1];
        out.push_str(&query[last..placeholder.start()]);
        match params.get(name) {
            Some(value) => out.push_str(&to_sql_literal(value)?),
            None => out.push_str(placeholder.as_str()),
        }
        last = placeholder.end();
    }
    out.push_str(&query[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_name() {
        for ok in ["test_quota", "test quota", "test-quota", "test.quota", "tést quota"] {
            assert!(check_name("quota", ok).is_ok(), "{ok}");
        }
        for bad in ["", "'test quota'", "\"test quota\"", "`test quota`", "test;quota", "test\0quota"] {
            assert!(check_name("quota", bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("`test quota`"), "test quota");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("plain"), "plain");
        assert_eq!(escape_string("it's"), "it\\'s");
        assert_eq!(escape_string(r"a\b"), r"a\\b");
    }

    #[test]
    fn test_to_sql_literal() {
        assert_eq!(to_sql_literal(&json!(null)).unwrap(), "NULL");
        assert_eq!(to_sql_literal(&json!(true)).unwrap(), "true");
        assert_eq!(to_sql_literal(&json!(42)).unwrap(), "42");
        assert_eq!(to_sql_literal(&json!(1.5)).unwrap(), "1.5");
        assert_eq!(to_sql_literal(&json!("one")).unwrap(), "'one'");
        assert_eq!(to_sql_literal(&json!("it's")).unwrap(), "'it\\'s'");
        assert_eq!(to_sql_literal(&json!([1, "a"])).unwrap(), "[1, 'a']");
        assert!(to_sql_literal(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_substitute_params() {
        let params = json!({"a": "one", "b": "two", "n": 3})
            .as_object()
            .cloned()
            .unwrap();
        let query = "INSERT INTO t (x, y) VALUES ({a}, {b}), ({a}, {n})";
        assert_eq!(
            substitute_params(query, &params).unwrap(),
            "INSERT INTO t (x, y) VALUES ('one', 'two'), ('one', 3)"
        );
    }

    #[test]
    fn test_substitute_params_unknown_placeholder_is_kept() {
        let params = json!({"a": 1}).as_object().cloned().unwrap();
        let query = "SELECT '{\"k\": 1}' FORMAT {fmt} WHERE x = {a}";
        assert_eq!(
            substitute_params(query, &params).unwrap(),
            "SELECT '{\"k\": 1}' FORMAT {fmt} WHERE x = 1"
        );
    }

    #[test]
    fn test_substitute_params_without_params() {
        let params = serde_json::Map::new();
        assert_eq!(
            substitute_params("SELECT version()", &params).unwrap(),
            "SELECT version()"
        );
    }
}
