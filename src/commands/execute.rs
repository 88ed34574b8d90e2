//! `chctl execute`: runs an arbitrary query and reports the result rows.

use crate::args::ExecuteArgs;
use crate::commands::Out;
use crate::sql;
use crate::{ChClient, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteReport {
    /// The query after parameter substitution, as it was sent to the server.
    substituted_query: String,
    /// Result rows as JSON objects keyed by column name. Empty for statements
    /// that return nothing.
    result: Vec<Value>,
    statistics: Statistics,
}

#[derive(Debug, Clone, Serialize)]
struct Statistics {
    elapsed_ms: u128,
}

/// Statements with these leading keywords return rows over the HTTP interface.
fn returns_rows(query: &str) -> bool {
    let query = query.trim_start().to_lowercase();
    ["select", "with", "show", "describe", "desc ", "exists"]
        .iter()
        .any(|keyword| query.starts_with(keyword))
}

pub async fn execute(client: &ChClient, args: &ExecuteArgs) -> Result<Out<ExecuteReport>> {
    let query = match args.params() {
        Some(params) => sql::substitute_params(args.query(), params)?,
        None => args.query().to_string(),
    };

    let started = Instant::now();
    let result = if returns_rows(&query) {
        client
            .fetch_json(&query)
            .await?
            .require(client.login_user())?
    } else {
        client.execute(&query).await?;
        Vec::new()
    };
    let statistics = Statistics {
        elapsed_ms: started.elapsed().as_millis(),
    };

    // There is no way to tell whether an arbitrary statement modified server
    // state, so this command always reports changed.
    Ok(Out::with_data(
        true,
        vec![],
        ExecuteReport {
            substituted_query: query,
            result,
            statistics,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  select version()"));
        assert!(returns_rows("WITH a AS (SELECT 1) SELECT * FROM a"));
        assert!(returns_rows("SHOW DATABASES"));
        assert!(returns_rows("DESCRIBE TABLE foo"));
        assert!(returns_rows("EXISTS TABLE foo"));
        assert!(!returns_rows("INSERT INTO foo VALUES (1)"));
        assert!(!returns_rows("CREATE TABLE foo (n UInt8) ENGINE = Memory"));
        assert!(!returns_rows("OPTIMIZE TABLE foo"));
    }
}
