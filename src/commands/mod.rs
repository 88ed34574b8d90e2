//! Command handlers for the chctl CLI.
//!
//! This module contains implementations for all CLI subcommands. Each handler
//! returns an [`Out`] report that the binary prints as JSON to stdout.

mod cfg_info;
mod db;
mod execute;
mod grants;
mod info;
mod quota;
mod role;
mod user;

pub use cfg_info::cfg_info;
pub use db::db;
pub use execute::execute;
pub use grants::grants;
pub use info::info;
pub use quota::quota;
pub use role::role;
pub use user::user;

use crate::{ChClient, Result};
use serde::Serialize;
use std::fmt::Debug;
use tracing::error;

/// The report a command produces: whether anything changed, the data-modifying
/// statements that ran (or, in check mode, would have run), and any
/// command-specific payload flattened into the same JSON object.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// True when at least one statement was issued (or would be, in check mode).
    changed: bool,

    /// Data-modifying statements, in execution order. Statements carrying secrets
    /// are recorded in a masked form.
    executed_statements: Vec<String>,

    /// Command-specific payload, flattened into the report.
    #[serde(flatten)]
    data: Option<T>,
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// Create a report without a command-specific payload.
    pub fn new(changed: bool, executed_statements: Vec<String>) -> Self {
        Self {
            changed,
            executed_statements,
            data: None,
        }
    }

    /// Create a report carrying a command-specific payload.
    pub fn with_data(changed: bool, executed_statements: Vec<String>, data: T) -> Self {
        Self {
            changed,
            executed_statements,
            data: Some(data),
        }
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn executed_statements(&self) -> &[String] {
        &self.executed_statements
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Print the report as pretty JSON to stdout.
    pub fn print(&self) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Unable to serialize the command report: {e}"),
        }
    }
}

/// Records the data-modifying statements a command wants to run and executes them
/// unless check mode is on.
pub(crate) struct Runner<'a> {
    client: &'a ChClient,
    check: bool,
    executed: Vec<String>,
}

impl<'a> Runner<'a> {
    pub(crate) fn new(client: &'a ChClient, check: bool) -> Self {
        Self {
            client,
            check,
            executed: Vec::new(),
        }
    }

    /// Records a statement and, outside check mode, executes it.
    pub(crate) async fn run(&mut self, sql: String) -> Result<()> {
        self.executed.push(sql.clone());
        if !self.check {
            self.client.execute(&sql).await?;
        }
        Ok(())
    }

    /// Like [`Runner::run`], but records `display` instead of the real statement.
    /// Used for statements that carry secrets.
    pub(crate) async fn run_masked(&mut self, sql: &str, display: String) -> Result<()> {
        self.executed.push(display);
        if !self.check {
            self.client.execute(sql).await?;
        }
        Ok(())
    }

    pub(crate) fn into_statements(self) -> Vec<String> {
        self.executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_out_without_data_serializes_two_fields() {
        let out: Out<()> = Out::new(true, vec!["CREATE ROLE 'r'".to_string()]);
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(
            value,
            json!({"changed": true, "executed_statements": ["CREATE ROLE 'r'"]})
        );
    }

    #[test]
    fn test_out_flattens_data() {
        #[derive(Debug, Clone, Serialize)]
        struct Extra {
            result: Vec<u8>,
        }
        let out = Out::with_data(false, vec![], Extra { result: vec![1] });
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["changed"], json!(false));
        assert_eq!(value["result"], json!([1]));
    }
}
