//! `chctl role`: creates, alters or drops a role.
//!
//! A role is defined by its SETTINGS clauses. The current clauses are read back
//! from `SHOW CREATE ROLE` and compared, after collapsing whitespace runs, with
//! the desired ones, so re-running with the same settings changes nothing.

use crate::args::{RoleArgs, State};
use crate::commands::{Out, Runner};
use crate::sql;
use crate::{ChClient, Result};
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

static CREATE_ROLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "^CREATE ROLE (?P<name>{name})\
         (?: ON CLUSTER (?P<cluster>{name}))?\
         (?: SETTINGS (?P<settings>.+))?$",
        name = sql::NAME_PATTERN,
    ))
    .expect("hardcoded regex is valid")
});

/// Extracts the SETTINGS clauses from a `SHOW CREATE ROLE` statement.
fn parse_create_statement(create_statement: &str) -> Result<Vec<String>> {
    let caps = CREATE_ROLE_RE
        .captures(create_statement)
        .with_context(|| format!("Could not parse '{create_statement}'"))?;
    let settings = match caps.name("settings") {
        Some(m) => m.as_str().split(", ").map(String::from).collect(),
        None => Vec::new(),
    };
    Ok(settings)
}

/// Collapses runs of whitespace so that `readonly  =  1` and `readonly = 1`
/// compare equal, and drops clause order from the comparison.
fn normalize(settings: &[String]) -> BTreeSet<String> {
    settings
        .iter()
        .map(|s| s.split_whitespace().collect::<Vec<&str>>().join(" "))
        .collect()
}

fn role_statement(
    action: &str,
    name: &str,
    cluster: Option<&str>,
    settings: &BTreeSet<String>,
) -> String {
    let mut query = format!("{action} ROLE '{name}'");
    if let Some(cluster) = cluster {
        query.push_str(&format!(" ON CLUSTER '{cluster}'"));
    }
    if !settings.is_empty() {
        let clauses: Vec<&str> = settings.iter().map(String::as_str).collect();
        query.push_str(&format!(" SETTINGS {}", clauses.join(", ")));
    } else if action == "ALTER" {
        query.push_str(" SETTINGS NONE");
    }
    query
}

pub async fn role(client: &ChClient, check: bool, args: &RoleArgs) -> Result<Out<()>> {
    sql::check_name("role", args.name())?;
    if let Some(cluster) = args.cluster() {
        sql::check_name("cluster", cluster)?;
    }

    let query = format!(
        "SELECT 1 FROM system.roles WHERE name = '{}' LIMIT 1",
        sql::escape_string(args.name())
    );
    let exists = client.exists(&query).await?.require(client.login_user())?;

    let desired = normalize(args.settings());
    let mut runner = Runner::new(client, check);
    let mut changed = false;

    match args.state() {
        State::Present => {
            if !exists {
                runner
                    .run(role_statement("CREATE", args.name(), args.cluster(), &desired))
                    .await?;
                changed = true;
            } else {
                let rows = client
                    .fetch_strings(&format!("SHOW CREATE ROLE '{}'", args.name()))
                    .await?
                    .require(client.login_user())?;
                let needs_altering = match rows.first() {
                    None => true,
                    Some(create_statement) => {
                        let current = normalize(&parse_create_statement(create_statement)?);
                        debug!("Current settings: {current:?}, desired settings: {desired:?}");
                        current != desired
                    }
                };
                if needs_altering {
                    runner
                        .run(role_statement("ALTER", args.name(), args.cluster(), &desired))
                        .await?;
                    changed = true;
                }
            }
        }
        State::Absent => {
            if exists {
                let mut query = format!("DROP ROLE '{}'", args.name());
                if let Some(cluster) = args.cluster() {
                    query.push_str(&format!(" ON CLUSTER '{cluster}'"));
                }
                runner.run(query).await?;
                changed = true;
            }
        }
    }

    Ok(Out::new(changed, runner.into_statements()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_without_settings() {
        let settings = parse_create_statement("CREATE ROLE accountant").unwrap();
        assert!(settings.is_empty());
    }

    #[test]
    fn test_parse_with_settings() {
        let settings = parse_create_statement(
            "CREATE ROLE accountant SETTINGS max_memory_usage = 10000, readonly = 1",
        )
        .unwrap();
        assert_eq!(settings, ["max_memory_usage = 10000", "readonly = 1"]);
    }

    #[test]
    fn test_parse_backquoted_name_and_cluster() {
        let settings = parse_create_statement(
            "CREATE ROLE `tést role` ON CLUSTER `tést cluster` SETTINGS readonly = 1",
        )
        .unwrap();
        assert_eq!(settings, ["readonly = 1"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_create_statement("CREATE USER bob").is_err());
    }

    #[test]
    fn test_normalize_ignores_spacing_and_order() {
        let a = normalize(&["readonly=1".to_string(), "max_memory_usage =  10000".to_string()]);
        let b = normalize(&["max_memory_usage = 10000".to_string(), "readonly=1".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_role_statement_create() {
        let settings = normalize(&["readonly = 1".to_string()]);
        assert_eq!(
            role_statement("CREATE", "accountant", None, &settings),
            "CREATE ROLE 'accountant' SETTINGS readonly = 1"
        );
    }

    #[test]
    fn test_role_statement_alter_to_no_settings() {
        assert_eq!(
            role_statement("ALTER", "accountant", Some("c1"), &BTreeSet::new()),
            "ALTER ROLE 'accountant' ON CLUSTER 'c1' SETTINGS NONE"
        );
    }
}
