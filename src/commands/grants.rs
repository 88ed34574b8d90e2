//! `chctl grants`: grants, updates or revokes privileges for a user or role.
//!
//! The current grants are recovered from `SHOW GRANTS FOR` output, the desired
//! ones come from the command line, and the difference between the two sets
//! decides which GRANT and REVOKE statements to issue. Without --exclusive the
//! desired privileges are appended to what the grantee already has.

use crate::args::{GrantsArgs, PrivilegeSet, State};
use crate::commands::{Out, Runner};
use crate::sql;
use crate::{ChClient, Result};
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

static GRANT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^GRANT (.+?) ON (.+?) TO .+?( WITH GRANT OPTION)?$").unwrap());

/// Privileges per object: object name mapped to privilege name mapped to
/// whether it is held WITH GRANT OPTION.
pub type GrantMap = BTreeMap<String, BTreeMap<String, bool>>;

#[derive(Debug, Clone, Serialize)]
pub struct GrantsReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    diff: Option<GrantsDiff>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantsDiff {
    before: GrantMap,
    after: GrantMap,
}

/// Splits a privilege list on commas that are not inside a column list, so
/// `SELECT(a, b), INSERT` yields two privileges rather than three.
fn split_privs(privs_str: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in privs_str.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&privs_str[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&privs_str[start..]);
    parts
}

fn parse_show_grants(rows: &[String]) -> GrantMap {
    let mut grants = GrantMap::new();
    for grant_statement in rows {
        let Some(caps) = GRANT_RE.captures(grant_statement) else {
            continue;
        };
        let privs_str = &caps[1];
        let mut obj = &caps[2];
        let grant_option = caps.get(3).is_some();

        // ClickHouse 25.x prints '*' instead of '*.*' for global grants.
        if obj == "*" {
            obj = "*.*";
        }

        let entry = grants.entry(obj.to_string()).or_default();
        for priv_name in split_privs(privs_str) {
            entry.insert(priv_name.trim().to_uppercase(), grant_option);
        }
    }
    grants
}

fn desired_grants(privileges: &[PrivilegeSet]) -> GrantMap {
    let mut desired = GrantMap::new();
    for set in privileges {
        let entry = desired.entry(set.object.clone()).or_default();
        for (priv_name, &grant_option) in &set.privs {
            let grant_option = set.grant_option.unwrap_or(grant_option);
            entry.insert(priv_name.to_uppercase(), grant_option);
        }
    }
    desired
}

fn triples(grants: &GrantMap) -> BTreeSet<(String, String, bool)> {
    grants
        .iter()
        .flat_map(|(obj, privs)| {
            privs
                .iter()
                .map(|(priv_name, &go)| (priv_name.clone(), obj.clone(), go))
        })
        .collect()
}

/// Produces the statements needed to move `current` to `desired`. Privileges
/// not in `desired` are only revoked in exclusive mode.
fn plan_update(
    current: &GrantMap,
    desired: &GrantMap,
    exclusive: bool,
    grantee: &str,
    cluster: Option<&str>,
) -> Vec<String> {
    let current = triples(current);
    let desired = triples(desired);

    let to_revoke: BTreeSet<_> = if exclusive {
        current.difference(&desired).cloned().collect()
    } else {
        BTreeSet::new()
    };
    let to_grant: BTreeSet<_> = desired.difference(&current).cloned().collect();

    let cluster_clause = cluster
        .map(|c| format!(" ON CLUSTER {c}"))
        .unwrap_or_default();
    let mut queries = Vec::new();

    let mut revokes_by_obj: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (priv_name, obj, _) in &to_revoke {
        revokes_by_obj
            .entry(obj.as_str())
            .or_default()
            .push(priv_name.as_str());
    }
    for (obj, mut privs) in revokes_by_obj {
        privs.sort_unstable();
        queries.push(format!(
            "REVOKE {} ON {obj} FROM {grantee}{cluster_clause}",
            privs.join(", ")
        ));
    }

    let mut grants_go_by_obj: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut grants_no_go_by_obj: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (priv_name, obj, go) in &to_grant {
        let by_obj = if *go {
            &mut grants_go_by_obj
        } else {
            &mut grants_no_go_by_obj
        };
        by_obj
            .entry(obj.as_str())
            .or_default()
            .push(priv_name.as_str());
    }
    for (obj, mut privs) in grants_go_by_obj {
        privs.sort_unstable();
        queries.push(format!(
            "GRANT {} ON {obj} TO {grantee} WITH GRANT OPTION{cluster_clause}",
            privs.join(", ")
        ));
    }
    for (obj, mut privs) in grants_no_go_by_obj {
        privs.sort_unstable();
        queries.push(format!(
            "GRANT {} ON {obj} TO {grantee}{cluster_clause}",
            privs.join(", ")
        ));
    }

    queries
}

/// Produces the statements revoking everything the grantee currently has.
fn plan_revoke_all(current: &GrantMap, grantee: &str, cluster: Option<&str>) -> Vec<String> {
    let cluster_clause = cluster
        .map(|c| format!(" ON CLUSTER {c}"))
        .unwrap_or_default();
    current
        .iter()
        .map(|(obj, privs)| {
            let privs: Vec<&str> = privs.keys().map(String::as_str).collect();
            format!(
                "REVOKE {} ON {obj} FROM {grantee}{cluster_clause}",
                privs.join(", ")
            )
        })
        .collect()
}

/// The grants the grantee would end up with, computed without asking the server.
/// Used in check mode where the statements never ran.
fn predict_end_grants(
    state: State,
    start: &GrantMap,
    desired: &GrantMap,
    exclusive: bool,
) -> GrantMap {
    match state {
        State::Absent => GrantMap::new(),
        State::Present if exclusive => desired.clone(),
        State::Present => {
            let mut end = start.clone();
            for (obj, privs) in desired {
                end.entry(obj.clone())
                    .or_default()
                    .extend(privs.iter().map(|(p, &go)| (p.clone(), go)));
            }
            end
        }
    }
}

async fn fetch_grants(client: &ChClient, grantee: &str) -> Result<GrantMap> {
    let rows = client
        .fetch_strings(&format!("SHOW GRANTS FOR {grantee}"))
        .await?
        .require(client.login_user())?;
    Ok(parse_show_grants(&rows))
}

pub async fn grants(client: &ChClient, check: bool, args: &GrantsArgs) -> Result<Out<GrantsReport>> {
    sql::check_name("grantee", args.grantee())?;
    if let Some(cluster) = args.cluster() {
        sql::check_name("cluster", cluster)?;
    }

    let grantee = args.grantee();
    let query = format!(
        "SELECT 1 FROM system.users WHERE name = '{name}' \
         UNION ALL \
         SELECT 1 FROM system.roles WHERE name = '{name}' \
         LIMIT 1",
        name = sql::escape_string(grantee)
    );
    let grantee_exists = client.exists(&query).await?.require(client.login_user())?;
    if !grantee_exists {
        anyhow::bail!("Grantee {grantee} does not exist");
    }

    let start_grants = fetch_grants(client, grantee).await?;

    let desired = match args.state() {
        State::Present => {
            let privileges = args
                .privileges()
                .context("--privileges is required when --state is present")?;
            desired_grants(privileges)
        }
        State::Absent => GrantMap::new(),
    };

    let queries = match args.state() {
        State::Present => plan_update(
            &start_grants,
            &desired,
            args.exclusive(),
            grantee,
            args.cluster(),
        ),
        State::Absent => plan_revoke_all(&start_grants, grantee, args.cluster()),
    };

    let changed = !queries.is_empty();
    let mut runner = Runner::new(client, check);
    for query in queries {
        runner.run(query).await?;
    }

    let end_grants = if check && changed {
        predict_end_grants(args.state(), &start_grants, &desired, args.exclusive())
    } else {
        fetch_grants(client, grantee).await?
    };

    let diff = (args.diff() || check).then_some(GrantsDiff {
        before: start_grants,
        after: end_grants,
    });

    Ok(Out::with_data(
        changed,
        runner.into_statements(),
        GrantsReport { diff },
    ))
}
