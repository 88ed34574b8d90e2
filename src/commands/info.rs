//! `chctl info`: gathers server information from the system tables.
//!
//! Sections the connecting user lacks privileges for are reported as
//! `{"497": "Not enough privileges"}` instead of failing the whole command,
//! so a restricted user still gets everything it is allowed to see.

use crate::args::{GatherSubset, InfoArgs};
use crate::client::Fetch;
use crate::commands::Out;
use crate::{ChClient, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const PRIV_ERR_CODE: &str = "497";

fn denied() -> Value {
    json!({ PRIV_ERR_CODE: "Not enough privileges" })
}

fn field(row: &Value, name: &str) -> Value {
    row.get(name).cloned().unwrap_or(Value::Null)
}

fn key_of(row: &Value, name: &str) -> String {
    match row.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

async fn gather_version(client: &ChClient) -> Result<Value> {
    let rows = match client.fetch_strings("SELECT version()").await? {
        Fetch::Rows(rows) => rows,
        Fetch::Denied => return Ok(denied()),
    };
    match rows.first() {
        Some(raw) => Ok(serde_json::to_value(crate::ServerVersion::parse(raw)?)?),
        None => Ok(Value::Null),
    }
}

async fn gather_databases(client: &ChClient) -> Result<Value> {
    let query = "SELECT name, engine, data_path, uuid FROM system.databases";
    let rows = match client.fetch_json(query).await? {
        Fetch::Rows(rows) => rows,
        Fetch::Denied => return Ok(denied()),
    };
    let mut info = Map::new();
    for row in &rows {
        info.insert(
            key_of(row, "name"),
            json!({
                "engine": field(row, "engine"),
                "data_path": field(row, "data_path"),
                "uuid": field(row, "uuid"),
            }),
        );
    }
    Ok(Value::Object(info))
}

async fn gather_users(client: &ChClient) -> Result<Value> {
    let query = "SELECT name, id, storage, auth_type, auth_params, host_ip, host_names, \
                 host_names_regexp, host_names_like, default_roles_all, \
                 default_roles_list, default_roles_except FROM system.users";
    let rows = match client.fetch_json(query).await? {
        Fetch::Rows(rows) => rows,
        Fetch::Denied => return Ok(denied()),
    };
    let mut info = Map::new();
    for row in &rows {
        info.insert(
            key_of(row, "name"),
            json!({
                "id": field(row, "id"),
                "storage": field(row, "storage"),
                "auth_type": field(row, "auth_type"),
                "auth_params": field(row, "auth_params"),
                "host_ip": field(row, "host_ip"),
                "host_names": field(row, "host_names"),
                "host_names_regexp": field(row, "host_names_regexp"),
                "host_names_like": field(row, "host_names_like"),
                "default_roles_all": field(row, "default_roles_all"),
                "default_roles_list": field(row, "default_roles_list"),
                "default_roles_except": field(row, "default_roles_except"),
            }),
        );
    }
    Ok(Value::Object(info))
}

async fn gather_roles(client: &ChClient) -> Result<Value> {
    let query = "SELECT name, id, storage FROM system.roles";
    let rows = match client.fetch_json(query).await? {
        Fetch::Rows(rows) => rows,
        Fetch::Denied => return Ok(denied()),
    };
    let mut info = Map::new();
    for row in &rows {
        info.insert(
            key_of(row, "name"),
            json!({
                "id": field(row, "id"),
                "storage": field(row, "storage"),
            }),
        );
    }
    Ok(Value::Object(info))
}

async fn gather_settings(client: &ChClient) -> Result<Value> {
    let query = "SELECT name, value, changed, description, min, max, readonly, \
                 type FROM system.settings";
    let rows = match client.fetch_json(query).await? {
        Fetch::Rows(rows) => rows,
        Fetch::Denied => return Ok(denied()),
    };
    let mut info = Map::new();
    for row in &rows {
        info.insert(
            key_of(row, "name"),
            json!({
                "value": field(row, "value"),
                "changed": field(row, "changed"),
                "description": field(row, "description"),
                "min": field(row, "min"),
                "max": field(row, "max"),
                "readonly": field(row, "readonly"),
                "type": field(row, "type"),
            }),
        );
    }
    Ok(Value::Object(info))
}

/// Rows of system.clusters are regrouped as cluster -> shard -> replica.
async fn gather_clusters(client: &ChClient) -> Result<Value> {
    let query = "SELECT cluster, shard_num, shard_weight, replica_num, host_name, \
                 host_address, port, is_local, user, default_database, errors_count, \
                 estimated_recovery_time FROM system.clusters";
    let rows = match client.fetch_json(query).await? {
        Fetch::Rows(rows) => rows,
        Fetch::Denied => return Ok(denied()),
    };
    struct Shard {
        weight: Value,
        replicas: BTreeMap<String, Value>,
    }

    let mut clusters: BTreeMap<String, BTreeMap<String, Shard>> = BTreeMap::new();
    for row in &rows {
        let shard = clusters
            .entry(key_of(row, "cluster"))
            .or_default()
            .entry(key_of(row, "shard_num"))
            .or_insert_with(|| Shard {
                weight: field(row, "shard_weight"),
                replicas: BTreeMap::new(),
            });
        shard.replicas.entry(key_of(row, "replica_num")).or_insert_with(|| {
            json!({
                "host_name": field(row, "host_name"),
                "host_address": field(row, "host_address"),
                "port": field(row, "port"),
                "is_local": field(row, "is_local"),
                "user": field(row, "user"),
                "default_database": field(row, "default_database"),
                "errors_count": field(row, "errors_count"),
                "estimated_recovery_time": field(row, "estimated_recovery_time"),
            })
        });
    }

    let mut info = Map::new();
    for (cluster, shards) in clusters {
        let shards: Map<String, Value> = shards
            .into_iter()
            .map(|(num, shard)| {
                (
                    num,
                    json!({"shard_weight": shard.weight, "replicas": shard.replicas}),
                )
            })
            .collect();
        info.insert(cluster, json!({ "shards": shards }));
    }
    Ok(Value::Object(info))
}

pub async fn info(client: &ChClient, args: &InfoArgs) -> Result<Out<Map<String, Value>>> {
    let all = [
        GatherSubset::Version,
        GatherSubset::Databases,
        GatherSubset::Users,
        GatherSubset::Roles,
        GatherSubset::Settings,
        GatherSubset::Clusters,
    ];
    let subsets: &[GatherSubset] = if args.gather().is_empty() {
        &all
    } else {
        args.gather()
    };

    let mut report = Map::new();
    report.insert(
        "driver".to_string(),
        json!({"name": "clickhouse", "interface": "http"}),
    );
    for subset in subsets {
        let (key, value) = match subset {
            GatherSubset::Version => ("version", gather_version(client).await?),
            GatherSubset::Databases => ("databases", gather_databases(client).await?),
            GatherSubset::Users => ("users", gather_users(client).await?),
            GatherSubset::Roles => ("roles", gather_roles(client).await?),
            GatherSubset::Settings => ("settings", gather_settings(client).await?),
            GatherSubset::Clusters => ("clusters", gather_clusters(client).await?),
        };
        report.insert(key.to_string(), value);
    }

    Ok(Out::with_data(false, vec![], report))
}
