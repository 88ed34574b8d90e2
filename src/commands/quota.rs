//! `chctl quota`: creates, alters or drops a quota.
//!
//! Idempotency works by parsing the server's `SHOW CREATE QUOTA` output back
//! into the same shape as the command-line parameters, normalizing both sides
//! and comparing them. Only a real difference produces an ALTER statement.

use crate::args::{ApplyToMode, QuotaArgs, QuotaLimit, State};
use crate::commands::{Out, Runner};
use crate::sql;
use crate::{ChClient, Result};
use anyhow::{bail, Context};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Number;
use std::collections::BTreeMap;
use tracing::debug;

const INTERVAL_UNITS: &[&str] = &[
    "second", "minute", "hour", "day", "week", "month", "quarter", "year",
];

const MAX_LIMIT_TYPES: &[&str] = &[
    "queries",
    "query_selects",
    "query_inserts",
    "errors",
    "result_rows",
    "result_bytes",
    "read_rows",
    "read_bytes",
    "written_bytes",
    "execution_time",
    "failed_sequential_authentications",
];

// "client_key" must come last so the combined keys are not cut short.
const KEYED_BY_PATTERNS: &[&str] = &[
    "user_name",
    "ip_address",
    "client_key, ?user_name",
    "client_key, ?ip_address",
    "client_key",
];

const NUMBER_PATTERN: &str = r"(?:-?\d+\.?\d*)";

static CREATE_QUOTA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "^CREATE QUOTA (?P<name>{name})\
         (?: ON CLUSTER (?P<cluster>{name}))?\
         (?: KEYED BY (?P<keyed_by>{keyed_by}))?",
        name = sql::NAME_PATTERN,
        keyed_by = KEYED_BY_PATTERNS.join("|"),
    ))
    .expect("hardcoded regex is valid")
});

static LIMITS_RE: Lazy<Regex> = Lazy::new(|| {
    let limit_types = format!(
        "(?:MAX(?:,? (?:{max_types}) = {num})+)|NO LIMITS|TRACKING ONLY",
        max_types = MAX_LIMIT_TYPES.join("|"),
        num = NUMBER_PATTERN,
    );
    Regex::new(&format!(
        "FOR (?:(?P<randomized>RANDOMIZED) )?\
         INTERVAL (?P<interval_number>{num}) (?P<interval_unit>{units}) \
         (?P<limit_type>{limit_types})",
        num = NUMBER_PATTERN,
        units = INTERVAL_UNITS.join("|"),
    ))
    .expect("hardcoded regex is valid")
});

static APPLY_TO_RE: Lazy<Regex> = Lazy::new(|| {
    let roles = format!("(?:(?:{})(?:, )?)+", sql::NAME_PATTERN);
    Regex::new(&format!(
        "^ TO (?P<apply_to>(?:{roles})|ALL|ALL EXCEPT (?:{roles}))$"
    ))
    .expect("hardcoded regex is valid")
});

static USER_OR_ROLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("(?P<name>{})(?:, ?)?", sql::NAME_PATTERN))
        .expect("hardcoded regex is valid")
});

/// The declarative shape of a quota, either as given on the command line or as
/// recovered from a `SHOW CREATE QUOTA` statement.
#[derive(Debug, Clone, Default)]
struct QuotaSpec {
    cluster: Option<String>,
    keyed_by: Option<String>,
    limits: Vec<QuotaLimit>,
    apply_to: Vec<String>,
    apply_to_mode: ApplyToMode,
}

impl QuotaSpec {
    fn from_args(args: &QuotaArgs) -> Self {
        Self {
            cluster: args.cluster().map(String::from),
            keyed_by: args.keyed_by().map(|k| k.to_string()),
            limits: args.limits().to_vec(),
            apply_to: args.apply_to().to_vec(),
            apply_to_mode: args.apply_to_mode(),
        }
    }
}

fn parse_create_statement(create_statement: &str) -> Result<QuotaSpec> {
    let caps = CREATE_QUOTA_RE
        .captures(create_statement)
        .with_context(|| format!("Could not parse '{create_statement}'"))?;

    let mut spec = QuotaSpec {
        cluster: caps
            .name("cluster")
            .map(|m| sql::unquote(m.as_str()).to_string()),
        keyed_by: caps.name("keyed_by").map(|m| m.as_str().to_string()),
        ..Default::default()
    };

    // The limits and apply_to clauses are matched on the remainder of the
    // statement only, so a backquoted name containing such text cannot confuse
    // the parser.
    let mut rest = &create_statement[caps.get(0).expect("capture 0 always exists").end()..];
    let mut last_end = 0;
    for caps in LIMITS_RE.captures_iter(rest) {
        let mut limit = QuotaLimit {
            randomized_start: caps.name("randomized").is_some(),
            interval: format!("{} {}", &caps["interval_number"], &caps["interval_unit"]),
            max: BTreeMap::new(),
            no_limits: None,
            tracking_only: None,
        };
        let limit_type = &caps["limit_type"];
        if limit_type == "NO LIMITS" {
            limit.no_limits = Some(true);
        } else if limit_type == "TRACKING ONLY" {
            limit.tracking_only = Some(true);
        } else if let Some(max_limits) = limit_type.strip_prefix("MAX ") {
            for max_limit in max_limits.split(", ") {
                let (key, value) = max_limit
                    .split_once(" = ")
                    .with_context(|| format!("Could not parse limit '{max_limit}'"))?;
                let number = parse_limit_value(key, value)?;
                limit.max.insert(key.to_string(), number);
            }
        } else {
            bail!("Invalid limit type '{limit_type}'");
        }
        spec.limits.push(limit);
        last_end = caps.get(0).expect("capture 0 always exists").end();
    }
    rest = &rest[last_end..];

    if let Some(caps) = APPLY_TO_RE.captures(rest) {
        let mut apply_to = &caps["apply_to"];
        if apply_to == "ALL" {
            spec.apply_to_mode = ApplyToMode::All;
            apply_to = "";
        } else if let Some(listed) = apply_to.strip_prefix("ALL EXCEPT ") {
            spec.apply_to_mode = ApplyToMode::AllExceptListed;
            apply_to = listed;
        } else {
            spec.apply_to_mode = ApplyToMode::ListedOnly;
        }
        spec.apply_to = USER_OR_ROLE_RE
            .captures_iter(apply_to)
            .map(|caps| sql::unquote(&caps["name"]).to_string())
            .collect();
    }

    Ok(spec)
}

/// The server prints execution_time as a float and everything else as an int.
fn parse_limit_value(key: &str, value: &str) -> Result<Number> {
    let number = if key == "execution_time" {
        let parsed: f64 = value
            .parse()
            .with_context(|| format!("Could not parse limit value '{value}'"))?;
        Number::from_f64(parsed)
            .with_context(|| format!("Could not parse limit value '{value}'"))?
    } else {
        let parsed: i64 = value
            .parse()
            .with_context(|| format!("Could not parse limit value '{value}'"))?;
        Number::from(parsed)
    };
    Ok(number)
}

/// A quota reduced to the parts that matter for comparison. Max values are
/// compared as floats so that `100` on one side equals `100.0` on the other.
#[derive(Debug, Clone, PartialEq)]
struct NormalQuota {
    cluster: Option<String>,
    keyed_by: Option<String>,
    limits: Vec<NormalLimit>,
    apply_to: Vec<String>,
    apply_to_mode: ApplyToMode,
}

#[derive(Debug, Clone, PartialEq)]
struct NormalLimit {
    randomized_start: bool,
    interval: String,
    max: BTreeMap<String, f64>,
    tracking_only: bool,
}

fn normalize(spec: &QuotaSpec) -> NormalQuota {
    let keyed_by = spec.keyed_by.as_ref().map(|keyed_by| {
        keyed_by
            .split(',')
            .map(str::trim)
            .collect::<Vec<&str>>()
            .join(",")
    });

    // No limits is the default, so such intervals drop out entirely.
    let mut limits: Vec<NormalLimit> = spec
        .limits
        .iter()
        .filter(|limit| limit.no_limits != Some(true))
        .map(|limit| NormalLimit {
            randomized_start: limit.randomized_start,
            interval: limit.interval.clone(),
            max: limit
                .max
                .iter()
                .filter_map(|(key, value)| value.as_f64().map(|f| (key.clone(), f)))
                .collect(),
            tracking_only: limit.tracking_only == Some(true),
        })
        .collect();
    limits.sort_by(|a, b| a.interval.cmp(&b.interval));

    let mut apply_to = spec.apply_to.clone();
    apply_to.sort();

    let mut apply_to_mode = spec.apply_to_mode;
    if apply_to_mode == ApplyToMode::AllExceptListed && apply_to.is_empty() {
        apply_to_mode = ApplyToMode::All;
    }

    NormalQuota {
        cluster: spec.cluster.clone(),
        keyed_by,
        limits,
        apply_to,
        apply_to_mode,
    }
}

fn build_statement(action: &str, name: &str, spec: &QuotaSpec) -> Result<String> {
    let mut clauses = vec![format!("{action} QUOTA '{name}'")];

    if let Some(cluster) = &spec.cluster {
        clauses.push(format!("ON CLUSTER '{cluster}'"));
    }

    if let Some(keyed_by) = &spec.keyed_by {
        clauses.push(format!("KEYED BY {keyed_by}"));
    }

    let mut limit_clauses = Vec::new();
    for limit in &spec.limits {
        let mut clause = vec!["FOR".to_string()];
        if limit.randomized_start {
            clause.push("RANDOMIZED".to_string());
        }
        clause.push(format!("INTERVAL {}", limit.interval));
        if !limit.max.is_empty() {
            clause.push("MAX".to_string());
            let max_limits: Vec<String> = limit
                .max
                .iter()
                .map(|(key, value)| format!("{key} = {value}"))
                .collect();
            clause.push(max_limits.join(", "));
        } else if limit.no_limits == Some(true) {
            clause.push("NO LIMITS".to_string());
        } else if limit.tracking_only == Some(true) {
            clause.push("TRACKING ONLY".to_string());
        } else {
            bail!("One of max or no_limits or tracking_only needs to specified");
        }
        limit_clauses.push(clause.join(" "));
    }
    if !limit_clauses.is_empty() {
        clauses.push(limit_clauses.join(", "));
    }

    let mut apply_to_mode = spec.apply_to_mode;
    if apply_to_mode == ApplyToMode::AllExceptListed && spec.apply_to.is_empty() {
        apply_to_mode = ApplyToMode::All;
    }
    if !spec.apply_to.is_empty() && apply_to_mode == ApplyToMode::All {
        bail!("Cannot specify list of user/roles to apply to when apply_to_mode == all");
    }
    if apply_to_mode == ApplyToMode::All {
        clauses.push("TO ALL".to_string());
    } else if !spec.apply_to.is_empty() {
        clauses.push("TO".to_string());
        if apply_to_mode == ApplyToMode::AllExceptListed {
            clauses.push("ALL EXCEPT".to_string());
        }
        clauses.push(spec.apply_to.join(", "));
    }

    Ok(clauses.join(" "))
}

fn validate_limits(limits: &[QuotaLimit]) -> Result<()> {
    for limit in limits {
        let given = usize::from(!limit.max.is_empty())
            + usize::from(limit.no_limits.is_some())
            + usize::from(limit.tracking_only.is_some());
        if given > 1 {
            bail!(
                "Parameters max, no_limits and tracking_only are mutually exclusive \
                 within one limit"
            );
        }
        let unit_is_known = limit
            .interval
            .split_once(' ')
            .is_some_and(|(_, unit)| INTERVAL_UNITS.contains(&unit));
        if !unit_is_known {
            bail!(
                "Invalid interval '{}', expected '<number> <unit>' where unit is \
                 one of: {}",
                limit.interval,
                INTERVAL_UNITS.join(", ")
            );
        }
    }
    Ok(())
}

pub async fn quota(client: &ChClient, check: bool, args: &QuotaArgs) -> Result<Out<()>> {
    sql::check_name("quota", args.name())?;
    validate_limits(args.limits())?;
    for name in args.apply_to() {
        sql::check_name("user or role", name)?;
    }

    let query = format!(
        "SELECT 1 FROM system.quotas WHERE name = '{}' LIMIT 1",
        sql::escape_string(args.name())
    );
    let exists = client.exists(&query).await?.require(client.login_user())?;

    let desired = QuotaSpec::from_args(args);
    let mut runner = Runner::new(client, check);
    let mut changed = false;

    match args.state() {
        State::Present => {
            if !exists {
                runner
                    .run(build_statement("CREATE", args.name(), &desired)?)
                    .await?;
                changed = true;
            } else {
                let rows = client
                    .fetch_strings(&format!("SHOW CREATE QUOTA '{}'", args.name()))
                    .await?
                    .require(client.login_user())?;
                let needs_altering = match rows.first() {
                    None => true,
                    Some(create_statement) => {
                        let current = normalize(&parse_create_statement(create_statement)?);
                        let desired = normalize(&desired);
                        debug!("Current quota (normalized): {current:?}");
                        debug!("Desired quota (normalized): {desired:?}");
                        current != desired
                    }
                };
                if needs_altering {
                    runner
                        .run(build_statement("ALTER", args.name(), &desired)?)
                        .await?;
                    changed = true;
                }
            }
        }
        State::Absent => {
            if exists {
                runner.run(format!("DROP QUOTA '{}'", args.name())).await?;
                changed = true;
            }
        }
    }

    Ok(Out::new(changed, runner.into_statements()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limit(value: serde_json::Value) -> QuotaLimit {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_create_quota_regex_rejects_garbage() {
        for search in ["", "CREATE NOT_QUOTA foo"] {
            assert!(CREATE_QUOTA_RE.captures(search).is_none(), "{search:?}");
        }
    }

    #[test]
    fn test_create_quota_regex() {
        let cases: &[(&str, (&str, Option<&str>, Option<&str>))] = &[
            ("CREATE QUOTA test_quota", ("test_quota", None, None)),
            ("CREATE QUOTA `test quota`", ("`test quota`", None, None)),
            ("CREATE QUOTA `tést quota`", ("`tést quota`", None, None)),
            (
                "CREATE QUOTA test_quota ON CLUSTER test_cluster",
                ("test_quota", Some("test_cluster"), None),
            ),
            (
                "CREATE QUOTA `tést quota` ON CLUSTER `tést cluster`",
                ("`tést quota`", Some("`tést cluster`"), None),
            ),
            (
                "CREATE QUOTA test_quota KEYED BY user_name",
                ("test_quota", None, Some("user_name")),
            ),
            (
                "CREATE QUOTA test_quota KEYED BY non_existent_key",
                ("test_quota", None, None),
            ),
            (
                "CREATE QUOTA `tést quota` ON CLUSTER `tést cluster` KEYED BY client_key,ip_address",
                ("`tést quota`", Some("`tést cluster`"), Some("client_key,ip_address")),
            ),
        ];
        for (search, (name, cluster, keyed_by)) in cases {
            let caps = CREATE_QUOTA_RE.captures(search).unwrap();
            assert_eq!(&caps["name"], *name, "{search}");
            assert_eq!(caps.name("cluster").map(|m| m.as_str()), *cluster, "{search}");
            assert_eq!(caps.name("keyed_by").map(|m| m.as_str()), *keyed_by, "{search}");
        }
    }

    #[test]
    fn test_limits_regex() {
        let cases: &[(&str, (Option<&str>, &str, &str, &str))] = &[
            (
                "FOR INTERVAL 5 minute NO LIMITS",
                (None, "5", "minute", "NO LIMITS"),
            ),
            (
                "FOR RANDOMIZED INTERVAL 0.25 year TRACKING ONLY",
                (Some("RANDOMIZED"), "0.25", "year", "TRACKING ONLY"),
            ),
            (
                "FOR INTERVAL 1 day MAX queries = 100",
                (None, "1", "day", "MAX queries = 100"),
            ),
            (
                "FOR INTERVAL 1 day MAX query_selects = 80, query_inserts = 20",
                (None, "1", "day", "MAX query_selects = 80, query_inserts = 20"),
            ),
            (
                "FOR RANDOMIZED INTERVAL 1000 second MAX execution_time = 100.5, failed_sequential_authentications = 10",
                (
                    Some("RANDOMIZED"),
                    "1000",
                    "second",
                    "MAX execution_time = 100.5, failed_sequential_authentications = 10",
                ),
            ),
        ];
        for (search, (randomized, number, unit, limit_type)) in cases {
            let caps = LIMITS_RE.captures(search).unwrap();
            assert_eq!(caps.name("randomized").map(|m| m.as_str()), *randomized, "{search}");
            assert_eq!(&caps["interval_number"], *number, "{search}");
            assert_eq!(&caps["interval_unit"], *unit, "{search}");
            assert_eq!(&caps["limit_type"], *limit_type, "{search}");
        }
    }

    #[test]
    fn test_apply_to_regex() {
        let cases: &[(&str, &str)] = &[
            (" TO DEFAULT", "DEFAULT"),
            (
                " TO CURRENT_USER, test_user, `tést user`",
                "CURRENT_USER, test_user, `tést user`",
            ),
            (" TO ALL", "ALL"),
            (" TO ALL EXCEPT CURRENT_USER", "ALL EXCEPT CURRENT_USER"),
            (
                " TO ALL EXCEPT CURRENT_USER, test_user, `tést user`",
                "ALL EXCEPT CURRENT_USER, test_user, `tést user`",
            ),
        ];
        for (search, apply_to) in cases {
            let caps = APPLY_TO_RE.captures(search).unwrap();
            assert_eq!(&caps["apply_to"], *apply_to, "{search}");
        }
    }

    #[test]
    fn test_parse_tracking_only_with_listed_users() {
        let spec = parse_create_statement(
            "CREATE QUOTA test_quota FOR INTERVAL 1 hour TRACKING ONLY \
             TO DEFAULT, `tést user`, CURRENT_USER",
        )
        .unwrap();
        assert_eq!(spec.cluster, None);
        assert_eq!(spec.keyed_by, None);
        assert_eq!(
            spec.limits,
            [limit(json!({"interval": "1 hour", "tracking_only": true}))]
        );
        assert_eq!(spec.apply_to, ["DEFAULT", "tést user", "CURRENT_USER"]);
        assert_eq!(spec.apply_to_mode, ApplyToMode::ListedOnly);
    }

    #[test]
    fn test_parse_no_limits_to_all() {
        let spec = parse_create_statement(
            "CREATE QUOTA test_quota FOR RANDOMIZED INTERVAL 1 hour NO LIMITS TO ALL",
        )
        .unwrap();
        assert_eq!(
            spec.limits,
            [limit(json!({
                "randomized_start": true,
                "interval": "1 hour",
                "no_limits": true
            }))]
        );
        assert!(spec.apply_to.is_empty());
        assert_eq!(spec.apply_to_mode, ApplyToMode::All);
    }

    #[test]
    fn test_parse_full_statement() {
        let spec = parse_create_statement(
            "CREATE QUOTA test_quota ON CLUSTER `tést cluster` KEYED BY client_key,user_name \
             FOR RANDOMIZED INTERVAL 1 minute MAX queries = 100, query_selects = 80, query_inserts = 10, \
             FOR INTERVAL 1 day MAX execution_time = 3000.5, read_rows = 1024 \
             TO ALL EXCEPT `tést user`",
        )
        .unwrap();
        assert_eq!(spec.cluster.as_deref(), Some("tést cluster"));
        assert_eq!(spec.keyed_by.as_deref(), Some("client_key,user_name"));
        assert_eq!(
            spec.limits,
            [
                limit(json!({
                    "randomized_start": true,
                    "interval": "1 minute",
                    "max": {"queries": 100, "query_selects": 80, "query_inserts": 10}
                })),
                limit(json!({
                    "interval": "1 day",
                    "max": {"execution_time": 3000.5, "read_rows": 1024}
                })),
            ]
        );
        assert_eq!(spec.apply_to, ["tést user"]);
        assert_eq!(spec.apply_to_mode, ApplyToMode::AllExceptListed);
    }

    #[test]
    fn test_normalize_sorts_apply_to() {
        let spec = QuotaSpec {
            apply_to: vec!["test_user".to_string(), "current_user".to_string()],
            ..Default::default()
        };
        assert_eq!(normalize(&spec).apply_to, ["current_user", "test_user"]);
    }

    #[test]
    fn test_normalize_all_except_listed_with_empty_list_is_all() {
        let spec = QuotaSpec {
            apply_to_mode: ApplyToMode::AllExceptListed,
            ..Default::default()
        };
        assert_eq!(normalize(&spec).apply_to_mode, ApplyToMode::All);
    }

    #[test]
    fn test_normalize_collapses_keyed_by_spacing() {
        let spec = QuotaSpec {
            keyed_by: Some("client_key, user_name".to_string()),
            ..Default::default()
        };
        assert_eq!(normalize(&spec).keyed_by.as_deref(), Some("client_key,user_name"));
    }

    #[test]
    fn test_normalize_sorts_limits_and_drops_no_limits() {
        let spec = QuotaSpec {
            limits: vec![
                limit(json!({"interval": "5 minute", "tracking_only": true})),
                limit(json!({"interval": "2 hour", "no_limits": true})),
                limit(json!({"interval": "1 minute", "max": {"queries": 10}})),
            ],
            ..Default::default()
        };
        let normalized = normalize(&spec);
        assert_eq!(normalized.limits.len(), 2);
        assert_eq!(normalized.limits[0].interval, "1 minute");
        assert_eq!(normalized.limits[1].interval, "5 minute");
    }

    #[test]
    fn test_normalize_compares_max_values_numerically() {
        let a = QuotaSpec {
            limits: vec![limit(json!({"interval": "1 day", "max": {"queries": 100}}))],
            ..Default::default()
        };
        let b = QuotaSpec {
            limits: vec![limit(json!({"interval": "1 day", "max": {"queries": 100.0}}))],
            ..Default::default()
        };
        assert_eq!(normalize(&a), normalize(&b));
    }

    #[test]
    fn test_roundtrip_statement_is_stable() {
        let spec = QuotaSpec {
            keyed_by: Some("user_name".to_string()),
            limits: vec![limit(json!({
                "interval": "15 minute",
                "tracking_only": true
            }))],
            apply_to_mode: ApplyToMode::All,
            ..Default::default()
        };
        let statement = build_statement("CREATE", "tracking_only", &spec).unwrap();
        assert_eq!(
            statement,
            "CREATE QUOTA 'tracking_only' KEYED BY user_name \
             FOR INTERVAL 15 minute TRACKING ONLY TO ALL"
        );
        let unquoted = statement.replace('\'', "");
        assert_eq!(normalize(&parse_create_statement(&unquoted).unwrap()), normalize(&spec));
    }

    #[test]
    fn test_build_statement_full() {
        let spec = QuotaSpec {
            cluster: Some("test_cluster".to_string()),
            keyed_by: Some("ip_address".to_string()),
            limits: vec![
                limit(json!({
                    "randomized_start": true,
                    "interval": "1 minute",
                    "max": {"queries": 100, "errors": 10}
                })),
                limit(json!({"interval": "1 day", "no_limits": true})),
            ],
            apply_to: vec!["alice".to_string(), "bob".to_string()],
            apply_to_mode: ApplyToMode::AllExceptListed,
        };
        assert_eq!(
            build_statement("ALTER", "test_quota", &spec).unwrap(),
            "ALTER QUOTA 'test_quota' ON CLUSTER 'test_cluster' KEYED BY ip_address \
             FOR RANDOMIZED INTERVAL 1 minute MAX errors = 10, queries = 100, \
             FOR INTERVAL 1 day NO LIMITS TO ALL EXCEPT alice, bob"
        );
    }

    #[test]
    fn test_build_statement_rejects_empty_limit() {
        let spec = QuotaSpec {
            limits: vec![limit(json!({"interval": "1 day"}))],
            ..Default::default()
        };
        assert!(build_statement("CREATE", "q", &spec).is_err());
    }

    #[test]
    fn test_build_statement_rejects_apply_to_with_mode_all() {
        let spec = QuotaSpec {
            apply_to: vec!["alice".to_string()],
            apply_to_mode: ApplyToMode::All,
            ..Default::default()
        };
        assert!(build_statement("CREATE", "q", &spec).is_err());
    }

    #[test]
    fn test_validate_limits() {
        assert!(validate_limits(&[limit(json!({"interval": "1 day", "no_limits": true}))]).is_ok());
        assert!(validate_limits(&[limit(
            json!({"interval": "1 day", "no_limits": true, "tracking_only": true})
        )])
        .is_err());
        assert!(validate_limits(&[limit(json!({"interval": "1 fortnight", "no_limits": true}))])
            .is_err());
    }
}
