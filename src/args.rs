//! These structs provide the CLI interface for the chctl CLI.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_subscriber::filter::LevelFilter;

/// chctl: A command-line tool for declaratively managing a ClickHouse server.
///
/// Each subcommand describes a desired state (a database, user, role, quota or set of
/// grants that should exist or not exist), connects to the server over the HTTP
/// interface, issues the SQL statements needed to reach that state, and prints a JSON
/// report with a `changed` flag and the executed statements to stdout. Logs go to
/// stderr.
///
/// With --check, statements are computed and reported but never executed.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create, drop or rename a database.
    Db(DbArgs),
    /// Create or drop a user.
    User(UserArgs),
    /// Create, alter or drop a role.
    Role(RoleArgs),
    /// Create, alter or drop a quota.
    Quota(QuotaArgs),
    /// Grant, update or revoke privileges for a user or role.
    Grants(GrantsArgs),
    /// Execute an arbitrary query and print the result rows.
    Execute(ExecuteArgs),
    /// Gather server information from the system tables.
    Info(InfoArgs),
    /// Read a ClickHouse server config file (YAML or XML) and print it as JSON.
    CfgInfo(CfgInfoArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG. See the tracing-subscriber crate for
    /// instructions.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The HTTP(S) URL of the ClickHouse server.
    #[arg(long, env = "CLICKHOUSE_URL", default_value = "http://localhost:8123")]
    url: String,

    /// The user to connect as. If not passed, the driver's default applies.
    #[arg(long, env = "CLICKHOUSE_USER")]
    login_user: Option<String>,

    /// The password to connect with. If not passed, the driver's default applies.
    #[arg(long, env = "CLICKHOUSE_PASSWORD", hide_env_values = true)]
    login_password: Option<String>,

    /// The database to connect to. If not passed, the driver's default applies.
    #[arg(long)]
    login_db: Option<String>,

    /// Sets the flatten_nested setting on the connection.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    flatten_nested: Option<u8>,

    /// Check mode: report the statements that would run without executing them.
    #[arg(long)]
    check: bool,
}

impl Common {
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn login_user(&self) -> Option<&str> {
        self.login_user.as_deref()
    }

    pub fn login_password(&self) -> Option<&str> {
        self.login_password.as_deref()
    }

    pub fn login_db(&self) -> Option<&str> {
        self.login_db.as_deref()
    }

    pub fn flatten_nested(&self) -> Option<u8> {
        self.flatten_nested
    }

    pub fn check(&self) -> bool {
        self.check
    }
}

/// Whether the resource should exist.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    #[default]
    Present,
    Absent,
}

serde_plain::derive_display_from_serialize!(State);
serde_plain::derive_fromstr_from_deserialize!(State);

/// Desired state of a database. Unlike other resources, a database can also be renamed.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbState {
    #[default]
    Present,
    Absent,
    Rename,
}

serde_plain::derive_display_from_serialize!(DbState);
serde_plain::derive_fromstr_from_deserialize!(DbState);

/// Args for the `chctl db` command.
#[derive(Debug, Parser, Clone)]
pub struct DbArgs {
    /// Database name.
    name: String,

    /// Desired state: "present", "absent" or "rename".
    #[arg(long, default_value_t = DbState::Present)]
    state: DbState,

    /// Database engine, e.g. Atomic or Memory. Only applied on creation; an engine
    /// change on an existing database is reported as a warning.
    #[arg(long)]
    engine: Option<String>,

    /// Database comment. Only applied on creation and only supported by servers of
    /// version 22 and above.
    #[arg(long)]
    comment: Option<String>,

    /// Run the statement on all hosts of the named cluster.
    #[arg(long)]
    cluster: Option<String>,

    /// The new name when --state rename.
    #[arg(long)]
    target: Option<String>,
}

impl DbArgs {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DbState {
        self.state
    }

    pub fn engine(&self) -> Option<&str> {
        self.engine.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

/// Args for the `chctl user` command.
#[derive(Debug, Parser, Clone)]
pub struct UserArgs {
    /// User name.
    name: String,

    /// Desired state: "present" or "absent".
    #[arg(long, default_value_t = State::Present)]
    state: State,

    /// The user's password, plain or pre-hashed depending on --password-type.
    #[arg(long)]
    password: Option<String>,

    /// How the password is transmitted: plaintext_password, sha256_password,
    /// sha256_hash and so on. See the CREATE USER documentation for the full list.
    #[arg(long, default_value = "sha256_password")]
    password_type: String,

    /// Run the statement on all hosts of the named cluster.
    #[arg(long)]
    cluster: Option<String>,
}

impl UserArgs {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn password_type(&self) -> &str {
        &self.password_type
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }
}

/// Args for the `chctl role` command.
#[derive(Debug, Parser, Clone)]
pub struct RoleArgs {
    /// Role name.
    name: String,

    /// Desired state: "present" or "absent".
    #[arg(long, default_value_t = State::Present)]
    state: State,

    /// Run the statement on all hosts of the named cluster.
    #[arg(long)]
    cluster: Option<String>,

    /// A SETTINGS clause the role should carry, e.g. "max_memory_usage = 10000".
    /// Repeat for multiple settings. An existing role is altered when its settings
    /// differ from the ones given here.
    #[arg(long = "settings")]
    settings: Vec<String>,
}

impl RoleArgs {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn settings(&self) -> &[String] {
        &self.settings
    }
}

/// The key a quota is tracked by.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyedBy {
    UserName,
    IpAddress,
    ClientKey,
    #[serde(rename = "client_key,user_name")]
    ClientKeyUserName,
    #[serde(rename = "client_key,ip_address")]
    ClientKeyIpAddress,
}

serde_plain::derive_display_from_serialize!(KeyedBy);
serde_plain::derive_fromstr_from_deserialize!(KeyedBy);

/// Which users/roles a quota applies to.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyToMode {
    #[default]
    ListedOnly,
    All,
    AllExceptListed,
}

serde_plain::derive_display_from_serialize!(ApplyToMode);
serde_plain::derive_fromstr_from_deserialize!(ApplyToMode);

/// One interval limit of a quota, as given on the command line in JSON form.
///
/// Exactly one of `max`, `no_limits` or `tracking_only` must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaLimit {
    /// Whether the interval's start is randomized.
    #[serde(default)]
    pub randomized_start: bool,

    /// The interval, in the form "<number> <unit>" where unit is one of second,
    /// minute, hour, day, week, month, quarter or year.
    pub interval: String,

    /// Maximum values to enforce, keyed by limit name (queries, errors, read_bytes,
    /// execution_time, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub max: BTreeMap<String, serde_json::Number>,

    /// Don't apply any limits on this interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_limits: Option<bool>,

    /// Only track usage on this interval instead of enforcing limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_only: Option<bool>,
}

/// A JSON list of [`QuotaLimit`] values, parsed from a single CLI argument.
#[derive(Debug, Clone)]
pub struct QuotaLimits(Vec<QuotaLimit>);

impl QuotaLimits {
    pub fn as_slice(&self) -> &[QuotaLimit] {
        &self.0
    }
}

impl FromStr for QuotaLimits {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map(QuotaLimits)
    }
}

/// Args for the `chctl quota` command.
#[derive(Debug, Parser, Clone)]
pub struct QuotaArgs {
    /// Quota name.
    name: String,

    /// Desired state: "present" or "absent".
    #[arg(long, default_value_t = State::Present)]
    state: State,

    /// Run the statement on all hosts of the named cluster.
    #[arg(long)]
    cluster: Option<String>,

    /// Key the quota by user_name, ip_address, client_key, "client_key,user_name"
    /// or "client_key,ip_address". Default is to not key.
    #[arg(long)]
    keyed_by: Option<KeyedBy>,

    /// The interval limits as a JSON list, e.g.
    /// '[{"interval": "5 minute", "max": {"queries": 100}}]'.
    #[arg(long)]
    limits: Option<QuotaLimits>,

    /// A user or role the quota applies to; may include the special names "default"
    /// and "current_user". Repeat for multiple grantees. Invalid with
    /// --apply-to-mode all.
    #[arg(long = "apply-to")]
    apply_to: Vec<String>,

    /// Whether the quota applies to the listed grantees only, to all, or to all
    /// except the listed ones.
    #[arg(long, default_value_t = ApplyToMode::ListedOnly)]
    apply_to_mode: ApplyToMode,
}

impl QuotaArgs {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn keyed_by(&self) -> Option<KeyedBy> {
        self.keyed_by
    }

    pub fn limits(&self) -> &[QuotaLimit] {
        self.limits.as_ref().map(QuotaLimits::as_slice).unwrap_or(&[])
    }

    pub fn apply_to(&self) -> &[String] {
        &self.apply_to
    }

    pub fn apply_to_mode(&self) -> ApplyToMode {
        self.apply_to_mode
    }
}

/// A set of privileges on one database object, as given on the command line in JSON
/// form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivilegeSet {
    /// The object to grant on: "*.*" for global, "db.*" for a whole database, or
    /// "db.table".
    pub object: String,

    /// Privilege name (e.g. "SELECT", "CREATE USER", "SELECT(col1, col2)") mapped to
    /// whether it is granted WITH GRANT OPTION.
    pub privs: BTreeMap<String, bool>,

    /// When set, overrides the grant-option flag of every privilege in this set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_option: Option<bool>,
}

/// A JSON list of [`PrivilegeSet`] values, parsed from a single CLI argument.
#[derive(Debug, Clone)]
pub struct Privileges(Vec<PrivilegeSet>);

impl Privileges {
    pub fn as_slice(&self) -> &[PrivilegeSet] {
        &self.0
    }
}

impl FromStr for Privileges {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map(Privileges)
    }
}

/// Args for the `chctl grants` command.
#[derive(Debug, Parser, Clone)]
pub struct GrantsArgs {
    /// The user or role to grant, update or revoke privileges for.
    grantee: String,

    /// "present" grants or updates privileges; "absent" revokes everything the
    /// grantee currently has.
    #[arg(long, default_value_t = State::Present)]
    state: State,

    /// Revoke privileges not listed in --privileges before granting the new ones,
    /// instead of appending to what the grantee already has.
    #[arg(long)]
    exclusive: bool,

    /// The privileges as a JSON list, e.g.
    /// '[{"object": "foo.*", "privs": {"SELECT": true, "INSERT": false}}]'.
    /// Required with --state present.
    #[arg(long)]
    privileges: Option<Privileges>,

    /// Run the statements on all hosts of the named cluster.
    #[arg(long)]
    cluster: Option<String>,

    /// Include before/after grant maps in the report. Implied by --check.
    #[arg(long)]
    diff: bool,
}

impl GrantsArgs {
    pub fn grantee(&self) -> &str {
        &self.grantee
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn privileges(&self) -> Option<&[PrivilegeSet]> {
        self.privileges.as_ref().map(Privileges::as_slice)
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn diff(&self) -> bool {
        self.diff
    }
}

/// A JSON object of named query parameters, parsed from a single CLI argument.
#[derive(Debug, Clone)]
pub struct Params(serde_json::Map<String, serde_json::Value>);

impl Params {
    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }
}

impl FromStr for Params {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map(Params)
    }
}

/// Args for the `chctl execute` command.
#[derive(Debug, Parser, Clone)]
pub struct ExecuteArgs {
    /// The query to execute.
    query: String,

    /// Named parameters as a JSON object. Each {name} placeholder in the query whose
    /// name appears here is replaced with the properly quoted value before execution,
    /// e.g. --params '{"a": "one", "n": 3}'.
    #[arg(long)]
    params: Option<Params>,
}

impl ExecuteArgs {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn params(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.params.as_ref().map(Params::as_map)
    }
}

/// The introspection subsets `chctl info` can gather.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum GatherSubset {
    Version,
    Databases,
    Users,
    Roles,
    Settings,
    Clusters,
}

serde_plain::derive_display_from_serialize!(GatherSubset);
serde_plain::derive_fromstr_from_deserialize!(GatherSubset);

/// Args for the `chctl info` command.
#[derive(Debug, Parser, Clone)]
pub struct InfoArgs {
    /// Limit gathering to the listed subsets. Repeat for multiple subsets; the
    /// default is to gather everything.
    #[arg(long = "gather", value_enum)]
    gather: Vec<GatherSubset>,
}

impl InfoArgs {
    pub fn gather(&self) -> &[GatherSubset] {
        &self.gather
    }
}

/// Args for the `chctl cfg-info` command.
#[derive(Debug, Parser, Clone)]
pub struct CfgInfoArgs {
    /// Path to the config file. Files ending in .xml are parsed as XML, everything
    /// else as YAML.
    path: PathBuf,
}

impl CfgInfoArgs {
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
