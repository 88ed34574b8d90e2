//! Connection handling and query plumbing on top of the `clickhouse` HTTP driver.

use crate::args::Common;
use crate::Result;
use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

// The server phrases a code 497 (ACCESS_DENIED) error with this text.
const NOT_ENOUGH_PRIVILEGES: &str = "Not enough privileges";
const ACCESS_DENIED: &str = "ACCESS_DENIED";

/// The outcome of an introspection query: either rows, or a privilege denial that
/// info-gathering callers may tolerate and report as a partial result.
#[derive(Debug)]
pub enum Fetch<T> {
    Rows(T),
    Denied,
}

impl<T> Fetch<T> {
    /// Unwraps the rows, failing with a message naming the login user when the
    /// server denied access.
    pub fn require(self, login_user: Option<&str>) -> Result<T> {
        match self {
            Fetch::Rows(rows) => Ok(rows),
            Fetch::Denied => bail!(
                "Not enough privileges for user: {}",
                login_user.unwrap_or("default")
            ),
        }
    }
}

/// A thin wrapper over [`clickhouse::Client`] that keeps the login user around for
/// error messages and maps privilege errors to [`Fetch::Denied`] on reads.
#[derive(Clone)]
pub struct ChClient {
    inner: clickhouse::Client,
    login_user: Option<String>,
}

impl ChClient {
    /// Builds a client from the common connection flags. Credentials and database
    /// are only set when given so the driver's defaults apply otherwise.
    pub fn connect(common: &Common) -> Result<Self> {
        let url = Url::parse(common.url())
            .with_context(|| format!("Invalid server URL '{}'", common.url()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!(
                "The ClickHouse HTTP interface requires an http or https URL, got '{}'",
                common.url()
            );
        }

        let mut client = clickhouse::Client::default().with_url(common.url());
        if let Some(user) = common.login_user() {
            client = client.with_user(user);
        }
        if let Some(password) = common.login_password() {
            client = client.with_password(password);
        }
        if let Some(db) = common.login_db() {
            client = client.with_database(db);
        }
        if let Some(flatten) = common.flatten_nested() {
            client = client.with_option("flatten_nested", flatten.to_string());
        }

        Ok(Self {
            inner: client,
            login_user: common.login_user().map(str::to_string),
        })
    }

    pub fn login_user(&self) -> Option<&str> {
        self.login_user.as_deref()
    }

    /// Runs a data-modifying statement. Privilege errors are fatal here.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        debug!("Executing: {sql}");
        self.inner
            .query(sql)
            .execute()
            .await
            .with_context(|| format!("Failed to execute query: {sql}"))
    }

    /// Runs a query whose rows each consist of a single String column, such as
    /// `SHOW CREATE ...` or `SHOW GRANTS FOR ...`.
    pub async fn fetch_strings(&self, sql: &str) -> Result<Fetch<Vec<String>>> {
        debug!("Fetching: {sql}");
        match self.inner.query(sql).fetch_all::<String>().await {
            Ok(rows) => Ok(Fetch::Rows(rows)),
            Err(e) if is_access_denied(&e) => Ok(Fetch::Denied),
            Err(e) => Err(
                anyhow::Error::new(e).context(format!("Failed to execute query: {sql}"))
            ),
        }
    }

    /// Runs a query and returns each row as a JSON object keyed by column name.
    pub async fn fetch_json(&self, sql: &str) -> Result<Fetch<Vec<Value>>> {
        debug!("Fetching: {sql}");
        let mut cursor = match self.inner.query(sql).fetch_bytes("JSONEachRow") {
            Ok(cursor) => cursor,
            Err(e) if is_access_denied(&e) => return Ok(Fetch::Denied),
            Err(e) => {
                return Err(
                    anyhow::Error::new(e).context(format!("Failed to execute query: {sql}"))
                )
            }
        };
        let mut bytes = Vec::new();
        loop {
            match cursor.next().await {
                Ok(Some(chunk)) => bytes.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) if is_access_denied(&e) => return Ok(Fetch::Denied),
                Err(e) => {
                    return Err(
                        anyhow::Error::new(e).context(format!("Failed to execute query: {sql}"))
                    )
                }
            }
        }
        let rows = serde_json::Deserializer::from_slice(&bytes)
            .into_iter::<Value>()
            .collect::<std::result::Result<Vec<Value>, _>>()
            .with_context(|| format!("Failed to parse rows returned for query: {sql}"))?;
        Ok(Fetch::Rows(rows))
    }

    /// True when the query returns at least one row.
    pub async fn exists(&self, sql: &str) -> Result<Fetch<bool>> {
        match self.fetch_json(sql).await? {
            Fetch::Rows(rows) => Ok(Fetch::Rows(!rows.is_empty())),
            Fetch::Denied => Ok(Fetch::Denied),
        }
    }

    /// Probes the server with `SELECT version()` and parses the result.
    pub async fn server_version(&self) -> Result<ServerVersion> {
        let rows = self
            .fetch_strings("SELECT version()")
            .await?
            .require(self.login_user())?;
        let raw = rows.first().context("SELECT version() returned no rows")?;
        ServerVersion::parse(raw)
    }
}

fn is_access_denied(e: &clickhouse::error::Error) -> bool {
    let text = e.to_string();
    text.contains(NOT_ENOUGH_PRIVILEGES) || text.contains(ACCESS_DENIED)
}

/// A parsed ClickHouse server version such as `23.12.2.59` or `24.3.1.100-stable`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServerVersion {
    pub raw: String,
    pub year: u32,
    pub feature: u32,
    pub maintenance: u32,
    pub build: u32,
    /// The optional build type suffix after the dash, e.g. `stable` or `testing`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ServerVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() < 4 {
            bail!("Unexpected server version format: '{raw}'");
        }
        let (build, kind) = match parts[3].split_once('-') {
            Some((build, kind)) => (build, Some(kind.to_string())),
            None => (parts[3], None),
        };
        Ok(Self {
            raw: raw.to_string(),
            year: component(parts[0], raw)?,
            feature: component(parts[1], raw)?,
            maintenance: component(parts[2], raw)?,
            build: component(build, raw)?,
            kind,
        })
    }
}

fn component(part: &str, raw: &str) -> Result<u32> {
    part.parse()
        .with_context(|| format!("Unexpected server version format: '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        let version = ServerVersion::parse("23.12.2.59").unwrap();
        assert_eq!(version.raw, "23.12.2.59");
        assert_eq!(version.year, 23);
        assert_eq!(version.feature, 12);
        assert_eq!(version.maintenance, 2);
        assert_eq!(version.build, 59);
        assert_eq!(version.kind, None);
    }

    #[test]
    fn test_parse_version_with_type() {
        let version = ServerVersion::parse("24.3.1.100-stable").unwrap();
        assert_eq!(version.build, 100);
        assert_eq!(version.kind.as_deref(), Some("stable"));
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert!(ServerVersion::parse("23.12.2").is_err());
        assert!(ServerVersion::parse("not a version").is_err());
        assert!(ServerVersion::parse("a.b.c.d").is_err());
    }

    #[test]
    fn test_version_serializes_type_field() {
        let version = ServerVersion::parse("23.12.2.59").unwrap();
        let json = serde_json::to_value(&version).unwrap();
        assert!(json.get("type").is_some());
        assert!(json.get("kind").is_none());
    }
}
