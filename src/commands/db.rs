//! `chctl db`: creates, drops or renames a database.

use crate::args::{DbArgs, DbState};
use crate::commands::{Out, Runner};
use crate::sql;
use crate::{ChClient, Result, ServerVersion};
use anyhow::{bail, Context};
use tracing::warn;

// TODO: nobody has pinned down the exact release that added database comments;
// the system.databases column is known to be there from 22.x on.
const COMMENT_MIN_YEAR: u32 = 22;

struct Database {
    exists: bool,
    engine: Option<String>,
    comment: Option<String>,
}

impl Database {
    async fn populate(client: &ChClient, name: &str, with_comment: bool) -> Result<Self> {
        let columns = if with_comment {
            "engine, comment"
        } else {
            "engine"
        };
        let query = format!(
            "SELECT {columns} FROM system.databases WHERE name = '{}'",
            sql::escape_string(name)
        );
        let rows = client.fetch_json(&query).await?.require(client.login_user())?;
        let row = match rows.first() {
            Some(row) => row,
            None => {
                return Ok(Self {
                    exists: false,
                    engine: None,
                    comment: None,
                })
            }
        };
        Ok(Self {
            exists: true,
            engine: row.get("engine").and_then(|v| v.as_str()).map(String::from),
            comment: row.get("comment").and_then(|v| v.as_str()).map(String::from),
        })
    }
}

fn supports_comments(version: &ServerVersion) -> bool {
    version.year >= COMMENT_MIN_YEAR
}

fn create_statement(
    name: &str,
    engine: Option<&str>,
    cluster: Option<&str>,
    comment: Option<&str>,
) -> String {
    let mut query = format!("CREATE DATABASE {name}");
    if let Some(engine) = engine {
        query.push_str(&format!(" ENGINE = {engine}"));
    }
    if let Some(cluster) = cluster {
        query.push_str(&format!(" ON CLUSTER {cluster}"));
    }
    if let Some(comment) = comment {
        query.push_str(&format!(" COMMENT '{}'", sql::escape_string(comment)));
    }
    query
}

fn rename_statement(name: &str, target: &str, cluster: Option<&str>) -> String {
    let mut query = format!("RENAME DATABASE {name} TO {target}");
    if let Some(cluster) = cluster {
        query.push_str(&format!(" ON CLUSTER {cluster}"));
    }
    query
}

fn drop_statement(name: &str, cluster: Option<&str>) -> String {
    let mut query = format!("DROP DATABASE {name}");
    if let Some(cluster) = cluster {
        query.push_str(&format!(" ON CLUSTER {cluster}"));
    }
    query
}

pub async fn db(client: &ChClient, check: bool, args: &DbArgs) -> Result<Out<()>> {
    sql::check_name("database", args.name())?;
    if let Some(cluster) = args.cluster() {
        sql::check_name("cluster", cluster)?;
    }

    let version = client.server_version().await?;
    let with_comment = supports_comments(&version);

    let mut comment = args.comment();
    if comment.is_some() && !with_comment {
        warn!(
            "Database comments are supported by ClickHouse versions equal to \
             or higher than 22.*. Ignored."
        );
        comment = None;
    }

    let database = Database::populate(client, args.name(), with_comment).await?;
    let mut runner = Runner::new(client, check);
    let mut changed = false;

    match args.state() {
        DbState::Present => {
            if !database.exists {
                runner
                    .run(create_statement(
                        args.name(),
                        args.engine(),
                        args.cluster(),
                        comment,
                    ))
                    .await?;
                changed = true;
            } else {
                // Neither the engine nor the comment of an existing database can
                // be changed in place, so a difference is only reported.
                if let Some(engine) = args.engine() {
                    if Some(engine) != database.engine.as_deref() {
                        warn!(
                            "The provided engine '{engine}' is different from the \
                             current one '{}'. It is NOT possible to change it. The \
                             recreation of the database is required in order to \
                             change it.",
                            database.engine.as_deref().unwrap_or_default()
                        );
                    }
                }
                if let Some(comment) = comment {
                    if Some(comment) != database.comment.as_deref() {
                        warn!(
                            "The provided comment '{comment}' is different from the \
                             current one '{}'. It is NOT possible to change it. The \
                             recreation of the database is required in order to \
                             change it.",
                            database.comment.as_deref().unwrap_or_default()
                        );
                    }
                }
            }
        }
        DbState::Rename => {
            let target = args
                .target()
                .context("--target is required when --state is rename")?;
            sql::check_name("database", target)?;
            if database.exists {
                runner
                    .run(rename_statement(args.name(), target, args.cluster()))
                    .await?;
                changed = true;
            } else {
                let target_db = Database::populate(client, target, with_comment).await?;
                if target_db.exists {
                    warn!("There is nothing to rename");
                } else {
                    bail!("The {} and {} databases do not exist", args.name(), target);
                }
            }
        }
        DbState::Absent => {
            if database.exists {
                runner
                    .run(drop_statement(args.name(), args.cluster()))
                    .await?;
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
    fn test_supports_comments() {
        let old = ServerVersion::parse("21.8.3.44").unwrap();
        assert!(!supports_comments(&old));
        let first = ServerVersion::parse("22.1.3.7").unwrap();
        assert!(supports_comments(&first));
        let recent = ServerVersion::parse("24.3.1.100-stable").unwrap();
        assert!(supports_comments(&recent));
    }

    #[test]
    fn test_create_statement_clause_order() {
        assert_eq!(
            create_statement("analytics", Some("Memory"), Some("c1"), Some("it's data")),
            "CREATE DATABASE analytics ENGINE = Memory ON CLUSTER c1 COMMENT 'it\\'s data'"
        );
    }

    #[test]
    fn test_create_statement_without_options() {
        assert_eq!(
            create_statement("analytics", None, None, None),
            "CREATE DATABASE analytics"
        );
    }

    #[test]
    fn test_rename_statement() {
        assert_eq!(
            rename_statement("old_db", "new_db", None),
            "RENAME DATABASE old_db TO new_db"
        );
        assert_eq!(
            rename_statement("old_db", "new_db", Some("c1")),
            "RENAME DATABASE old_db TO new_db ON CLUSTER c1"
        );
    }

    #[test]
    fn test_drop_statement() {
        assert_eq!(
            drop_statement("analytics", Some("c1")),
            "DROP DATABASE analytics ON CLUSTER c1"
        );
    }
}
