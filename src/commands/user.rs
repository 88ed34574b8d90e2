//! `chctl user`: creates or drops a user.

use crate::args::{State, UserArgs};
use crate::commands::{Out, Runner};
use crate::sql;
use crate::{ChClient, Result};

/// Builds the CREATE USER statement together with the form that is safe to
/// report. The report must never leak the password or how it was hashed.
fn create_statements(
    name: &str,
    password: Option<&str>,
    password_type: &str,
    cluster: Option<&str>,
) -> (String, String) {
    let mut query = format!("CREATE USER {name}");
    let mut display = query.clone();
    if let Some(password) = password {
        query.push_str(&format!(
            " IDENTIFIED WITH {password_type} BY '{}'",
            sql::escape_string(password)
        ));
        display.push_str(" IDENTIFIED WITH ***** BY '*****'");
    }
    if let Some(cluster) = cluster {
        let clause = format!(" ON CLUSTER {cluster}");
        query.push_str(&clause);
        display.push_str(&clause);
    }
    (query, display)
}

fn drop_statement(name: &str, cluster: Option<&str>) -> String {
    let mut query = format!("DROP USER {name}");
    if let Some(cluster) = cluster {
        query.push_str(&format!(" ON CLUSTER {cluster}"));
    }
    query
}

pub async fn user(client: &ChClient, check: bool, args: &UserArgs) -> Result<Out<()>> {
    sql::check_name("user", args.name())?;
    if let Some(cluster) = args.cluster() {
        sql::check_name("cluster", cluster)?;
    }

    let query = format!(
        "SELECT 1 FROM system.users WHERE name = '{}' LIMIT 1",
        sql::escape_string(args.name())
    );
    let exists = client.exists(&query).await?.require(client.login_user())?;

    let mut runner = Runner::new(client, check);
    let mut changed = false;

    match args.state() {
        State::Present => {
            if !exists {
                let (query, display) = create_statements(
                    args.name(),
                    args.password(),
                    args.password_type(),
                    args.cluster(),
                );
                runner.run_masked(&query, display).await?;
                changed = true;
            }
        }
        State::Absent => {
            if exists {
                runner.run(drop_statement(args.name(), args.cluster())).await?;
                changed = true;
            }
        }
    }

    Ok(Out::new(changed, runner.into_statements()))
}
