use chctl::args::{Args, Command};
use chctl::{commands, ChClient, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let common = args.common();

    // Route to appropriate command handler. cfg-info is the only command that
    // never talks to a server.
    let _: () = match args.command() {
        Command::Db(db_args) => {
            let client = ChClient::connect(common)?;
            commands::db(&client, common.check(), db_args).await?.print()
        }

        Command::User(user_args) => {
            let client = ChClient::connect(common)?;
            commands::user(&client, common.check(), user_args)
                .await?
                .print()
        }

        Command::Role(role_args) => {
            let client = ChClient::connect(common)?;
            commands::role(&client, common.check(), role_args)
                .await?
                .print()
        }

        Command::Quota(quota_args) => {
            let client = ChClient::connect(common)?;
            commands::quota(&client, common.check(), quota_args)
                .await?
                .print()
        }

        Command::Grants(grants_args) => {
            let client = ChClient::connect(common)?;
            commands::grants(&client, common.check(), grants_args)
                .await?
                .print()
        }

        Command::Execute(execute_args) => {
            if common.check() {
                anyhow::bail!("The execute command does not support check mode");
            }
            let client = ChClient::connect(common)?;
            commands::execute(&client, execute_args).await?.print()
        }

        Command::Info(info_args) => {
            let client = ChClient::connect(common)?;
            commands::info(&client, info_args).await?.print()
        }

        Command::CfgInfo(cfg_info_args) => commands::cfg_info(cfg_info_args).await?.print(),
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_CRATE_NAME"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
