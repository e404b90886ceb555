use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unpublisher_core::AppConfig;

mod commands;

#[derive(Parser)]
#[command(name = "unpublisher")]
#[command(author, version, about = "Scheduled batch unpublishing of aged content")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Admin bearer token
    #[arg(long, global = true, env = "UNPUBLISHER_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Background daemon running the scheduler, queue worker and IPC server
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// List all policies
    List,
    /// Show status and job log of a policy
    Status {
        policy: String,
    },
    /// Enable, disable or reschedule a policy
    Configure {
        policy: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// Anchor date, YYYY-MM-DD
        #[arg(long)]
        since: Option<String>,
        /// yearly or daily
        #[arg(long)]
        recurrence: Option<String>,
    },
    /// Clear the job log of a policy
    ClearLog {
        policy: String,
    },
    /// Replace the exclusion list of a policy (no ids clears it)
    Exclude {
        policy: String,
        ids: Vec<i64>,
    },
    /// Fire a policy now
    Run {
        policy: String,
    },
    /// Import content items from a JSON array into the local content store
    Import {
        file: String,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the background daemon
    Start,
    /// Stop the background daemon
    Stop,
    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let token = cli.token;

    match cli.command {
        Commands::Daemon { action } => match action {
            DaemonAction::Start => commands::daemon::start(config).await,
            DaemonAction::Stop => commands::daemon::stop().await,
            DaemonAction::Status => commands::daemon::status(&config, token).await,
        },
        Commands::List => commands::list::run(&config, token).await,
        Commands::Status { policy } => commands::status::run(&config, token, &policy).await,
        Commands::Configure {
            policy,
            enable,
            disable,
            since,
            recurrence,
        } => {
            commands::configure::run(&config, token, &policy, enable, disable, since, recurrence)
                .await
        }
        Commands::ClearLog { policy } => commands::clear_log::run(&config, token, &policy).await,
        Commands::Exclude { policy, ids } => {
            commands::exclude::run(&config, token, &policy, ids).await
        }
        Commands::Run { policy } => commands::run::run(&config, token, &policy).await,
        Commands::Import { file } => commands::import::run(&config, &file).await,
    }
}
