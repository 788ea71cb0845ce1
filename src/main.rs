//! approval-session - session token manager for the content-approval dashboard
//!
//! Stores the dashboard login, keeps it fresh, and sends authenticated
//! requests from the terminal.

use anyhow::Result;
use approval_session::api::{self, ApiClient};
use approval_session::auth::{self, LoginArgs};
use approval_session::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "approval-session")]
#[command(about = "Session token manager for the content-approval dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Send requests without tokens (local development without a backend)
    #[arg(long, global = true)]
    bypass_auth: bool,

    /// Override the API base URL from the config file
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the tokens of a completed login
    Login {
        /// Access token issued by the dashboard API
        #[arg(long)]
        access_token: Option<String>,

        /// Refresh token issued by the dashboard API
        #[arg(long)]
        refresh_token: Option<String>,

        /// User profile JSON to cache
        #[arg(long)]
        profile: Option<String>,

        /// Create a one-hour offline credential instead
        #[arg(long, conflicts_with = "access_token")]
        offline: bool,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current session status
    Status,

    /// Exchange the refresh token for a new access token now
    Refresh,

    /// Send an authenticated request
    Fetch {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Extra header, as 'Name: value' (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body (sent as JSON when it parses as JSON)
        #[arg(short, long)]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load()?;
    if cli.bypass_auth {
        config.bypass_auth = true;
    }
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let session = config.open_session()?;

    match cli.command {
        Commands::Login {
            access_token,
            refresh_token,
            profile,
            offline,
        } => {
            tracing::info!("Storing login...");
            auth::login(
                &session,
                LoginArgs {
                    access_token,
                    refresh_token,
                    profile,
                    offline,
                },
            )
            .await?;
        }
        Commands::Logout => {
            auth::logout(&session).await?;
        }
        Commands::Status => {
            auth::status(&session).await?;
        }
        Commands::Refresh => {
            auth::refresh_now(&session).await?;
        }
        Commands::Fetch {
            path,
            method,
            headers,
            data,
        } => {
            // Raise the gate before spawning so the request cannot slip past it.
            let gate = session.begin_initialization();
            let restore = {
                let session = session.clone();
                tokio::spawn(async move { session.restore(gate).await })
            };
            let client = ApiClient::new(config.base_url()?, session);
            let result = api::fetch(&client, &method, &path, &headers, data).await;
            if let Err(e) = restore.await {
                tracing::warn!("Session restore task failed: {}", e);
            }
            result?;
        }
    }

    Ok(())
}
