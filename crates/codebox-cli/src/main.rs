// ABOUTME: Entry point for the codebox command-line client
// ABOUTME: Parses flags, resolves configuration and dispatches subcommands

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use codebox_client::ClientConfig;

#[derive(Parser)]
#[command(name = "codebox")]
#[command(about = "Talk to a codebox workspace from the terminal")]
#[command(version)]
struct Cli {
    /// Server that relative base addresses resolve against
    #[arg(long, global = true, env = "CODEBOX_ORIGIN")]
    origin: Option<String>,

    /// Base address of the codebox (e.g. /ws1 or https://box.example.com/ws1)
    #[arg(long, global = true, env = "CODEBOX_URL")]
    base: Option<String>,

    /// Load configuration from this file instead of ~/.config/codebox/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the client library
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the box status document
    Status,

    /// Join the box
    Join {
        /// JSON object sent as join arguments
        #[arg(long)]
        args: Option<String>,
    },

    /// Tell the box you are still here
    Ping,

    /// List collaborators
    Collaborators,

    /// Show git status of the workspace
    GitStatus,

    /// Show the working tree diff
    Changes,

    /// List commits not yet pushed
    CommitsPending,

    /// Search files by name
    Search {
        query: String,
    },

    /// Commit the workspace
    Commit {
        #[arg(short, long)]
        message: String,
    },

    /// Pull then push the workspace
    Sync,

    /// Print the proxy URL for a target
    ProxyUrl {
        url: String,
    },

    /// Stream connectivity and events until Ctrl-C
    Watch {
        /// Write logs to ~/.config/codebox/watch.log instead of stderr
        #[arg(long)]
        log_file: bool,
    },

    /// Print the default config file location
    ConfigPath,

    /// Write a default config file if none exists
    ConfigInit,
}

/// File config with command-line and environment overrides applied.
fn resolve_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::load().context("Failed to load config")?,
    };

    if let Some(origin) = &cli.origin {
        config.origin = origin.clone();
    }
    if let Some(base) = &cli.base {
        config.base_address = Some(base.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Watch { log_file: true } => codebox_log::init_file("watch"),
        _ => codebox_log::init(cli.verbose),
    }

    match &cli.command {
        Commands::ConfigPath => {
            println!("{}", ClientConfig::config_path().display());
            return Ok(());
        }
        Commands::ConfigInit => return commands::config_init(),
        Commands::ProxyUrl { url } => {
            let config = resolve_config(&cli)?;
            return commands::proxy_url(&config, url);
        }
        _ => {}
    }

    let config = resolve_config(&cli)?;
    let codebox = commands::connect(&config).await?;

    match cli.command {
        Commands::Status => commands::print_result("status", codebox.rpc().status().await),
        Commands::Join { args } => {
            let args = commands::parse_args(args.as_deref())?;
            commands::print_result("join", codebox.rpc().join(args).await)
        }
        Commands::Ping => commands::print_result("ping", codebox.rpc().ping().await),
        Commands::Collaborators => {
            commands::print_result("collaborators", codebox.rpc().collaborators().await)
        }
        Commands::GitStatus => commands::print_result("git status", codebox.rpc().git_status().await),
        Commands::Changes => commands::print_result("changes", codebox.rpc().changes().await),
        Commands::CommitsPending => {
            commands::print_result("commits pending", codebox.rpc().commits_pending().await)
        }
        Commands::Search { query } => {
            commands::print_result("search", codebox.rpc().search_files(&query).await)
        }
        Commands::Commit { message } => {
            let args = serde_json::json!({ "message": message });
            commands::print_result("commit", codebox.rpc().commit(Some(args)).await)
        }
        Commands::Sync => commands::print_result("sync", codebox.rpc().sync(None).await),
        Commands::Watch { .. } => commands::watch(&codebox).await,
        Commands::ProxyUrl { .. } | Commands::ConfigPath | Commands::ConfigInit => Ok(()),
    }
}
