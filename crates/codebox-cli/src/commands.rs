// ABOUTME: Subcommand implementations for the codebox CLI
// ABOUTME: Connects a Codebox, prints RPC results and streams events for watch

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use codebox_client::{ClientConfig, Codebox, CodeboxError, WorkspaceDescriptor};

fn descriptor(config: &ClientConfig) -> Result<WorkspaceDescriptor> {
    let Some(base) = config.base_address.clone() else {
        bail!("No codebox base address. Use --base, set CODEBOX_URL or add base_address to the config file.");
    };
    Ok(WorkspaceDescriptor::new(base))
}

/// Build a client attached to the configured base address, without
/// opening the events namespace.
pub async fn connect(config: &ClientConfig) -> Result<Codebox> {
    let codebox = Codebox::new(config).context("Failed to create codebox client")?;
    let descriptor = descriptor(config)?.with_listen_events(false);
    codebox
        .configure(&descriptor)
        .await
        .context("Failed to configure codebox client")?;
    Ok(codebox)
}

pub fn proxy_url(config: &ClientConfig, target: &str) -> Result<()> {
    let codebox = Codebox::new(config).context("Failed to create codebox client")?;
    codebox.connection().configure(&descriptor(config)?);
    println!("{}", codebox.proxy_url(target)?);
    Ok(())
}

/// Parse `--args` as a JSON object.
pub fn parse_args(raw: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("--args must be valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object, got {value}");
    }
    Ok(Some(value))
}

pub fn print_result(what: &str, result: codebox_client::Result<Value>) -> Result<()> {
    match result {
        Ok(value) => {
            let rendered = serde_json::to_string_pretty(&value).context("Failed to render response")?;
            println!("{rendered}");
            Ok(())
        }
        Err(CodeboxError::Rpc(error)) => {
            eprintln!("{} {}", format!("{what} failed:").red().bold(), error);
            bail!("the codebox rejected {what}")
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("{what} request failed"))),
    }
}

/// Write the default config to `path` unless a file is already there.
/// Returns whether a file was written.
pub fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, ClientConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

pub fn config_init() -> Result<()> {
    let path = ClientConfig::config_path();
    if write_default_config(&path)? {
        println!("{} {}", "Created".green(), path.display());
    } else {
        println!("{} {}", "Already exists:".yellow(), path.display());
    }
    Ok(())
}

fn status_label(connected: bool) -> String {
    if connected {
        "connected".green().to_string()
    } else {
        "disconnected".red().to_string()
    }
}

/// Print status changes and translated events until Ctrl-C.
pub async fn watch(codebox: &Codebox) -> Result<()> {
    let mut events = codebox.events();
    codebox.on_status(|connected: bool| {
        println!("{} {}", "status".dimmed(), status_label(connected));
    });

    codebox
        .listen_events()
        .await
        .context("Failed to open the events channel")?;
    println!(
        "{} {}",
        "Watching".bold(),
        codebox.connection().base_address().unwrap_or_default().cyan()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
            received = events.recv() => match received {
                Ok(event) => println!("{} {}", event.name.cyan(), event.payload),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event output fell behind");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
