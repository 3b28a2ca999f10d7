// ABOUTME: Shared logging setup for codebox binaries
// ABOUTME: init() logs to stderr, init_file() appends to a file under the config dir

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Default stderr level: INFO, or DEBUG for the codebox crates when verbose.
fn stderr_filter(verbose: bool) -> EnvFilter {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if !verbose {
        return filter;
    }
    match "codebox_client=debug".parse::<Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Standard logging to stderr. RUST_LOG overrides the defaults.
pub fn init(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(stderr_filter(verbose))
        .with_writer(std::io::stderr)
        .init();
}

/// File-based logging for long-running commands. Default: WARN level, RUST_LOG override.
/// Logs to ~/.config/codebox/{app_name}.log
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = dirs::config_dir().ok_or("could not determine config directory")?;
    let log_dir = config_dir.join("codebox");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{app_name}.log")))?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .with_ansi(false)
        .init();

    Ok(())
}
