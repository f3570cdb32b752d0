//! focusd — a distraction blocker with USB key authentication.
//!
//! Blocks a configured set of domains at three layers: a DNS sinkhole,
//! kernel packet-filter rules, and a transparent SNI-inspecting proxy.
//! Toggling the blocker on or off requires presenting a USB key whose
//! digest matches the preconfigured token.

mod daemon;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use focusd_auth::KeyVerifier;
use focusd_config::Config;
use focusd_state::{AuthState, StateFile};

#[derive(Parser, Debug)]
#[command(name = "focusd")]
#[command(author, version, about = "Distraction blocker with USB key authentication")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        default_value = "/etc/focusd/config.yaml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the focusd daemon
    Daemon,

    /// Enable blocking (requires the USB key)
    Enable,

    /// Disable blocking (requires the USB key)
    Disable,

    /// Show current blocking status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());

    // Status only needs the state file, not a valid config.
    if let Commands::Status = cli.command {
        return status();
    }

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Daemon => daemon::Daemon::new(config).run().await,
        Commands::Enable => toggle(&config, AuthState::Enabled),
        Commands::Disable => toggle(&config, AuthState::Disabled),
        Commands::Status => unreachable!("handled above"),
    }
}

/// Verifies the USB key, then flips the persisted state.
///
/// The state file is only touched after verification succeeds.
fn toggle(config: &Config, state: AuthState) -> Result<()> {
    let verifier = KeyVerifier::new(
        config.usb_key_path.as_str(),
        config.token_hash_path.clone(),
    );
    verifier.verify().context("USB key verification failed")?;

    StateFile::default()
        .store(state)
        .context("updating state")?;

    println!("Blocker {state} successfully");
    println!("Run 'systemctl reload focusd' or send SIGHUP to apply changes");
    Ok(())
}

fn status() -> Result<()> {
    let state = StateFile::default().load().context("reading status")?;
    println!("focusd: {state}");
    Ok(())
}
