//! pvetui CLI - Main Entry Point
//!
//! Logs in to a management API, lists guests and opens interactive
//! consoles in the current terminal.

use anyhow::Result;
use clap::{Parser, Subcommand};
use pvetui_cli::commands::{console, guests, session, Context};
use pvetui_cli::output::{self, print_error};
use pvetui_common::{default_config_path, Config, Error};
use pvetui_console::classify;
use std::path::PathBuf;

/// pvetui - terminal console for Proxmox VE guests
#[derive(Parser)]
#[command(name = "pvetui")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "PVETUI_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Management origin, e.g. https://pve.example:8006
    #[arg(long, env = "PVETUI_URL", global = true)]
    url: Option<String>,

    /// User including realm, e.g. root@pam
    #[arg(long, env = "PVETUI_USER", global = true)]
    user: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, env = "PVETUI_INSECURE", global = true)]
    insecure: bool,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with a password and cache the session
    Login,

    /// Clear the cached session
    Logout,

    /// Show the cached session
    Session,

    /// List VMs and containers
    Guests,

    /// Open an interactive console (Ctrl+\ detaches)
    Console(console::ConsoleArgs),

    /// Show version information
    Version,
}

impl Cli {
    /// Load the config file and apply command-line overrides
    fn config(&self) -> Result<Config> {
        let path = self.config.clone().unwrap_or_else(default_config_path);
        let mut config = Config::load(&path)?;
        if let Some(url) = &self.url {
            config.server.url = url.clone();
        }
        if let Some(user) = &self.user {
            config.auth.username = user.clone();
        }
        if self.insecure {
            config.server.insecure = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&describe(&e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::new(cli.config()?, cli.format);

    match cli.command {
        Commands::Login => session::login(&ctx).await?,
        Commands::Logout => session::logout(&ctx).await?,
        Commands::Session => session::show(&ctx).await?,
        Commands::Guests => guests::execute(&ctx).await?,
        Commands::Console(args) => console::execute(args, &ctx).await?,
        Commands::Version => {
            println!("pvetui v{}", pvetui_common::VERSION);
        }
    }

    Ok(())
}

/// Transport failures get the classified, actionable message
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<Error>() {
        Some(Error::Network(raw)) => classify(raw).to_string(),
        _ => format!("{:#}", err),
    }
}
