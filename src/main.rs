//! colink - command-line client for colink collaboration servers
//!
//! Runs one command against the server, or watches session events.

mod commands;

use clap::{Parser, Subcommand};
use colink_client::{Client, Config, SessionEvent, TrustPolicy};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "colink")]
#[command(about = "Command-line client for colink collaboration servers")]
#[command(version)]
pub struct Cli {
    /// YAML config file
    #[arg(short, long, env = "COLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Account identifier; logs in before running the command
    #[arg(short, long, env = "COLINK_USER")]
    user: Option<String>,

    /// Account secret
    #[arg(long, env = "COLINK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Seconds to wait for each server response
    #[arg(long, default_value = "10")]
    wait: u64,

    // ===== TLS Options =====
    /// Connect over plain TCP
    #[arg(long)]
    no_tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (for mTLS)
    #[arg(long)]
    client_cert: Option<PathBuf>,

    /// Path to client private key (for mTLS)
    #[arg(long)]
    client_key: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    /// Server name for TLS SNI (defaults to server hostname)
    #[arg(long)]
    server_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an account
    Register {
        /// Contact email
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Show the logged-in user
    Whoami,

    /// List projects
    Projects,

    /// Show the file tree of a project
    Files {
        /// Project ID
        project: String,
    },

    /// Create a project
    CreateProject {
        /// Project name
        name: String,
    },

    /// Delete a project
    DeleteProject {
        /// Project ID
        project: String,
    },

    /// Add a file to a project
    AddFile {
        /// Project ID
        project: String,
        /// Path inside the project
        path: String,
    },

    /// Add a folder to a project
    AddFolder {
        /// Project ID
        project: String,
        /// Path inside the project
        path: String,
    },

    /// List the users a project is shared with
    Shares {
        /// Project ID
        project: String,
    },

    /// Share a project with a user
    Share {
        /// Project ID
        project: String,
        /// User to share with
        user: String,
    },

    /// Revoke a share
    Unshare {
        /// Project ID
        project: String,
        /// User to remove
        user: String,
    },

    /// Stream session events until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load_from(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}: {}", "Config error".red(), e);
        e
    })?;
    apply_cli_overrides(&mut config, &cli)?;
    let conn_config = config.to_connection_config()?;
    let wait = Duration::from_secs(cli.wait);

    if matches!(
        conn_config.tls.as_ref().map(|t| &t.trust),
        Some(TrustPolicy::AcceptAny)
    ) {
        eprintln!(
            "{}: server certificate verification is disabled",
            "Warning".yellow()
        );
    }

    let client = Client::new(conn_config);
    let mut events = client.subscribe();

    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    let result = run(&client, &mut events, &cli, wait).await;
    client.shutdown().await;

    match result {
        Ok(Some(output)) => println!("{}", output),
        Ok(None) => {}
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn run(
    client: &Client,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    cli: &Cli,
    wait: Duration,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    if let Commands::Register { email } = &cli.command {
        let (user, mut secret) = credentials(cli)?;
        client.register(&user, &mut secret, email.as_deref())?;
        return commands::await_auth(events, wait, "Registered", &user)
            .await
            .map(Some);
    }

    if cli.user.is_some() {
        let (user, mut secret) = credentials(cli)?;
        client.login(&user, &mut secret)?;
        let banner = commands::await_auth(events, wait, "Logged in", &user).await?;
        eprintln!("{}", banner);
    }

    if let Commands::Watch = cli.command {
        watch(events).await;
        return Ok(None);
    }

    commands::execute(client, events, &cli.command, wait)
        .await
        .map(Some)
}

fn credentials(cli: &Cli) -> Result<(String, Vec<u8>), Box<dyn std::error::Error>> {
    let user = cli.user.clone().ok_or("--user is required")?;
    let secret = cli
        .password
        .clone()
        .ok_or("--password (or COLINK_PASSWORD) is required")?;
    Ok((user, secret.into_bytes()))
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if cli.no_tls {
        config.tls.enabled = false;
        return Ok(());
    }

    if let Some(ref path) = cli.ca_cert {
        config.tls.ca_cert_path = Some(path.clone());
        config.tls.trust = colink_client::config::TrustMode::CaFile;
    }
    match (&cli.client_cert, &cli.client_key) {
        (Some(cert), Some(key)) => {
            config.tls.client_cert_path = Some(cert.clone());
            config.tls.client_key_path = Some(key.clone());
        }
        (None, None) => {}
        _ => return Err("--client-cert and --client-key must be used together".into()),
    }
    if cli.insecure {
        config.tls.trust = colink_client::config::TrustMode::AcceptAny;
    }
    if let Some(ref name) = cli.server_name {
        config.tls.server_name = Some(name.clone());
    }

    Ok(())
}

async fn watch(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) {
    eprintln!("{}", "Watching session events. Press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(e) => println!("{}", commands::format_event(&e)),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        eprintln!("{}: lagged {} events", "Warning".yellow(), n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        eprintln!("{}", "Connection closed".red());
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping watch...".dimmed());
                break;
            }
        }
    }
}
