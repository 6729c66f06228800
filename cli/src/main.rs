// rollcall — proximity session broadcast & discovery CLI
//
// Scans for nearby session broadcasts with the host Bluetooth adapter, runs a
// simulated presenter/attendee pair, and inspects payloads and permissions.

mod config;
mod host_radio;
mod prompt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use rollcall_core::codec::{self, SessionIdentifier};
use rollcall_core::simulated::SimulatedAir;
use rollcall_core::{
    required_permissions, AttendeeSession, Broadcaster, CapabilityGate, DiscoveredPeer,
    ExitDecision, PermissionRequester, Platform, PresenterSession, ProtocolConfig, Role,
    Scanner, SessionDirectory, SessionInfo,
};
use std::sync::Arc;
use std::time::Duration;

/// Cadence of the simulated radio, matching a slow real-world advertiser
const DEMO_SWEEP_PERIOD: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Rollcall — proximity session broadcast & discovery", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby sessions with the host Bluetooth adapter
    Scan {
        #[arg(short, long)]
        seconds: Option<u64>,
        /// Grant permission prompts without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Run a presenter and an attendee on a simulated radio
    Demo {
        #[arg(default_value = "42")]
        session: String,
        #[arg(short, long, default_value = "Kelas Demo")]
        name: String,
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the runtime permissions a role needs
    Permissions {
        #[arg(long, value_enum)]
        role: RoleArg,
        /// Android API level; defaults to the configured platform
        #[arg(long)]
        api_level: Option<u32>,
    },
    /// Encode a session identifier as a manufacturer-data payload
    Encode {
        session: String,
        /// 16-bit company id to prefix, in hex
        #[arg(long)]
        company_id: Option<String>,
    },
    /// Decode a hex manufacturer-data payload
    Decode { payload: String },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Advertiser,
    Scanner,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Advertiser => Role::Advertiser,
            RoleArg::Scanner => Role::Scanner,
        }
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Scan { seconds, yes } => cmd_scan(seconds, yes).await,
        Commands::Demo { session, name, yes } => cmd_demo(session, name, yes).await,
        Commands::Permissions { role, api_level } => cmd_permissions(role.into(), api_level),
        Commands::Encode {
            session,
            company_id,
        } => cmd_encode(&session, company_id.as_deref()),
        Commands::Decode { payload } => cmd_decode(&payload),
        Commands::Config { action } => cmd_config(action),
    }
}

fn print_peer(peer: &DiscoveredPeer) {
    let session = peer
        .session_identifier
        .map(|id| id.to_string().bright_cyan().to_string())
        .unwrap_or_else(|| "unknown".dimmed().to_string());
    let rssi = peer
        .signal_strength
        .map(|r| format!("{} dBm", r))
        .unwrap_or_else(|| "-".to_string());

    println!(
        "  {} {}  session {}  {}  {}",
        "•".bright_green(),
        peer.peer_id,
        session,
        rssi.dimmed(),
        peer.local_name.as_deref().unwrap_or("").bright_yellow()
    );
}

async fn cmd_scan(seconds: Option<u64>, yes: bool) -> Result<()> {
    let config = config::Config::load()?;
    let seconds = seconds.unwrap_or(config.scan_seconds);

    let radio = host_radio::HostRadio::first_adapter(config.protocol.company_id).await?;
    let gate = CapabilityGate::new(
        config.platform,
        Arc::new(prompt::ConsolePermissions::new(yes)),
    );
    let scanner = Scanner::new(Arc::new(radio), gate, config.protocol.clone());

    println!(
        "{} Scanning for {} ({}s, Ctrl+C to stop)",
        "→".bright_blue(),
        config.protocol.filter_key.to_string().bright_cyan(),
        seconds
    );

    scanner
        .start(config.protocol.filter_key, |peer: DiscoveredPeer| {
            print_peer(&peer)
        })
        .await
        .context("Failed to start scanning")?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => println!(),
    }

    scanner.stop().await;
    println!("{} Scan stopped", "✓".green());
    Ok(())
}

/// Session names known to the demo presenter
struct DemoDirectory {
    id: SessionIdentifier,
    name: String,
}

#[async_trait]
impl SessionDirectory for DemoDirectory {
    async fn session_name(&self, id: SessionIdentifier) -> Result<String> {
        if id == self.id {
            Ok(self.name.clone())
        } else {
            anyhow::bail!("No session with id {}", id)
        }
    }
}

async fn cmd_demo(session: String, name: String, yes: bool) -> Result<()> {
    let config = config::Config::load()?;
    let air = SimulatedAir::new();
    let sweeper = air.spawn_sweeper(DEMO_SWEEP_PERIOD);

    let result = run_demo(
        &air,
        config.platform,
        Arc::new(prompt::ConsolePermissions::new(yes)),
        config.protocol,
        &session,
        name,
    )
    .await;

    sweeper.abort();
    result
}

/// Present a session and discover it from a second device on the same air
///
/// The broadcast is stopped on every path out, including attendee failures.
async fn run_demo(
    air: &Arc<SimulatedAir>,
    platform: Platform,
    requester: Arc<dyn PermissionRequester>,
    protocol: ProtocolConfig,
    session: &str,
    name: String,
) -> Result<()> {
    let filter_key = protocol.filter_key;
    let broadcaster = Arc::new(Broadcaster::new(
        Arc::new(air.radio("presenter")),
        CapabilityGate::new(platform, Arc::clone(&requester)),
        protocol.clone(),
    )?);
    let scanner = Arc::new(Scanner::new(
        Arc::new(air.radio("attendee")),
        CapabilityGate::new(platform, requester),
        protocol,
    ));

    println!("{}", "Presenter".bold());
    let mut presenter = PresenterSession::new(broadcaster, filter_key);
    presenter
        .sync(SessionInfo {
            id: session.to_string(),
            name: name.clone(),
            is_active: true,
        })
        .await
        .context("Failed to start broadcast")?;
    println!(
        "  {} Broadcasting session {} ({})",
        "✓".green(),
        session.bright_cyan(),
        name.bright_yellow()
    );

    println!();
    println!("{}", "Attendee".bold());
    let attendee = AttendeeSession::new(scanner, filter_key);
    let attended = run_attendee(&attendee, session, name).await;
    attendee.stop().await;

    println!();
    println!("{}", "Leaving presenter screen".bold());
    if attended.is_ok() {
        if presenter.request_exit(false).await == ExitDecision::NeedsConfirmation {
            println!("  {} Session still live, confirmation required", "!".yellow());
        }
        presenter.request_exit(true).await;
    } else {
        presenter.end().await;
    }
    println!("  {} Broadcast stopped", "✓".green());

    attended
}

/// Discover the demo session and pick it as an attendee would
async fn run_attendee(attendee: &AttendeeSession, session: &str, name: String) -> Result<()> {
    attendee.start().await.context("Failed to start scanning")?;
    println!("  {} Scanning...", "→".bright_blue());

    tokio::time::sleep(DEMO_SWEEP_PERIOD + Duration::from_millis(500)).await;
    attendee.stop().await;

    let peers = attendee.peers();
    if peers.is_empty() {
        println!("  {}", "No sessions found.".dimmed());
    }
    for peer in &peers {
        print_peer(peer);
    }

    if let Ok(id) = session.parse::<SessionIdentifier>() {
        attendee.resolve_names(&DemoDirectory { id, name }).await;
    }
    if let Some(peer) = peers.first() {
        match attendee.select(&peer.peer_id) {
            Ok(id) => {
                let resolved = attendee
                    .session_name(id)
                    .unwrap_or_else(|| "unknown session".to_string());
                println!(
                    "  {} Would submit attendance for {} ({})",
                    "✓".green(),
                    id.to_string().bright_cyan(),
                    resolved
                );
            }
            Err(e) => println!("  {} {}", "✗".red(), e),
        }
    }
    Ok(())
}

fn cmd_permissions(role: Role, api_level: Option<u32>) -> Result<()> {
    let (platform, required) = match api_level {
        Some(level) => (
            Platform::Android { api_level: level },
            required_permissions(role, level),
        ),
        None => {
            let platform = config::Config::load()?.platform;
            (platform, platform.required_permissions(role))
        }
    };

    println!("{} on {}", role.to_string().bold(), platform);
    if required.is_empty() {
        println!("  {}", "(no runtime permissions)".dimmed());
    }
    for permission in required.iter() {
        println!("  {} {}", "•".bright_green(), permission);
    }
    Ok(())
}

fn cmd_encode(session: &str, company_id: Option<&str>) -> Result<()> {
    let id: SessionIdentifier = session.parse()?;
    let company = company_id
        .map(|c| u16::from_str_radix(c.trim_start_matches("0x"), 16))
        .transpose()
        .context("Company id must be 16-bit hex")?;

    let payload = codec::build_payload(id, company);
    println!("{}", hex::encode_upper(payload).bright_cyan());
    Ok(())
}

fn cmd_decode(payload: &str) -> Result<()> {
    let bytes = hex::decode(payload.trim()).context("Payload must be hex")?;
    let id = codec::decode(&bytes)?;

    println!("{} session {}", "✓".green(), id.to_string().bright_cyan());
    if bytes.len() > codec::IDENTIFIER_LEN {
        let prefix = &bytes[..bytes.len() - codec::IDENTIFIER_LEN];
        println!("  prefix {}", hex::encode_upper(prefix).dimmed());
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}
