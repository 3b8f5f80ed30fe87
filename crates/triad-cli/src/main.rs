//! Triad CLI
//!
//! Thin wrapper around triad-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Current nonce of an identity
//! triad nonce <IDENTITY>
//!
//! # Energy balance of an identity
//! triad energy <IDENTITY>
//!
//! # Submit a transfer (sender derived from the configured seed)
//! triad transfer --recipient <IDENTITY> --energy 100
//!
//! # Inclusion status of a submitted transfer
//! triad status <DIGEST>
//!
//! # List journaled transfers awaiting inclusion
//! triad outbox
//!
//! # Stream client events until Ctrl-C
//! triad watch
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use triad_core::{Client, ClientConfig, ClientEvent, ClientIdentity, Digest};

/// Triad - quorum-replicating computor client
#[derive(Parser)]
#[command(name = "triad")]
#[command(version = "0.1.0")]
#[command(about = "Quorum-replicating light client for computor ledger networks")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (default: triad.toml)
    #[arg(short, long, global = true, default_value = "triad.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current nonce of an identity
    Nonce {
        /// Identity to look up
        identity: String,
    },

    /// Fetch the energy balance of an identity
    Energy {
        /// Identity to look up
        identity: String,
    },

    /// Build, journal, and submit a transfer
    Transfer {
        /// Recipient identity
        #[arg(short, long)]
        recipient: String,

        /// Energy to move
        #[arg(short, long)]
        energy: u64,

        /// Optional hex effect payload
        #[arg(long)]
        payload: Option<String>,
    },

    /// Query the inclusion status of a submitted transfer
    Status {
        /// Transfer digest (64 hex chars)
        digest: String,
    },

    /// List journaled transfers awaiting confirmed inclusion
    Outbox,

    /// Stream client events until Ctrl-C
    Watch,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ClientConfig::load(&cli.config)
        .with_context(|| format!("Loading config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Nonce { identity } => {
            let client = Client::connect(config).await?;
            let nonce = client.fetch_identity_nonce(&identity).await?;
            println!("{}", nonce);
            client.terminate();
        }
        Commands::Energy { identity } => {
            let client = Client::connect(config).await?;
            let energy = client.fetch_energy(&identity).await?;
            println!("{}", energy);
            client.terminate();
        }
        Commands::Transfer {
            recipient,
            energy,
            payload,
        } => {
            let seed = config
                .seed
                .clone()
                .ok_or_else(|| anyhow!("Config has no seed; transfers need one"))?;
            let index = config.index;
            let effect_payload = match payload {
                Some(hex_payload) => {
                    hex::decode(&hex_payload).context("Payload must be hex")?
                }
                None => Vec::new(),
            };

            let client = Client::connect(config).await?;
            let sender = ClientIdentity::from_seed(&seed, index)?;
            let digest = client
                .transfer(&sender, &recipient, energy, effect_payload)
                .await?;
            println!("{}", digest.to_hex());
            client.terminate();
        }
        Commands::Status { digest } => {
            let digest = Digest::from_hex(&digest).context("Digest must be 64 hex chars")?;
            let client = Client::connect(config).await?;
            let report = client.query_status(digest).await?;
            match (report.inclusion_state, report.reason) {
                (Some(true), _) => println!(
                    "included at epoch {} tick {}",
                    report.epoch.unwrap_or_default(),
                    report.tick.unwrap_or_default()
                ),
                (_, Some(reason)) => println!("rejected: {}", reason),
                _ => println!("pending"),
            }
            client.terminate();
        }
        Commands::Outbox => {
            // Reads the journal directly; no connections needed.
            let outbox = triad_core::Outbox::open(&config.db_path)?;
            let digests = outbox.digests()?;
            if digests.is_empty() {
                println!("outbox empty");
            }
            for digest in digests {
                println!("{}", digest.to_hex());
            }
        }
        Commands::Watch => {
            let client = Client::connect(config).await?;
            let mut events = client.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(event) => print_event(&event),
                        Err(_) => break,
                    },
                }
            }
            client.terminate();
        }
    }

    Ok(())
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::Info {
            sync_status,
            status,
        } => match status {
            Some(status) => println!("sync {}/3 ({})", sync_status, status),
            None => println!("sync {}/3", sync_status),
        },
        ClientEvent::PeerOpen { slot, endpoint } => println!("open [{}] {}", slot, endpoint),
        ClientEvent::PeerClose { slot, endpoint } => println!("close [{}] {}", slot, endpoint),
        ClientEvent::Error { slot, message } => match slot {
            Some(slot) => println!("error [{}] {}", slot, message),
            None => println!("error {}", message),
        },
        ClientEvent::Inclusion {
            message_digest,
            tick,
            epoch,
        } => println!(
            "inclusion {} at epoch {} tick {}",
            message_digest.to_hex(),
            epoch,
            tick
        ),
        ClientEvent::Rejection {
            message_digest,
            reason,
        } => println!("rejection {}: {}", message_digest.to_hex(), reason),
        ClientEvent::EnvironmentData {
            environment_digest,
            data,
        } => println!("data {} {}", environment_digest, data),
    }
}
