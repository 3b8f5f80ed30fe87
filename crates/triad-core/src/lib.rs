//! Triad Client Core Library
//!
//! A quorum-replicating light client for "computor" ledger networks. The
//! client keeps three concurrent WebSocket connections to independent
//! computors, fans every query out to all of them, and accepts a result only
//! once a majority of replies agree byte-for-byte. Network time is tracked
//! from admin-signed tick broadcasts, and submitted transfers are journaled
//! in a durable outbox until the network reports their inclusion.
//!
//! ## Quick Start
//!
//! ```ignore
//! use triad_core::{Client, ClientConfig, ClientIdentity};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::load("triad.toml")?;
//!     let seed = config.seed.clone().expect("seed configured");
//!     let client = Client::connect(config).await?;
//!
//!     let sender = ClientIdentity::from_seed(&seed, 0)?;
//!     let energy = client.fetch_energy(&sender.identity()).await?;
//!     println!("energy: {}", energy);
//!
//!     let digest = client.transfer(&sender, RECIPIENT, 100, Vec::new()).await?;
//!     println!("submitted {}", digest);
//!
//!     let mut events = client.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod outbox;
pub mod protocol;
pub mod quorum;
pub mod sync;
pub mod transfer;
pub mod types;

mod peer;
mod router;

// Re-exports
pub use client::Client;
pub use config::{ClientConfig, ComputorEndpoint};
pub use error::{ClientError, ClientResult};
pub use events::ClientEvent;
pub use identity::ClientIdentity;
pub use outbox::{Outbox, OutboxEntry};
pub use protocol::{Frame, Request, StatusReport};
pub use quorum::quorum_size;
pub use types::{Digest, TickStatus, COMPUTOR_COUNT, QUORUM_THRESHOLD};
