//! Client event types
//!
//! Everything observable about the client flows through one broadcast
//! channel of [`ClientEvent`]s: sync level transitions, per-peer socket
//! lifecycle, transfer inclusion/rejection, and streamed environment data.
//! Subscribing returns an independent receiver; a slow or dropped receiver
//! never affects other listeners or future emissions.

use serde_json::Value;

use crate::types::{Digest, TickStatus};

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the client core
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Sync level changed (0 = desynchronized, 3 = all computors agree)
    Info {
        /// Number of computors currently agreeing on network time
        sync_status: usize,
        /// The agreed (epoch, tick); absent on watchdog demotions
        status: Option<TickStatus>,
    },
    /// A computor socket reached Open
    PeerOpen {
        /// Slot index of the computor
        slot: usize,
        /// Endpoint URL
        endpoint: String,
    },
    /// A computor socket closed (reconnect is scheduled unless terminating)
    PeerClose {
        /// Slot index of the computor
        slot: usize,
        /// Endpoint URL
        endpoint: String,
    },
    /// Recoverable transport or protocol error
    Error {
        /// Slot index, when attributable to one computor
        slot: Option<usize>,
        /// Error description
        message: String,
    },
    /// A journaled transfer was observed included in the ledger
    Inclusion {
        /// Digest of the included transfer
        message_digest: Digest,
        /// Tick of inclusion
        tick: u16,
        /// Epoch of inclusion
        epoch: u32,
    },
    /// A journaled transfer was reported rejected
    Rejection {
        /// Digest of the rejected transfer
        message_digest: Digest,
        /// Rejection reason reported by the network
        reason: String,
    },
    /// Data streamed from a subscribed environment
    EnvironmentData {
        /// Environment topic digest
        environment_digest: Digest,
        /// Opaque payload agreed by quorum
        data: Value,
    },
}

impl ClientEvent {
    /// The sync level carried by an `Info` event, if this is one
    pub fn sync_status(&self) -> Option<usize> {
        match self {
            ClientEvent::Info { sync_status, .. } => Some(*sync_status),
            _ => None,
        }
    }

    /// The transfer digest this event concerns, if any
    pub fn message_digest(&self) -> Option<&Digest> {
        match self {
            ClientEvent::Inclusion { message_digest, .. } => Some(message_digest),
            ClientEvent::Rejection { message_digest, .. } => Some(message_digest),
            _ => None,
        }
    }
}
