//! Network synchronization tracking
//!
//! Computors broadcast admin-signed `(epoch, tick)` observations (command 0).
//! The tracker verifies each signature, keeps the latest verified payload per
//! computor, and derives the sync level as the quorum size over those
//! payloads. The level only ever rises between resets; full agreement resets
//! it to zero so the next tick advance is observed rising from scratch, which
//! guarantees a fresh `info` emission per fully-synced tick.
//!
//! A watchdog demotes the level to zero whenever no verified progress arrives
//! within one synchronization interval.

use std::time::{Duration, Instant};

use ed25519_dalek::VerifyingKey;
use tracing::debug;

use crate::events::ClientEvent;
use crate::identity;
use crate::quorum::quorum_size;
use crate::types::{TickStatus, COMPUTOR_COUNT};

/// Tracks how many computors currently agree on network time
pub struct SyncTracker {
    admin_key: VerifyingKey,
    statuses: [Option<Vec<u8>>; COMPUTOR_COUNT],
    level: usize,
    last_progress: Instant,
}

impl SyncTracker {
    /// Create a tracker verifying broadcasts against `admin_key`
    pub fn new(admin_key: VerifyingKey) -> Self {
        Self {
            admin_key,
            statuses: Default::default(),
            level: 0,
            last_progress: Instant::now(),
        }
    }

    /// Current sync level (0..=3)
    pub fn level(&self) -> usize {
        self.level
    }

    /// Process a command-0 broadcast from the computor in `slot`.
    ///
    /// Returns the `info` event to emit, if the sync level rose. Broadcasts
    /// with bad signatures are dropped silently; a lying computor must not
    /// advance sync.
    pub fn handle_tick_info(
        &mut self,
        slot: usize,
        status: TickStatus,
        signature: &[u8],
        now: Instant,
    ) -> Option<ClientEvent> {
        let payload = status.signed_bytes();
        if identity::verify(&self.admin_key, &payload, signature).is_err() {
            debug!(slot, %status, "Dropping tick broadcast with bad admin signature");
            return None;
        }

        self.statuses[slot] = Some(payload.to_vec());
        let q = quorum_size(&self.statuses);
        if q <= self.level {
            return None;
        }

        self.level = q;
        self.last_progress = now;
        let event = ClientEvent::Info {
            sync_status: q,
            status: Some(status),
        };

        if q == COMPUTOR_COUNT {
            // Full agreement: clear so the next tick registers progress again.
            self.statuses = Default::default();
            self.level = 0;
        }

        Some(event)
    }

    /// Watchdog fire: demote to zero when no progress within one interval.
    ///
    /// Called on every timer tick; the timer rearms unconditionally, so a
    /// stalled network re-emits `info{0}` once per interval.
    pub fn watchdog(&mut self, interval: Duration, now: Instant) -> Option<ClientEvent> {
        if now.duration_since(self.last_progress) <= interval {
            return None;
        }
        self.level = 0;
        Some(ClientEvent::Info {
            sync_status: 0,
            status: None,
        })
    }
}
