//! Pending-request table
//!
//! Logical commands fan out to every computor; replies are correlated back by
//! a content-derived key and judged by quorum. Concurrent logically-identical
//! calls coalesce onto one table entry (one outbound frame per computor, any
//! number of waiters). An entry resolves as soon as a majority of replies
//! agree byte-for-byte, rejects with [`ClientError::InvalidResponses`] once
//! all computors answered without agreement, and otherwise keeps waiting.
//! There is no per-request timeout; the session replay buffers keep pending
//! requests alive across reconnects.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::{ClientError, ClientResult};
use crate::protocol::Frame;
use crate::quorum::quorum_mode;
use crate::types::{COMPUTOR_COUNT, QUORUM_THRESHOLD};

/// One-shot resolver handed back to a caller of `send_command`
pub(crate) type Waiter = oneshot::Sender<ClientResult<Frame>>;

struct PendingRequest {
    responses: [Option<Vec<u8>>; COMPUTOR_COUNT],
    waiters: Vec<Waiter>,
}

/// What a reply did to its pending entry
pub(crate) enum RouterOutcome {
    /// Majority agreement; settle everywhere and resolve the waiters
    Resolved { frame: Frame, waiters: Vec<Waiter> },
    /// All computors answered, none agree; settle and reject the waiters
    NoQuorum { waiters: Vec<Waiter> },
    /// Still collecting replies
    Pending,
    /// No pending entry under this key (late or unsolicited reply)
    Unmatched,
}

/// Correlates replies to pending requests and applies the quorum rule
#[derive(Default)]
pub(crate) struct Router {
    pending: HashMap<String, PendingRequest>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a waiter under `key`.
    ///
    /// Returns `true` when this created a new entry (the caller must
    /// broadcast the request), `false` when the call coalesced onto an
    /// entry already in flight.
    pub(crate) fn register(&mut self, key: String, waiter: Waiter) -> bool {
        match self.pending.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().waiters.push(waiter);
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingRequest {
                    responses: Default::default(),
                    waiters: vec![waiter],
                });
                true
            }
        }
    }

    /// Whether a request is currently pending under `key`
    pub(crate) fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Record the reply from `slot` and decide the entry's fate.
    ///
    /// `raw` is the reply's wire text; agreement is judged on those exact
    /// bytes. The decoded `frame` is what waiters resolve to: when the
    /// arrival of this reply completes a majority, it is by construction a
    /// member of the agreeing group.
    pub(crate) fn handle_reply(
        &mut self,
        key: &str,
        slot: usize,
        raw: &str,
        frame: Frame,
    ) -> RouterOutcome {
        let Some(entry) = self.pending.get_mut(key) else {
            return RouterOutcome::Unmatched;
        };

        entry.responses[slot] = Some(raw.as_bytes().to_vec());

        let reached_quorum = match quorum_mode(&entry.responses) {
            Some((payload, count)) if count >= QUORUM_THRESHOLD => {
                debug_assert_eq!(payload, raw.as_bytes());
                true
            }
            _ => false,
        };
        if reached_quorum {
            let entry = self.pending.remove(key).expect("entry present");
            return RouterOutcome::Resolved {
                frame,
                waiters: entry.waiters,
            };
        }

        if entry.responses.iter().all(Option::is_some) {
            let entry = self.pending.remove(key).expect("entry present");
            return RouterOutcome::NoQuorum {
                waiters: entry.waiters,
            };
        }

        RouterOutcome::Pending
    }

    /// Drop every pending entry; their waiters observe termination
    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }

    /// Reject a drained waiter set with `InvalidResponses`
    pub(crate) fn reject_waiters(waiters: Vec<Waiter>) {
        for waiter in waiters {
            let _ = waiter.send(Err(ClientError::InvalidResponses));
        }
    }

    /// Resolve a drained waiter set with clones of the agreed frame
    pub(crate) fn resolve_waiters(waiters: Vec<Waiter>, frame: &Frame) {
        for waiter in waiters {
            let _ = waiter.send(Ok(frame.clone()));
        }
    }
}
