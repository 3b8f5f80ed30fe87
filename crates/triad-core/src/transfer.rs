//! Transfer construction and signing
//!
//! Wire layout of a transfer message:
//!
//! ```text
//! offset  size  field
//! 0       32    sender public key
//! 32      32    recipient public key
//! 64      8     energy, big-endian u64
//! 72      4     identity nonce, big-endian u32
//! 76      ..    effect payload (optional, opaque)
//! ```
//!
//! The message digest is the blake3 hash of these bytes; the signature is a
//! detached signature over the digest.

use crate::error::{ClientError, ClientResult};
use crate::identity::{identity_key, ClientIdentity};
use crate::types::Digest;

/// Fixed-size prefix of the transfer message
pub const TRANSFER_HEADER_LEN: usize = 32 + 32 + 8 + 4;

/// Inputs for building a transfer
#[derive(Debug, Clone)]
pub struct TransferDraft {
    /// Recipient identity string
    pub recipient_identity: String,
    /// Energy to move
    pub energy: u64,
    /// Sender nonce fetched from the network just before building
    pub identity_nonce: u32,
    /// Opaque effect payload appended to the message
    pub effect_payload: Vec<u8>,
}

/// A signed transfer ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTransfer {
    /// blake3 digest of `message`
    pub message_digest: Digest,
    /// Raw message bytes
    pub message: Vec<u8>,
    /// Detached signature over the digest
    pub signature: Vec<u8>,
}

/// Build and sign a transfer.
///
/// Domain validation happens here, before any network send: zero-energy
/// transfers and self-transfers are rejected synchronously.
pub fn build_transfer(sender: &ClientIdentity, draft: &TransferDraft) -> ClientResult<BuiltTransfer> {
    if draft.energy == 0 {
        return Err(ClientError::InvalidTransfer(
            "Energy must be positive".to_string(),
        ));
    }
    let recipient = identity_key(&draft.recipient_identity)?;
    if recipient == sender.verifying_key() {
        return Err(ClientError::InvalidTransfer(
            "Recipient equals sender".to_string(),
        ));
    }

    let mut message = Vec::with_capacity(TRANSFER_HEADER_LEN + draft.effect_payload.len());
    message.extend_from_slice(&sender.verifying_key().to_bytes());
    message.extend_from_slice(&recipient.to_bytes());
    message.extend_from_slice(&draft.energy.to_be_bytes());
    message.extend_from_slice(&draft.identity_nonce.to_be_bytes());
    message.extend_from_slice(&draft.effect_payload);

    let message_digest = Digest::of(&message);
    let signature = sender.sign(message_digest.as_bytes());

    Ok(BuiltTransfer {
        message_digest,
        message,
        signature,
    })
}
