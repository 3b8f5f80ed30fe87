//! Core types for the triad client

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Number of computors the client keeps connected at all times
pub const COMPUTOR_COUNT: usize = 3;

/// Replies agreeing byte-for-byte needed to accept a result (majority of 3)
pub const QUORUM_THRESHOLD: usize = 2;

/// 32-byte digest identifying a transfer or environment
///
/// Digests travel on the wire and in the outbox as lowercase hex strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Create a Digest from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Digest of arbitrary bytes (blake3)
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form used on the wire and as outbox key
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-char hex string
    pub fn from_hex(s: &str) -> Result<Self, ClientError> {
        let bytes = hex::decode(s)
            .map_err(|e| ClientError::Serialization(format!("Invalid digest hex: {}", e)))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ClientError::Serialization("Digest must be 32 bytes".to_string()))?;
        Ok(Self(arr))
    }
}

impl std::fmt::Display for Digest {
    // Short prefix for logs; full form via to_hex()
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl TryFrom<String> for Digest {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Digest::from_hex(&s).map_err(|e| e.to_string())
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_hex()
    }
}

/// A signed network time observation broadcast by computors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickStatus {
    /// Epoch counter
    pub epoch: u32,
    /// Tick within the epoch
    pub tick: u16,
}

impl TickStatus {
    /// The exact 6 bytes the admin signature covers:
    /// big-endian epoch at offset 0, big-endian tick at offset 4.
    pub fn signed_bytes(&self) -> [u8; 6] {
        let mut buf = [0u8; 6];
        buf[..4].copy_from_slice(&self.epoch.to_be_bytes());
        buf[4..].copy_from_slice(&self.tick.to_be_bytes());
        buf
    }
}

impl std::fmt::Display for TickStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch {} tick {}", self.epoch, self.tick)
    }
}
