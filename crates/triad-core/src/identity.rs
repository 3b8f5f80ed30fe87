//! Seed-based signing identities
//!
//! A seed is 55 lowercase letters. Each (seed, index) pair derives one
//! deterministic signing key; the identity string seen by computors is the
//! uppercase hex form of the verifying key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{ClientError, ClientResult};

/// Required seed length
pub const SEED_LENGTH: usize = 55;

const DERIVE_CONTEXT: &str = "triad 2026-05-02 identity key";

/// A client-side signing identity derived from a seed
pub struct ClientIdentity {
    signing: SigningKey,
    index: u64,
}

impl ClientIdentity {
    /// Derive the identity at `index` under `seed`.
    ///
    /// The seed must be exactly [`SEED_LENGTH`] lowercase ASCII letters.
    pub fn from_seed(seed: &str, index: u64) -> ClientResult<Self> {
        if seed.len() != SEED_LENGTH {
            return Err(ClientError::Identity(format!(
                "Seed must be {} characters, got {}",
                SEED_LENGTH,
                seed.len()
            )));
        }
        if !seed.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(ClientError::Identity(
                "Seed must contain only lowercase a-z".to_string(),
            ));
        }

        let mut material = Vec::with_capacity(SEED_LENGTH + 8);
        material.extend_from_slice(seed.as_bytes());
        material.extend_from_slice(&index.to_le_bytes());
        let key_bytes = blake3::derive_key(DERIVE_CONTEXT, &material);

        Ok(Self {
            signing: SigningKey::from_bytes(&key_bytes),
            index,
        })
    }

    /// Key index this identity was derived at
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Identity string presented to computors (uppercase hex of the public key)
    pub fn identity(&self) -> String {
        hex::encode_upper(self.signing.verifying_key().to_bytes())
    }

    /// Verifying half of the keypair
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Sign a message, returning the detached 64-byte signature
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("identity", &self.identity())
            .field("index", &self.index)
            .finish()
    }
}

/// Parse an identity string back into a verifying key
pub fn identity_key(identity: &str) -> ClientResult<VerifyingKey> {
    let bytes = hex::decode(identity.to_ascii_lowercase())
        .map_err(|e| ClientError::Identity(format!("Identity is not hex: {}", e)))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ClientError::Identity("Identity must encode 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&arr)
        .map_err(|e| ClientError::Identity(format!("Identity is not a valid key: {}", e)))
}

/// Verify a detached signature against an identity's key
pub fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> ClientResult<()> {
    let signature = Signature::from_slice(signature)
        .map_err(|e| ClientError::SignatureInvalid(format!("Bad signature encoding: {}", e)))?;
    key.verify(message, &signature)
        .map_err(|e| ClientError::SignatureInvalid(e.to_string()))
}
