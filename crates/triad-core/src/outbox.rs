//! Durable transfer outbox backed by redb
//!
//! The outbox is a write-ahead journal: the transfer pipeline persists every
//! transfer here *before* the submission frame goes out, and entries are
//! removed only once the network reports inclusion. A crash between the
//! durable write and the network send is retried on next launch; a crash
//! before the write loses only an unreplicated attempt.

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::types::Digest;

const OUTBOX_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("outbox");

/// One journaled transfer awaiting confirmed inclusion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Base64 transfer message bytes
    pub message: String,
    /// Base64 detached signature
    pub signature: String,
}

impl OutboxEntry {
    /// Journal a raw message/signature pair
    pub fn new(message: &[u8], signature: &[u8]) -> Self {
        Self {
            message: BASE64.encode(message),
            signature: BASE64.encode(signature),
        }
    }

    /// Decode the stored message bytes
    pub fn message_bytes(&self) -> ClientResult<Vec<u8>> {
        BASE64
            .decode(&self.message)
            .map_err(|e| ClientError::Serialization(format!("Corrupt outbox message: {}", e)))
    }

    /// Decode the stored signature bytes
    pub fn signature_bytes(&self) -> ClientResult<Vec<u8>> {
        BASE64
            .decode(&self.signature)
            .map_err(|e| ClientError::Serialization(format!("Corrupt outbox signature: {}", e)))
    }
}

/// Ordered durable map from transfer digest to serialized transfer
#[derive(Clone)]
pub struct Outbox {
    db: Arc<RwLock<Database>>,
}

impl Outbox {
    /// Open (or create) the outbox database at the given path
    pub fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(OUTBOX_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Persist an entry under its digest. Overwrites an existing entry.
    pub fn put(&self, digest: &Digest, entry: &OutboxEntry) -> ClientResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(OUTBOX_TABLE)?;
            let data = serde_json::to_vec(entry)
                .map_err(|e| ClientError::Serialization(e.to_string()))?;
            let key = digest.to_hex();
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load an entry by digest
    pub fn get(&self, digest: &Digest) -> ClientResult<Option<OutboxEntry>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_TABLE)?;
        let key = digest.to_hex();

        match table.get(key.as_str())? {
            Some(v) => {
                let entry: OutboxEntry = serde_json::from_slice(v.value())
                    .map_err(|e| ClientError::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Remove an entry after observed inclusion
    pub fn delete(&self, digest: &Digest) -> ClientResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(OUTBOX_TABLE)?;
            let key = digest.to_hex();
            table.remove(key.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All outstanding digests in key order
    pub fn digests(&self) -> ClientResult<Vec<Digest>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_TABLE)?;

        let mut digests = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            digests.push(Digest::from_hex(key.value())?);
        }
        Ok(digests)
    }

    /// Number of outstanding entries
    pub fn len(&self) -> ClientResult<usize> {
        Ok(self.digests()?.len())
    }

    /// Whether the outbox has no outstanding entries
    pub fn is_empty(&self) -> ClientResult<bool> {
        Ok(self.len()? == 0)
    }
}
