//! Error types for the triad client

use thiserror::Error;

/// Main error type for triad client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration is malformed or incomplete
    #[error("Config error: {0}")]
    Config(String),

    /// Transport-level failure on a computor connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound or outbound frame could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// All computors replied but no majority of replies agreed
    #[error("No quorum among computor responses")]
    InvalidResponses,

    /// The client was terminated while the request was in flight
    #[error("Client terminated")]
    Terminated,

    /// Identity-related error (seeds, keys, identity strings)
    #[error("Identity error: {0}")]
    Identity(String),

    /// Signature verification failed
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Transfer rejected before submission: not enough energy
    #[error("Insufficient energy: {available} available, {requested} requested")]
    InsufficientEnergy {
        /// Energy currently held by the sender
        available: u64,
        /// Energy the transfer would spend
        requested: u64,
    },

    /// Transfer parameters rejected before submission
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Config file parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ClientError
pub type ClientResult<T> = Result<T, ClientError>;
