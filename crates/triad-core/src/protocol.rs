//! Computor wire protocol
//!
//! Each frame is a self-contained JSON text payload carrying a `command`
//! integer plus command-specific fields:
//!
//! | Cmd | Direction      | Request                  | Reply                                          |
//! |-----|----------------|--------------------------|------------------------------------------------|
//! | 0   | server push    | —                        | `{epoch, tick, signature}`                     |
//! | 1   | client→peer    | `{identity}`             | `{identity, identityNonce}`                    |
//! | 2   | client→peer    | `{identity}`             | `{identity, energy}`                           |
//! | 3   | client→peer    | `{message, signature}`   | none                                           |
//! | 4   | client→peer    | `{messageDigest}`        | `{messageDigest, inclusionState, tick, epoch}` |
//! |     |                |                          | or `{messageDigest, reason}`                   |
//! | 5   | client→peer    | `{environmentDigest}`    | streaming `data` frames                        |
//! | 6   | client→peer    | `{environmentDigest}`    | unsubscribe ack                                |
//!
//! serde's tagged enums only support string tags, so the integer `command`
//! tag is dispatched by hand in [`Frame::decode`] and stamped onto the
//! serialized object in [`Request::encode`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, ClientResult};
use crate::types::{Digest, TickStatus};

/// Fire-and-forget transfer submission tag
pub const CMD_SUBMIT_TRANSFER: u8 = 3;

/// Outbound request to a computor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Command 1: current nonce for an identity
    IdentityNonce {
        /// Identity to look up
        identity: String,
    },
    /// Command 2: energy balance of an identity
    Energy {
        /// Identity to look up
        identity: String,
    },
    /// Command 3: submit a signed transfer (no reply)
    SubmitTransfer {
        /// Raw transfer message bytes
        message: Vec<u8>,
        /// Detached signature over the transfer digest
        signature: Vec<u8>,
    },
    /// Command 4: inclusion status of a submitted transfer
    TransferStatus {
        /// Digest of the transfer message
        message_digest: Digest,
    },
    /// Command 5: subscribe to an environment's data stream
    SubscribeEnvironment {
        /// Environment topic digest
        environment_digest: Digest,
    },
    /// Command 6: unsubscribe from an environment
    UnsubscribeEnvironment {
        /// Environment topic digest
        environment_digest: Digest,
    },
}

impl Request {
    /// The integer command tag this request travels under
    pub fn command_tag(&self) -> u8 {
        match self {
            Request::IdentityNonce { .. } => 1,
            Request::Energy { .. } => 2,
            Request::SubmitTransfer { .. } => CMD_SUBMIT_TRANSFER,
            Request::TransferStatus { .. } => 4,
            Request::SubscribeEnvironment { .. } => 5,
            Request::UnsubscribeEnvironment { .. } => 6,
        }
    }

    /// Transfer submissions are broadcast without registering a reply future
    pub fn is_fire_and_forget(&self) -> bool {
        self.command_tag() == CMD_SUBMIT_TRANSFER
    }

    /// Key under which concurrent logically-identical requests coalesce.
    ///
    /// Every correlated command carries exactly one correlating field
    /// (identity or digest); a future command without one would collide on
    /// the bare tag and must grow its own field before being routed.
    pub fn correlation_key(&self) -> String {
        match self {
            Request::IdentityNonce { identity } => format!("1{}", identity),
            Request::Energy { identity } => format!("2{}", identity),
            Request::SubmitTransfer { .. } => "3".to_string(),
            Request::TransferStatus { message_digest } => {
                format!("4{}", message_digest.to_hex())
            }
            Request::SubscribeEnvironment { environment_digest } => {
                format!("5{}", environment_digest.to_hex())
            }
            Request::UnsubscribeEnvironment { environment_digest } => {
                format!("6{}", environment_digest.to_hex())
            }
        }
    }

    /// Serialize to the canonical JSON text frame
    pub fn encode(&self) -> ClientResult<String> {
        let mut value = match self {
            Request::IdentityNonce { identity } | Request::Energy { identity } => {
                serde_json::json!({ "identity": identity })
            }
            Request::SubmitTransfer { message, signature } => serde_json::json!({
                "message": BASE64.encode(message),
                "signature": BASE64.encode(signature),
            }),
            Request::TransferStatus { message_digest } => {
                serde_json::json!({ "messageDigest": message_digest.to_hex() })
            }
            Request::SubscribeEnvironment { environment_digest }
            | Request::UnsubscribeEnvironment { environment_digest } => {
                serde_json::json!({ "environmentDigest": environment_digest.to_hex() })
            }
        };
        if let Value::Object(body) = &mut value {
            body.insert("command".to_string(), Value::from(self.command_tag()));
        }
        serde_json::to_string(&value).map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

/// Transfer status report (command 4 reply)
///
/// Computors answer either with inclusion coordinates or with a rejection
/// reason; absent fields stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Digest of the queried transfer
    pub message_digest: Digest,
    /// Whether the transfer made it into the ledger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusion_state: Option<bool>,
    /// Tick of inclusion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<u16>,
    /// Epoch of inclusion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u32>,
    /// Rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickInfoWire {
    epoch: u32,
    tick: u16,
    signature: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityNonceWire {
    identity: String,
    identity_nonce: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnergyWire {
    identity: String,
    energy: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvironmentWire {
    environment_digest: Digest,
    #[serde(default)]
    data: Value,
}

/// Inbound frame from a computor
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Command 0: admin-signed network time broadcast
    TickInfo {
        /// The (epoch, tick) pair the signature covers
        status: TickStatus,
        /// 64-byte admin signature
        signature: Vec<u8>,
    },
    /// Command 1 reply
    IdentityNonce {
        /// Echoed identity
        identity: String,
        /// Current nonce
        identity_nonce: u32,
    },
    /// Command 2 reply
    Energy {
        /// Echoed identity
        identity: String,
        /// Energy balance
        energy: u64,
    },
    /// Command 4 reply
    TransferStatus(StatusReport),
    /// Command 5 streamed data
    EnvironmentData {
        /// Environment topic digest
        environment_digest: Digest,
        /// Opaque payload
        data: Value,
    },
    /// Command 6 ack
    UnsubscribeAck {
        /// Environment topic digest
        environment_digest: Digest,
    },
}

impl Frame {
    /// Decode a JSON text frame
    pub fn decode(text: &str) -> ClientResult<Frame> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ClientError::Serialization(format!("Malformed frame: {}", e)))?;
        let command = value
            .get("command")
            .and_then(Value::as_u64)
            .ok_or_else(|| ClientError::Serialization("Frame missing command tag".to_string()))?;

        let invalid = |e: serde_json::Error| {
            ClientError::Serialization(format!("Invalid command {} frame: {}", command, e))
        };

        match command {
            0 => {
                let wire: TickInfoWire = serde_json::from_value(value).map_err(invalid)?;
                let signature = BASE64.decode(&wire.signature).map_err(|e| {
                    ClientError::Serialization(format!("Invalid signature base64: {}", e))
                })?;
                Ok(Frame::TickInfo {
                    status: TickStatus {
                        epoch: wire.epoch,
                        tick: wire.tick,
                    },
                    signature,
                })
            }
            1 => {
                let wire: IdentityNonceWire = serde_json::from_value(value).map_err(invalid)?;
                Ok(Frame::IdentityNonce {
                    identity: wire.identity,
                    identity_nonce: wire.identity_nonce,
                })
            }
            2 => {
                let wire: EnergyWire = serde_json::from_value(value).map_err(invalid)?;
                Ok(Frame::Energy {
                    identity: wire.identity,
                    energy: wire.energy,
                })
            }
            4 => {
                let report: StatusReport = serde_json::from_value(value).map_err(invalid)?;
                Ok(Frame::TransferStatus(report))
            }
            5 => {
                let wire: EnvironmentWire = serde_json::from_value(value).map_err(invalid)?;
                Ok(Frame::EnvironmentData {
                    environment_digest: wire.environment_digest,
                    data: wire.data,
                })
            }
            6 => {
                let wire: EnvironmentWire = serde_json::from_value(value).map_err(invalid)?;
                Ok(Frame::UnsubscribeAck {
                    environment_digest: wire.environment_digest,
                })
            }
            other => Err(ClientError::Serialization(format!(
                "Unknown command tag {}",
                other
            ))),
        }
    }

    /// Key matching [`Request::correlation_key`] of the originating request.
    ///
    /// `None` for frames that are not replies (the signed tick broadcast).
    pub fn correlation_key(&self) -> Option<String> {
        match self {
            Frame::TickInfo { .. } => None,
            Frame::IdentityNonce { identity, .. } => Some(format!("1{}", identity)),
            Frame::Energy { identity, .. } => Some(format!("2{}", identity)),
            Frame::TransferStatus(report) => {
                Some(format!("4{}", report.message_digest.to_hex()))
            }
            Frame::EnvironmentData {
                environment_digest, ..
            } => Some(format!("5{}", environment_digest.to_hex())),
            Frame::UnsubscribeAck { environment_digest } => {
                Some(format!("6{}", environment_digest.to_hex()))
            }
        }
    }

    /// Whether this is the command-0 sync broadcast
    pub fn is_tick_info(&self) -> bool {
        matches!(self, Frame::TickInfo { .. })
    }
}
