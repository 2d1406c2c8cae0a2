//! Wire types for the consensus topic

use serde::{Deserialize, Serialize};

use crate::errors::{ConsensusError, ConsensusResult};

/// Consensus message types, in stable wire order
///
/// Wire values are part of the protocol and must not be renumbered
/// without a protocol version bump. The enumeration is closed: any value
/// outside 0..=4 fails decoding and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Proposed block body and header, sent by the round leader
    BlockBodyAndHeader = 0,
    /// Block body alone
    BlockBody = 1,
    /// Block header alone
    BlockHeader = 2,
    /// Signature share over the proposed header
    Signature = 3,
    /// Aggregated-signature final info closing the round
    FinalInfo = 4,
}

impl MessageType {
    /// Decode a wire value; unknown values fail closed
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageType::BlockBodyAndHeader),
            1 => Some(MessageType::BlockBody),
            2 => Some(MessageType::BlockHeader),
            3 => Some(MessageType::Signature),
            4 => Some(MessageType::FinalInfo),
            _ => None,
        }
    }

    /// Name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::BlockBodyAndHeader => "(BLOCK_BODY_AND_HEADER)",
            MessageType::BlockBody => "(BLOCK_BODY)",
            MessageType::BlockHeader => "(BLOCK_HEADER)",
            MessageType::Signature => "(SIGNATURE)",
            MessageType::FinalInfo => "(FINAL_INFO)",
        }
    }
}

/// One consensus message as carried on the consensus topic
///
/// Immutable once constructed; produced by a subround or received from the
/// network, consumed by the matching subround, then retained in the round
/// state for audit until round rollover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    /// Message type tag
    pub msg_type: MessageType,

    /// Round the message belongs to
    pub round_index: i64,

    /// Public key of the sending validator
    pub sender_public_key: Vec<u8>,

    /// Type-specific payload (candidate, header, signature share, ...)
    pub payload: Vec<u8>,

    /// Sender's signature over the message
    pub signature: Vec<u8>,
}

impl ConsensusMessage {
    /// Encode for the wire
    pub fn encode(&self) -> ConsensusResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ConsensusError::Internal(e.to_string()))
    }

    /// Decode from the wire
    pub fn decode(raw: &[u8]) -> ConsensusResult<Self> {
        bincode::deserialize(raw).map_err(|e| ConsensusError::InvalidMessage(e.to_string()))
    }

    /// Bytes the sender signs: everything except the signature itself
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            1 + 8 + self.sender_public_key.len() + self.payload.len(),
        );
        bytes.push(self.msg_type as u8);
        bytes.extend_from_slice(&self.round_index.to_le_bytes());
        bytes.extend_from_slice(&self.sender_public_key);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Short identifier for log correlation
    pub fn id(&self) -> String {
        let hash = blake3::hash(&self.signing_bytes());
        hex::encode(&hash.as_bytes()[..8])
    }
}

/// Opaque block candidate handed to the engine by the block construction
/// layer; the engine never interprets the contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCandidate {
    /// Serialized block header
    pub header: Vec<u8>,

    /// Serialized block body
    pub body: Vec<u8>,
}

impl BlockCandidate {
    /// Hash of the header, the value signature shares commit to
    pub fn header_hash(&self) -> [u8; 32] {
        *blake3::hash(&self.header).as_bytes()
    }
}
