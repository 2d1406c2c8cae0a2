//! Consensus policy service
//!
//! Stateless policy parameterized by the signature scheme. The BLS
//! variant defines the message-type catalogue, the per-peer rate ceiling
//! and the phase-ordering gate that decides which message types may be
//! processed at which point in a round.

use std::collections::HashMap;

use crate::message::{ConsensusMessage, MessageType};
use crate::state::{ConsensusState, SubroundStatus};
use crate::subround::{SR_BLOCK, SR_END_ROUND, SR_SIGNATURE, SR_START_ROUND};

/// Maximum consensus messages one peer may send in one round under BLS
const PEER_MAX_MESSAGES_PER_ROUND: u32 = 2;

/// Policy surface shared by all signature-scheme variants
pub trait ConsensusService: Send + Sync {
    /// Canonical empty message table for one round, covering exactly the
    /// scheme's message types
    fn init_received_messages(&self) -> HashMap<MessageType, Vec<ConsensusMessage>>;

    /// Fixed per-peer message ceiling for the consensus topic
    fn max_messages_in_a_round_per_peer(&self) -> u32;

    /// Stable enumeration of the scheme's message types, in wire order
    fn message_range(&self) -> Vec<MessageType>;

    /// Whether the message type belongs to the scheme's catalogue
    fn is_message_type_valid(&self, msg_type: MessageType) -> bool;

    /// The ordering gate: whether a message of this type may be processed
    /// given the current phase-completion status
    fn can_proceed(&self, state: &ConsensusState, msg_type: MessageType) -> bool;

    /// Human-readable name of a message type
    fn message_name(&self, msg_type: MessageType) -> &'static str;

    /// Human-readable name of a subround id
    fn subround_name(&self, subround_id: i32) -> &'static str;
}

/// BLS threshold-signature consensus policy
#[derive(Debug, Default, Clone, Copy)]
pub struct BlsConsensusService;

impl BlsConsensusService {
    /// Create the BLS policy object
    pub fn new() -> Self {
        Self
    }

    /// Whether the message carries both block body and header
    pub fn is_message_with_block_body_and_header(&self, msg_type: MessageType) -> bool {
        msg_type == MessageType::BlockBodyAndHeader
    }

    /// Whether the message carries a block body alone
    pub fn is_message_with_block_body(&self, msg_type: MessageType) -> bool {
        msg_type == MessageType::BlockBody
    }

    /// Whether the message carries a block header alone
    pub fn is_message_with_block_header(&self, msg_type: MessageType) -> bool {
        msg_type == MessageType::BlockHeader
    }

    /// Whether the message carries a signature share
    pub fn is_message_with_signature(&self, msg_type: MessageType) -> bool {
        msg_type == MessageType::Signature
    }

    /// Whether the message carries final info
    pub fn is_message_with_final_info(&self, msg_type: MessageType) -> bool {
        msg_type == MessageType::FinalInfo
    }

    /// Whether the subround id is the signature subround
    pub fn is_subround_signature(&self, subround_id: i32) -> bool {
        subround_id == SR_SIGNATURE
    }

    /// Whether the subround id is the start-round subround
    pub fn is_subround_start_round(&self, subround_id: i32) -> bool {
        subround_id == SR_START_ROUND
    }
}

impl ConsensusService for BlsConsensusService {
    fn init_received_messages(&self) -> HashMap<MessageType, Vec<ConsensusMessage>> {
        let mut table = HashMap::new();
        table.insert(MessageType::BlockBodyAndHeader, Vec::new());
        table.insert(MessageType::BlockBody, Vec::new());
        table.insert(MessageType::BlockHeader, Vec::new());
        table.insert(MessageType::Signature, Vec::new());
        table.insert(MessageType::FinalInfo, Vec::new());
        table
    }

    fn max_messages_in_a_round_per_peer(&self) -> u32 {
        PEER_MAX_MESSAGES_PER_ROUND
    }

    fn message_range(&self) -> Vec<MessageType> {
        vec![
            MessageType::BlockBodyAndHeader,
            MessageType::BlockBody,
            MessageType::BlockHeader,
            MessageType::Signature,
            MessageType::FinalInfo,
        ]
    }

    fn is_message_type_valid(&self, msg_type: MessageType) -> bool {
        matches!(
            msg_type,
            MessageType::BlockBodyAndHeader
                | MessageType::BlockBody
                | MessageType::BlockHeader
                | MessageType::Signature
                | MessageType::FinalInfo
        )
    }

    fn can_proceed(&self, state: &ConsensusState, msg_type: MessageType) -> bool {
        match msg_type {
            MessageType::BlockBodyAndHeader => {
                state.status(SR_START_ROUND) == SubroundStatus::Finished
            }
            MessageType::BlockBody => state.status(SR_START_ROUND) == SubroundStatus::Finished,
            MessageType::BlockHeader => state.status(SR_START_ROUND) == SubroundStatus::Finished,
            MessageType::Signature => state.status(SR_BLOCK) == SubroundStatus::Finished,
            MessageType::FinalInfo => state.status(SR_SIGNATURE) == SubroundStatus::Finished,
        }
    }

    fn message_name(&self, msg_type: MessageType) -> &'static str {
        msg_type.as_str()
    }

    fn subround_name(&self, subround_id: i32) -> &'static str {
        match subround_id {
            SR_START_ROUND => "(START_ROUND)",
            SR_BLOCK => "(BLOCK)",
            SR_SIGNATURE => "(SIGNATURE)",
            SR_END_ROUND => "(END_ROUND)",
            _ => "(UNKNOWN)",
        }
    }
}
