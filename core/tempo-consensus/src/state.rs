//! Shared per-round consensus state

use std::collections::{BTreeMap, HashMap};

use crate::message::{BlockCandidate, ConsensusMessage, MessageType};

/// Completion status of one subround
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubroundStatus {
    /// Subround has not met its success condition
    NotFinished,
    /// Subround met its success condition before its deadline
    Finished,
}

/// Mutable record of subround completion and collected messages for the
/// current round
///
/// Owned by the chronology engine for the duration of one round and reset
/// at every round boundary. The active subround is the single writer;
/// admission checks read the last-committed snapshot.
pub struct ConsensusState {
    /// Round the state belongs to
    round_index: i64,

    /// Completion status by subround id
    status: HashMap<i32, SubroundStatus>,

    /// Collected messages by type, in arrival order
    received_messages: HashMap<MessageType, Vec<ConsensusMessage>>,

    /// Candidate block for the round, once known
    candidate: Option<BlockCandidate>,

    /// Signature shares collected so far, keyed by sender public key
    signature_shares: BTreeMap<Vec<u8>, Vec<u8>>,

    /// Aggregated threshold signature, once produced or received
    aggregated_signature: Option<Vec<u8>>,

    /// Whether the round's block was finalized
    finalized: bool,
}

impl ConsensusState {
    /// Create an empty state for round zero
    pub fn new() -> Self {
        Self {
            round_index: 0,
            status: HashMap::new(),
            received_messages: HashMap::new(),
            candidate: None,
            signature_shares: BTreeMap::new(),
            aggregated_signature: None,
            finalized: false,
        }
    }

    /// Reset for a new round: all statuses NotFinished, message table
    /// replaced with the policy's canonical empty table, working data
    /// cleared
    pub fn reset(
        &mut self,
        round_index: i64,
        message_table: HashMap<MessageType, Vec<ConsensusMessage>>,
    ) {
        self.round_index = round_index;
        self.status.clear();
        self.received_messages = message_table;
        self.candidate = None;
        self.signature_shares.clear();
        self.aggregated_signature = None;
        self.finalized = false;
    }

    /// Round this state belongs to
    pub fn round_index(&self) -> i64 {
        self.round_index
    }

    /// Status of a subround; unknown ids read as NotFinished
    pub fn status(&self, subround_id: i32) -> SubroundStatus {
        self.status
            .get(&subround_id)
            .copied()
            .unwrap_or(SubroundStatus::NotFinished)
    }

    /// Set the status of a subround
    pub fn set_status(&mut self, subround_id: i32, status: SubroundStatus) {
        self.status.insert(subround_id, status);
    }

    /// Append a received message under its type
    pub fn add_received_message(&mut self, message: ConsensusMessage) {
        self.received_messages
            .entry(message.msg_type)
            .or_default()
            .push(message);
    }

    /// Messages collected so far for one type
    pub fn received_messages(&self, msg_type: MessageType) -> &[ConsensusMessage] {
        self.received_messages
            .get(&msg_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Message types currently present in the table
    pub fn message_table_len(&self) -> usize {
        self.received_messages.len()
    }

    /// Candidate block for the round, if known
    pub fn candidate(&self) -> Option<&BlockCandidate> {
        self.candidate.as_ref()
    }

    /// Record the candidate block for the round
    pub fn set_candidate(&mut self, candidate: BlockCandidate) {
        self.candidate = Some(candidate);
    }

    /// Record a signature share; returns the share count after insertion
    pub fn add_signature_share(&mut self, sender: Vec<u8>, share: Vec<u8>) -> usize {
        self.signature_shares.insert(sender, share);
        self.signature_shares.len()
    }

    /// Whether a share from this sender is already recorded
    pub fn has_signature_share(&self, sender: &[u8]) -> bool {
        self.signature_shares.contains_key(sender)
    }

    /// Number of shares collected so far
    pub fn signature_share_count(&self) -> usize {
        self.signature_shares.len()
    }

    /// Collected shares in canonical (key) order
    pub fn signature_shares(&self) -> Vec<Vec<u8>> {
        self.signature_shares.values().cloned().collect()
    }

    /// Aggregated threshold signature, if the round produced one
    pub fn aggregated_signature(&self) -> Option<&[u8]> {
        self.aggregated_signature.as_deref()
    }

    /// Record the aggregated signature
    pub fn set_aggregated_signature(&mut self, signature: Vec<u8>) {
        self.aggregated_signature = Some(signature);
    }

    /// Whether the round's block was finalized
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Mark the round's block finalized
    pub fn set_finalized(&mut self) {
        self.finalized = true;
    }
}

impl Default for ConsensusState {
    fn default() -> Self {
        Self::new()
    }
}
