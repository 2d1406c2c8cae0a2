//! External collaborator interfaces
//!
//! Transport, antiflood protection, block construction and signature
//! cryptography live outside this crate; the engine consumes them through
//! these traits.

use async_trait::async_trait;

use crate::errors::{ConsensusError, ConsensusResult};
use crate::message::BlockCandidate;

/// Outbound message transport for the consensus group
#[async_trait]
pub trait BroadcastMessenger: Send + Sync {
    /// Broadcast a fully-formed message on a topic; must never block the
    /// round loop beyond the send itself
    async fn broadcast(&self, topic: &str, data: &[u8]) -> ConsensusResult<()>;

    /// Send a fully-formed message to one peer
    async fn send_to_peer(&self, topic: &str, data: &[u8], peer_id: &str) -> ConsensusResult<()>;
}

/// Rate-limiting collaborator protecting the engine from excessive
/// per-peer message volume
pub trait P2PAntifloodHandler: Send + Sync {
    /// Returns an error if the message from the given peer must be dropped
    fn can_process_message(&self, raw: &[u8], from_peer: &str) -> ConsensusResult<()>;

    /// Returns an error if the peer exceeded its budget on the topic,
    /// given the number of messages observed so far this round
    fn can_process_messages_on_topic(
        &self,
        peer: &str,
        topic: &str,
        num_messages: u32,
    ) -> ConsensusResult<()>;
}

/// Callback invoked when a new candidate block header lands in the pool;
/// arguments are the serialized header and its hash
pub type HeaderHandler = Box<dyn Fn(&[u8], &[u8]) + Send + Sync>;

/// Subscription surface of the header/body pool
pub trait HeadersPoolSubscriber: Send + Sync {
    /// Register for notifications on new candidate headers
    fn register_handler(&self, handler: HeaderHandler);
}

/// Block construction layer, consumed as an opaque candidate source
pub trait BlockCandidateProvider: Send + Sync {
    /// Produce the block candidate the leader proposes for the round
    fn next_candidate(&self, round_index: i64) -> ConsensusResult<BlockCandidate>;
}

/// Threshold (BLS-style) signing capability
///
/// The scheme arithmetic is external; the engine only ever sees opaque
/// byte strings for shares and aggregates.
pub trait ThresholdSigner: Send + Sync {
    /// Sign a message with the node's own key
    fn sign(&self, message: &[u8]) -> ConsensusResult<Vec<u8>>;

    /// Verify a signature share from the given public key
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> ConsensusResult<()>;

    /// Aggregate collected shares into one threshold signature
    fn aggregate(&self, signatures: &[Vec<u8>]) -> ConsensusResult<Vec<u8>>;

    /// Verify an aggregated signature against the contributing public keys
    fn verify_aggregate(
        &self,
        message: &[u8],
        signature: &[u8],
        public_keys: &[Vec<u8>],
    ) -> ConsensusResult<()>;
}

/// The validator group known for the round, with its designated leader
///
/// Leader election is outside this crate; the group arrives fully formed.
#[derive(Debug, Clone)]
pub struct ConsensusGroup {
    /// Public keys of the group members, in canonical order
    pub members: Vec<Vec<u8>>,

    /// Index of the round leader within `members`
    pub leader_index: usize,

    /// This node's own public key
    pub own_public_key: Vec<u8>,
}

impl ConsensusGroup {
    /// Build and validate a consensus group
    pub fn new(
        members: Vec<Vec<u8>>,
        leader_index: usize,
        own_public_key: Vec<u8>,
    ) -> ConsensusResult<Self> {
        if members.is_empty() {
            return Err(ConsensusError::InvalidConsensusGroup(
                "empty member list".to_string(),
            ));
        }
        if leader_index >= members.len() {
            return Err(ConsensusError::InvalidConsensusGroup(format!(
                "leader index {} out of range for {} members",
                leader_index,
                members.len()
            )));
        }
        Ok(Self {
            members,
            leader_index,
            own_public_key,
        })
    }

    /// Number of validators in the group
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Public key of the round leader
    pub fn leader_key(&self) -> &[u8] {
        &self.members[self.leader_index]
    }

    /// Whether this node leads the round
    pub fn is_self_leader(&self) -> bool {
        self.leader_key() == self.own_public_key.as_slice()
    }

    /// Whether the given key belongs to the group
    pub fn is_member(&self, public_key: &[u8]) -> bool {
        self.members.iter().any(|m| m == public_key)
    }

    /// Signature threshold: 2/3 of the group plus one, capped at the size
    pub fn threshold(&self) -> usize {
        (self.members.len() * 2 / 3 + 1).min(self.members.len())
    }

    /// Consensus topic name derived from the group composition
    pub fn topic(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for member in &self.members {
            hasher.update(member);
        }
        format!("consensus_{}", hex::encode(&hasher.finalize().as_bytes()[..8]))
    }
}
