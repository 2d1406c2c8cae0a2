//! Shared test doubles for the collaborator traits

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{ConsensusError, ConsensusResult};
use crate::message::BlockCandidate;
use crate::traits::{
    BlockCandidateProvider, BroadcastMessenger, HeaderHandler, HeadersPoolSubscriber,
    P2PAntifloodHandler, ThresholdSigner,
};

/// Capture log output in test runs; safe to call from every test
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic stand-in for the threshold signature capability: a
/// "signature" is the blake3 hash of the signed bytes
pub struct StubSigner;

impl ThresholdSigner for StubSigner {
    fn sign(&self, message: &[u8]) -> ConsensusResult<Vec<u8>> {
        Ok(blake3::hash(message).as_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> ConsensusResult<()> {
        if signature == blake3::hash(message).as_bytes() {
            Ok(())
        } else {
            Err(ConsensusError::VerificationFailed(hex::encode(public_key)))
        }
    }

    fn aggregate(&self, signatures: &[Vec<u8>]) -> ConsensusResult<Vec<u8>> {
        if signatures.is_empty() {
            return Err(ConsensusError::AggregationFailed("no shares".to_string()));
        }
        let mut hasher = blake3::Hasher::new();
        for signature in signatures {
            hasher.update(signature);
        }
        Ok(hasher.finalize().as_bytes().to_vec())
    }

    fn verify_aggregate(
        &self,
        _message: &[u8],
        signature: &[u8],
        _public_keys: &[Vec<u8>],
    ) -> ConsensusResult<()> {
        if signature.is_empty() {
            return Err(ConsensusError::AggregationFailed("empty aggregate".to_string()));
        }
        Ok(())
    }
}

/// Signer whose own-key operations fail, for error-path tests
pub struct FailingSigner;

impl ThresholdSigner for FailingSigner {
    fn sign(&self, _message: &[u8]) -> ConsensusResult<Vec<u8>> {
        Err(ConsensusError::SigningFailed("stub failure".to_string()))
    }

    fn verify(&self, _message: &[u8], _signature: &[u8], _public_key: &[u8]) -> ConsensusResult<()> {
        Ok(())
    }

    fn aggregate(&self, _signatures: &[Vec<u8>]) -> ConsensusResult<Vec<u8>> {
        Err(ConsensusError::AggregationFailed("stub failure".to_string()))
    }

    fn verify_aggregate(
        &self,
        _message: &[u8],
        _signature: &[u8],
        _public_keys: &[Vec<u8>],
    ) -> ConsensusResult<()> {
        Ok(())
    }
}

/// Broadcast recorder
#[derive(Default)]
pub struct StubBroadcaster {
    sent: Mutex<Vec<(String, Vec<u8>)>>,

    pub fail: bool,
}

impl StubBroadcaster {
    /// Everything broadcast so far, in send order
    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl BroadcastMessenger for StubBroadcaster {
    async fn broadcast(&self, topic: &str, data: &[u8]) -> ConsensusResult<()> {
        if self.fail {
            return Err(ConsensusError::BroadcastFailed("stub failure".to_string()));
        }
        self.sent.lock().push((topic.to_string(), data.to_vec()));
        Ok(())
    }

    async fn send_to_peer(&self, topic: &str, data: &[u8], _peer_id: &str) -> ConsensusResult<()> {
        self.broadcast(topic, data).await
    }
}

/// Candidate source producing one deterministic block per round
#[derive(Default)]
pub struct StubProvider {
    pub fail: bool,
}

impl BlockCandidateProvider for StubProvider {
    fn next_candidate(&self, round_index: i64) -> ConsensusResult<BlockCandidate> {
        if self.fail {
            return Err(ConsensusError::CandidateUnavailable("stub failure".to_string()));
        }
        Ok(BlockCandidate {
            header: round_index.to_le_bytes().to_vec(),
            body: vec![0xbb; 8],
        })
    }
}

/// Antiflood stub; rejects everything when `reject` is set and applies a
/// per-topic ceiling when `max_per_topic` is set
#[derive(Default)]
pub struct StubAntiflood {
    pub reject: bool,

    pub max_per_topic: Option<u32>,
}

impl P2PAntifloodHandler for StubAntiflood {
    fn can_process_message(&self, _raw: &[u8], from_peer: &str) -> ConsensusResult<()> {
        if self.reject {
            return Err(ConsensusError::FloodDetected(from_peer.to_string()));
        }
        Ok(())
    }

    fn can_process_messages_on_topic(
        &self,
        peer: &str,
        _topic: &str,
        num_messages: u32,
    ) -> ConsensusResult<()> {
        let over_budget = self
            .max_per_topic
            .map(|max| num_messages > max)
            .unwrap_or(false);
        if self.reject || over_budget {
            return Err(ConsensusError::FloodDetected(format!(
                "{}: {} messages",
                peer, num_messages
            )));
        }
        Ok(())
    }
}

/// Headers pool stub with a manual publish hook
#[derive(Default)]
pub struct StubHeadersPool {
    handlers: Mutex<Vec<HeaderHandler>>,
}

impl StubHeadersPool {
    /// Push a header to every registered handler
    pub fn publish(&self, header: &[u8]) {
        let hash = blake3::hash(header);
        for handler in self.handlers.lock().iter() {
            handler(header, hash.as_bytes());
        }
    }
}

impl HeadersPoolSubscriber for StubHeadersPool {
    fn register_handler(&self, handler: HeaderHandler) {
        self.handlers.lock().push(handler);
    }
}
