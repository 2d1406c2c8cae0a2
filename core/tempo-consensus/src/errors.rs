//! Error types for the consensus engine

use thiserror::Error;

/// Consensus error types
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Round duration must be strictly positive
    #[error("Invalid round duration: {0} ms")]
    InvalidRoundDuration(u64),

    /// Subround window fractions are malformed
    #[error("Invalid subround window for {name}: [{start}, {end})")]
    InvalidSubroundWindow { name: &'static str, start: f64, end: f64 },

    /// Subround id linkage does not form the expected pipeline
    #[error("Invalid subround linkage: {0}")]
    InvalidSubroundLinkage(String),

    /// The consensus group is empty or inconsistent
    #[error("Invalid consensus group: {0}")]
    InvalidConsensusGroup(String),

    /// Subround list mutation attempted while rounds are running
    #[error("Chronology is running; subround list cannot change")]
    ChronologyRunning,

    /// Message could not be decoded from the wire
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Antiflood collaborator refused the message
    #[error("Flood detected: {0}")]
    FloodDetected(String),

    /// Signing failed in the threshold signer collaborator
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Signature share verification failed
    #[error("Signature verification failed for sender {0}")]
    VerificationFailed(String),

    /// Aggregation failed in the threshold signer collaborator
    #[error("Signature aggregation failed: {0}")]
    AggregationFailed(String),

    /// No block candidate available for the round
    #[error("Block candidate unavailable: {0}")]
    CandidateUnavailable(String),

    /// Broadcast collaborator reported a failure
    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;
