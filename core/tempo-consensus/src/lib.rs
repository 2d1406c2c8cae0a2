//! Tempo Consensus Module
//!
//! Round-clock driven threshold consensus engine for the Tempo
//! blockchain. A fixed-duration round is split into ordered subrounds
//! (StartRound, Block, Signature, FinalInfo); validators agree on and
//! finalize one block per round using BLS-style threshold signatures
//! rather than multi-round voting.
//!
//! Transport, block construction, signature arithmetic and persistence
//! are external collaborators, consumed through the traits in [`traits`].

pub mod chronology;
pub mod config;
pub mod errors;
pub mod factory;
pub mod message;
pub mod round;
pub mod service;
pub mod state;
pub mod subround;
pub mod subround_block;
pub mod subround_final;
pub mod subround_signature;
pub mod subround_start;
pub mod traits;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export main types for the public API
pub use chronology::{Chronology, ChronologyState};
pub use config::{ChronologyConfig, SubroundWindow};
pub use errors::{ConsensusError, ConsensusResult};
pub use factory::{build_pipeline, ConsensusPipeline, ConsensusPipelineArgs};
pub use message::{BlockCandidate, ConsensusMessage, MessageType};
pub use round::{RoundTracker, Rounder};
pub use service::{BlsConsensusService, ConsensusService};
pub use state::{ConsensusState, SubroundStatus};
pub use subround::{
    ConsensusChannel, Subround, SubroundHandler, SR_BEFORE_START_ROUND, SR_BLOCK, SR_END_ROUND,
    SR_SIGNATURE, SR_START_ROUND,
};
pub use traits::{
    BlockCandidateProvider, BroadcastMessenger, ConsensusGroup, HeadersPoolSubscriber,
    P2PAntifloodHandler, ThresholdSigner,
};
pub use worker::Worker;
