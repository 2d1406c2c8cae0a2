//! Consensus pipeline assembly
//!
//! Wires the round tracker, shared state, BLS policy, worker and the four
//! subrounds into a ready-to-run chronology.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::chronology::Chronology;
use crate::config::ChronologyConfig;
use crate::errors::ConsensusResult;
use crate::message::MessageType;
use crate::round::{RoundTracker, Rounder};
use crate::service::{BlsConsensusService, ConsensusService};
use crate::state::ConsensusState;
use crate::subround::{
    Subround, SR_BEFORE_START_ROUND, SR_BLOCK, SR_END_ROUND, SR_SIGNATURE, SR_START_ROUND,
};
use crate::subround_block::SubroundBlock;
use crate::subround_final::SubroundFinalInfo;
use crate::subround_signature::SubroundSignature;
use crate::subround_start::SubroundStartRound;
use crate::traits::{
    BlockCandidateProvider, BroadcastMessenger, ConsensusGroup, HeadersPoolSubscriber,
    P2PAntifloodHandler, ThresholdSigner,
};
use crate::worker::Worker;

/// Collaborators and configuration needed to assemble one pipeline
pub struct ConsensusPipelineArgs {
    pub config: ChronologyConfig,

    pub group: Arc<ConsensusGroup>,

    pub provider: Arc<dyn BlockCandidateProvider>,

    pub broadcaster: Arc<dyn BroadcastMessenger>,

    pub signer: Arc<dyn ThresholdSigner>,

    pub antiflood: Arc<dyn P2PAntifloodHandler>,

    /// Optional headers pool; when present, the block subround completes
    /// on new-header notifications as well
    pub headers_pool: Option<Arc<dyn HeadersPoolSubscriber>>,
}

/// An assembled consensus pipeline
pub struct ConsensusPipeline {
    pub chronology: Arc<Chronology>,

    pub worker: Arc<Worker>,

    pub state: Arc<RwLock<ConsensusState>>,

    pub rounder: Arc<RoundTracker>,
}

/// Build the full BLS pipeline: StartRound, Block, Signature, FinalInfo
pub fn build_pipeline(args: ConsensusPipelineArgs) -> ConsensusResult<ConsensusPipeline> {
    args.config.validate()?;

    let rounder = Arc::new(RoundTracker::new(
        args.config.round_duration_ms,
        args.config.genesis_timestamp_ms,
    )?);
    let state = Arc::new(RwLock::new(ConsensusState::new()));
    let service: Arc<dyn ConsensusService> = Arc::new(BlsConsensusService::new());

    let worker = Arc::new(Worker::new(
        Arc::clone(&service),
        Arc::clone(&state),
        Arc::clone(&args.antiflood),
        rounder.clone() as Arc<dyn Rounder>,
        args.group.topic(),
    ));

    let duration = args.config.round_duration_ms;
    let (start_from, start_to) = args.config.start_round_window.to_offsets_ms(duration);
    let (block_from, block_to) = args.config.block_window.to_offsets_ms(duration);
    let (sig_from, sig_to) = args.config.signature_window.to_offsets_ms(duration);
    let (final_from, final_to) = args.config.final_info_window.to_offsets_ms(duration);

    let start_round = Arc::new(SubroundStartRound::new(
        Subround::new(
            SR_BEFORE_START_ROUND,
            SR_START_ROUND,
            SR_BLOCK,
            start_from,
            start_to,
            "(START_ROUND)",
            state.clone(),
        )?,
        Arc::clone(&args.group),
    ));

    let block = Arc::new(SubroundBlock::new(
        Subround::new(
            SR_START_ROUND,
            SR_BLOCK,
            SR_SIGNATURE,
            block_from,
            block_to,
            "(BLOCK)",
            state.clone(),
        )?,
        Arc::clone(&args.group),
        Arc::clone(&args.provider),
        Arc::clone(&args.broadcaster),
        Arc::clone(&args.signer),
    ));
    if let Some(pool) = &args.headers_pool {
        Arc::clone(&block).attach_headers_pool(pool.as_ref());
    }

    let signature = Arc::new(SubroundSignature::new(
        Subround::new(
            SR_BLOCK,
            SR_SIGNATURE,
            SR_END_ROUND,
            sig_from,
            sig_to,
            "(SIGNATURE)",
            state.clone(),
        )?,
        Arc::clone(&args.group),
        Arc::clone(&args.signer),
        Arc::clone(&args.broadcaster),
    ));

    let final_info = Arc::new(SubroundFinalInfo::new(
        Subround::new(
            SR_SIGNATURE,
            SR_END_ROUND,
            SR_BEFORE_START_ROUND,
            final_from,
            final_to,
            "(END_ROUND)",
            state.clone(),
        )?,
        Arc::clone(&args.group),
        Arc::clone(&args.signer),
        Arc::clone(&args.broadcaster),
    ));

    // Inbound wiring: block-bearing types feed the block subround, shares
    // feed the signature subround, final info feeds the terminal one
    for msg_type in [
        MessageType::BlockBodyAndHeader,
        MessageType::BlockBody,
        MessageType::BlockHeader,
    ] {
        let receiver = Arc::clone(&block);
        worker.register_receiver(msg_type, Box::new(move |msg| receiver.on_block_message(msg)));
    }
    {
        let receiver = Arc::clone(&signature);
        worker.register_receiver(
            MessageType::Signature,
            Box::new(move |msg| receiver.on_signature_message(msg)),
        );
    }
    {
        let receiver = Arc::clone(&final_info);
        worker.register_receiver(
            MessageType::FinalInfo,
            Box::new(move |msg| receiver.on_final_info_message(msg)),
        );
    }

    let chronology = Arc::new(Chronology::new(
        &args.config,
        rounder.clone() as Arc<dyn Rounder>,
        service,
        state.clone(),
        Some(Arc::clone(&worker)),
    )?);
    chronology.add_subround(start_round)?;
    chronology.add_subround(block)?;
    chronology.add_subround(signature)?;
    chronology.add_subround(final_info)?;

    Ok(ConsensusPipeline {
        chronology,
        worker,
        state,
        rounder,
    })
}
