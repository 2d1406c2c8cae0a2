//! Final-info (end-round) subround
//!
//! The terminal subround of the pipeline. The leader aggregates the
//! collected signature shares into one threshold signature and broadcasts
//! the final info; validators finalize when it arrives.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::message::{ConsensusMessage, MessageType};
use crate::round::Rounder;
use crate::state::SubroundStatus;
use crate::subround::{ConsensusChannel, Subround, SubroundHandler, SR_SIGNATURE};
use crate::traits::{BroadcastMessenger, ConsensusGroup, ThresholdSigner};

/// The finalization subround closing the round
pub struct SubroundFinalInfo {
    base: Subround,

    group: Arc<ConsensusGroup>,

    signer: Arc<dyn ThresholdSigner>,

    broadcaster: Arc<dyn BroadcastMessenger>,

    topic: String,
}

impl SubroundFinalInfo {
    pub fn new(
        base: Subround,
        group: Arc<ConsensusGroup>,
        signer: Arc<dyn ThresholdSigner>,
        broadcaster: Arc<dyn BroadcastMessenger>,
    ) -> Self {
        let topic = group.topic();
        Self {
            base,
            group,
            signer,
            broadcaster,
            topic,
        }
    }

    /// Receiver for final-info messages, registered with the worker
    pub fn on_final_info_message(&self, msg: &ConsensusMessage) {
        if msg.sender_public_key.as_slice() != self.group.leader_key() {
            debug!(
                "{} dropped final info {} from non-leader",
                self.base.name(),
                msg.id()
            );
            return;
        }
        if self
            .signer
            .verify(&msg.signing_bytes(), &msg.signature, &msg.sender_public_key)
            .is_err()
        {
            debug!(
                "{} dropped final info {} with bad signature",
                self.base.name(),
                msg.id()
            );
            return;
        }

        let header_hash = {
            let state = self.base.state().read();
            match state.candidate() {
                Some(candidate) => candidate.header_hash(),
                None => {
                    warn!("{} final info before candidate", self.base.name());
                    return;
                }
            }
        };
        if self
            .signer
            .verify_aggregate(&header_hash, &msg.payload, &self.group.members)
            .is_err()
        {
            debug!(
                "{} dropped final info {} with bad aggregate",
                self.base.name(),
                msg.id()
            );
            return;
        }

        {
            let mut state = self.base.state().write();
            state.set_aggregated_signature(msg.payload.clone());
            state.set_finalized();
            state.set_status(self.base.current(), SubroundStatus::Finished);
        }
        info!(
            "block finalized for round {}, message {}",
            msg.round_index,
            msg.id()
        );
        self.base.channel().signal();
    }

    async fn finalize_as_leader(&self, rounder: &dyn Rounder) -> bool {
        let shares = {
            let state = self.base.state().read();
            if state.signature_share_count() < self.group.threshold() {
                warn!(
                    "{} only {}/{} shares collected",
                    self.base.name(),
                    state.signature_share_count(),
                    self.group.threshold()
                );
                return false;
            }
            state.signature_shares()
        };

        let aggregated = match self.signer.aggregate(&shares) {
            Ok(aggregated) => aggregated,
            Err(e) => {
                warn!("{} aggregation failed: {}", self.base.name(), e);
                return false;
            }
        };

        {
            let mut state = self.base.state().write();
            state.set_aggregated_signature(aggregated.clone());
            state.set_finalized();
            state.set_status(self.base.current(), SubroundStatus::Finished);
        }

        let mut msg = ConsensusMessage {
            msg_type: MessageType::FinalInfo,
            round_index: rounder.index(),
            sender_public_key: self.group.own_public_key.clone(),
            payload: aggregated,
            signature: Vec::new(),
        };
        msg.signature = match self.signer.sign(&msg.signing_bytes()) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("{} message signing failed: {}", self.base.name(), e);
                return false;
            }
        };
        match msg.encode() {
            Ok(raw) => {
                if let Err(e) = self.broadcaster.broadcast(&self.topic, &raw).await {
                    warn!("{} final info broadcast failed: {}", self.base.name(), e);
                }
            }
            Err(e) => warn!("{} final info encoding failed: {}", self.base.name(), e),
        }

        info!("block finalized for round {}", rounder.index());
        true
    }
}

#[async_trait]
impl SubroundHandler for SubroundFinalInfo {
    async fn do_work(&self, rounder: &dyn Rounder) -> bool {
        {
            let state = self.base.state().read();
            if state.status(SR_SIGNATURE) != SubroundStatus::Finished {
                debug!("{} signature subround not finished", self.base.name());
                return false;
            }
            if state.is_finalized() {
                return true;
            }
        }

        if self.group.is_self_leader() {
            return self.finalize_as_leader(rounder).await;
        }

        // Validator: wait for the leader's final info
        false
    }

    fn previous(&self) -> i32 {
        self.base.previous()
    }

    fn current(&self) -> i32 {
        self.base.current()
    }

    fn next(&self) -> i32 {
        self.base.next()
    }

    fn start_time(&self) -> i64 {
        self.base.start_time()
    }

    fn end_time(&self) -> i64 {
        self.base.end_time()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn consensus_channel(&self) -> Arc<ConsensusChannel> {
        self.base.channel()
    }
}
