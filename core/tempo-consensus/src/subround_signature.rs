//! Signature subround
//!
//! Every group member signs the candidate header hash and broadcasts its
//! signature share; the subround completes once the threshold number of
//! valid shares is collected.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::message::{ConsensusMessage, MessageType};
use crate::round::Rounder;
use crate::state::SubroundStatus;
use crate::subround::{ConsensusChannel, Subround, SubroundHandler, SR_BLOCK};
use crate::traits::{BroadcastMessenger, ConsensusGroup, ThresholdSigner};

/// The signature collection subround
pub struct SubroundSignature {
    base: Subround,

    group: Arc<ConsensusGroup>,

    signer: Arc<dyn ThresholdSigner>,

    broadcaster: Arc<dyn BroadcastMessenger>,

    topic: String,
}

impl SubroundSignature {
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

    /// Receiver for signature-share messages, registered with the worker
    pub fn on_signature_message(&self, msg: &ConsensusMessage) {
        if !self.group.is_member(&msg.sender_public_key) {
            debug!(
                "{} dropped share {} from non-member",
                self.base.name(),
                msg.id()
            );
            return;
        }

        let header_hash = {
            let state = self.base.state().read();
            if state.has_signature_share(&msg.sender_public_key) {
                debug!(
                    "{} duplicate share from {}",
                    self.base.name(),
                    hex::encode(&msg.sender_public_key)
                );
                return;
            }
            match state.candidate() {
                Some(candidate) => candidate.header_hash(),
                // The ordering gate admits shares only after the block
                // subround finished, so a missing candidate is abnormal
                None => {
                    warn!("{} share before candidate", self.base.name());
                    return;
                }
            }
        };

        if self
            .signer
            .verify(&header_hash, &msg.payload, &msg.sender_public_key)
            .is_err()
        {
            debug!(
                "{} invalid share from {}",
                self.base.name(),
                hex::encode(&msg.sender_public_key)
            );
            return;
        }

        let count = {
            let mut state = self.base.state().write();
            let count =
                state.add_signature_share(msg.sender_public_key.clone(), msg.payload.clone());
            if count >= self.group.threshold() {
                state.set_status(self.base.current(), SubroundStatus::Finished);
            }
            count
        };
        debug!(
            "{} collected {}/{} shares",
            self.base.name(),
            count,
            self.group.threshold()
        );
        if count >= self.group.threshold() {
            self.base.channel().signal();
        }
    }
}

#[async_trait]
impl SubroundHandler for SubroundSignature {
    async fn do_work(&self, rounder: &dyn Rounder) -> bool {
        let header_hash = {
            let state = self.base.state().read();
            if state.status(SR_BLOCK) != SubroundStatus::Finished {
                debug!("{} block subround not finished", self.base.name());
                return false;
            }
            match state.candidate() {
                Some(candidate) => candidate.header_hash(),
                None => {
                    warn!("{} no candidate to sign", self.base.name());
                    return false;
                }
            }
        };

        let share = match self.signer.sign(&header_hash) {
            Ok(share) => share,
            Err(e) => {
                warn!("{} signing failed: {}", self.base.name(), e);
                return false;
            }
        };

        let count = {
            let mut state = self.base.state().write();
            let count =
                state.add_signature_share(self.group.own_public_key.clone(), share.clone());
            if count >= self.group.threshold() {
                state.set_status(self.base.current(), SubroundStatus::Finished);
            }
            count
        };

        let mut msg = ConsensusMessage {
            msg_type: MessageType::Signature,
            round_index: rounder.index(),
            sender_public_key: self.group.own_public_key.clone(),
            payload: share,
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
                    warn!("{} share broadcast failed: {}", self.base.name(), e);
                }
            }
            Err(e) => warn!("{} share encoding failed: {}", self.base.name(), e),
        }

        count >= self.group.threshold()
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
