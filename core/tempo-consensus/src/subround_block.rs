//! Block subround
//!
//! The round leader builds a candidate block and broadcasts it to the
//! group; validators complete when a candidate arrives, either as a
//! consensus message or through the headers pool subscription.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::message::{BlockCandidate, ConsensusMessage, MessageType};
use crate::round::Rounder;
use crate::state::SubroundStatus;
use crate::subround::{ConsensusChannel, Subround, SubroundHandler};
use crate::traits::{
    BlockCandidateProvider, BroadcastMessenger, ConsensusGroup, HeadersPoolSubscriber,
    ThresholdSigner,
};

/// The block proposal subround
pub struct SubroundBlock {
    base: Subround,

    group: Arc<ConsensusGroup>,

    provider: Arc<dyn BlockCandidateProvider>,

    broadcaster: Arc<dyn BroadcastMessenger>,

    signer: Arc<dyn ThresholdSigner>,

    topic: String,
}

impl SubroundBlock {
    pub fn new(
        base: Subround,
        group: Arc<ConsensusGroup>,
        provider: Arc<dyn BlockCandidateProvider>,
        broadcaster: Arc<dyn BroadcastMessenger>,
        signer: Arc<dyn ThresholdSigner>,
    ) -> Self {
        let topic = group.topic();
        Self {
            base,
            group,
            provider,
            broadcaster,
            signer,
            topic,
        }
    }

    /// Receiver for block-bearing consensus messages, registered with the
    /// worker for BlockBodyAndHeader, BlockBody and BlockHeader
    pub fn on_block_message(&self, msg: &ConsensusMessage) {
        if msg.sender_public_key.as_slice() != self.group.leader_key() {
            debug!(
                "{} dropped block message {} from non-leader",
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
                "{} dropped block message {} with bad signature",
                self.base.name(),
                msg.id()
            );
            return;
        }

        let mut state = self.base.state().write();
        match msg.msg_type {
            MessageType::BlockBodyAndHeader => {
                match bincode::deserialize::<BlockCandidate>(&msg.payload) {
                    Ok(candidate) => state.set_candidate(candidate),
                    Err(e) => {
                        debug!("{} undecodable candidate: {}", self.base.name(), e);
                        return;
                    }
                }
            }
            MessageType::BlockHeader => {
                if state.candidate().is_none() {
                    state.set_candidate(BlockCandidate {
                        header: msg.payload.clone(),
                        body: Vec::new(),
                    });
                }
            }
            MessageType::BlockBody => {
                // A body alone cannot complete the subround; merge it into
                // a header-only candidate when one is present
                let header = match state.candidate() {
                    Some(candidate) if candidate.body.is_empty() => candidate.header.clone(),
                    _ => return,
                };
                state.set_candidate(BlockCandidate {
                    header,
                    body: msg.payload.clone(),
                });
                return;
            }
            _ => return,
        }
        // Commit completion before signalling so the gate admits the
        // leader's follow-up messages without waiting for the round loop
        state.set_status(self.base.current(), SubroundStatus::Finished);
        drop(state);

        debug!("{} candidate received, message {}", self.base.name(), msg.id());
        self.base.channel().signal();
    }

    /// Subscribe to the headers pool; a new candidate header is this
    /// subround's completion trigger on validator nodes
    pub fn attach_headers_pool(self: Arc<Self>, pool: &dyn HeadersPoolSubscriber) {
        let subround = self;
        pool.register_handler(Box::new(move |header, _hash| {
            let mut state = subround.base.state().write();
            if state.candidate().is_none() {
                state.set_candidate(BlockCandidate {
                    header: header.to_vec(),
                    body: Vec::new(),
                });
            }
            state.set_status(subround.base.current(), SubroundStatus::Finished);
            drop(state);
            subround.base.channel().signal();
        }));
    }

    async fn propose(&self, rounder: &dyn Rounder) -> bool {
        let candidate = match self.provider.next_candidate(rounder.index()) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("{} no block candidate: {}", self.base.name(), e);
                return false;
            }
        };

        let payload = match bincode::serialize(&candidate) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{} candidate serialization failed: {}", self.base.name(), e);
                return false;
            }
        };

        self.base.state().write().set_candidate(candidate);

        let mut msg = ConsensusMessage {
            msg_type: MessageType::BlockBodyAndHeader,
            round_index: rounder.index(),
            sender_public_key: self.group.own_public_key.clone(),
            payload,
            signature: Vec::new(),
        };
        msg.signature = match self.signer.sign(&msg.signing_bytes()) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("{} message signing failed: {}", self.base.name(), e);
                return false;
            }
        };

        let raw = match msg.encode() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("{} message encoding failed: {}", self.base.name(), e);
                return false;
            }
        };
        if let Err(e) = self.broadcaster.broadcast(&self.topic, &raw).await {
            // The proposal is still locally known; the round may recover
            // through rebroadcast by the transport layer
            warn!("{} broadcast failed: {}", self.base.name(), e);
        }

        debug!(
            "{} proposed candidate for round {}, message {}",
            self.base.name(),
            rounder.index(),
            msg.id()
        );
        true
    }
}

#[async_trait]
impl SubroundHandler for SubroundBlock {
    async fn do_work(&self, rounder: &dyn Rounder) -> bool {
        if self.base.state().read().status(self.base.previous()) != SubroundStatus::Finished {
            debug!("{} predecessor not finished", self.base.name());
            return false;
        }

        if self.group.is_self_leader() {
            return self.propose(rounder).await;
        }

        // Validator: the candidate may already have arrived
        self.base.state().read().candidate().is_some()
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
