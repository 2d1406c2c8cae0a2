//! Inbound message admission pipeline
//!
//! Every message from the consensus topic passes through here before it
//! can touch the round state: antiflood check, decode, type validity,
//! round match, per-peer budget, then the phase-ordering gate. A message
//! failing the gate is dropped silently; that is correct protocol
//! behavior, not an error.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use parking_lot::RwLock;

use crate::errors::ConsensusResult;
use crate::message::{ConsensusMessage, MessageType};
use crate::round::Rounder;
use crate::service::ConsensusService;
use crate::state::ConsensusState;
use crate::traits::P2PAntifloodHandler;

/// Callback a subround registers for one message type
pub type MessageReceiver = Box<dyn Fn(&ConsensusMessage) + Send + Sync>;

/// Consensus message worker
pub struct Worker {
    service: Arc<dyn ConsensusService>,

    state: Arc<RwLock<ConsensusState>>,

    antiflood: Arc<dyn P2PAntifloodHandler>,

    rounder: Arc<dyn Rounder>,

    topic: String,

    receivers: RwLock<HashMap<MessageType, Vec<MessageReceiver>>>,

    /// Messages seen per peer in the current round
    peer_message_counts: DashMap<String, u32>,
}

impl Worker {
    pub fn new(
        service: Arc<dyn ConsensusService>,
        state: Arc<RwLock<ConsensusState>>,
        antiflood: Arc<dyn P2PAntifloodHandler>,
        rounder: Arc<dyn Rounder>,
        topic: String,
    ) -> Self {
        Self {
            service,
            state,
            antiflood,
            rounder,
            topic,
            receivers: RwLock::new(HashMap::new()),
            peer_message_counts: DashMap::new(),
        }
    }

    /// Register a receiver for one message type; receivers run in
    /// registration order after the message is admitted
    pub fn register_receiver(&self, msg_type: MessageType, receiver: MessageReceiver) {
        self.receivers
            .write()
            .entry(msg_type)
            .or_default()
            .push(receiver);
    }

    /// Clear per-peer accounting at round rollover
    pub fn reset_round(&self) {
        self.peer_message_counts.clear();
    }

    /// Admit one raw message from the network
    ///
    /// Returns Ok(true) when the message was admitted and handed to the
    /// receivers, Ok(false) when it was dropped by policy (stale round,
    /// over budget, ordering gate) and Err only for antiflood refusals
    /// and undecodable input.
    pub fn process_received_message(&self, raw: &[u8], from_peer: &str) -> ConsensusResult<bool> {
        self.antiflood.can_process_message(raw, from_peer)?;

        let msg = ConsensusMessage::decode(raw)?;

        if !self.service.is_message_type_valid(msg.msg_type) {
            debug!("worker: invalid message type {}", msg.msg_type.as_str());
            return Ok(false);
        }

        let current_round = self.rounder.index();
        if msg.round_index != current_round {
            debug!(
                "worker: message {} for round {} dropped in round {}",
                msg.id(),
                msg.round_index,
                current_round
            );
            return Ok(false);
        }

        let count = {
            let mut entry = self
                .peer_message_counts
                .entry(from_peer.to_string())
                .or_insert(0);
            *entry += 1;
            *entry
        };
        // The ceiling itself is policy; enforcement belongs to the
        // antiflood collaborator, which sees the per-round count
        self.antiflood
            .can_process_messages_on_topic(from_peer, &self.topic, count)?;

        if !self.service.can_proceed(&self.state.read(), msg.msg_type) {
            debug!(
                "worker: message {} {} gated, predecessor subround not finished",
                msg.id(),
                msg.msg_type.as_str()
            );
            return Ok(false);
        }

        self.state.write().add_received_message(msg.clone());

        let receivers = self.receivers.read();
        if let Some(list) = receivers.get(&msg.msg_type) {
            for receiver in list {
                receiver(&msg);
            }
        }
        Ok(true)
    }
}
