//! Start-round subround
//!
//! Arms the round: confirms the consensus group and leader are known and
//! opens the gate for block messages. Always succeeds synchronously.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::round::Rounder;
use crate::subround::{ConsensusChannel, Subround, SubroundHandler};
use crate::traits::ConsensusGroup;

/// The first subround of every round
pub struct SubroundStartRound {
    base: Subround,

    group: Arc<ConsensusGroup>,
}

impl SubroundStartRound {
    pub fn new(base: Subround, group: Arc<ConsensusGroup>) -> Self {
        Self { base, group }
    }
}

#[async_trait]
impl SubroundHandler for SubroundStartRound {
    async fn do_work(&self, rounder: &dyn Rounder) -> bool {
        let role = if self.group.is_self_leader() {
            "leader"
        } else {
            "validator"
        };
        info!(
            "round {} started, group size {}, leader {}, acting as {}",
            rounder.index(),
            self.group.size(),
            hex::encode(self.group.leader_key()),
            role,
        );
        debug!("{} done", self.base.name());
        true
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
