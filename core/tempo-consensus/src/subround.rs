//! Subround framework
//!
//! A subround is one ordered stage within a round, with its own time
//! window and success condition. The chronology engine drives subrounds
//! strictly sequentially; each one may complete early through its
//! consensus channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::errors::{ConsensusError, ConsensusResult};
use crate::round::Rounder;
use crate::state::ConsensusState;

/// Pseudo-id preceding the first subround of a round
pub const SR_BEFORE_START_ROUND: i32 = -1;
/// Start-round subround id
pub const SR_START_ROUND: i32 = 0;
/// Block subround id
pub const SR_BLOCK: i32 = 1;
/// Signature subround id
pub const SR_SIGNATURE: i32 = 2;
/// Final-info (end-round) subround id; terminal, no successor
pub const SR_END_ROUND: i32 = 3;

/// Single-slot early-completion signal
///
/// First writer wins, reads are idempotent; a fired signal and a natural
/// deadline are equivalent race outcomes for the engine. Reset at every
/// round boundary.
pub struct ConsensusChannel {
    done: AtomicBool,
    notify: Notify,
}

impl ConsensusChannel {
    /// Create an unfired channel
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Declare the subround done early; idempotent
    pub fn signal(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether the signal has fired
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires; returns immediately if already fired
    pub async fn wait(&self) {
        // A stale permit from an aborted round wakes the loop once and is
        // discarded by the flag check
        while !self.is_done() {
            self.notify.notified().await;
        }
    }

    /// Re-arm for a new round
    pub fn reset(&self) {
        self.done.store(false, Ordering::SeqCst);
    }
}

impl Default for ConsensusChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Actions handled by one subround implementation
#[async_trait]
pub trait SubroundHandler: Send + Sync {
    /// Perform the subround's job; returns true only if the success
    /// condition was already met when the call returned
    async fn do_work(&self, rounder: &dyn Rounder) -> bool;

    /// Id of the previous subround in the pipeline
    fn previous(&self) -> i32;

    /// Id of this subround
    fn current(&self) -> i32;

    /// Id of the next subround in the pipeline
    fn next(&self) -> i32;

    /// Admissible start offset within the round, in milliseconds
    fn start_time(&self) -> i64;

    /// Hard deadline offset within the round, in milliseconds
    fn end_time(&self) -> i64;

    /// Name of the subround, for logging
    fn name(&self) -> &str;

    /// Early-completion signal for this subround
    fn consensus_channel(&self) -> Arc<ConsensusChannel>;
}

/// Shared base carried by every concrete subround
pub struct Subround {
    previous: i32,
    current: i32,
    next: i32,

    start_time: i64,
    end_time: i64,

    name: String,

    channel: Arc<ConsensusChannel>,

    state: Arc<RwLock<ConsensusState>>,
}

impl Subround {
    /// Build a subround base, validating id linkage and window ordering
    pub fn new(
        previous: i32,
        current: i32,
        next: i32,
        start_time: i64,
        end_time: i64,
        name: &str,
        state: Arc<RwLock<ConsensusState>>,
    ) -> ConsensusResult<Self> {
        if previous >= current || (next <= current && next != SR_BEFORE_START_ROUND) {
            return Err(ConsensusError::InvalidSubroundLinkage(format!(
                "{} -> {} -> {}",
                previous, current, next
            )));
        }
        if start_time < 0 || end_time <= start_time {
            return Err(ConsensusError::InvalidSubroundLinkage(format!(
                "window [{}, {}) for subround {}",
                start_time, end_time, current
            )));
        }
        Ok(Self {
            previous,
            current,
            next,
            start_time,
            end_time,
            name: name.to_string(),
            channel: Arc::new(ConsensusChannel::new()),
            state,
        })
    }

    pub fn previous(&self) -> i32 {
        self.previous
    }

    pub fn current(&self) -> i32 {
        self.current
    }

    pub fn next(&self) -> i32 {
        self.next
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> Arc<ConsensusChannel> {
        Arc::clone(&self.channel)
    }

    /// Shared round state
    pub fn state(&self) -> &Arc<RwLock<ConsensusState>> {
        &self.state
    }
}
