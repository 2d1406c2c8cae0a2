//! Wall-clock round tracking

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::errors::{ConsensusError, ConsensusResult};

/// Current wall-clock time in milliseconds since the Unix epoch
pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Round timing surface consumed by subrounds and the chronology engine
pub trait Rounder: Send + Sync {
    /// Current round index; never negative, monotonically non-decreasing
    fn index(&self) -> i64;

    /// Recompute index and round start from the genesis time and the
    /// current time; idempotent within one round window, skips forward
    /// (never rewinds) when the clock jumps ahead of schedule
    fn update_round(&self, genesis_timestamp_ms: u64, now_ms: u64);

    /// Start timestamp of the current round, milliseconds since the epoch
    fn time_stamp(&self) -> u64;

    /// Fixed round duration
    fn time_duration(&self) -> Duration;

    /// Time left until `max_time` has elapsed past `start_time_ms`,
    /// floored at zero
    fn remaining_time(&self, start_time_ms: u64, max_time: Duration) -> Duration;
}

struct RoundPosition {
    index: i64,
    time_stamp: u64,
}

/// Converts wall-clock time plus genesis time and round length into a
/// monotonic round index and round start timestamp
pub struct RoundTracker {
    position: RwLock<RoundPosition>,

    duration: Duration,
}

impl RoundTracker {
    /// Create a tracker; a non-positive duration is a construction-time
    /// error
    pub fn new(round_duration_ms: u64, genesis_timestamp_ms: u64) -> ConsensusResult<Self> {
        if round_duration_ms == 0 {
            return Err(ConsensusError::InvalidRoundDuration(round_duration_ms));
        }
        Ok(Self {
            position: RwLock::new(RoundPosition {
                index: 0,
                time_stamp: genesis_timestamp_ms,
            }),
            duration: Duration::from_millis(round_duration_ms),
        })
    }
}

impl Rounder for RoundTracker {
    fn index(&self) -> i64 {
        self.position.read().index
    }

    fn update_round(&self, genesis_timestamp_ms: u64, now_ms: u64) {
        let duration_ms = self.duration.as_millis() as u64;
        let computed = if now_ms <= genesis_timestamp_ms {
            0
        } else {
            ((now_ms - genesis_timestamp_ms) / duration_ms) as i64
        };

        let mut position = self.position.write();
        // Never rewind: a clock step backwards keeps the current round
        if computed > position.index {
            position.index = computed;
            position.time_stamp = genesis_timestamp_ms + computed as u64 * duration_ms;
        }
    }

    fn time_stamp(&self) -> u64 {
        self.position.read().time_stamp
    }

    fn time_duration(&self) -> Duration {
        self.duration
    }

    fn remaining_time(&self, start_time_ms: u64, max_time: Duration) -> Duration {
        let elapsed = current_timestamp_ms().saturating_sub(start_time_ms);
        max_time.saturating_sub(Duration::from_millis(elapsed))
    }
}
