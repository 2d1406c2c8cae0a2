//! Configuration for the chronology engine

use serde::{Deserialize, Serialize};

use crate::errors::{ConsensusError, ConsensusResult};

/// Admissible execution window of one subround, as fractions of the
/// round duration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubroundWindow {
    /// Start offset, fraction of round duration in [0, 1)
    pub start: f64,

    /// End offset, fraction of round duration in (start, 1]
    pub end: f64,
}

impl SubroundWindow {
    fn validate(&self, name: &'static str) -> ConsensusResult<()> {
        let ordered = self.start >= 0.0 && self.start < self.end && self.end <= 1.0;
        if !ordered {
            return Err(ConsensusError::InvalidSubroundWindow {
                name,
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Absolute in-round offsets in milliseconds for a given round duration
    pub fn to_offsets_ms(&self, round_duration_ms: u64) -> (i64, i64) {
        let start = (self.start * round_duration_ms as f64) as i64;
        let end = (self.end * round_duration_ms as f64) as i64;
        (start, end)
    }
}

/// Chronology configuration
///
/// Round duration and genesis time are protocol parameters, fixed for the
/// lifetime of the engine. A misconfigured value is a construction-time
/// error, never a runtime one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChronologyConfig {
    /// Fixed round duration in milliseconds
    pub round_duration_ms: u64,

    /// Genesis timestamp in milliseconds since the Unix epoch
    pub genesis_timestamp_ms: u64,

    /// Window of the start-round subround
    pub start_round_window: SubroundWindow,

    /// Window of the block subround
    pub block_window: SubroundWindow,

    /// Window of the signature subround
    pub signature_window: SubroundWindow,

    /// Window of the final-info subround
    pub final_info_window: SubroundWindow,
}

impl Default for ChronologyConfig {
    fn default() -> Self {
        Self {
            round_duration_ms: 4000,
            genesis_timestamp_ms: 0,
            start_round_window: SubroundWindow { start: 0.0, end: 0.05 },
            block_window: SubroundWindow { start: 0.05, end: 0.25 },
            signature_window: SubroundWindow { start: 0.25, end: 0.85 },
            final_info_window: SubroundWindow { start: 0.85, end: 0.95 },
        }
    }
}

impl ChronologyConfig {
    /// Validate the configuration; called at engine construction
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.round_duration_ms == 0 {
            return Err(ConsensusError::InvalidRoundDuration(self.round_duration_ms));
        }

        self.start_round_window.validate("start_round")?;
        self.block_window.validate("block")?;
        self.signature_window.validate("signature")?;
        self.final_info_window.validate("final_info")?;

        if self.start_round_window.start != 0.0 {
            return Err(ConsensusError::InvalidSubroundWindow {
                name: "start_round",
                start: self.start_round_window.start,
                end: self.start_round_window.end,
            });
        }

        // Windows must not overlap and must follow pipeline order
        let ordered = [
            ("block", self.start_round_window.end, self.block_window.start, self.block_window.end),
            ("signature", self.block_window.end, self.signature_window.start, self.signature_window.end),
            ("final_info", self.signature_window.end, self.final_info_window.start, self.final_info_window.end),
        ];
        for (name, prev_end, start, end) in ordered {
            if start < prev_end {
                return Err(ConsensusError::InvalidSubroundWindow { name, start, end });
            }
        }

        Ok(())
    }
}
