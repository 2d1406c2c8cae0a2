//! Chronology engine
//!
//! Drives the round loop: detects round boundaries from the wall clock,
//! resets the shared state, then executes the registered subrounds in
//! order. A subround ends on its own success, on its early-completion
//! signal, or at its deadline; a deadline never blocks the round. A round
//! boundary detected mid-subround is a hard abort: partial results are
//! discarded, never merged.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::config::ChronologyConfig;
use crate::errors::{ConsensusError, ConsensusResult};
use crate::round::{current_timestamp_ms, Rounder};
use crate::service::ConsensusService;
use crate::state::{ConsensusState, SubroundStatus};
use crate::subround::{SubroundHandler, SR_BEFORE_START_ROUND};
use crate::worker::Worker;

/// Poll interval for shutdown and round-boundary detection during waits
const ABORT_POLL_MS: u64 = 10;

/// Engine state, visible for introspection and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChronologyState {
    /// Waiting for the next round boundary
    Idle,
    /// Executing the subround with the given id
    RunningSubround(i32),
    /// All subrounds of the current round have ended
    RoundComplete,
}

/// The round loop engine
pub struct Chronology {
    genesis_timestamp_ms: u64,

    round_duration_ms: u64,

    rounder: Arc<dyn Rounder>,

    service: Arc<dyn ConsensusService>,

    state: Arc<RwLock<ConsensusState>>,

    /// Worker whose per-peer accounting is reset at rollover
    worker: Option<Arc<Worker>>,

    subrounds: RwLock<Vec<Arc<dyn SubroundHandler>>>,

    engine_state: RwLock<ChronologyState>,

    last_round: AtomicI64,

    running: AtomicBool,

    shutdown: AtomicBool,
}

impl Chronology {
    pub fn new(
        config: &ChronologyConfig,
        rounder: Arc<dyn Rounder>,
        service: Arc<dyn ConsensusService>,
        state: Arc<RwLock<ConsensusState>>,
        worker: Option<Arc<Worker>>,
    ) -> ConsensusResult<Self> {
        config.validate()?;
        Ok(Self {
            genesis_timestamp_ms: config.genesis_timestamp_ms,
            round_duration_ms: config.round_duration_ms,
            rounder,
            service,
            state,
            worker,
            subrounds: RwLock::new(Vec::new()),
            engine_state: RwLock::new(ChronologyState::Idle),
            last_round: AtomicI64::new(-1),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Append a subround to the pipeline; must not be called while rounds
    /// are running
    pub fn add_subround(&self, subround: Arc<dyn SubroundHandler>) -> ConsensusResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ConsensusError::ChronologyRunning);
        }
        self.subrounds.write().push(subround);
        Ok(())
    }

    /// Drop all registered subrounds; must not be called while rounds are
    /// running
    pub fn remove_all_subrounds(&self) -> ConsensusResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ConsensusError::ChronologyRunning);
        }
        self.subrounds.write().clear();
        Ok(())
    }

    /// Number of registered subrounds
    pub fn subround_count(&self) -> usize {
        self.subrounds.read().len()
    }

    /// Ask the round loop to stop after the current iteration
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Engine state snapshot
    pub fn engine_state(&self) -> ChronologyState {
        *self.engine_state.read()
    }

    /// Id of the subround currently executing, or the before-start-round
    /// pseudo-id when none is
    pub fn current_subround_id(&self) -> i32 {
        match *self.engine_state.read() {
            ChronologyState::RunningSubround(id) => id,
            _ => SR_BEFORE_START_ROUND,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run rounds sequentially until closed
    pub async fn start_rounds(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            "chronology: starting rounds, duration {} ms, genesis {}",
            self.round_duration_ms, self.genesis_timestamp_ms
        );

        while !self.is_shutdown() {
            self.run_one_round().await;
        }

        *self.engine_state.write() = ChronologyState::Idle;
        self.running.store(false, Ordering::SeqCst);
        info!("chronology: stopped");
    }

    async fn run_one_round(&self) {
        self.rounder
            .update_round(self.genesis_timestamp_ms, current_timestamp_ms());
        let round_index = self.rounder.index();

        if round_index <= self.last_round.load(Ordering::SeqCst) {
            // Boundary not reached yet
            let next_start = self.rounder.time_stamp() + self.round_duration_ms;
            self.sleep_until(next_start).await;
            return;
        }
        self.last_round.store(round_index, Ordering::SeqCst);

        let subrounds: Vec<Arc<dyn SubroundHandler>> = self.subrounds.read().clone();

        // Reset: the previous round is fully aborted before its state is
        // reused
        self.state
            .write()
            .reset(round_index, self.service.init_received_messages());
        if let Some(worker) = &self.worker {
            worker.reset_round();
        }
        for subround in &subrounds {
            subround.consensus_channel().reset();
        }

        let round_start = self.rounder.time_stamp();
        info!("chronology: round {} started", round_index);

        let mut aborted = false;
        for subround in &subrounds {
            *self.engine_state.write() = ChronologyState::RunningSubround(subround.current());
            debug!("chronology: {} entered", subround.name());

            let done = self.run_subround(subround.as_ref(), round_index, round_start).await;

            if self.is_shutdown() {
                aborted = true;
                break;
            }
            if self.round_changed(round_index) {
                warn!(
                    "chronology: round boundary during {}, aborting round {}",
                    subround.name(),
                    round_index
                );
                aborted = true;
                break;
            }

            if done {
                self.state
                    .write()
                    .set_status(subround.current(), SubroundStatus::Finished);
                debug!("chronology: {} finished", subround.name());
            } else {
                warn!(
                    "chronology: {} missed its deadline in round {}",
                    subround.name(),
                    round_index
                );
            }

            if current_timestamp_ms() >= round_start + self.round_duration_ms {
                // No time left in the round for further subrounds
                break;
            }
        }

        if !aborted {
            *self.engine_state.write() = ChronologyState::RoundComplete;
            if self.state.read().is_finalized() {
                info!("chronology: round {} finalized a block", round_index);
            } else {
                info!("chronology: no block produced in round {}", round_index);
            }
            *self.engine_state.write() = ChronologyState::Idle;
            self.sleep_until(round_start + self.round_duration_ms).await;
        } else {
            *self.engine_state.write() = ChronologyState::Idle;
        }
    }

    /// Execute one subround: its synchronous job first, then a bounded
    /// wait for the early-completion signal or the deadline, whichever
    /// comes first
    async fn run_subround(
        &self,
        subround: &dyn SubroundHandler,
        round_index: i64,
        round_start: u64,
    ) -> bool {
        let done = subround.do_work(self.rounder.as_ref()).await;
        if done || subround.consensus_channel().is_done() {
            return true;
        }

        let window = Duration::from_millis(subround.end_time() as u64);
        loop {
            if self.is_shutdown() || self.round_changed(round_index) {
                return false;
            }
            let remaining = self.rounder.remaining_time(round_start, window);
            if remaining.is_zero() {
                return false;
            }
            let slice = remaining.min(Duration::from_millis(ABORT_POLL_MS));
            let fired = tokio::time::timeout(slice, subround.consensus_channel().wait())
                .await
                .is_ok();
            if fired {
                return true;
            }
        }
    }

    /// Whether the wall clock moved past the round the engine is in
    fn round_changed(&self, round_index: i64) -> bool {
        self.rounder
            .update_round(self.genesis_timestamp_ms, current_timestamp_ms());
        self.rounder.index() != round_index
    }

    async fn sleep_until(&self, deadline_ms: u64) {
        while !self.is_shutdown() {
            let now = current_timestamp_ms();
            if now >= deadline_ms {
                return;
            }
            let slice = (deadline_ms - now).min(ABORT_POLL_MS);
            tokio::time::sleep(Duration::from_millis(slice)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::RoundTracker;
    use crate::service::BlsConsensusService;
    use crate::subround::{
        ConsensusChannel, Subround, SR_BLOCK, SR_END_ROUND, SR_SIGNATURE, SR_START_ROUND,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted subround: returns a fixed do_work result and records when
    /// it was entered, relative to the engine's round start
    struct ScriptedSubround {
        base: Subround,
        done_immediately: bool,
        entries: Arc<Mutex<Vec<(i32, u64)>>>,
    }

    impl ScriptedSubround {
        fn new(
            previous: i32,
            current: i32,
            next: i32,
            window: (i64, i64),
            name: &str,
            state: Arc<RwLock<ConsensusState>>,
            done_immediately: bool,
            entries: Arc<Mutex<Vec<(i32, u64)>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                base: Subround::new(previous, current, next, window.0, window.1, name, state)
                    .unwrap(),
                done_immediately,
                entries,
            })
        }
    }

    #[async_trait]
    impl SubroundHandler for ScriptedSubround {
        async fn do_work(&self, rounder: &dyn Rounder) -> bool {
            let offset = current_timestamp_ms().saturating_sub(rounder.time_stamp());
            self.entries.lock().push((self.base.current(), offset));
            self.done_immediately
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

    struct Fixture {
        chronology: Arc<Chronology>,
        rounder: Arc<RoundTracker>,
        state: Arc<RwLock<ConsensusState>>,
        entries: Arc<Mutex<Vec<(i32, u64)>>>,
        subrounds: Vec<Arc<ScriptedSubround>>,
    }

    /// Four scripted subrounds with the given windows inside one round;
    /// `done` flags which subrounds succeed synchronously
    fn fixture(round_duration_ms: u64, windows: [(i64, i64); 4], done: [bool; 4]) -> Fixture {
        crate::testing::init_logs();
        let genesis = current_timestamp_ms();
        let config = ChronologyConfig {
            round_duration_ms,
            genesis_timestamp_ms: genesis,
            ..ChronologyConfig::default()
        };
        let rounder = Arc::new(RoundTracker::new(round_duration_ms, genesis).unwrap());
        let state = Arc::new(RwLock::new(ConsensusState::new()));
        let service = Arc::new(BlsConsensusService::new());
        let entries = Arc::new(Mutex::new(Vec::new()));

        let ids = [
            (SR_BEFORE_START_ROUND, SR_START_ROUND, SR_BLOCK, "(START_ROUND)"),
            (SR_START_ROUND, SR_BLOCK, SR_SIGNATURE, "(BLOCK)"),
            (SR_BLOCK, SR_SIGNATURE, SR_END_ROUND, "(SIGNATURE)"),
            (SR_SIGNATURE, SR_END_ROUND, SR_BEFORE_START_ROUND, "(END_ROUND)"),
        ];
        let mut subrounds = Vec::new();
        for (i, (previous, current, next, name)) in ids.into_iter().enumerate() {
            subrounds.push(ScriptedSubround::new(
                previous,
                current,
                next,
                windows[i],
                name,
                state.clone(),
                done[i],
                entries.clone(),
            ));
        }

        let chronology = Arc::new(
            Chronology::new(
                &config,
                rounder.clone(),
                service,
                state.clone(),
                None,
            )
            .unwrap(),
        );
        for subround in &subrounds {
            chronology
                .add_subround(subround.clone() as Arc<dyn SubroundHandler>)
                .unwrap();
        }
        Fixture {
            chronology,
            rounder,
            state,
            entries,
            subrounds,
        }
    }

    fn spawn_engine(chronology: &Arc<Chronology>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(chronology);
        tokio::spawn(async move { engine.start_rounds().await })
    }

    #[tokio::test]
    async fn test_early_completion_skips_to_next_subround() {
        // Round of 400 ms; Block completes early at ~100 ms through its
        // channel and Signature must start right then, not at 160 ms
        let fx = fixture(
            400,
            [(0, 40), (40, 160), (160, 280), (280, 400)],
            [true, false, true, true],
        );
        let block_channel = fx.subrounds[1].consensus_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            block_channel.signal();
        });

        let handle = spawn_engine(&fx.chronology);
        tokio::time::sleep(Duration::from_millis(250)).await;
        fx.chronology.close();
        let _ = handle.await;

        let entries = fx.entries.lock().clone();
        let signature_entry = entries
            .iter()
            .find(|(id, _)| *id == SR_SIGNATURE)
            .expect("signature subround never entered");
        assert!(
            signature_entry.1 < 150,
            "signature entered at {} ms, early completion not honored",
            signature_entry.1
        );
        // The early-completed subround reads as Finished
        assert_eq!(fx.state.read().status(SR_BLOCK), SubroundStatus::Finished);
    }

    #[tokio::test]
    async fn test_all_deadlines_exceeded_round_still_completes() {
        // Nothing ever completes; the engine must still walk all four
        // subrounds and reach the next round at the boundary
        let fx = fixture(
            200,
            [(0, 20), (20, 80), (80, 140), (140, 190)],
            [false, false, false, false],
        );
        let handle = spawn_engine(&fx.chronology);
        tokio::time::sleep(Duration::from_millis(450)).await;
        fx.chronology.close();
        let _ = handle.await;

        let entries = fx.entries.lock().clone();
        let first_round: Vec<i32> = entries.iter().take(4).map(|(id, _)| *id).collect();
        assert_eq!(
            first_round,
            vec![SR_START_ROUND, SR_BLOCK, SR_SIGNATURE, SR_END_ROUND]
        );
        // A second round started: the engine never blocked past round end
        assert!(
            entries.len() > 4,
            "engine never reached the second round: {:?}",
            entries
        );
        assert_eq!(
            fx.state.read().status(SR_START_ROUND),
            SubroundStatus::NotFinished
        );
    }

    #[tokio::test]
    async fn test_subrounds_run_in_pipeline_order() {
        let fx = fixture(
            200,
            [(0, 20), (20, 80), (80, 140), (140, 190)],
            [true, true, true, true],
        );
        let handle = spawn_engine(&fx.chronology);
        tokio::time::sleep(Duration::from_millis(150)).await;
        fx.chronology.close();
        let _ = handle.await;

        let entries = fx.entries.lock().clone();
        let ids: Vec<i32> = entries.iter().take(4).map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![SR_START_ROUND, SR_BLOCK, SR_SIGNATURE, SR_END_ROUND]);
        for id in ids {
            assert_eq!(fx.state.read().status(id), SubroundStatus::Finished);
        }
    }

    #[tokio::test]
    async fn test_hard_abort_on_round_jump() {
        // Long rounds so a natural rollover cannot explain the abort; the
        // clock jump is injected through the tracker
        let fx = fixture(
            10_000,
            [(0, 500), (500, 2500), (2500, 8500), (8500, 9500)],
            [true, false, false, false],
        );
        let genesis = fx.chronology.genesis_timestamp_ms;
        assert_eq!(fx.chronology.engine_state(), ChronologyState::Idle);
        let handle = spawn_engine(&fx.chronology);

        // Engine is now waiting inside the Block subround
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            fx.chronology.engine_state(),
            ChronologyState::RunningSubround(SR_BLOCK)
        );
        assert_eq!(fx.chronology.current_subround_id(), SR_BLOCK);
        fx.rounder
            .update_round(genesis, current_timestamp_ms() + 35_000);
        let jumped = fx.rounder.index();
        assert!(jumped >= 3);

        // The abort discards partial state and the new round starts
        let mut reset_seen = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if fx.state.read().round_index() == jumped {
                reset_seen = true;
                break;
            }
        }
        fx.chronology.close();
        let _ = handle.await;
        assert!(reset_seen, "state never reset to the jumped round");
    }

    #[tokio::test]
    async fn test_subround_list_locked_while_running() {
        let fx = fixture(
            200,
            [(0, 20), (20, 80), (80, 140), (140, 190)],
            [true, true, true, true],
        );
        let handle = spawn_engine(&fx.chronology);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let extra = fx.subrounds[0].clone() as Arc<dyn SubroundHandler>;
        assert!(matches!(
            fx.chronology.add_subround(extra),
            Err(ConsensusError::ChronologyRunning)
        ));
        assert!(matches!(
            fx.chronology.remove_all_subrounds(),
            Err(ConsensusError::ChronologyRunning)
        ));

        fx.chronology.close();
        let _ = handle.await;

        // Allowed again once stopped, and the engine reads as idle
        assert_eq!(fx.chronology.engine_state(), ChronologyState::Idle);
        assert_eq!(fx.chronology.current_subround_id(), SR_BEFORE_START_ROUND);
        assert!(fx.chronology.remove_all_subrounds().is_ok());
        assert_eq!(fx.chronology.subround_count(), 0);
    }
}
