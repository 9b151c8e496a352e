//! Continuous-reply loop parameters and per-loop state.

use std::time::Duration;

use crate::transcript::Message;

/// Default hard cap on reply cycles.
pub const MAX_CYCLE_TIMES: u32 = 10;

/// Default pause between polls.
pub const WAIT_INTERVAL: Duration = Duration::from_secs(5);

/// Default extraction retry budget per poll.
pub const MAX_RETRY_TIMES: u32 = 3;

/// Default cap on consecutive empty polling rounds before the loop gives up
/// waiting. Empty rounds do not consume the cycle budget (see [`LoopConfig`]),
/// so this separate bound keeps termination provable.
pub const MAX_IDLE_ROUNDS: u32 = 60;

/// Knobs for the continuous-reply loop.
///
/// `max_cycle_times` counts replies actually sent: a polling round that
/// finds no new message is free and only consumes the idle-round budget.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Hard iteration cap on reply cycles.
    pub max_cycle_times: u32,
    /// Pause between polls and between extraction retries.
    pub wait_interval: Duration,
    /// Extraction retry budget per poll.
    pub max_retry_times: u32,
    /// Cap on consecutive empty polling rounds.
    pub max_idle_rounds: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_cycle_times: MAX_CYCLE_TIMES,
            wait_interval: WAIT_INTERVAL,
            max_retry_times: MAX_RETRY_TIMES,
            max_idle_rounds: MAX_IDLE_ROUNDS,
        }
    }
}

impl LoopConfig {
    /// Set the reply-cycle cap.
    pub fn with_max_cycles(mut self, max: u32) -> Self {
        self.max_cycle_times = max;
        self
    }

    /// Set the poll/retry pause.
    pub fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    /// Set the extraction retry budget per poll.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retry_times = max;
        self
    }

    /// Set the consecutive empty-round cap.
    pub fn with_max_idle_rounds(mut self, max: u32) -> Self {
        self.max_idle_rounds = max;
        self
    }
}

/// Loop-local state. Created at loop start, discarded at loop end.
#[derive(Debug, Default)]
pub struct CycleState {
    /// Replies sent so far.
    pub cycle_count: u32,
    /// Extraction failures in the current poll's retry run.
    pub consecutive_extraction_failures: u32,
    /// Every message resolved so far, for cross-round dedup.
    pub last_seen: Vec<Message>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Why the continuous-reply loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEnd {
    /// `cycle_count` reached `max_cycle_times`.
    CycleCapReached,
    /// External cancellation observed at a cycle boundary.
    Cancelled,
    /// Nothing new arrived for `max_idle_rounds` consecutive polls.
    WentQuiet,
    /// Unrecoverable extraction, generation or send failure.
    Failed(String),
}
