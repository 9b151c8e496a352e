//! Instruction orchestration: classification, the five task protocols and
//! the continuous-reply loop.

mod continuous;
mod runner;

pub use continuous::{
    CycleState, LoopConfig, LoopEnd, MAX_CYCLE_TIMES, MAX_IDLE_ROUNDS, MAX_RETRY_TIMES,
    WAIT_INTERVAL,
};
pub use runner::{InstructionReport, Orchestrator, TaskStatus};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation flag, observed once per loop-cycle boundary.
/// Never pre-empts an in-flight adapter call. Minted fresh per instruction;
/// the flag is never cleared, so a cancelled instruction stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next cycle boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Injectable timer so tests can run many polling cycles without real
/// delay.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Production clock backed by the tokio timer.
#[derive(Debug, Clone, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
