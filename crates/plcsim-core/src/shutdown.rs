//! ---
//! sim_section: "04-configuration-orchestration"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Orchestration core: composition, instrumentation, shutdown."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
//! Graceful shutdown coordination.
//!
//! On stop the coordinator samples the live session count once. With no
//! sessions it stops immediately; otherwise it broadcasts a strictly
//! decreasing seconds-until-shutdown countdown to the engine for the whole
//! grace window, then stops unconditionally. Remaining sessions are dropped
//! by the engine, not force-closed here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use plcsim_common::ShutdownConfig;
use plcsim_engine::types::EngineControl;

/// Observable drain state. Transitions only move forward; the coordinator
/// never re-enters `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining { seconds_remaining: u64 },
    Stopped,
}

/// Single-shot drain driver. A second stop signal has no additional effect
/// and the drain is not cancellable once started.
#[derive(Debug)]
pub struct ShutdownCoordinator<E> {
    engine: Arc<E>,
    grace: Duration,
    reason: String,
    tick: Duration,
    state_tx: watch::Sender<ShutdownState>,
    engaged: AtomicBool,
}

impl<E> ShutdownCoordinator<E>
where
    E: EngineControl,
{
    pub fn new(engine: Arc<E>, config: &ShutdownConfig) -> Self {
        let (state_tx, _) = watch::channel(ShutdownState::Running);
        Self {
            engine,
            grace: config.grace,
            reason: config.reason.clone(),
            tick: Duration::from_secs(1),
            state_tx,
            engaged: AtomicBool::new(false),
        }
    }

    /// Override the tick interval. Tests use this to drain sub-second.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Subscribe to drain state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state_tx.subscribe()
    }

    /// Current drain state.
    pub fn state(&self) -> ShutdownState {
        *self.state_tx.borrow()
    }

    /// Drive the drain to `Stopped`. Blocks (sleeps) for the grace window
    /// when sessions are live; broadcast failures are logged and ignored and
    /// never extend or abort the drain.
    pub async fn run(&self) {
        if self.engaged.swap(true, Ordering::SeqCst) {
            debug!("stop already in progress; ignoring repeat signal");
            return;
        }

        let live_sessions = self.engine.session_count();
        if live_sessions == 0 {
            info!("no live sessions; stopping immediately");
            self.state_tx.send_replace(ShutdownState::Stopped);
            return;
        }

        let total_seconds = self.grace.as_secs().max(1);
        info!(
            live_sessions,
            grace_seconds = total_seconds,
            reason = %self.reason,
            "draining live sessions before shutdown"
        );
        for seconds_remaining in (1..=total_seconds).rev() {
            self.state_tx
                .send_replace(ShutdownState::Draining { seconds_remaining });
            if let Err(fault) = self
                .engine
                .broadcast_shutdown(seconds_remaining, &self.reason)
            {
                warn!(seconds_remaining, error = %fault, "countdown broadcast failed; continuing drain");
            }
            sleep(self.tick).await;
        }

        let remaining = self.engine.session_count();
        info!(remaining_sessions = remaining, "grace window elapsed; stopped");
        self.state_tx.send_replace(ShutdownState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use plcsim_engine::types::{ServerState, ServiceFault, ServiceResult, StatusCode};

    #[derive(Debug, Default)]
    struct FakeEngine {
        sessions: usize,
        fail_broadcasts: bool,
        broadcasts: Mutex<Vec<u64>>,
    }

    impl FakeEngine {
        fn with_sessions(sessions: usize) -> Self {
            Self {
                sessions,
                ..Self::default()
            }
        }
    }

    impl EngineControl for FakeEngine {
        fn session_count(&self) -> usize {
            self.sessions
        }

        fn broadcast_shutdown(&self, seconds_remaining: u64, _reason: &str) -> ServiceResult<()> {
            if self.fail_broadcasts {
                return Err(ServiceFault::new(
                    StatusCode::BadInternalError,
                    "broadcast channel down",
                ));
            }
            self.broadcasts.lock().push(seconds_remaining);
            Ok(())
        }

        fn server_state(&self) -> ServerState {
            ServerState::Running
        }
    }

    fn config(grace_seconds: u64) -> ShutdownConfig {
        ShutdownConfig {
            grace: Duration::from_secs(grace_seconds),
            reason: "test drain".to_owned(),
        }
    }

    #[tokio::test]
    async fn zero_sessions_stop_without_ticks() {
        let engine = Arc::new(FakeEngine::with_sessions(0));
        let coordinator =
            ShutdownCoordinator::new(engine.clone(), &config(10)).with_tick(Duration::from_millis(1));
        assert_eq!(coordinator.state(), ShutdownState::Running);
        coordinator.run().await;
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert!(engine.broadcasts.lock().is_empty());
    }

    #[tokio::test]
    async fn drain_publishes_strictly_decreasing_countdown() {
        let engine = Arc::new(FakeEngine::with_sessions(3));
        let coordinator =
            ShutdownCoordinator::new(engine.clone(), &config(5)).with_tick(Duration::from_millis(2));
        coordinator.run().await;
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert_eq!(*engine.broadcasts.lock(), vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn window_runs_to_completion_even_when_sessions_remain() {
        let engine = Arc::new(FakeEngine::with_sessions(7));
        let coordinator =
            ShutdownCoordinator::new(engine.clone(), &config(3)).with_tick(Duration::from_millis(1));
        coordinator.run().await;
        assert_eq!(engine.broadcasts.lock().len(), 3);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn broadcast_failures_never_abort_the_drain() {
        let engine = Arc::new(FakeEngine {
            sessions: 2,
            fail_broadcasts: true,
            broadcasts: Mutex::new(Vec::new()),
        });
        let coordinator =
            ShutdownCoordinator::new(engine.clone(), &config(3)).with_tick(Duration::from_millis(1));
        coordinator.run().await;
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert!(engine.broadcasts.lock().is_empty());
    }

    #[tokio::test]
    async fn second_stop_signal_is_a_no_op() {
        let engine = Arc::new(FakeEngine::with_sessions(1));
        let coordinator =
            ShutdownCoordinator::new(engine.clone(), &config(2)).with_tick(Duration::from_millis(1));
        coordinator.run().await;
        let ticks_after_first = engine.broadcasts.lock().len();
        coordinator.run().await;
        assert_eq!(engine.broadcasts.lock().len(), ticks_after_first);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn subscribers_observe_draining_then_stopped() {
        let engine = Arc::new(FakeEngine::with_sessions(1));
        let coordinator =
            ShutdownCoordinator::new(engine, &config(2)).with_tick(Duration::from_millis(1));
        let mut receiver = coordinator.subscribe();
        coordinator.run().await;

        // The final observed value is Stopped; Running is never re-entered.
        receiver
            .changed()
            .await
            .expect("state channel stays open while coordinator lives");
        assert_eq!(*receiver.borrow(), ShutdownState::Stopped);
    }
}
