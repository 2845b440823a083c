//! Background runtime: the task-queue worker fleet and the periodic
//! monitor, plus their shared lifecycle.
//!
//! [`start`] spawns everything an environment needs into one `JoinSet`
//! under a shared `CancellationToken`. Workers poll the token between
//! queue claims and the monitor checks it between passes, so a stop
//! request drains within roughly one poll interval; the grace period only
//! matters when a connector call is mid-flight.

pub mod monitor;
pub mod scheduler;
pub mod worker;

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::workflow::orchestrate::WorkflowEnv;

/// Stable task-kind identifiers stored in the task queue.
pub mod task_kinds {
    /// Classify a freshly accepted signal.
    pub const PROCESS_SIGNAL: &str = "process_signal";
    /// Run (or resume) a draft workflow.
    pub const RUN_WORKFLOW: &str = "run_workflow";
    /// Execute an approved queue item.
    pub const EXECUTE_ACTION: &str = "execute_action";
    /// Poll for replies to a sent draft.
    pub const DETECT_OUTCOMES: &str = "detect_outcomes";
}

/// How long a stop request waits for in-flight task bodies before aborting
/// them. Sized for a slow connector call, not for the queue poll (which is
/// sub-second).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(20);

/// Handle to the running background fleet.
///
/// Dropping it without calling [`stop`](BackgroundTasks::stop) detaches the
/// tasks; the intended shutdown path is [`run_until_shutdown`]
/// (BackgroundTasks::run_until_shutdown) or an explicit `stop`.
pub struct BackgroundTasks {
    cancel: CancellationToken,
    fleet: JoinSet<&'static str>,
}

/// Spawn the worker pool and monitor for an environment.
pub fn start(env: &WorkflowEnv) -> BackgroundTasks {
    let cancel = CancellationToken::new();
    let mut fleet = JoinSet::new();

    for worker_id in 0..env.config.runtime.worker_count {
        let env = env.clone();
        let cancel = cancel.clone();
        fleet.spawn(async move {
            worker::run_worker(env, worker_id, cancel).await;
            "worker"
        });
    }

    {
        let env = env.clone();
        let cancel = cancel.clone();
        fleet.spawn(async move {
            monitor::run_monitor(env, cancel).await;
            "monitor"
        });
    }

    tracing::info!(
        workers = env.config.runtime.worker_count,
        "Background fleet started"
    );

    BackgroundTasks { cancel, fleet }
}

impl BackgroundTasks {
    /// A clone of the shared cancellation token, for wiring into the HTTP
    /// server's graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of live fleet members (workers plus the monitor).
    pub fn task_count(&self) -> usize {
        self.fleet.len()
    }

    /// Cancel the fleet and drain it.
    ///
    /// Members that outlive [`SHUTDOWN_GRACE`] (a hung connector call) are
    /// aborted rather than awaited forever.
    pub async fn stop(mut self) {
        tracing::info!("Stopping background fleet");
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        loop {
            match tokio::time::timeout_at(deadline, self.fleet.join_next()).await {
                Ok(Some(Ok(name))) => tracing::debug!(task = name, "Fleet member stopped"),
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Fleet member panicked during shutdown");
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        remaining = self.fleet.len(),
                        "Shutdown grace expired, aborting remaining fleet members"
                    );
                    self.fleet.abort_all();
                    break;
                }
            }
        }
        tracing::info!("Background fleet stopped");
    }

    /// Block until the process receives a shutdown signal, then stop.
    pub async fn run_until_shutdown(self) {
        shutdown_signal().await;
        self.stop().await;
    }
}

/// Resolve when the process is asked to stop: Ctrl+C everywhere, SIGTERM
/// additionally on Unix. A handler that cannot be registered degrades to
/// waiting on the other signal rather than exiting.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).ok();
        let sigterm = async {
            match term.as_mut() {
                Some(term) => {
                    term.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
            () = sigterm => tracing::info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("Received Ctrl+C, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connector::ConnectorRegistry;
    use crate::ingest::{self, SignalSource};
    use crate::storage::{init_test_db, signals, tasks};

    async fn env() -> WorkflowEnv {
        WorkflowEnv {
            db: init_test_db().await.expect("init db"),
            registry: ConnectorRegistry::sandbox(),
            config: Config::default(),
            memory: None,
        }
    }

    #[tokio::test]
    async fn start_spawns_workers_and_monitor() {
        let env = env().await;
        let fleet = start(&env);
        assert_eq!(
            fleet.task_count(),
            env.config.runtime.worker_count as usize + 1
        );
        fleet.stop().await;
    }

    #[tokio::test]
    async fn fleet_drains_a_queued_task() {
        let env = env().await;
        let accepted = ingest::accept_signal(
            &env.db,
            SignalSource::Form,
            "lead",
            &serde_json::json!({"form_id": "f1", "email": "ann@acme.com"}),
        )
        .await
        .expect("accept");
        assert_eq!(tasks::queued_depth(&env.db).await.expect("depth"), 1);

        let fleet = start(&env);

        // Workers poll every half second; give the claim a few rounds.
        let mut processed = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let signal = signals::get_by_id(&env.db, &accepted.signal_id)
                .await
                .expect("get")
                .expect("exists");
            if signal.processed_at.is_some() {
                processed = true;
                break;
            }
        }
        fleet.stop().await;

        assert!(processed, "worker never classified the accepted signal");
    }

    #[tokio::test]
    async fn stop_completes_well_inside_the_grace_period() {
        let env = env().await;
        let fleet = start(&env);

        let started = tokio::time::Instant::now();
        fleet.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancel_token_reaches_the_fleet() {
        let env = env().await;
        let fleet = start(&env);

        let token = fleet.cancel_token();
        assert!(!token.is_cancelled());
        fleet.stop().await;
        assert!(token.is_cancelled());
    }
}
