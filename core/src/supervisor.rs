//! Task supervision
//!
//! The gateway's long-lived loops run as named tasks under one `Supervisor`.
//! None of them is expected to return while the gateway is up, so any exit
//! (error, panic or a plain `Ok`) before shutdown counts as a failure and is
//! handled according to the task's [`TaskPolicy`].

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Default time tasks get to observe shutdown before being aborted
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What happens when a supervised task exits early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPolicy {
    /// Stop the whole gateway
    Fatal,
    /// Start the task again after `backoff`, at most `max_restarts` times
    Restart { max_restarts: u32, backoff: Duration },
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("task {name} failed: {reason}")]
    TaskFailed { name: String, reason: String },
    #[error("task {name} failed after {restarts} restarts: {reason}")]
    RestartsExhausted {
        name: String,
        restarts: u32,
        reason: String,
    },
}

impl SupervisorError {
    /// Name of the task that brought the gateway down
    pub fn task(&self) -> &str {
        match self {
            SupervisorError::TaskFailed { name, .. } => name,
            SupervisorError::RestartsExhausted { name, .. } => name,
        }
    }
}

type TaskFactory = Box<dyn FnMut() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

struct TaskSpec {
    name: String,
    policy: TaskPolicy,
    factory: TaskFactory,
    restarts: u32,
}

/// How a task attempt ended
enum TaskExit {
    Returned,
    Failed(anyhow::Error),
    Panicked(String),
}

impl TaskExit {
    fn describe(&self) -> String {
        match self {
            TaskExit::Returned => "exited unexpectedly".to_string(),
            TaskExit::Failed(e) => format!("{:#}", e),
            TaskExit::Panicked(msg) => format!("panicked: {}", msg),
        }
    }
}

/// Runs named tasks and applies their failure policy
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    shutdown_grace: Duration,
    tasks: Vec<TaskSpec>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_shutdown_grace(DEFAULT_SHUTDOWN_GRACE)
    }

    pub fn with_shutdown_grace(shutdown_grace: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            shutdown_grace,
            tasks: Vec::new(),
        }
    }

    /// Receiver that flips to `true` when supervised tasks must stop
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Register a task. `factory` is called once per (re)start.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, policy: TaskPolicy, mut factory: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.tasks.push(TaskSpec {
            name: name.into(),
            policy,
            factory: Box::new(move || factory().boxed()),
            restarts: 0,
        });
    }

    /// Start every task and supervise until `shutdown` resolves or a task
    /// fails for good.
    pub async fn run<S>(mut self, shutdown: S) -> Result<(), SupervisorError>
    where
        S: Future<Output = ()>,
    {
        let mut running: JoinSet<(usize, TaskExit)> = JoinSet::new();
        for index in 0..self.tasks.len() {
            self.start(&mut running, index, None);
        }
        info!(tasks = self.tasks.len(), "Supervisor started");

        tokio::pin!(shutdown);
        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                Some(joined) = running.join_next() => {
                    let (index, exit) = match joined {
                        Ok(joined) => joined,
                        Err(e) => {
                            warn!("Supervised task was cancelled: {}", e);
                            continue;
                        }
                    };
                    if let Some(err) = self.on_exit(&mut running, index, exit) {
                        break Err(err);
                    }
                }
            }
        };

        let _ = self.shutdown_tx.send(true);
        drain(&mut running, self.shutdown_grace).await;
        outcome
    }

    fn start(&mut self, running: &mut JoinSet<(usize, TaskExit)>, index: usize, delay: Option<Duration>) {
        let task = &mut self.tasks[index];
        let attempt = (task.factory)();
        let mut shutdown = self.shutdown_tx.subscribe();
        debug!(task = %task.name, restarts = task.restarts, "Starting task");

        running.spawn(async move {
            if let Some(delay) = delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return (index, TaskExit::Returned),
                }
            }
            let exit = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(Ok(())) => TaskExit::Returned,
                Ok(Err(e)) => TaskExit::Failed(e),
                Err(payload) => TaskExit::Panicked(panic_message(payload.as_ref())),
            };
            (index, exit)
        });
    }

    /// Apply the policy of a task that ended; returns the error that stops the gateway
    fn on_exit(
        &mut self,
        running: &mut JoinSet<(usize, TaskExit)>,
        index: usize,
        exit: TaskExit,
    ) -> Option<SupervisorError> {
        let task = &mut self.tasks[index];
        let reason = exit.describe();

        match task.policy {
            TaskPolicy::Fatal => {
                error!(task = %task.name, %reason, "Fatal task stopped");
                Some(SupervisorError::TaskFailed {
                    name: task.name.clone(),
                    reason,
                })
            }
            TaskPolicy::Restart {
                max_restarts,
                backoff,
            } => {
                if task.restarts >= max_restarts {
                    error!(task = %task.name, restarts = task.restarts, %reason, "Task out of restarts");
                    return Some(SupervisorError::RestartsExhausted {
                        name: task.name.clone(),
                        restarts: task.restarts,
                        reason,
                    });
                }
                task.restarts += 1;
                warn!(
                    task = %task.name,
                    restart = task.restarts,
                    max_restarts,
                    ?backoff,
                    %reason,
                    "Restarting task"
                );
                self.start(running, index, Some(backoff));
                None
            }
        }
    }
}

async fn drain(running: &mut JoinSet<(usize, TaskExit)>, grace: Duration) {
    let drained = tokio::time::timeout(grace, async {
        while running.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = running.len(),
            "Tasks did not stop within grace period, aborting"
        );
        running.shutdown().await;
    }
    debug!("Supervisor stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
