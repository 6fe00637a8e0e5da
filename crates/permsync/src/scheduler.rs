//! The periodic timer driving [`PermissionSyncService::tick`].
//!
//! One task per instance. Ticks run inline in the loop, so a slow cycle
//! delays the next tick instead of overlapping it.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::error::{Result, ServiceError};
use crate::service::{PermissionSyncService, TickOutcome};

/// Commands accepted by a running scheduler.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a tick right away, outside the timer.
    TickNow,
    /// Stop the loop.
    Shutdown,
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Queue an immediate tick.
    pub async fn tick_now(&self) -> Result<()> {
        self.command_tx
            .send(SchedulerCommand::TickNow)
            .await
            .map_err(|_| ServiceError::Scheduler("scheduler is not running".into()))
    }

    /// Stop the timer and wait for an in-flight tick to finish.
    pub async fn shutdown(self) -> Result<()> {
        // the loop may already be gone; joining is what matters
        let _ = self.command_tx.send(SchedulerCommand::Shutdown).await;
        self.task
            .await
            .map_err(|e| ServiceError::Scheduler(format!("scheduler task failed: {e}")))
    }
}

pub(crate) fn spawn(service: PermissionSyncService, config: SchedulerConfig) -> SchedulerHandle {
    let (command_tx, command_rx) = mpsc::channel(8);
    let task = tokio::spawn(run(service, config, command_rx));
    SchedulerHandle { command_tx, task }
}

async fn run(
    service: PermissionSyncService,
    config: SchedulerConfig,
    mut command_rx: mpsc::Receiver<SchedulerCommand>,
) {
    let mut timer = interval_at(Instant::now() + config.initial_delay, config.period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(SchedulerCommand::TickNow) => {
                    log_tick(service.tick().await);
                }
                Some(SchedulerCommand::Shutdown) | None => break,
            },
            _ = timer.tick() => {
                log_tick(service.tick().await);
            }
        }
    }

    service.stopped();
}

fn log_tick(outcome: TickOutcome) {
    match outcome {
        TickOutcome::Synced(report) => debug!(
            written = report.written,
            digest = %report.digest,
            "tick synced"
        ),
        other => debug!(outcome = ?other, "tick finished without sync"),
    }
}
