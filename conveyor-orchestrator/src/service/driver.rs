//! Run driver and approval sweeper
//!
//! The driver keeps calling `advance` on a run until it stops at the approval
//! gate or finishes. The sweeper periodically fails runs whose approval has
//! timed out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use conveyor_core::dto::run::StageResult;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::controller::{PipelineController, PipelineError};

/// Advance a run until no further progress is possible right now
pub async fn drive(
    controller: &PipelineController,
    run_id: Uuid,
) -> Result<StageResult, PipelineError> {
    loop {
        let step = controller.advance(run_id).await?;
        if !step.outcome.can_continue() {
            return Ok(step.outcome);
        }
    }
}

/// Drive a run in the background
pub fn spawn_drive(controller: Arc<PipelineController>, run_id: Uuid) -> JoinHandle<()> {
    tokio::spawn(async move {
        match drive(&controller, run_id).await {
            Ok(outcome) => {
                tracing::info!(run_id = %run_id, outcome = ?outcome, "Run driver stopped");
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Run driver failed");
            }
        }
    })
}

/// Background loop applying the approval timeout policy
pub struct ApprovalSweeper {
    controller: Arc<PipelineController>,
    check_interval: Duration,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ApprovalSweeper {
    pub fn new(controller: Arc<PipelineController>) -> Self {
        Self {
            controller,
            check_interval: Duration::from_secs(30),
            running: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until [`ApprovalSweeper::stop`] is called
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            interval_secs = self.check_interval.as_secs(),
            "Approval sweeper started"
        );

        while self.running.load(Ordering::SeqCst) {
            self.sweep().await;
            tokio::select! {
                _ = tokio::time::sleep(self.check_interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        tracing::info!("Approval sweeper stopped");
    }

    /// One pass over the runs waiting for approval
    pub async fn sweep(&self) -> Vec<Uuid> {
        match self.controller.expire_approvals(Utc::now()).await {
            Ok(expired) => {
                if !expired.is_empty() {
                    tracing::info!(count = expired.len(), "Expired pending approvals");
                }
                expired
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to expire pending approvals");
                Vec::new()
            }
        }
    }

    /// Ask a running sweeper to return after its current pass
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }
}
