//! Pending-job listener
//!
//! Polls the scheduler for PENDING top-level jobs and opens retry sessions
//! for them. `SessionManager::start` is idempotent, so re-observing a job
//! on the next poll is harmless. Completed sessions are flagged
//! `has_been_retried` here so they are never picked up again.

use super::{SessionManager, SessionOutcome};
use crate::error::{SentryError, SentryResult};
use crate::scheduler::SchedulerClient;
use crate::types::{JobFilters, JobStatus, UpdateJobRequest};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "sentry.pending-job-listener";

pub struct PendingJobListener {
    client: Arc<dyn SchedulerClient>,
    manager: Arc<SessionManager>,
    completions: mpsc::UnboundedReceiver<SessionOutcome>,
    refresh_interval: Duration,
}

impl PendingJobListener {
    pub fn new(
        client: Arc<dyn SchedulerClient>,
        manager: Arc<SessionManager>,
        completions: mpsc::UnboundedReceiver<SessionOutcome>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            client,
            manager,
            completions,
            refresh_interval,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> SentryResult<()> {
        info!(refresh_interval = ?self.refresh_interval, "pending-job listener started");

        let mut ticker = tokio::time::interval(self.refresh_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("pending-job listener stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    // Scheduler outages are transient; keep polling
                    if let Err(err) = self.refresh().await {
                        warn!(%err, "failed to refresh pending jobs");
                    }
                }
                Some(outcome) = self.completions.recv() => {
                    if let Err(err) = self.mark_retried(&outcome).await {
                        error!(job_uuid = %outcome.job_uuid, %err, "failed to flag retried job");
                    }
                }
            }
        }
    }

    async fn refresh(&self) -> SentryResult<()> {
        let jobs = self
            .client
            .search_jobs(&JobFilters {
                status: Some(JobStatus::Pending),
                only_parents: true,
                ..Default::default()
            })
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        debug!(count = jobs.len(), "polled pending parent jobs");
        for job in &jobs {
            self.manager.start(job).await;
        }

        Ok(())
    }

    async fn mark_retried(&self, outcome: &SessionOutcome) -> SentryResult<()> {
        let mut job = self
            .client
            .get_job(&outcome.job_uuid)
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        job.annotations.has_been_retried = true;
        self.client
            .update_job(
                &outcome.job_uuid,
                &UpdateJobRequest {
                    annotations: Some(job.annotations),
                    message: outcome
                        .failed
                        .then(|| "retry session stopped on repeated errors".to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        debug!(job_uuid = %outcome.job_uuid, failed = outcome.failed, "job flagged as retried");
        Ok(())
    }
}
