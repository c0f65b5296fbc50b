//! Per-job retry sessions
//!
//! A session is one background task ticking at the job's retry interval
//! until the job progresses, the retry budget runs out, or the sentry shuts
//! down. The registry guarantees at most one session per top-level job.

use super::{BackoffPolicy, RetrySessionJob};
use crate::error::SentryResult;
use crate::scheduler::SchedulerClient;
use crate::types::{Job, JobFilters, JobStatus, SENTRY_MAX_RETRIES};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Terminal report emitted when a session ends. The owner of the manager is
/// responsible for pushing `has_been_retried` back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub job_uuid: String,
    pub failed: bool,
}

struct SessionState {
    parent_uuid: String,
    chain_uuid: String,
    interval: Duration,
    n_children: usize,
    last_child_uuid: String,
    retries: usize,
}

/// Manager of job retry sessions
pub struct SessionManager {
    sessions: Arc<DashMap<String, ()>>,
    retry_job: Arc<RetrySessionJob>,
    client: Arc<dyn SchedulerClient>,
    backoff: BackoffPolicy,
    completions: mpsc::UnboundedSender<SessionOutcome>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        client: Arc<dyn SchedulerClient>,
        retry_job: Arc<RetrySessionJob>,
        backoff: BackoffPolicy,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<SessionOutcome>) {
        let (completions, completions_rx) = mpsc::unbounded_channel();

        (
            Self {
                sessions: Arc::new(DashMap::new()),
                retry_job,
                client,
                backoff,
                completions,
                shutdown,
            },
            completions_rx,
        )
    }

    /// Open a retry session for a top-level job. Idempotent per UUID: a
    /// second call while a session is active is a no-op.
    pub async fn start(&self, job: &Job) {
        if self.sessions.contains_key(&job.uuid) {
            debug!(job_uuid = %job.uuid, "job session already exists, skipping");
            return;
        }

        if job.internal_data.retry_interval_secs == 0 {
            debug!(job_uuid = %job.uuid, "job does not have a retry strategy");
            return;
        }

        if !job.is_parent() {
            debug!(job_uuid = %job.uuid, "child jobs do not own sessions");
            return;
        }

        if job.internal_data.has_been_retried {
            warn!(job_uuid = %job.uuid, "job has already been retried");
            return;
        }

        let state = match self.session_state(job).await {
            Ok(state) => state,
            Err(err) => {
                error!(job_uuid = %job.uuid, %err, "job session failed to start");
                return;
            }
        };

        if state.retries >= SENTRY_MAX_RETRIES {
            warn!(
                job_uuid = %job.uuid,
                retries = state.retries,
                "job already reached max retries"
            );
            return;
        }

        self.sessions.insert(job.uuid.clone(), ());
        crate::metrics::set_active_sessions(self.sessions.len());

        let retry_job = self.retry_job.clone();
        let sessions = self.sessions.clone();
        let completions = self.completions.clone();
        let backoff = self.backoff;
        let cancel = self.shutdown.child_token();
        let job_uuid = job.uuid.clone();

        tokio::spawn(async move {
            let failed = run_with_backoff(&retry_job, state, &cancel, backoff).await;

            debug!(job_uuid, "job session completed");
            sessions.remove(&job_uuid);
            crate::metrics::set_active_sessions(sessions.len());

            // Receiver gone means the sentry is shutting down
            let _ = completions.send(SessionOutcome { job_uuid, failed });
        });
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Reconstruct where the retry loop left off from the job family:
    /// each child is one past retry, plus every resend of the last attempt.
    async fn session_state(&self, job: &Job) -> SentryResult<SessionState> {
        let family = self
            .client
            .search_jobs(&JobFilters {
                chain_uuid: Some(job.chain_uuid.clone()),
                parent_job_uuid: Some(job.uuid.clone()),
                // Resends only show up as RESENDING log entries
                with_logs: true,
                ..Default::default()
            })
            .await?;

        let n_children = family.len().saturating_sub(1);
        let last = family.last();
        let resends = last
            .map(|job| {
                job.logs
                    .iter()
                    .filter(|log| log.status == JobStatus::Resending)
                    .count()
            })
            .unwrap_or(0);

        Ok(SessionState {
            parent_uuid: job.uuid.clone(),
            chain_uuid: job.chain_uuid.clone(),
            interval: Duration::from_secs(job.internal_data.retry_interval_secs),
            n_children,
            last_child_uuid: last
                .map(|job| job.uuid.clone())
                .unwrap_or_else(|| job.uuid.clone()),
            retries: n_children + resends,
        })
    }
}

/// Run the session, restarting on error under the backoff policy.
/// Returns true when the backoff budget was exhausted.
async fn run_with_backoff(
    retry_job: &RetrySessionJob,
    mut state: SessionState,
    cancel: &CancellationToken,
    backoff: BackoffPolicy,
) -> bool {
    let mut attempt: u32 = 0;

    loop {
        match run_session(retry_job, &mut state, cancel).await {
            Ok(()) => return false,
            Err(err) if attempt < backoff.max_attempts => {
                let delay = backoff.delay(attempt);
                attempt += 1;
                warn!(
                    job_uuid = %state.parent_uuid,
                    %err,
                    ?delay,
                    "error in job retry session, restarting"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                error!(job_uuid = %state.parent_uuid, %err, "job session unexpectedly stopped");
                return true;
            }
        }
    }
}

async fn run_session(
    retry_job: &RetrySessionJob,
    state: &mut SessionState,
    cancel: &CancellationToken,
) -> SentryResult<()> {
    info!(job_uuid = %state.parent_uuid, "job session started");

    let period = state.interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(job_uuid = %state.parent_uuid, "session gracefully stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                let produced = retry_job
                    .execute(
                        &state.parent_uuid,
                        &state.chain_uuid,
                        &state.last_child_uuid,
                        state.n_children,
                    )
                    .await?;

                state.retries += 1;
                crate::metrics::record_session_retry();

                if state.retries >= SENTRY_MAX_RETRIES {
                    info!(
                        job_uuid = %state.parent_uuid,
                        retries = state.retries,
                        "job session exhausted max retries"
                    );
                    return Ok(());
                }

                match produced {
                    // Job progressed externally: exit gracefully
                    None => return Ok(()),
                    Some(uuid) => {
                        // The parent UUID is the no-new-child sentinel
                        if uuid != state.parent_uuid && uuid != state.last_child_uuid {
                            state.n_children += 1;
                            state.last_child_uuid = uuid;
                        }
                    }
                }
            }
        }
    }
}
