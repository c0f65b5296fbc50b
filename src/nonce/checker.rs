//! Nonce validation and repair around transaction signing
//!
//! `check` runs before signing, `on_success`/`on_failure` after broadcast.
//! Concurrent callers sharing a partition key must not interleave the
//! check/send/commit sequence for that key; the checker detects and heals
//! races, it does not prevent them.

use super::{partition_key, RecoveryTracker};
use crate::chain::ChainClient;
use crate::error::{is_nonce_too_low, SentryError, SentryResult};
use crate::nonce::NonceStore;
use crate::types::{Job, JobType};

use std::sync::Arc;
use tracing::{debug, warn};

pub struct NonceChecker {
    store: Arc<dyn NonceStore>,
    chain: Arc<dyn ChainClient>,
    recovery: Arc<RecoveryTracker>,
    max_recovery: u64,
}

impl NonceChecker {
    pub fn new(
        store: Arc<dyn NonceStore>,
        chain: Arc<dyn ChainClient>,
        recovery: Arc<RecoveryTracker>,
        max_recovery: u64,
    ) -> Self {
        Self {
            store,
            chain,
            recovery,
            max_recovery,
        }
    }

    /// Validate a job's nonce before it is signed.
    ///
    /// On a mismatch the job is annotated with the expected nonce (when it
    /// ran ahead) and a retryable invalid-nonce warning is returned; the
    /// caller re-signs and resubmits. Exceeding the recovery budget for a
    /// key turns the warning into a fatal error.
    pub async fn check(&self, job: &mut Job) -> SentryResult<()> {
        if let Some(reason) = should_skip(job) {
            debug!(job_uuid = %job.uuid, reason, "skipping nonce check");
            return Ok(());
        }

        let Some(key) = partition_key(job) else {
            debug!(job_uuid = %job.uuid, "empty partition key, skipping nonce check");
            return Ok(());
        };

        let expected = match self.store.get_last_sent(&key).await? {
            Some(last_sent) => last_sent + 1,
            None => {
                let pending = self.fetch_pending_nonce(job).await?;
                debug!(job_uuid = %job.uuid, key, pending, "calibrating nonce from chain");
                crate::metrics::record_nonce_calibration();
                pending
            }
        };

        let got = job.transaction.nonce.unwrap_or(0);
        if got == expected {
            crate::metrics::record_nonce_check("ok");
            return Ok(());
        }

        warn!(job_uuid = %job.uuid, key, expected, got, "invalid nonce");
        crate::metrics::record_nonce_check("mismatch");

        let attempts = self.recovery.recovering(&key);
        if attempts > self.max_recovery {
            return Err(SentryError::MaxRecoveryReached { key, attempts });
        }

        if got > expected && attempts == 0 {
            // Signal for re-signing upstream
            job.internal_data.expected_nonce = Some(expected);
        } else if got < expected {
            // Drop any stale recovery signal from a prior execution
            job.internal_data.expected_nonce = None;
        }

        self.recovery.recover(&key);
        crate::metrics::record_nonce_recovery();

        Err(SentryError::InvalidNonce { key, expected, got })
    }

    /// React to a failed broadcast.
    ///
    /// Only nonce-too-low rejections are acted on: the store is recalibrated
    /// one below the chain's fresh pending nonce so the next `check`
    /// recomputes the expected value.
    pub async fn on_failure(&self, job: &Job, job_err: &SentryError) -> SentryResult<()> {
        if should_skip(job).is_some() {
            return Ok(());
        }

        if !is_nonce_too_low(&job_err.to_string()) {
            return Ok(());
        }

        let Some(key) = partition_key(job) else {
            return Ok(());
        };

        warn!(job_uuid = %job.uuid, key, "chain responded with invalid nonce error");

        let attempts = self.recovery.recovering(&key);
        if attempts > self.max_recovery {
            return Err(SentryError::MaxRecoveryReached { key, attempts });
        }

        let pending = self.fetch_pending_nonce(job).await?;
        debug!(job_uuid = %job.uuid, key, pending, "recalibrating nonce");
        self.store
            .set_last_sent(&key, pending.saturating_sub(1))
            .await?;

        self.recovery.recover(&key);
        crate::metrics::record_nonce_recovery();

        Err(SentryError::NonceTooLow(job_err.to_string()))
    }

    /// Commit the job's nonce after a successful broadcast.
    ///
    /// Must be called exactly once per broadcast transaction.
    pub async fn on_success(&self, job: &Job) -> SentryResult<()> {
        if should_skip(job).is_some() {
            return Ok(());
        }

        let Some(key) = partition_key(job) else {
            return Ok(());
        };

        self.recovery.recovered(&key);
        let nonce = job.transaction.nonce.unwrap_or(0);
        self.store.set_last_sent(&key, nonce).await?;

        debug!(job_uuid = %job.uuid, key, nonce, "committed last sent nonce");
        Ok(())
    }

    async fn fetch_pending_nonce(&self, job: &Job) -> SentryResult<u64> {
        let account = job.transaction.from.ok_or_else(|| {
            SentryError::Internal("cannot fetch nonce without a sender".to_string())
        })?;

        if job.job_type == JobType::EeaPrivateTransaction {
            if let Some(group) = job.transaction.privacy_group_id.as_deref() {
                if !group.is_empty() {
                    return self
                        .chain
                        .priv_nonce(&job.chain_uuid, account, group)
                        .await;
                }
            }

            if !job.transaction.private_for.is_empty() {
                let private_from = job.transaction.private_from.as_deref().unwrap_or_default();
                return self
                    .chain
                    .priv_eea_nonce(
                        &job.chain_uuid,
                        account,
                        private_from,
                        &job.transaction.private_for,
                    )
                    .await;
            }
        }

        self.chain.pending_nonce_at(&job.chain_uuid, account).await
    }
}

fn should_skip(job: &Job) -> Option<&'static str> {
    if job.internal_data.one_time_key {
        return Some("job is using a one-time key");
    }
    if job.internal_data.parent_job_uuid.is_some() {
        return Some("job is a child");
    }
    None
}
