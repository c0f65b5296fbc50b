//! Retry use case: one escalate-or-resend decision per session tick
//!
//! Either a child job is created at an escalated gas price, or the last
//! attempt is rebroadcast as-is once the escalation budget is spent.

use crate::error::{SentryError, SentryResult};
use crate::scheduler::SchedulerClient;
use crate::types::{CreateJobRequest, EthTransaction, Job, JobFilters, JobStatus, JobType};

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

const COMPONENT: &str = "sentry.retry-session-job";

pub struct RetrySessionJob {
    client: Arc<dyn SchedulerClient>,
}

impl RetrySessionJob {
    pub fn new(client: Arc<dyn SchedulerClient>) -> Self {
        Self { client }
    }

    /// Decide and perform one retry step for a parent job.
    ///
    /// Returns the UUID of the job that made progress: a freshly started
    /// child, or the parent itself when the last attempt was resent.
    /// `None` means the job progressed externally and the session must stop.
    pub async fn execute(
        &self,
        parent_job_uuid: &str,
        chain_uuid: &str,
        last_child_uuid: &str,
        n_children: usize,
    ) -> SentryResult<Option<String>> {
        debug!(job_uuid = parent_job_uuid, n_children, "verifying job status");

        let jobs = self
            .client
            .search_jobs(&JobFilters {
                chain_uuid: Some(chain_uuid.to_string()),
                parent_job_uuid: Some(parent_job_uuid.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        let Some(parent) = jobs.first() else {
            return Err(SentryError::JobNotFound {
                job_uuid: parent_job_uuid.to_string(),
            });
        };

        if parent.status != JobStatus::Pending {
            info!(
                job_uuid = parent_job_uuid,
                status = ?parent.status,
                "job has been updated externally, stopping session"
            );
            return Ok(None);
        }

        let retry_policy = &parent.annotations.gas_price_policy.retry_policy;
        if retry_policy.increment > 0.0
            && n_children <= (retry_policy.limit / retry_policy.increment).ceil() as usize
        {
            let child = self.create_and_start_child(parent, n_children).await?;
            return Ok(Some(child.uuid));
        }

        // Escalation budget spent: rebroadcast the last attempt as-is
        let resend_uuid = if last_child_uuid.is_empty() {
            jobs.last().map(|job| job.uuid.as_str()).unwrap_or(parent_job_uuid)
        } else {
            last_child_uuid
        };

        self.client
            .resend_job_tx(resend_uuid)
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        info!(job_uuid = parent_job_uuid, resend_uuid, "transaction resent");
        crate::metrics::record_tx_resent();

        Ok(Some(parent.uuid.clone()))
    }

    async fn create_and_start_child(&self, parent: &Job, n_children: usize) -> SentryResult<Job> {
        let retry_policy = &parent.annotations.gas_price_policy.retry_policy;
        let multiplier =
            gas_price_multiplier(retry_policy.increment, retry_policy.limit, n_children)?;

        let request = child_job_request(parent, multiplier, n_children)?;
        let child = self
            .client
            .create_job(&request)
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        self.client
            .start_job(&child.uuid)
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        info!(
            job_uuid = %parent.uuid,
            child_job_uuid = %child.uuid,
            %multiplier,
            "new child job created"
        );
        crate::metrics::record_child_job_created();

        Ok(child)
    }
}

/// Cumulative gas price multiplier for the (n_children + 1)-th attempt,
/// capped at the policy limit.
fn gas_price_multiplier(increment: f64, limit: f64, n_children: usize) -> SentryResult<Decimal> {
    let increment = Decimal::from_f64(increment)
        .ok_or_else(|| SentryError::RetryPolicy("increment is not a finite number".into()))?;
    let limit = Decimal::from_f64(limit)
        .ok_or_else(|| SentryError::RetryPolicy("limit is not a finite number".into()))?;

    let multiplier = Decimal::from(n_children as u64 + 1) * increment;
    Ok(multiplier.min(limit))
}

/// Gas price scaled by (1 + multiplier), in exact decimal arithmetic.
fn escalated_gas_price(gas_price: &str, multiplier: Decimal) -> SentryResult<String> {
    let price = Decimal::from_str(gas_price)
        .map_err(|e| SentryError::Internal(format!("unparseable gas price: {e}")))?;

    Ok((price * (Decimal::ONE + multiplier)).normalize().to_string())
}

fn child_job_request(
    parent: &Job,
    multiplier: Decimal,
    n_children: usize,
) -> SentryResult<CreateJobRequest> {
    let mut labels = parent.labels.clone();
    labels.insert("retryOrder".to_string(), (n_children + 1).to_string());

    let mut request = CreateJobRequest {
        chain_uuid: parent.chain_uuid.clone(),
        schedule_uuid: parent.schedule_uuid.clone(),
        job_type: parent.job_type,
        labels,
        annotations: parent.annotations.clone(),
        parent_job_uuid: Some(parent.uuid.clone()),
        transaction: EthTransaction::default(),
    };

    // Pre-signed payloads cannot be re-priced
    if parent.job_type == JobType::EthereumRawTransaction {
        request.transaction.raw = parent.transaction.raw.clone();
        return Ok(request);
    }

    let gas_price = match parent.transaction.gas_price.as_deref() {
        Some(price) => Some(escalated_gas_price(price, multiplier)?),
        None => None,
    };

    request.transaction = EthTransaction {
        from: parent.transaction.from,
        to: parent.transaction.to,
        value: parent.transaction.value.clone(),
        data: parent.transaction.data.clone(),
        nonce: parent.transaction.nonce,
        gas_price,
        private_from: parent.transaction.private_from.clone(),
        private_for: parent.transaction.private_for.clone(),
        privacy_group_id: parent.transaction.privacy_group_id.clone(),
        ..Default::default()
    };

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::MockSchedulerClient;
    use crate::types::fixtures::{fake_child_job, fake_job};

    fn pending_parent(increment: f64, limit: f64) -> Job {
        let mut parent = fake_job();
        parent.status = JobStatus::Pending;
        parent.transaction.gas_price = Some("1000000000".to_string());
        parent.transaction.nonce = Some(1);
        parent.annotations.gas_price_policy.retry_policy.increment = increment;
        parent.annotations.gas_price_policy.retry_policy.limit = limit;
        parent
    }

    #[tokio::test]
    async fn stops_when_job_no_longer_pending() {
        let mut parent = fake_job();
        parent.status = JobStatus::Mined;

        let mut client = MockSchedulerClient::new();
        let response = vec![parent.clone()];
        let chain_uuid = parent.chain_uuid.clone();
        let parent_uuid = parent.uuid.clone();
        client
            .expect_search_jobs()
            .withf(move |filters| {
                filters.chain_uuid.as_deref() == Some(chain_uuid.as_str())
                    && filters.parent_job_uuid.as_deref() == Some(parent_uuid.as_str())
            })
            .times(1)
            .returning(move |_| Ok(response.clone()));

        let usecase = RetrySessionJob::new(Arc::new(client));
        let produced = usecase
            .execute(&parent.uuid, &parent.chain_uuid, "", 0)
            .await
            .unwrap();
        assert_eq!(produced, None);
    }

    #[tokio::test]
    async fn escalates_gas_price_capped_by_limit() {
        // multiplier = min(0.12, (1 + 1) * 0.06) = 0.12
        let parent = pending_parent(0.06, 0.12);
        let child = fake_child_job(&parent);
        let child_uuid = child.uuid.clone();

        let mut client = MockSchedulerClient::new();
        let response = vec![parent.clone(), child.clone()];
        client
            .expect_search_jobs()
            .returning(move |_| Ok(response.clone()));
        client
            .expect_create_job()
            .withf(move |req| {
                req.transaction.gas_price.as_deref() == Some("1120000000")
                    && req.transaction.nonce == Some(1)
            })
            .times(1)
            .returning(move |_| Ok(child.clone()));
        client
            .expect_start_job()
            .times(1)
            .returning(|_| Ok(()));

        let usecase = RetrySessionJob::new(Arc::new(client));
        let produced = usecase
            .execute(&parent.uuid, &parent.chain_uuid, "", 1)
            .await
            .unwrap();
        assert_eq!(produced, Some(child_uuid));
    }

    #[tokio::test]
    async fn escalation_never_exceeds_limit() {
        // multiplier = min(0.05, (0 + 1) * 0.06) = 0.05
        let parent = pending_parent(0.06, 0.05);
        let child = fake_child_job(&parent);

        let mut client = MockSchedulerClient::new();
        let response = vec![parent.clone()];
        client
            .expect_search_jobs()
            .returning(move |_| Ok(response.clone()));
        client
            .expect_create_job()
            .withf(|req| req.transaction.gas_price.as_deref() == Some("1050000000"))
            .times(1)
            .returning(move |_| Ok(child.clone()));
        client.expect_start_job().returning(|_| Ok(()));

        let usecase = RetrySessionJob::new(Arc::new(client));
        let produced = usecase
            .execute(&parent.uuid, &parent.chain_uuid, "", 0)
            .await
            .unwrap();
        assert!(produced.is_some());
    }

    #[tokio::test]
    async fn raw_jobs_are_never_repriced() {
        let mut parent = pending_parent(0.06, 0.12);
        parent.job_type = JobType::EthereumRawTransaction;
        parent.transaction.raw = Some("0xf86c0a85...".to_string());
        let raw = parent.transaction.raw.clone();
        let child = fake_child_job(&parent);

        let mut client = MockSchedulerClient::new();
        let response = vec![parent.clone()];
        client
            .expect_search_jobs()
            .returning(move |_| Ok(response.clone()));
        client
            .expect_create_job()
            .withf(move |req| {
                req.transaction.raw == raw && req.transaction.gas_price.is_none()
            })
            .times(1)
            .returning(move |_| Ok(child.clone()));
        client.expect_start_job().returning(|_| Ok(()));

        let usecase = RetrySessionJob::new(Arc::new(client));
        let produced = usecase
            .execute(&parent.uuid, &parent.chain_uuid, "", 0)
            .await
            .unwrap();
        assert!(produced.is_some());
    }

    #[tokio::test]
    async fn resends_last_child_when_no_increment_configured() {
        let parent = pending_parent(0.0, 0.0);
        let child = fake_child_job(&parent);
        let child_uuid = child.uuid.clone();
        let parent_uuid = parent.uuid.clone();

        let mut client = MockSchedulerClient::new();
        let response = vec![parent.clone(), child];
        client
            .expect_search_jobs()
            .returning(move |_| Ok(response.clone()));
        client
            .expect_resend_job_tx()
            .withf(move |uuid| uuid == child_uuid)
            .times(1)
            .returning(|_| Ok(()));

        let usecase = RetrySessionJob::new(Arc::new(client));
        let produced = usecase
            .execute(&parent.uuid, &parent.chain_uuid, "", 0)
            .await
            .unwrap();
        // Progress made, no new child
        assert_eq!(produced, Some(parent_uuid));
    }

    #[tokio::test]
    async fn scheduler_failures_stay_transient() {
        let mut client = MockSchedulerClient::new();
        client
            .expect_search_jobs()
            .returning(|_| Err(SentryError::scheduler("scheduler.http-client", "timeout")));

        let usecase = RetrySessionJob::new(Arc::new(client));
        let err = usecase
            .execute("parent", "chain", "", 0)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn multiplier_formula() {
        assert_eq!(
            gas_price_multiplier(0.06, 0.12, 1).unwrap(),
            Decimal::from_str("0.12").unwrap()
        );
        assert_eq!(
            gas_price_multiplier(0.06, 0.05, 0).unwrap(),
            Decimal::from_str("0.05").unwrap()
        );
        assert_eq!(
            gas_price_multiplier(0.05, 0.5, 2).unwrap(),
            Decimal::from_str("0.15").unwrap()
        );
    }

    #[test]
    fn gas_price_arithmetic_is_exact() {
        let multiplier = Decimal::from_str("0.12").unwrap();
        assert_eq!(
            escalated_gas_price("1000000000", multiplier).unwrap(),
            "1120000000"
        );
    }
}
