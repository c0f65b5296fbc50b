//! Job entities and scheduler API types
//!
//! Mirrors the job-store REST schema: jobs are created by the scheduler,
//! signed and broadcast downstream, and watched here until terminal.

use crate::error::{SentryError, SentryResult};

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound on retry ticks per session. Job-creation validation rejects
/// any retry policy that could outlive this.
pub const SENTRY_MAX_RETRIES: usize = 10;

/// Transaction job tracked by the scheduler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    pub uuid: String,
    pub chain_uuid: String,
    pub schedule_uuid: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub labels: HashMap<String, String>,
    pub transaction: EthTransaction,
    pub annotations: Annotations,
    pub internal_data: InternalData,
    pub status: JobStatus,
    pub logs: Vec<JobLog>,
}

impl Job {
    /// A job with no parent owns at most one retry session.
    pub fn is_parent(&self) -> bool {
        self.internal_data.parent_job_uuid.is_none()
    }
}

/// Ethereum transaction payload carried by a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EthTransaction {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<String>,
    pub data: Option<String>,
    pub nonce: Option<u64>,
    pub gas_price: Option<String>,
    pub raw: Option<String>,
    pub private_from: Option<String>,
    pub private_for: Vec<String>,
    pub privacy_group_id: Option<String>,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[default]
    #[serde(rename = "eth://ethereum/transaction")]
    EthereumTransaction,
    #[serde(rename = "eth://ethereum/rawTransaction")]
    EthereumRawTransaction,
    #[serde(rename = "eth://eea/privateTransaction")]
    EeaPrivateTransaction,
    #[serde(rename = "eth://eea/markingTransaction")]
    EeaMarkingTransaction,
    #[serde(rename = "eth://tessera/privateTransaction")]
    TesseraPrivateTransaction,
    #[serde(rename = "eth://tessera/markingTransaction")]
    TesseraMarkingTransaction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Created,
    Started,
    Pending,
    Resending,
    Warning,
    Recovering,
    Mined,
    NeverMined,
    Failed,
}

/// Log entry appended by the scheduler on every status transition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobLog {
    pub status: JobStatus,
    pub message: String,
    pub at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Annotations {
    pub one_time_key: bool,
    pub has_been_retried: bool,
    pub gas_price_policy: GasPricePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GasPricePolicy {
    pub priority: Option<String>,
    pub retry_policy: RetryPolicy,
}

/// Retry strategy attached to a job at creation time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Seconds between retry ticks; zero disables the session entirely
    pub interval_secs: u64,
    /// Gas price increment applied per child, e.g. 0.05 for +5%
    pub increment: f64,
    /// Ceiling on the cumulative gas price multiplier
    pub limit: f64,
}

impl RetryPolicy {
    /// Job-creation validation: the escalation loop must be bounded by
    /// construction, i.e. ceil(limit / increment) <= SENTRY_MAX_RETRIES.
    pub fn validate(&self) -> SentryResult<()> {
        if self.increment < 0.0 || self.limit < 0.0 {
            return Err(SentryError::RetryPolicy(
                "increment and limit cannot be negative".to_string(),
            ));
        }

        if self.increment > 0.0
            && (self.limit / self.increment).ceil() > SENTRY_MAX_RETRIES as f64
        {
            return Err(SentryError::RetryPolicy(format!(
                "limit/increment allows more than {} retries",
                SENTRY_MAX_RETRIES
            )));
        }

        Ok(())
    }
}

/// Sentry bookkeeping attached to a job, not exposed to API callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InternalData {
    pub one_time_key: bool,
    pub parent_job_uuid: Option<String>,
    pub chain_id: Option<String>,
    /// Set by the nonce checker to signal a required re-signing upstream
    pub expected_nonce: Option<u64>,
    /// Seconds between session ticks, derived from the retry policy
    pub retry_interval_secs: u64,
    pub has_been_retried: bool,
}

/// Filters accepted by the scheduler job search endpoint
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_job_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub only_parents: bool,
    /// Include per-status log entries in the returned jobs
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub with_logs: bool,
}

/// Request body for creating a child job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateJobRequest {
    pub chain_uuid: String,
    pub schedule_uuid: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub labels: HashMap<String, String>,
    pub annotations: Annotations,
    pub parent_job_uuid: Option<String>,
    pub transaction: EthTransaction,
}

/// Request body for patching a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateJobRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<EthTransaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use uuid::Uuid;

    /// Pending top-level job with a populated sender and chain id
    pub fn fake_job() -> Job {
        Job {
            uuid: Uuid::new_v4().to_string(),
            chain_uuid: Uuid::new_v4().to_string(),
            schedule_uuid: Uuid::new_v4().to_string(),
            job_type: JobType::EthereumTransaction,
            status: JobStatus::Pending,
            transaction: EthTransaction {
                from: Some(
                    "0x7e654d251da770a068413677967f6d3ea2fea9e4"
                        .parse()
                        .unwrap(),
                ),
                nonce: Some(0),
                gas_price: Some("1000000000".to_string()),
                ..Default::default()
            },
            internal_data: InternalData {
                chain_id: Some("2017".to_string()),
                retry_interval_secs: 30,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Child of the given parent, as the scheduler would return it
    pub fn fake_child_job(parent: &Job) -> Job {
        let mut job = fake_job();
        job.chain_uuid = parent.chain_uuid.clone();
        job.schedule_uuid = parent.schedule_uuid.clone();
        job.internal_data.parent_job_uuid = Some(parent.uuid.clone());
        job
    }
}
