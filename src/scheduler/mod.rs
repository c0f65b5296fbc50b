//! Transaction-scheduler client
//!
//! The scheduler owns job persistence and the REST job-store API; the sentry
//! only consumes it through this trait.

pub mod http;

pub use http::HttpSchedulerClient;

use crate::error::SentryResult;
use crate::types::{CreateJobRequest, Job, JobFilters, UpdateJobRequest};

use async_trait::async_trait;

/// Job-store collaborator
///
/// `search_jobs` with a `parent_job_uuid` filter returns the whole job
/// family ordered by creation time, the top-level job first.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    async fn get_job(&self, uuid: &str) -> SentryResult<Job>;

    async fn search_jobs(&self, filters: &JobFilters) -> SentryResult<Vec<Job>>;

    async fn create_job(&self, request: &CreateJobRequest) -> SentryResult<Job>;

    async fn start_job(&self, uuid: &str) -> SentryResult<()>;

    /// Ask the signer to rebroadcast the job's transaction as-is
    async fn resend_job_tx(&self, uuid: &str) -> SentryResult<()>;

    async fn update_job(&self, uuid: &str, request: &UpdateJobRequest) -> SentryResult<Job>;
}
