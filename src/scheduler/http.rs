//! HTTP implementation of the scheduler client

use super::SchedulerClient;
use crate::error::{SentryError, SentryResult};
use crate::types::{CreateJobRequest, Job, JobFilters, UpdateJobRequest};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

const COMPONENT: &str = "scheduler.http-client";

pub struct HttpSchedulerClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSchedulerClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> SentryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse_job(&self, response: reqwest::Response, uuid: &str) -> SentryResult<Job> {
        match response.status() {
            StatusCode::NOT_FOUND => Err(SentryError::JobNotFound {
                job_uuid: uuid.to_string(),
            }),
            status if status.is_success() => response
                .json::<Job>()
                .await
                .map_err(|e| SentryError::scheduler(COMPONENT, e)),
            status => Err(SentryError::scheduler(
                COMPONENT,
                format!("unexpected status {status} for job {uuid}"),
            )),
        }
    }
}

#[async_trait]
impl SchedulerClient for HttpSchedulerClient {
    async fn get_job(&self, uuid: &str) -> SentryResult<Job> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{uuid}")))
            .send()
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        self.parse_job(response, uuid).await
    }

    async fn search_jobs(&self, filters: &JobFilters) -> SentryResult<Vec<Job>> {
        let response = self
            .client
            .get(self.url("/jobs"))
            .query(filters)
            .send()
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        if !response.status().is_success() {
            return Err(SentryError::scheduler(
                COMPONENT,
                format!("job search failed with status {}", response.status()),
            ));
        }

        response
            .json::<Vec<Job>>()
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))
    }

    async fn create_job(&self, request: &CreateJobRequest) -> SentryResult<Job> {
        let response = self
            .client
            .post(self.url("/jobs"))
            .json(request)
            .send()
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        if !response.status().is_success() {
            return Err(SentryError::scheduler(
                COMPONENT,
                format!("job creation failed with status {}", response.status()),
            ));
        }

        response
            .json::<Job>()
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))
    }

    async fn start_job(&self, uuid: &str) -> SentryResult<()> {
        let response = self
            .client
            .put(self.url(&format!("/jobs/{uuid}/start")))
            .send()
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        if !response.status().is_success() {
            return Err(SentryError::scheduler(
                COMPONENT,
                format!("starting job {uuid} failed with status {}", response.status()),
            ));
        }

        Ok(())
    }

    async fn resend_job_tx(&self, uuid: &str) -> SentryResult<()> {
        let response = self
            .client
            .put(self.url(&format!("/jobs/{uuid}/resend")))
            .send()
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        if !response.status().is_success() {
            return Err(SentryError::scheduler(
                COMPONENT,
                format!("resending job {uuid} failed with status {}", response.status()),
            ));
        }

        Ok(())
    }

    async fn update_job(&self, uuid: &str, request: &UpdateJobRequest) -> SentryResult<Job> {
        let response = self
            .client
            .patch(self.url(&format!("/jobs/{uuid}")))
            .json(request)
            .send()
            .await
            .map_err(|e| SentryError::scheduler(COMPONENT, e))?;

        self.parse_job(response, uuid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::fake_job;
    use crate::types::JobStatus;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpSchedulerClient {
        HttpSchedulerClient::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn gets_job_by_uuid() {
        let server = MockServer::start().await;
        let job = fake_job();

        Mock::given(method("GET"))
            .and(path(format!("/jobs/{}", job.uuid)))
            .respond_with(ResponseTemplate::new(200).set_body_json(&job))
            .mount(&server)
            .await;

        let fetched = client(&server).get_job(&job.uuid).await.unwrap();
        assert_eq!(fetched.uuid, job.uuid);
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn missing_job_maps_to_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/jobs/unknown"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).get_job("unknown").await.unwrap_err();
        assert!(matches!(err, SentryError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn search_passes_filters_as_query() {
        let server = MockServer::start().await;
        let parent = fake_job();

        Mock::given(method("GET"))
            .and(path("/jobs"))
            .and(query_param("parentJobUuid", parent.uuid.clone()))
            .and(query_param("withLogs", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![&parent]))
            .mount(&server)
            .await;

        let filters = JobFilters {
            parent_job_uuid: Some(parent.uuid.clone()),
            with_logs: true,
            ..Default::default()
        };
        let jobs = client(&server).search_jobs(&filters).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn scheduler_outage_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/jobs/abc/resend"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).resend_job_tx("abc").await.unwrap_err();
        assert!(err.is_transient());
    }
}
