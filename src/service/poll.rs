use super::{ReportClient, job_url};
use crate::config::PollConfig;
use crate::error::{Error, Result, ServiceStage};
use crate::retry::{IsRetryable, sleep_or_cancel, until_cancelled};
use crate::types::{JobHandle, JobStatus};
use serde::Deserialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    report_status: String,
}

/// Polls a job until it reaches a terminal status or the deadline passes
#[derive(Clone, Debug)]
pub struct StatusPoller {
    client: ReportClient,
    config: PollConfig,
}

impl StatusPoller {
    /// Create a poller with its interval and deadline
    pub fn new(client: ReportClient, config: PollConfig) -> Self {
        Self { client, config }
    }

    /// Wait until `handle` is fulfilled or archived
    ///
    /// In-progress and unrecognised statuses, transport errors and 5xx answers all lead to
    /// another query after `interval`. A `Failed` status, any other error status, or running
    /// past `timeout` ends polling with an error.
    pub async fn await_terminal(
        &self,
        mut handle: JobHandle,
        cancel: &CancellationToken,
    ) -> Result<JobHandle> {
        let started = Instant::now();
        let url = job_url(&self.client.config().report_status_url, &handle.id)?;

        let polled = tokio::time::timeout(self.config.timeout, async {
            let mut queries = 0u32;
            loop {
                queries += 1;
                match until_cancelled(cancel, self.query(url.clone())).await {
                    Ok(status) if status.is_success() => {
                        info!(job_id = %handle.id, %status, queries, "job finished");
                        return Ok(status);
                    }
                    Ok(status) if status.is_failure() => {
                        return Err(Error::JobFailed {
                            job_id: handle.id.clone(),
                            status: status.to_string(),
                        });
                    }
                    Ok(status) => {
                        if let JobStatus::Unknown(raw) = &status {
                            warn!(job_id = %handle.id, status = %raw, "unrecognised job status, still polling");
                        } else {
                            debug!(job_id = %handle.id, %status, queries, "job not finished yet");
                        }
                        handle.status = status;
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(job_id = %handle.id, error = %e, "status query failed, will retry");
                    }
                    Err(e) => return Err(e),
                }
                sleep_or_cancel(self.config.interval, cancel).await?;
            }
        })
        .await;

        match polled {
            Ok(Ok(status)) => {
                handle.status = status;
                Ok(handle)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::PollTimeout {
                job_id: handle.id,
                elapsed: started.elapsed(),
            }),
        }
    }

    async fn query(&self, url: url::Url) -> Result<JobStatus> {
        let response = self
            .client
            .send(ServiceStage::Status, self.client.get(url))
            .await?;
        let body: StatusResponse = response.json().await.map_err(|source| Error::Transport {
            stage: ServiceStage::Status,
            source,
        })?;
        Ok(JobStatus::parse(&body.report_status))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn poller(server: &MockServer, timeout: Duration) -> StatusPoller {
        let config = ServiceConfig::new(
            "test-key",
            format!("{}/reports", server.uri()),
            format!("{}/status", server.uri()),
        );
        let poll = PollConfig {
            interval: Duration::from_millis(10),
            timeout,
        };
        StatusPoller::new(ReportClient::new(config).unwrap(), poll)
    }

    fn status(value: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "job-1",
            "reportStatus": value,
            "createdAtUtc": "2024-05-01T10:00:00Z"
        }))
    }

    #[tokio::test]
    async fn returns_after_third_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/job-1"))
            .and(header("X-API-KEY", "test-key"))
            .respond_with(status("Processing"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status/job-1"))
            .respond_with(status("Fulfilled"))
            .mount(&server)
            .await;

        let handle = poller(&server, Duration::from_secs(5))
            .await_terminal(JobHandle::submitted("job-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.status, JobStatus::Fulfilled);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn never_terminal_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(status("Processing"))
            .mount(&server)
            .await;

        let start = Instant::now();
        let err = poller(&server, Duration::from_millis(150))
            .await_terminal(JobHandle::submitted("job-1"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::PollTimeout { job_id, elapsed } => {
                assert_eq!(job_id, "job-1");
                assert!(elapsed >= Duration::from_millis(150));
            }
            other => panic!("expected poll timeout, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unknown_status_keeps_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(status("Queued"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(status("Archived"))
            .mount(&server)
            .await;

        let handle = poller(&server, Duration::from_secs(5))
            .await_terminal(JobHandle::submitted("job-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.status, JobStatus::Archived);
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(status("Fulfilled"))
            .mount(&server)
            .await;

        let handle = poller(&server, Duration::from_secs(5))
            .await_terminal(JobHandle::submitted("job-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(handle.status.is_success());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_job_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(status("Failed"))
            .expect(1)
            .mount(&server)
            .await;

        let err = poller(&server, Duration::from_secs(5))
            .await_terminal(JobHandle::submitted("job-1"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::JobFailed { ref job_id, .. } if job_id == "job-1"));
    }

    #[tokio::test]
    async fn not_found_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such report"))
            .expect(1)
            .mount(&server)
            .await;

        let err = poller(&server, Duration::from_secs(5))
            .await_terminal(JobHandle::submitted("job-1"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Service {
                stage: ServiceStage::Status,
                status: 404,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(status("Processing"))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = poller(&server, Duration::from_secs(10))
            .await_terminal(JobHandle::submitted("job-1"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
    }
}
