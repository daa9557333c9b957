use super::ReportClient;
use crate::config::RetryConfig;
use crate::error::{Error, Result, ServiceStage};
use crate::retry::{until_cancelled, with_retry};
use crate::types::{JobHandle, Product, ReportRequest};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

/// Posts report requests, retrying rate-limited submissions
#[derive(Clone, Debug)]
pub struct JobSubmitter {
    client: ReportClient,
    retry: RetryConfig,
}

impl JobSubmitter {
    /// Create a submitter with its retry policy
    pub fn new(client: ReportClient, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Build the request for one group from the configured report settings
    pub fn request_for(&self, products: Vec<Product>) -> ReportRequest {
        let config = self.client.config();
        ReportRequest {
            products,
            sources: config.sources.clone(),
            match_by_ai: config.match_by_ai,
            note: config.note.clone(),
            callback_url: config.callback_url.clone(),
        }
    }

    /// Submit one report request and return the new job
    ///
    /// HTTP 429 is retried with the configured backoff; every other failure is returned
    /// as is.
    pub async fn submit(
        &self,
        request: &ReportRequest,
        cancel: &CancellationToken,
    ) -> Result<JobHandle> {
        let client = &self.client;
        let url = client.config().base_url.as_str();
        debug!(products = request.products.len(), %url, "submitting report request");

        let response: SubmitResponse = with_retry(&self.retry, cancel, move || async move {
            until_cancelled(cancel, async {
                let response = client
                    .send(ServiceStage::Submit, client.post(url).json(request))
                    .await?;
                response
                    .json::<SubmitResponse>()
                    .await
                    .map_err(|source| Error::Transport {
                        stage: ServiceStage::Submit,
                        source,
                    })
            })
            .await
        })
        .await?;

        info!(job_id = %response.id, "report submitted");
        Ok(JobHandle::submitted(response.id))
    }
}
