//! Report service client
//!
//! Three components share one [`ReportClient`]:
//! - [`JobSubmitter`] posts a group as a report request
//! - [`StatusPoller`] waits for a job to reach a terminal status
//! - [`ArtifactFetcher`] streams the finished job's compressed artifact

mod fetch;
mod poll;
mod submit;

pub use fetch::{ArtifactFetcher, ArtifactStream};
pub use poll::StatusPoller;
pub use submit::JobSubmitter;

use crate::config::ServiceConfig;
use crate::error::{Error, Result, ServiceStage};
use std::sync::Arc;

/// Header carrying the report service credential
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// HTTP client bound to one report service
#[derive(Clone, Debug)]
pub struct ReportClient {
    http: reqwest::Client,
    config: Arc<ServiceConfig>,
}

impl ReportClient {
    /// Build the client; fails only if the TLS backend cannot initialise
    ///
    /// The client itself only bounds connecting. Submit and status calls carry a
    /// per-request deadline. Artifact downloads have no total deadline; [`ArtifactFetcher`]
    /// bounds them by idle time.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .user_agent(concat!("feedmatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    /// Service settings this client was built with
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .post(url)
            .timeout(self.config.request_timeout)
            .header(API_KEY_HEADER, &self.config.api_key)
    }

    fn get(&self, url: url::Url) -> reqwest::RequestBuilder {
        self.streamed_get(url).timeout(self.config.request_timeout)
    }

    /// GET without a total deadline; the body may be read for as long as it keeps flowing
    fn streamed_get(&self, url: url::Url) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header(API_KEY_HEADER, &self.config.api_key)
    }

    /// Send a request, mapping transport failures and non-2xx answers to [`Error`]
    async fn send(
        &self,
        stage: ServiceStage,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|source| Error::Transport { stage, source })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Service {
            stage,
            status: status.as_u16(),
            body,
        })
    }
}

/// Append `job_id` as one escaped path segment of `base`
pub(crate) fn job_url(base: &str, job_id: &str) -> Result<url::Url> {
    let mut url = url::Url::parse(base)
        .map_err(|e| Error::Other(format!("invalid service URL '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| Error::Other(format!("service URL '{base}' cannot take a path")))?
        .pop_if_empty()
        .push(job_id);
    Ok(url)
}
