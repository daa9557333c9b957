use super::{ReportClient, job_url};
use crate::config::RetryConfig;
use crate::error::{Error, Result, ServiceStage};
use crate::retry::{until_cancelled, with_retry};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Streamed artifact body; chunks arrive as the network delivers them
pub type ArtifactStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Downloads finished job artifacts as byte streams
#[derive(Clone, Debug)]
pub struct ArtifactFetcher {
    client: ReportClient,
    retry: RetryConfig,
}

impl ArtifactFetcher {
    /// Create a fetcher with its retry policy
    pub fn new(client: ReportClient, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Start downloading the artifact of `job_id`
    ///
    /// HTTP 429, 500 and 503 are retried with the configured backoff; any other failure
    /// status is returned immediately. The returned stream is not buffered: the caller
    /// pulls chunks from the open response.
    ///
    /// The response headers must arrive within `request_timeout`. After that the body has
    /// no total deadline, only an idle limit of the same length that runs while the caller
    /// is waiting for the next chunk.
    pub async fn fetch(&self, job_id: &str, cancel: &CancellationToken) -> Result<ArtifactStream> {
        let client = &self.client;
        let limit = client.config().request_timeout;
        let url = job_url(&client.config().base_url, job_id)?;
        debug!(%job_id, %url, "fetching artifact");

        let url = &url;
        let response = with_retry(&self.retry, cancel, move || async move {
            let request = client.send(ServiceStage::Fetch, client.streamed_get(url.clone()));
            until_cancelled(cancel, async {
                match tokio::time::timeout(limit, request).await {
                    Ok(response) => response,
                    Err(_) => Err(Error::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("artifact download got no response within {limit:?}"),
                    ))),
                }
            })
            .await
        })
        .await?;

        info!(
            %job_id,
            content_length = ?response.content_length(),
            "artifact download started"
        );
        Ok(idle_limited(response.bytes_stream(), limit))
    }
}

/// End `body` with a `TimedOut` error once a chunk takes longer than `limit` to arrive
fn idle_limited<S>(body: S, limit: Duration) -> ArtifactStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let body = Box::pin(body);
    Box::pin(futures::stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(limit, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(e))) => Some((Err(io::Error::other(e)), None)),
            Ok(None) => None,
            Err(_) => {
                warn!(idle = ?limit, "artifact stream stalled");
                let stalled = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no artifact data for {limit:?}"),
                );
                Some((Err(stalled), None))
            }
        }
    }))
}
