//! Pipeline orchestration
//!
//! A run splits the products into groups and drives each group through
//! submit → poll → fetch → aggregate before the next one starts. Groups never overlap, and
//! consecutive submissions are separated by the configured pacing delay.

use crate::aggregate::{JsonReportSink, RecordSink, StreamAggregator};
use crate::chunker::chunk;
use crate::config::{Config, GroupFailurePolicy};
use crate::error::{Error, Result};
use crate::retry::sleep_or_cancel;
use crate::service::{ArtifactFetcher, ArtifactStream, JobSubmitter, ReportClient, StatusPoller};
use crate::types::{GroupFailure, GroupState, JobHandle, Product, RunReport};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs product groups through the report service into one output document
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: Config,
    submitter: JobSubmitter,
    poller: StatusPoller,
    fetcher: ArtifactFetcher,
    aggregator: StreamAggregator,
}

impl Pipeline {
    /// Validate `config` and build the service components
    ///
    /// Fails with [`Error::Config`] before any network activity if the configuration is
    /// unusable.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let client = ReportClient::new(config.service.clone())?;
        Ok(Self {
            submitter: JobSubmitter::new(client.clone(), config.retry.clone()),
            poller: StatusPoller::new(client.clone(), config.poll.clone()),
            fetcher: ArtifactFetcher::new(client, config.retry.clone()),
            aggregator: StreamAggregator::new(config.pipeline.entry_extension.clone()),
            config,
        })
    }

    /// Configuration this pipeline was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every group into `sink` and seal it
    ///
    /// The sink is checkpointed before each group and rolled back if the group fails, so
    /// the output only ever holds whole groups. What happens next depends on
    /// [`GroupFailurePolicy`]; cancellation always ends the run. When the run ends in an
    /// error the sink is dropped unsealed.
    pub async fn run<S>(
        &self,
        products: Vec<Product>,
        mut sink: S,
        cancel: &CancellationToken,
    ) -> Result<RunReport>
    where
        S: RecordSink + Send + 'static,
    {
        let started_at = Utc::now();
        let total_products = products.len();
        let groups = chunk(products, self.config.feed.chunk_size)?;
        let groups_total = groups.len();
        info!(
            products = total_products,
            groups = groups_total,
            chunk_size = self.config.feed.chunk_size,
            "pipeline run started"
        );

        let mut groups_completed = 0;
        let mut failed_groups = Vec::new();

        for (index, products) in groups.into_iter().enumerate() {
            if index > 0 {
                debug!(
                    group = index,
                    delay_ms = self.config.pipeline.group_delay.as_millis(),
                    "pacing before next group"
                );
                sleep_or_cancel(self.config.pipeline.group_delay, cancel).await?;
            }

            debug!(group = index, products = products.len(), state = %GroupState::Chunked, "group ready");
            sink.checkpoint()?;

            let (job_id, outcome) = match self.submit_group(index, products, cancel).await {
                Ok(handle) => {
                    let id = handle.id.clone();
                    let outcome = match self.open_artifact(index, handle, cancel).await {
                        Ok(artifact) => {
                            debug!(group = index, job_id = %id, state = %GroupState::Aggregating, "group state");
                            let (returned, outcome) =
                                self.aggregator.aggregate(&id, artifact, sink, cancel).await?;
                            sink = returned;
                            outcome
                        }
                        Err(e) => Err(e),
                    };
                    (Some(id), outcome)
                }
                Err(e) => (None, Err(e)),
            };

            match outcome {
                Ok(records) => {
                    groups_completed += 1;
                    info!(
                        group = index,
                        job_id = job_id.as_deref().unwrap_or("-"),
                        records,
                        state = %GroupState::Done,
                        "group aggregated"
                    );
                }
                Err(e) => {
                    sink.rollback()?;
                    error!(
                        group = index,
                        job_id = job_id.as_deref().unwrap_or("-"),
                        error = %e,
                        state = %GroupState::Failed,
                        "group failed"
                    );

                    if matches!(e, Error::Cancelled) {
                        return Err(e);
                    }
                    match self.config.pipeline.on_group_failure {
                        GroupFailurePolicy::Abort => {
                            return Err(Error::GroupFailed {
                                group: index,
                                job_id,
                                source: Box::new(e),
                            });
                        }
                        GroupFailurePolicy::Skip => failed_groups.push(GroupFailure {
                            index,
                            job_id,
                            error: e.to_string(),
                        }),
                    }
                }
            }
        }

        let records = sink.seal()?;
        let finished_at = Utc::now();
        info!(
            groups = groups_total,
            completed = groups_completed,
            skipped = failed_groups.len(),
            records,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "pipeline run finished"
        );

        Ok(RunReport {
            groups_total,
            groups_completed,
            failed_groups,
            records,
            output_path: None,
            started_at,
            finished_at,
        })
    }

    /// Run into a [`JsonReportSink`] at the configured output path
    pub async fn run_to_file(
        &self,
        products: Vec<Product>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let path = self.config.pipeline.output_path.clone();
        let sink = JsonReportSink::create(&path)?;

        let mut report = self.run(products, sink, cancel).await?;
        report.output_path = Some(path);
        Ok(report)
    }

    /// Submit one group as a report job
    async fn submit_group(
        &self,
        index: usize,
        products: Vec<Product>,
        cancel: &CancellationToken,
    ) -> Result<JobHandle> {
        debug!(group = index, state = %GroupState::Submitting, "group state");
        let request = self.submitter.request_for(products);
        self.submitter.submit(&request, cancel).await
    }

    /// Wait for a submitted job to finish and start downloading its artifact
    async fn open_artifact(
        &self,
        index: usize,
        handle: JobHandle,
        cancel: &CancellationToken,
    ) -> Result<ArtifactStream> {
        debug!(group = index, job_id = %handle.id, state = %GroupState::Polling, "group state");
        let handle = self.poller.await_terminal(handle, cancel).await?;

        debug!(group = index, job_id = %handle.id, state = %GroupState::Fetching, "group state");
        self.fetcher.fetch(&handle.id, cancel).await
    }
}
