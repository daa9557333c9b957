//! # feedmatch
//!
//! Runs a product feed through an asynchronous report-matching service and merges every
//! job's results into one JSON document.
//!
//! ## How a run works
//!
//! - The feed is split into groups of `chunk_size` products, keeping feed order
//! - Each group is submitted as a report job, polled until it finishes, and its ZIP artifact
//!   is streamed straight into the output document
//! - Groups run one after another with a pacing delay between submissions
//! - The output is sealed exactly once, after the last group
//!
//! A run either ends with a complete, valid document or with an error and no document.
//!
//! ## Quick Start
//!
//! ```no_run
//! use feedmatch::{Config, Pipeline, parse_feed};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let products = parse_feed(&std::fs::read("feed.xml")?, config.feed.price_difference)?;
//!
//!     let pipeline = Pipeline::new(config)?;
//!     let report = pipeline
//!         .run_to_file(products, &CancellationToken::new())
//!         .await?;
//!
//!     println!("{} records written to {:?}", report.records, report.output_path);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Streaming artifact aggregation into record sinks
pub mod aggregate;
/// Upload REST API
pub mod api;
/// Order-preserving product grouping
pub mod chunker;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Product feed parsing
pub mod feed;
/// Group-by-group pipeline orchestration
pub mod pipeline;
/// Bounded retry and cancellable waits
pub mod retry;
/// Report service client: submit, poll, fetch
pub mod service;
/// Core domain types
pub mod types;

pub use aggregate::{JsonReportSink, RecordSink, StreamAggregator};
pub use chunker::chunk;
pub use config::{Config, GroupFailurePolicy, PollConfig, RetryConfig, ServiceConfig};
pub use error::{Error, Result};
pub use feed::parse_feed;
pub use pipeline::Pipeline;
pub use service::{ArtifactFetcher, ArtifactStream, JobSubmitter, ReportClient, StatusPoller};
pub use types::{GroupFailure, GroupState, JobHandle, JobStatus, Product, RunReport};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives SIGTERM or SIGINT (Ctrl+C)
///
/// Cancellation reaches a running pipeline at its next wait point; the run then ends with
/// [`Error::Cancelled`] and its unsealed output is removed.
pub async fn shutdown_on_signal(token: CancellationToken) {
    wait_for_signal().await;
    tracing::info!("shutdown requested, cancelling pipeline");
    token.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
