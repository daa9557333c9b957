//! Application state for the API server

use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request. All clones share one run lock, so at most one pipeline run
/// is in progress per server.
#[derive(Clone)]
pub struct AppState {
    /// The pipeline uploads are run through
    pub pipeline: Arc<Pipeline>,

    /// Cancelled on shutdown; each run gets a child token
    pub shutdown: CancellationToken,

    run_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(pipeline: Arc<Pipeline>, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            shutdown,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Claim the pipeline for one run, or fail with [`Error::Busy`]
    pub fn try_begin_run(&self) -> Result<OwnedMutexGuard<()>> {
        self.run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Busy)
    }
}
