//! Test configuration helpers

use super::service::MockReportService;
use feedmatch::{Config, GroupFailurePolicy, ServiceConfig};
use std::time::Duration;
use tempfile::TempDir;

/// Config pointing at `service` with millisecond timings
pub fn mock_config(
    service: &MockReportService,
    dir: &TempDir,
    chunk_size: usize,
    policy: GroupFailurePolicy,
) -> Config {
    let service = ServiceConfig::new("test-key", service.base_url(), service.status_url());
    let mut config = Config::new(service, chunk_size);
    config.retry.initial_delay = Duration::from_millis(10);
    config.poll.interval = Duration::from_millis(10);
    config.poll.timeout = Duration::from_secs(5);
    config.pipeline.group_delay = Duration::from_millis(20);
    config.pipeline.on_group_failure = policy;
    config.pipeline.output_path = dir.path().join("matched-products.json");
    config
}

/// Load a config for the real report service from `.env` / the environment
///
/// Returns `None` when the required keys are missing.
pub fn load_live_config(dir: &TempDir) -> Option<Config> {
    dotenvy::dotenv().ok();

    let mut config = Config::from_env().ok()?;
    config.pipeline.output_path = dir.path().join("matched-products.json");
    Some(config)
}
