//! Configuration types for feedmatch
//!
//! Every component receives its settings from an explicit [`Config`] value at construction.
//! Only [`Config::from_env`] touches the process environment.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Report service connection and request settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// API key sent as `X-API-KEY` on every call
    pub api_key: String,

    /// Submission and artifact endpoint (`POST <base_url>`, `GET <base_url>/<id>`)
    pub base_url: String,

    /// Status endpoint (`GET <report_status_url>/<id>`)
    pub report_status_url: String,

    /// Sources requested for every report
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// Ask the service to match products with AI
    #[serde(default = "default_true")]
    pub match_by_ai: bool,

    /// Free-form note attached to every report request
    #[serde(default)]
    pub note: Option<String>,

    /// Callback URL the service notifies on status changes
    #[serde(default)]
    pub callback_url: Option<String>,

    /// Connect timeout, deadline for submit and status calls, and idle limit while an
    /// artifact is streaming (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl ServiceConfig {
    /// Build a service config with default request settings
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        report_status_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            report_status_url: report_status_url.into(),
            sources: default_sources(),
            match_by_ai: true,
            note: None,
            callback_url: None,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Feed handling settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Markup threshold injected into every parsed product (default: 300)
    #[serde(default = "default_price_difference")]
    pub price_difference: f64,

    /// Maximum number of products per report request
    pub chunk_size: usize,
}

/// Retry configuration for submission and artifact downloads
///
/// The defaults give a fixed 10 second backoff: the multiplier is 1.0 and jitter is off.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 10 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Status polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between status queries and after transient errors (default: 10 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Wall-clock bound for one job (default: 30 minutes)
    #[serde(default = "default_poll_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            timeout: default_poll_timeout(),
        }
    }
}

/// What the orchestrator does when a group fails fatally
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupFailurePolicy {
    /// Stop the run; no output document is published (default)
    #[default]
    Abort,
    /// Roll back the group's records, record the gap and continue
    Skip,
}

impl std::str::FromStr for GroupFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(GroupFailurePolicy::Abort),
            "skip" => Ok(GroupFailurePolicy::Skip),
            other => Err(Error::config(
                "ON_GROUP_FAILURE",
                format!("expected 'abort' or 'skip', got '{other}'"),
            )),
        }
    }
}

/// Orchestration and output settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pause between groups (default: 2 seconds)
    #[serde(default = "default_group_delay", with = "duration_serde")]
    pub group_delay: Duration,

    /// Group failure policy (default: abort)
    #[serde(default)]
    pub on_group_failure: GroupFailurePolicy,

    /// Where the aggregated document is published (default: "matched-products.json")
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Artifact entries with this suffix hold matched records (default: ".json")
    #[serde(default = "default_entry_extension")]
    pub entry_extension: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            group_delay: default_group_delay(),
            on_group_failure: GroupFailurePolicy::default(),
            output_path: default_output_path(),
            entry_extension: default_entry_extension(),
        }
    }
}

/// Upload API server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:5000)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Serve Swagger UI at /api/docs (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,

    /// Add CORS headers to responses (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed origins; empty or "*" allows any (default: empty)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            swagger_ui: true,
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Report service settings
    pub service: ServiceConfig,

    /// Feed handling settings
    pub feed: FeedConfig,

    /// Retry policy for submission and artifact download
    #[serde(default)]
    pub retry: RetryConfig,

    /// Status polling policy
    #[serde(default)]
    pub poll: PollConfig,

    /// Orchestration and output settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Upload API settings
    #[serde(default)]
    pub server: ApiConfig,
}

impl Config {
    /// Build a config with defaults for everything except the required settings
    pub fn new(service: ServiceConfig, chunk_size: usize) -> Self {
        Self {
            service,
            feed: FeedConfig {
                price_difference: default_price_difference(),
                chunk_size,
            },
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            pipeline: PipelineConfig::default(),
            server: ApiConfig::default(),
        }
    }

    /// Load configuration from process environment variables
    ///
    /// Required: `API_KEY`, `BASE_URL`, `REPORT_STATUS_URL`, `CHUNK_SIZE`.
    /// Optional: `PRICE_DIFFERENCE`, `OUTPUT_PATH`, `BIND_ADDRESS`, `RETRY_MAX_ATTEMPTS`,
    /// `RETRY_BACKOFF_SECS`, `POLL_INTERVAL_SECS`, `POLL_TIMEOUT_SECS`, `GROUP_DELAY_SECS`,
    /// `ON_GROUP_FAILURE`, `ARTIFACT_ENTRY_EXTENSION`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::config(key, format!("{key} is not set")))
        };

        let service = ServiceConfig::new(
            required("API_KEY")?,
            required("BASE_URL")?,
            required("REPORT_STATUS_URL")?,
        );
        let chunk_size = parse_value(&lookup, "CHUNK_SIZE")?
            .ok_or_else(|| Error::config("CHUNK_SIZE", "CHUNK_SIZE is not set"))?;

        let mut config = Config::new(service, chunk_size);

        if let Some(diff) = parse_value(&lookup, "PRICE_DIFFERENCE")? {
            config.feed.price_difference = diff;
        }
        if let Some(path) = lookup("OUTPUT_PATH") {
            config.pipeline.output_path = PathBuf::from(path);
        }
        if let Some(addr) = parse_value(&lookup, "BIND_ADDRESS")? {
            config.server.bind_address = addr;
        }
        if let Some(attempts) = parse_value(&lookup, "RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(secs) = parse_value(&lookup, "RETRY_BACKOFF_SECS")? {
            config.retry.initial_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_value(&lookup, "POLL_INTERVAL_SECS")? {
            config.poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_value(&lookup, "POLL_TIMEOUT_SECS")? {
            config.poll.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_value(&lookup, "GROUP_DELAY_SECS")? {
            config.pipeline.group_delay = Duration::from_secs(secs);
        }
        if let Some(policy) = parse_value(&lookup, "ON_GROUP_FAILURE")? {
            config.pipeline.on_group_failure = policy;
        }
        if let Some(ext) = lookup("ARTIFACT_ENTRY_EXTENSION") {
            config.pipeline.entry_extension = ext;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration before any network call is made
    pub fn validate(&self) -> Result<()> {
        if self.service.api_key.trim().is_empty() {
            return Err(Error::config("API_KEY", "API key must not be empty"));
        }
        for (key, value) in [
            ("BASE_URL", &self.service.base_url),
            ("REPORT_STATUS_URL", &self.service.report_status_url),
        ] {
            let url = url::Url::parse(value)
                .map_err(|e| Error::config(key, format!("invalid URL '{value}': {e}")))?;
            if url.cannot_be_a_base() {
                return Err(Error::config(key, format!("URL '{value}' cannot take a path")));
            }
        }
        if self.feed.chunk_size == 0 {
            return Err(Error::config("CHUNK_SIZE", "chunk size must be positive"));
        }
        if !self.feed.price_difference.is_finite() {
            return Err(Error::config(
                "PRICE_DIFFERENCE",
                "price difference must be a finite number",
            ));
        }
        if self.poll.timeout.is_zero() {
            return Err(Error::config("POLL_TIMEOUT_SECS", "poll timeout must be positive"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff multiplier must be at least 1.0".to_string(),
                key: None,
            });
        }
        Ok(())
    }
}

fn parse_value<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::config(key, format!("invalid value '{raw}': {e}"))),
        None => Ok(None),
    }
}

// Default value functions
fn default_sources() -> Vec<String> {
    vec!["google-search".to_string(), "google-shopping".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_price_difference() -> f64 {
    300.0
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_group_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_output_path() -> PathBuf {
    PathBuf::from("matched-products.json")
}

fn default_entry_extension() -> String {
    ".json".to_string()
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
