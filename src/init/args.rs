// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tower::BoxError;

use crate::sink::RetryConfig;
use crate::tail::{OpenErrorPolicy, PartialLinePolicy, TailConfig};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// Print lines to standard output
    #[default]
    Stdout,
    /// POST lines to a collector's /logs endpoint
    Http,
}

#[derive(Debug, Args, Clone)]
pub struct AgentArgs {
    /// JSON configuration file. Flags given on the command line take precedence.
    #[arg(long, env = "LOGTAIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Comma-separated glob patterns of files to tail
    #[arg(long, env = "LOGTAIL_PATTERNS", value_delimiter = ',')]
    pub patterns: Vec<String>,

    /// Comma-separated glob patterns of files to leave out
    #[arg(long, env = "LOGTAIL_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// How often each file is polled for new data [default: 2s]
    #[arg(long, env = "LOGTAIL_POLL_INTERVAL", value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// How often offsets are saved [default: 10s]
    #[arg(long, env = "LOGTAIL_CHECKPOINT_INTERVAL", value_parser = humantime::parse_duration)]
    pub checkpoint_interval: Option<Duration>,

    /// Offset store location [default: offset.backup]
    #[arg(long, env = "LOGTAIL_OFFSET_STORE_PATH")]
    pub offset_store_path: Option<PathBuf>,

    /// Maximum number of lines buffered between the tailers and the sink [default: 1000]
    #[arg(long, env = "LOGTAIL_CHANNEL_CAPACITY")]
    pub channel_capacity: Option<usize>,

    /// Unterminated trailing line handling: hold or emit [default: hold]
    #[arg(long, env = "LOGTAIL_PARTIAL_LINES")]
    pub partial_lines: Option<PartialLinePolicy>,

    /// Size in bytes at which a held partial line is emitted anyway [default: 1048576]
    #[arg(long, env = "LOGTAIL_MAX_LINE_SIZE")]
    pub max_line_size: Option<usize>,

    /// What to do when a file cannot be opened at startup: abort or skip [default: abort]
    #[arg(long, env = "LOGTAIL_ON_OPEN_ERROR")]
    pub on_open_error: Option<OpenErrorPolicy>,

    #[command(flatten)]
    pub sink: SinkArgs,

    /// Maximum time to wait for lines to drain on shutdown
    #[arg(long, env = "LOGTAIL_SHUTDOWN_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Args, Clone)]
pub struct SinkArgs {
    /// Where tailed lines are sent
    #[arg(value_enum, long = "sink", env = "LOGTAIL_SINK", default_value = "stdout")]
    pub sink_kind: SinkKind,

    /// Collector base URL for the http sink
    #[arg(long, env = "LOGTAIL_SINK_ENDPOINT", default_value = "http://localhost:8080")]
    pub sink_endpoint: String,

    /// Maximum lines per delivery
    #[arg(long, env = "LOGTAIL_SINK_BATCH_SIZE", default_value = "512")]
    pub sink_batch_size: usize,

    /// Timeout of a single http request
    #[arg(long, env = "LOGTAIL_SINK_REQUEST_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub sink_request_timeout: Duration,

    /// Delay before the first retry of a failed delivery
    #[arg(long, env = "LOGTAIL_SINK_RETRY_INITIAL_BACKOFF", default_value = "1s", value_parser = humantime::parse_duration)]
    pub sink_retry_initial_backoff: Duration,

    /// Upper bound of the retry delay
    #[arg(long, env = "LOGTAIL_SINK_RETRY_MAX_BACKOFF", default_value = "30s", value_parser = humantime::parse_duration)]
    pub sink_retry_max_backoff: Duration,

    /// Time after which a failing batch is dropped
    #[arg(long, env = "LOGTAIL_SINK_RETRY_MAX_ELAPSED", default_value = "300s", value_parser = humantime::parse_duration)]
    pub sink_retry_max_elapsed: Duration,
}

impl SinkArgs {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_backoff: self.sink_retry_initial_backoff,
            max_backoff: self.sink_retry_max_backoff,
            max_elapsed_time: self.sink_retry_max_elapsed,
        }
    }
}

impl AgentArgs {
    /// Build the tailing configuration: defaults, then the config file, then flags.
    pub fn tail_config(&self) -> Result<TailConfig, BoxError> {
        let mut config = match &self.config {
            Some(path) => load_config_file(path)?,
            None => TailConfig::default(),
        };

        if !self.patterns.is_empty() {
            config.patterns = self.patterns.clone();
        }
        if !self.exclude.is_empty() {
            config.exclude = self.exclude.clone();
        }
        if let Some(v) = self.poll_interval {
            config.poll_interval = v;
        }
        if let Some(v) = self.checkpoint_interval {
            config.checkpoint_interval = v;
        }
        if let Some(v) = &self.offset_store_path {
            config.offset_store_path = v.clone();
        }
        if let Some(v) = self.channel_capacity {
            config.channel_capacity = v;
        }
        if let Some(v) = self.partial_lines {
            config.partial_lines = v;
        }
        if let Some(v) = self.max_line_size {
            config.max_line_size = v;
        }
        if let Some(v) = self.on_open_error {
            config.on_open_error = v;
        }

        config.validate()?;
        Ok(config)
    }
}

pub fn load_config_file(path: &Path) -> Result<TailConfig, BoxError> {
    let data = fs::read(path)
        .map_err(|e| format!("unable to read config file {}: {}", path.display(), e))?;
    let config = serde_json::from_slice(&data)
        .map_err(|e| format!("invalid config file {}: {}", path.display(), e))?;
    Ok(config)
}
