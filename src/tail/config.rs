// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tailing core.

use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What to do with a trailing fragment that has no line terminator yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialLinePolicy {
    /// Leave the fragment uncommitted and re-read it, with its continuation, on
    /// the next poll. Fragments of at least `max_line_size` bytes are emitted anyway.
    #[default]
    Hold,
    /// Emit the fragment immediately and commit its bytes. A writer that appends
    /// mid-line between polls produces a split line.
    Emit,
}

impl FromStr for PartialLinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hold" => Ok(PartialLinePolicy::Hold),
            "emit" => Ok(PartialLinePolicy::Emit),
            _ => Err(format!(
                "Invalid partial line policy '{}'. Valid options: hold, emit",
                s
            )),
        }
    }
}

/// What to do when a discovered file cannot be opened at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenErrorPolicy {
    /// Fail the whole agent.
    #[default]
    Abort,
    /// Log and continue with the remaining files.
    Skip,
}

impl FromStr for OpenErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(OpenErrorPolicy::Abort),
            "skip" => Ok(OpenErrorPolicy::Skip),
            _ => Err(format!(
                "Invalid open error policy '{}'. Valid options: abort, skip",
                s
            )),
        }
    }
}

/// Static configuration for discovery, tailing and checkpointing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TailConfig {
    /// Glob patterns for files to tail
    pub patterns: Vec<String>,
    /// Glob patterns removed from the discovered set
    pub exclude: Vec<String>,
    /// How often each tailer polls its file
    #[serde(with = "humantime_serde", alias = "poll_interval")]
    pub poll_interval: Duration,
    /// How often all tailer positions are saved
    #[serde(with = "humantime_serde", alias = "checkpoint_interval")]
    pub checkpoint_interval: Duration,
    /// Location of the persisted offsets
    #[serde(alias = "offset_store_path")]
    pub offset_store_path: PathBuf,
    /// Capacity of the merged output channel
    #[serde(alias = "channel_capacity")]
    pub channel_capacity: usize,
    /// Handling of unterminated trailing fragments
    #[serde(alias = "partial_lines")]
    pub partial_lines: PartialLinePolicy,
    /// Size at which a held fragment is emitted regardless of policy
    #[serde(alias = "max_line_size")]
    pub max_line_size: usize,
    /// Handling of files that cannot be opened at startup
    #[serde(alias = "on_open_error")]
    pub on_open_error: OpenErrorPolicy,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            exclude: Vec::new(),
            poll_interval: Duration::from_secs(2),
            checkpoint_interval: Duration::from_secs(10),
            offset_store_path: PathBuf::from("offset.backup"),
            channel_capacity: 1000,
            partial_lines: PartialLinePolicy::Hold,
            max_line_size: 1024 * 1024,
            on_open_error: OpenErrorPolicy::Abort,
        }
    }
}

impl TailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.patterns.is_empty() {
            return Err("At least one file pattern must be specified".to_string());
        }

        if self.poll_interval.is_zero() {
            return Err("poll interval must be positive".to_string());
        }

        if self.checkpoint_interval.is_zero() {
            return Err("checkpoint interval must be positive".to_string());
        }

        if self.channel_capacity == 0 {
            return Err("channel capacity must be positive".to_string());
        }

        if self.max_line_size == 0 {
            return Err("max line size must be positive".to_string());
        }

        Ok(())
    }
}
