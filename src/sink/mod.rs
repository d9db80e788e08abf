// SPDX-License-Identifier: Apache-2.0

//! Destinations for tailed lines.
//!
//! A [`Sink`] accepts batches of lines and may fail with
//! [`Error::SinkUnavailable`](crate::tail::Error::SinkUnavailable). The
//! [`SinkForwarder`] is the single consumer of the tailers' output channel and owns
//! the retry and drop policy.

mod forwarder;
mod http;
mod retry;
mod stdout;

pub use forwarder::{Backlog, ForwarderStats, SinkForwarder};
pub use http::HttpSink;
pub use retry::{Backoff, RetryConfig};
pub use stdout::StdoutSink;

use std::future::Future;

use crate::tail::{LogLine, Result};

pub trait Sink {
    /// Deliver `lines` in order. On error none of them are considered delivered.
    fn send(&mut self, lines: &[LogLine]) -> impl Future<Output = Result<()>> + Send;
}

/// The sinks selectable from configuration.
pub enum AnySink {
    Stdout(StdoutSink),
    Http(HttpSink),
}

impl Sink for AnySink {
    async fn send(&mut self, lines: &[LogLine]) -> Result<()> {
        match self {
            AnySink::Stdout(s) => s.send(lines).await,
            AnySink::Http(s) => s.send(lines).await,
        }
    }
}

impl AnySink {
    pub fn name(&self) -> &'static str {
        match self {
            AnySink::Stdout(_) => "stdout",
            AnySink::Http(_) => "http",
        }
    }
}

/// Newline-delimited body for a batch, every line terminated exactly once.
pub(crate) fn encode_lines(lines: &[LogLine]) -> String {
    let mut body = String::with_capacity(lines.iter().map(|l| l.text.len() + 1).sum());
    for line in lines {
        body.push_str(line.trimmed());
        body.push('\n');
    }
    body
}
