// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use portable_atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info};

use crate::bounded_channel::BoundedReceiver;
use crate::sink::{Backoff, RetryConfig, Sink};
use crate::tail::LogLine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub sent: u64,
    pub dropped: u64,
}

/// Lines handed to the forwarder that the sink has not accepted yet: the batch
/// being sent plus whatever is still queued in the channel.
#[derive(Clone)]
pub struct Backlog {
    queued: BoundedReceiver<LogLine>,
    in_flight: Arc<AtomicU64>,
}

impl Backlog {
    pub fn len(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire) + self.queued.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drains the tailers' output channel into a sink.
///
/// Waits for one line, then takes whatever else is already queued up to
/// `batch_size`. A failed batch is retried with backoff; while retrying nothing is
/// read from the channel, so the tailers block once it fills up. A batch that still
/// fails when the retry budget runs out is dropped and logged.
pub struct SinkForwarder<S> {
    rx: BoundedReceiver<LogLine>,
    sink: S,
    batch_size: usize,
    retry: RetryConfig,
    in_flight: Arc<AtomicU64>,
}

impl<S: Sink> SinkForwarder<S> {
    pub fn new(rx: BoundedReceiver<LogLine>, sink: S, batch_size: usize, retry: RetryConfig) -> Self {
        Self {
            rx,
            sink,
            batch_size: batch_size.max(1),
            retry,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle for counting undelivered lines, still readable after the forwarder
    /// has been aborted.
    pub fn backlog(&self) -> Backlog {
        Backlog {
            queued: self.rx.clone(),
            in_flight: self.in_flight.clone(),
        }
    }

    /// Run until the channel is closed and drained.
    pub async fn run(mut self) -> ForwarderStats {
        let mut stats = ForwarderStats::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        while let Some(first) = self.rx.next().await {
            batch.push(first);
            while batch.len() < self.batch_size {
                match self.rx.try_recv() {
                    Some(line) => batch.push(line),
                    None => break,
                }
            }

            self.in_flight.store(batch.len() as u64, Ordering::Release);
            if self.deliver(&batch).await {
                stats.sent += batch.len() as u64;
            } else {
                stats.dropped += batch.len() as u64;
            }
            self.in_flight.store(0, Ordering::Release);
            batch.clear();
        }

        debug!(sent = stats.sent, dropped = stats.dropped, "Output channel closed");
        stats
    }

    async fn deliver(&mut self, batch: &[LogLine]) -> bool {
        let mut backoff = Backoff::new(self.retry.clone());

        loop {
            let err = match self.sink.send(batch).await {
                Ok(()) => {
                    if backoff.attempts() > 0 {
                        info!(
                            lines = batch.len(),
                            attempts = backoff.attempts() + 1,
                            "Delivered lines after retrying"
                        );
                    }
                    return true;
                }
                Err(e) => e,
            };

            match backoff.next_delay() {
                Some(delay) => {
                    info!(
                        attempt = backoff.attempts(),
                        delay = ?delay,
                        error = %err,
                        "Sending lines failed, will retry again after delay."
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(
                        lines = batch.len(),
                        attempts = backoff.attempts(),
                        error = %err,
                        "Dropping lines, sink still unavailable after retrying"
                    );
                    return false;
                }
            }
        }
    }
}
