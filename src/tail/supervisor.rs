// SPDX-License-Identifier: Apache-2.0

//! Tailer supervisor.
//!
//! Owns one [`FileTailer`] per discovered path and drives each on its own polling
//! timer. Polls run on the blocking pool and push lines into one bounded channel.
//! A separate timer snapshots every tailer's published position into the offset
//! store. On shutdown the tailer tasks stop, a final checkpoint is written, and the
//! output channel closes once the last sender is gone.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, SendTimeoutError, bounded};
use crate::tail::config::{OpenErrorPolicy, TailConfig};
use crate::tail::error::Result;
use crate::tail::line::LogLine;
use crate::tail::persistence::{OffsetMap, OffsetStore, PersistedOffset};
use crate::tail::tailer::{FileTailer, TailerOptions, TailerPosition};

/// How long a blocked send waits before re-checking for shutdown.
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Read-only view over every tailer's position, used for checkpointing.
#[derive(Debug, Clone, Default)]
pub struct Snapshotter {
    positions: Vec<(PathBuf, TailerPosition)>,
}

impl Snapshotter {
    /// A fresh mapping holding the current position of each tailer.
    pub fn snapshot(&self) -> OffsetMap {
        self.positions
            .iter()
            .map(|(path, position)| {
                (
                    path.clone(),
                    PersistedOffset::new(path, position.snapshot()),
                )
            })
            .collect()
    }
}

pub struct TailerSupervisor {
    tailers: Vec<FileTailer>,
    store: OffsetStore,
    poll_interval: Duration,
    checkpoint_interval: Duration,
    channel_capacity: usize,
}

impl TailerSupervisor {
    /// Open a tailer for every path, seeded from `saved`.
    ///
    /// Open failures follow `config.on_open_error`: `Abort` returns the first error,
    /// `Skip` logs it and leaves the file out.
    pub fn new(
        config: &TailConfig,
        paths: &[PathBuf],
        saved: &OffsetMap,
        store: OffsetStore,
    ) -> Result<Self> {
        let options = TailerOptions::from(config);
        let mut tailers = Vec::with_capacity(paths.len());

        for path in paths {
            let prior = saved.get(path).map(PersistedOffset::position);

            match FileTailer::open(path, prior, options) {
                Ok(tailer) => {
                    info!(
                        path = ?path,
                        offset = tailer.offset(),
                        identity = %tailer.identity(),
                        "Tailing file"
                    );
                    tailers.push(tailer);
                }
                Err(e) => match config.on_open_error {
                    OpenErrorPolicy::Abort => {
                        error!(path = ?path, error = %e, "Unable to open file");
                        return Err(e);
                    }
                    OpenErrorPolicy::Skip => {
                        warn!(path = ?path, error = %e, "Unable to open file, skipping");
                    }
                },
            }
        }

        Ok(Self {
            tailers,
            store,
            poll_interval: config.poll_interval,
            checkpoint_interval: config.checkpoint_interval,
            channel_capacity: config.channel_capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.tailers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tailers.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.tailers.iter().map(|t| t.path())
    }

    pub fn snapshotter(&self) -> Snapshotter {
        Snapshotter {
            positions: self
                .tailers
                .iter()
                .map(|t| (t.path().to_path_buf(), t.position_handle()))
                .collect(),
        }
    }

    /// Create the output channel. Lines flow once the returned handle is run.
    pub fn start(self, cancel: CancellationToken) -> (SupervisorHandle, BoundedReceiver<LogLine>) {
        let (output, output_rx) = bounded(self.channel_capacity);
        let snapshotter = self.snapshotter();

        let handle = SupervisorHandle {
            tailers: self.tailers,
            snapshotter,
            store: self.store,
            output,
            poll_interval: self.poll_interval,
            checkpoint_interval: self.checkpoint_interval,
            cancel,
        };

        (handle, output_rx)
    }
}

pub struct SupervisorHandle {
    tailers: Vec<FileTailer>,
    snapshotter: Snapshotter,
    store: OffsetStore,
    output: BoundedSender<LogLine>,
    poll_interval: Duration,
    checkpoint_interval: Duration,
    cancel: CancellationToken,
}

impl SupervisorHandle {
    /// Run until cancelled or until every tailer has stopped, then write the final
    /// checkpoint. The output channel is closed when this returns.
    pub async fn run(self) -> Result<()> {
        let SupervisorHandle {
            tailers,
            snapshotter,
            store,
            output,
            poll_interval,
            checkpoint_interval,
            cancel,
        } = self;

        if tailers.is_empty() {
            warn!("No files to tail");
        }

        let mut tailer_tasks = JoinSet::new();
        for tailer in tailers {
            tailer_tasks.spawn(run_tailer(
                tailer,
                output.clone(),
                poll_interval,
                cancel.clone(),
            ));
        }
        // Only the tailer tasks hold senders from here on.
        drop(output);

        let checkpoint_cancel = CancellationToken::new();
        let checkpoint_task = tokio::spawn(run_checkpoints(
            snapshotter.clone(),
            store.clone(),
            checkpoint_interval,
            checkpoint_cancel.clone(),
        ));

        while let Some(res) = tailer_tasks.join_next().await {
            if let Err(e) = res {
                error!(error = ?e, "Tailer task failed");
            }
        }

        if cancel.is_cancelled() {
            debug!("All tailers stopped after shutdown request");
        } else {
            info!("All tailers have stopped");
        }

        checkpoint_cancel.cancel();
        if let Err(e) = checkpoint_task.await {
            error!(error = ?e, "Checkpoint task failed");
        }

        let offsets = snapshotter.snapshot();
        match store.save(&offsets) {
            Ok(()) => {
                info!(path = ?store.path(), files = offsets.len(), "Saved final offsets");
                Ok(())
            }
            Err(e) => {
                error!(path = ?store.path(), error = %e, "Failed to save final offsets");
                Err(e)
            }
        }
    }
}

async fn run_tailer(
    mut tailer: FileTailer,
    output: BoundedSender<LogLine>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let path: Arc<Path> = Arc::from(tailer.path());
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut failing_since: Option<Instant> = None;

    loop {
        select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let poll_output = output.clone();
        let poll_path = path.clone();
        let poll_cancel = cancel.clone();

        let res = tokio::task::spawn_blocking(move || {
            let res = tailer.poll(|text| {
                emit_line(&poll_output, LogLine::new(poll_path.clone(), text), &poll_cancel)
            });
            (tailer, res)
        })
        .await;

        let res = match res {
            Ok((returned, res)) => {
                tailer = returned;
                res
            }
            Err(e) => {
                error!(path = ?path, error = ?e, "Tailer poll panicked, no longer tailing file");
                return;
            }
        };

        match res {
            Ok(stats) => {
                if let Some(since) = failing_since.take() {
                    info!(path = ?path, failed_for = ?since.elapsed(), "File readable again");
                }

                if stats.lines > 0 {
                    debug!(
                        path = ?path,
                        lines = stats.lines,
                        bytes = stats.bytes,
                        offset = tailer.offset(),
                        "Read lines"
                    );
                }

                if stats.interrupted && !cancel.is_cancelled() {
                    warn!(path = ?path, "Output channel closed, stopping tailer");
                    return;
                }
            }
            Err(e) => {
                if failing_since.is_none() {
                    warn!(path = ?path, error = %e, "Failed to poll file, will retry");
                    failing_since = Some(Instant::now());
                } else {
                    debug!(path = ?path, error = %e, "Failed to poll file, will retry");
                }
            }
        }
    }

    debug!(path = ?path, offset = tailer.offset(), "Tailer stopped");
}

/// Blocking send that gives up on shutdown or when the consumer is gone. Returns
/// whether the line was delivered to the channel.
fn emit_line(output: &BoundedSender<LogLine>, line: LogLine, cancel: &CancellationToken) -> bool {
    let mut line = line;
    loop {
        match output.send_timeout(line, SEND_RETRY_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(unsent)) => {
                if cancel.is_cancelled() {
                    return false;
                }
                line = unsent;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

async fn run_checkpoints(
    snapshotter: Snapshotter,
    store: OffsetStore,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let offsets = snapshotter.snapshot();
                match store.save(&offsets) {
                    Ok(()) => debug!(files = offsets.len(), "Checkpoint saved"),
                    Err(e) => warn!(path = ?store.path(), error = %e, "Checkpoint failed, will retry"),
                }
            }
        }
    }
}
