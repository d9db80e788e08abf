// SPDX-License-Identifier: Apache-2.0

use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::init::args::{AgentArgs, SinkKind};
use crate::init::wait;
use crate::sink::{AnySink, HttpSink, SinkForwarder, StdoutSink};
use crate::tail::{GlobFileFinder, OffsetStore, TailerSupervisor};

pub struct Agent {
    args: AgentArgs,
}

impl Agent {
    pub fn new(args: AgentArgs) -> Self {
        Self { args }
    }

    /// Tail until `agent_cancel` fires or every tailer has stopped, then drain the
    /// remaining lines into the sink.
    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let args = self.args;
        let config = args.tail_config()?;

        info!(
            patterns = ?config.patterns,
            exclude = ?config.exclude,
            poll_interval = ?config.poll_interval,
            checkpoint_interval = ?config.checkpoint_interval,
            offset_store = ?config.offset_store_path,
            "Starting logtail agent."
        );

        let finder = GlobFileFinder::new(config.patterns.clone(), config.exclude.clone())?;
        let paths = finder.find_files()?;
        if paths.is_empty() {
            warn!(patterns = ?config.patterns, "No files match the configured patterns");
        }

        let store = OffsetStore::new(&config.offset_store_path);
        let saved = store.load()?;

        let supervisor = TailerSupervisor::new(&config, &paths, &saved, store)?;

        let sink = build_sink(&args)?;
        info!(sink = sink.name(), files = supervisor.len(), "Agent initialized");

        let supervisor_cancel = CancellationToken::new();
        let (handle, output_rx) = supervisor.start(supervisor_cancel.clone());
        let forwarder = SinkForwarder::new(
            output_rx,
            sink,
            args.sink.sink_batch_size,
            args.sink.retry_config(),
        );
        let backlog = forwarder.backlog();

        let mut task_set: JoinSet<wait::TaskResult> = JoinSet::new();
        task_set.spawn(async move { handle.run().await.map_err(|e| e.into()) });
        task_set.spawn(async move {
            let stats = forwarder.run().await;
            info!(sent = stats.sent, dropped = stats.dropped, "Forwarder finished");
            Ok(())
        });

        let result = select! {
            _ = agent_cancel.cancelled() => {
                debug!("Agent cancelled, stopping tailers");
                Ok(())
            },
            e = wait::wait_for_any_task(&mut task_set) => {
                if e.is_ok() {
                    debug!("Tailing finished, draining remaining lines");
                }
                e
            },
        };

        supervisor_cancel.cancel();

        let drained = wait::wait_for_tasks_with_timeout(&mut task_set, args.shutdown_timeout).await;

        // Whatever is still running is aborted along with the lines it holds
        task_set.shutdown().await;

        let undelivered = backlog.len();
        if undelivered > 0 {
            error!(
                lines = undelivered,
                shutdown_timeout = ?args.shutdown_timeout,
                "Dropping lines the sink did not accept before the shutdown timeout"
            );
            return Err(format!(
                "shutdown timed out with {} undelivered line(s) dropped",
                undelivered
            )
            .into());
        }

        result.and(drained)
    }
}

fn build_sink(args: &AgentArgs) -> Result<AnySink, BoxError> {
    Ok(match args.sink.sink_kind {
        SinkKind::Stdout => AnySink::Stdout(StdoutSink::new()),
        SinkKind::Http => AnySink::Http(HttpSink::new(
            &args.sink.sink_endpoint,
            args.sink.sink_request_timeout,
        )?),
    })
}
