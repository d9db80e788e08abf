// SPDX-License-Identifier: Apache-2.0

//! End-to-end tailing tests: discovery, tailing, checkpointing and restart, plus
//! a full agent run against a local collector.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use logtail::bounded_channel::BoundedReceiver;
use logtail::collector::CollectorServer;
use logtail::init::agent::Agent;
use logtail::init::args::AgentArgs;
use logtail::listener::Listener;
use logtail::tail::{GlobFileFinder, LogLine, OffsetStore, TailConfig, TailerSupervisor};
use portable_atomic::Ordering;
use tempfile::TempDir;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn append(path: &Path, data: &str) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(data.as_bytes()).unwrap();
}

fn config(dir: &TempDir) -> TailConfig {
    TailConfig {
        patterns: vec![format!("{}/*.log", dir.path().display())],
        poll_interval: Duration::from_millis(20),
        checkpoint_interval: Duration::from_millis(50),
        offset_store_path: dir.path().join("state/offsets.json"),
        ..Default::default()
    }
}

async fn recv_lines(rx: &mut BoundedReceiver<LogLine>, n: usize) -> Vec<String> {
    let mut lines = Vec::new();
    while lines.len() < n {
        let line = timeout(TEST_TIMEOUT, rx.next())
            .await
            .expect("timed out waiting for lines")
            .expect("channel closed early");
        lines.push(line.text);
    }
    lines
}

/// A running agent without a sink: lines are read straight off the channel.
struct Run {
    cancel: CancellationToken,
    rx: BoundedReceiver<LogLine>,
    task: tokio::task::JoinHandle<logtail::tail::Result<()>>,
}

impl Run {
    fn start(config: &TailConfig) -> Self {
        let finder = GlobFileFinder::new(config.patterns.clone(), config.exclude.clone()).unwrap();
        let paths = finder.find_files().unwrap();

        let store = OffsetStore::new(&config.offset_store_path);
        let saved = store.load().unwrap();

        let supervisor = TailerSupervisor::new(config, &paths, &saved, store).unwrap();
        let cancel = CancellationToken::new();
        let (handle, rx) = supervisor.start(cancel.clone());

        Self {
            cancel,
            rx,
            task: tokio::spawn(handle.run()),
        }
    }

    /// Stop and return any lines still queued.
    async fn stop(mut self) -> Vec<String> {
        self.cancel.cancel();
        timeout(TEST_TIMEOUT, self.task)
            .await
            .expect("shutdown timed out")
            .unwrap()
            .unwrap();

        let mut rest = Vec::new();
        while let Some(line) = self.rx.next().await {
            rest.push(line.text);
        }
        rest
    }
}

fn saved_offset(config: &TailConfig, path: &PathBuf) -> u64 {
    OffsetStore::new(&config.offset_store_path).load().unwrap()[path].offset
}

#[tokio::test]
async fn test_scenario_append_three_lines() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let a = dir.path().join("a.log");
    append(&a, "");

    let mut run = Run::start(&config);
    append(&a, "x\ny\nz\n");

    assert_eq!(recv_lines(&mut run.rx, 3).await, vec!["x\n", "y\n", "z\n"]);
    assert!(run.stop().await.is_empty());
    assert_eq!(saved_offset(&config, &a), 6);
}

#[tokio::test]
async fn test_restart_resumes_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let a = dir.path().join("a.log");
    let b = dir.path().join("b.log");
    append(&a, "a1\na2\n");
    append(&b, "b1\n");

    let mut run = Run::start(&config);
    let mut first = recv_lines(&mut run.rx, 3).await;
    first.extend(run.stop().await);
    first.sort();
    assert_eq!(first, vec!["a1\n", "a2\n", "b1\n"]);

    append(&a, "a3\n");

    let mut run = Run::start(&config);
    assert_eq!(recv_lines(&mut run.rx, 1).await, vec!["a3\n"]);
    assert!(run.stop().await.is_empty());

    assert_eq!(saved_offset(&config, &a), 9);
    assert_eq!(saved_offset(&config, &b), 3);
}

#[tokio::test]
async fn test_file_replaced_between_runs_reads_new_file_from_start() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let a = dir.path().join("a.log");
    append(&a, "x\ny\nz\n");

    let mut run = Run::start(&config);
    recv_lines(&mut run.rx, 3).await;
    run.stop().await;
    assert_eq!(saved_offset(&config, &a), 6);

    fs::remove_file(&a).unwrap();
    append(&a, "w\n");

    let mut run = Run::start(&config);
    assert_eq!(recv_lines(&mut run.rx, 1).await, vec!["w\n"]);
    run.stop().await;
    assert_eq!(saved_offset(&config, &a), 2);
}

#[tokio::test]
async fn test_truncated_between_runs_reads_from_start() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let a = dir.path().join("a.log");
    append(&a, "x\ny\nz\n");

    let mut run = Run::start(&config);
    recv_lines(&mut run.rx, 3).await;
    run.stop().await;

    fs::write(&a, "ab\n").unwrap();

    let mut run = Run::start(&config);
    assert_eq!(recv_lines(&mut run.rx, 1).await, vec!["ab\n"]);
    run.stop().await;
    assert_eq!(saved_offset(&config, &a), 3);
}

#[tokio::test]
async fn test_rotation_while_running() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let a = dir.path().join("app.log");
    append(&a, "before 1\n");

    let mut run = Run::start(&config);
    assert_eq!(recv_lines(&mut run.rx, 1).await, vec!["before 1\n"]);

    // Writer appends once more, then the file is rotated away and recreated
    append(&a, "before 2\n");
    fs::rename(&a, dir.path().join("app.log.1")).unwrap();
    append(&a, "after 1\n");

    assert_eq!(
        recv_lines(&mut run.rx, 2).await,
        vec!["before 2\n", "after 1\n"]
    );
    run.stop().await;
    assert_eq!(saved_offset(&config, &a), 8);
}

#[tokio::test]
async fn test_truncation_while_running() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let a = dir.path().join("a.log");
    append(&a, "first line\n");

    let mut run = Run::start(&config);
    recv_lines(&mut run.rx, 1).await;

    OpenOptions::new().write(true).open(&a).unwrap().set_len(0).unwrap();
    append(&a, "new\n");

    assert_eq!(recv_lines(&mut run.rx, 1).await, vec!["new\n"]);
    run.stop().await;
    assert_eq!(saved_offset(&config, &a), 4);
}

#[derive(Debug, Parser)]
struct TestArgs {
    #[command(flatten)]
    agent: AgentArgs,
}

#[tokio::test]
async fn test_agent_delivers_to_collector() {
    let listener = Listener::listen_async("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let collector_addr = listener.bound_address().unwrap();
    let collector = CollectorServer::new();
    let received = collector.received_counter();
    let collector_cancel = CancellationToken::new();
    let collector_task = {
        let cancel = collector_cancel.clone();
        tokio::spawn(async move { collector.serve(listener, cancel).await })
    };

    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.log");
    append(&a, "x\ny\n");

    let pattern = format!("{}/*.log", dir.path().display());
    let store_path = dir.path().join("offsets.json");
    let endpoint = format!("http://{}", collector_addr);
    let args = TestArgs::try_parse_from([
        "logtail",
        "--patterns",
        pattern.as_str(),
        "--poll-interval",
        "20ms",
        "--checkpoint-interval",
        "50ms",
        "--offset-store-path",
        store_path.to_str().unwrap(),
        "--sink",
        "http",
        "--sink-endpoint",
        endpoint.as_str(),
    ])
    .unwrap()
    .agent;

    let agent_cancel = CancellationToken::new();
    let agent_task = tokio::spawn(Agent::new(args).run(agent_cancel.clone()));

    append(&a, "z\n");

    let deadline = Instant::now() + TEST_TIMEOUT;
    while received.load(Ordering::Relaxed) < 3 {
        assert!(Instant::now() < deadline, "collector never received all lines");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    agent_cancel.cancel();
    timeout(TEST_TIMEOUT, agent_task)
        .await
        .expect("agent shutdown timed out")
        .unwrap()
        .unwrap();

    assert_eq!(received.load(Ordering::Relaxed), 3);
    assert_eq!(
        OffsetStore::new(&store_path).load().unwrap()[&a].offset,
        6
    );

    collector_cancel.cancel();
    timeout(TEST_TIMEOUT, collector_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_agent_reports_lines_dropped_at_shutdown_timeout() {
    use httpmock::prelude::*;

    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/logs");
            then.status(503);
        })
        .await;

    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.log");
    append(&a, "x\ny\nz\n");

    let pattern = format!("{}/*.log", dir.path().display());
    let store_path = dir.path().join("offsets.json");
    let endpoint = server.base_url();
    let args = TestArgs::try_parse_from([
        "logtail",
        "--patterns",
        pattern.as_str(),
        "--poll-interval",
        "20ms",
        "--offset-store-path",
        store_path.to_str().unwrap(),
        "--sink",
        "http",
        "--sink-endpoint",
        endpoint.as_str(),
        "--sink-retry-initial-backoff",
        "50ms",
        "--sink-retry-max-elapsed",
        "10m",
        "--shutdown-timeout",
        "200ms",
    ])
    .unwrap()
    .agent;

    let agent_cancel = CancellationToken::new();
    let agent_task = tokio::spawn(Agent::new(args).run(agent_cancel.clone()));

    let deadline = Instant::now() + TEST_TIMEOUT;
    while mock.hits_async().await == 0 {
        assert!(Instant::now() < deadline, "sink was never called");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    agent_cancel.cancel();
    let err = timeout(TEST_TIMEOUT, agent_task)
        .await
        .expect("agent shutdown timed out")
        .unwrap()
        .unwrap_err();

    assert!(
        err.to_string().contains("3 undelivered line(s) dropped"),
        "unexpected error: {}",
        err
    );
}
