// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use std::process::ExitCode;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{error, info, warn};

use logtail::init::agent::Agent;
use logtail::init::args::AgentArgs;
use logtail::init::logging::{LogFormatArg, get_version, setup_logging};
use logtail::init::wait;

#[derive(Debug, Parser)]
#[command(name = "logtail")]
#[command(bin_name = "logtail")]
#[command(version, about = "Tail log files across rotation and forward their lines", long_about = None)]
struct Arguments {
    #[arg(value_enum, long, env = "LOGTAIL_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    #[command(flatten)]
    agent: AgentArgs,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
    let _guard = match setup_logging(opt.log_format, &app_name) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run_agent(opt.agent) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "Failed to run agent.");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run_agent(agent_args: AgentArgs) -> Result<(), BoxError> {
    let shutdown_timeout = agent_args.shutdown_timeout;
    let mut agent_join_set = JoinSet::new();

    let cancel_token = CancellationToken::new();
    {
        let token = cancel_token.clone();
        agent_join_set.spawn(async move { Agent::new(agent_args).run(token).await });
    }

    select! {
        _ = signal_wait() => {
            info!("Shutdown signal received.");
            cancel_token.cancel();
        },
        e = wait::wait_for_any_task(&mut agent_join_set) => {
            return match e {
                Ok(()) => {
                    warn!("Agent exited, no files left to tail.");
                    Ok(())
                }
                Err(e) => Err(e),
            };
        },
    }

    // The agent bounds its own drain by the shutdown timeout; allow a little more
    // for the final checkpoint.
    wait::wait_for_tasks_with_timeout(
        &mut agent_join_set,
        shutdown_timeout + std::time::Duration::from_secs(5),
    )
    .await
}

#[cfg(unix)]
async fn signal_wait() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sig_term, mut sig_int) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Unable to install signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

#[cfg(not(unix))]
async fn signal_wait() {
    let _ = tokio::signal::ctrl_c().await;
}
