// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{error, info};

use logtail::collector::CollectorServer;
use logtail::init::logging::{LogFormatArg, get_version, setup_logging};
use logtail::init::parse::parse_endpoint;
use logtail::listener::Listener;

#[derive(Debug, Parser)]
#[command(name = "logtail-collector")]
#[command(bin_name = "logtail-collector")]
#[command(version, about = "Receive log lines posted by logtail agents", long_about = None)]
struct Arguments {
    #[arg(value_enum, long, env = "LOGTAIL_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    /// Address to listen on
    #[arg(long, env = "LOGTAIL_COLLECTOR_ENDPOINT", default_value = "localhost:8080", value_parser = parse_endpoint)]
    endpoint: SocketAddr,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    // Bind before starting the runtime so a busy port fails fast
    let listener = match Listener::listen_std(opt.endpoint) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::from(1);
        }
    };

    let app_name = format!("logtail-collector-{}", get_version());
    let _guard = match setup_logging(opt.log_format, &app_name) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run_collector(listener) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "Collector failed.");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run_collector(listener: Listener) -> Result<(), BoxError> {
    let server = CollectorServer::new();
    let cancel = CancellationToken::new();

    let serve_cancel = cancel.clone();
    let mut serve = tokio::spawn(async move {
        let res = server.serve(listener, serve_cancel).await;
        (server.received_lines(), res)
    });

    let (received, res) = select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
            cancel.cancel();
            (&mut serve).await?
        },
        r = &mut serve => r?,
    };

    info!(lines = received, "Collector stopped.");
    res
}
