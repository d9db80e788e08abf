// SPDX-License-Identifier: Apache-2.0

//! HTTP collector that receives newline-delimited log lines.
//!
//! * `GET /ping` replies `200 pong`
//! * `POST /logs` logs every line of the body and replies `204`

use crate::listener::Listener;

use bytes::Bytes;
use http::Method;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use portable_atomic::{AtomicU64, Ordering};

use std::error::Error as StdError;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info, warn};

/// Serves the collector endpoints until cancelled.
#[derive(Default)]
pub struct CollectorServer {
    received: Arc<AtomicU64>,
}

impl CollectorServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total lines received since the server was created.
    pub fn received_lines(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Shared counter of received lines, readable while `serve` runs.
    pub fn received_counter(&self) -> Arc<AtomicU64> {
        self.received.clone()
    }

    pub async fn serve(
        &self,
        listener: Listener,
        cancellation: CancellationToken,
    ) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let svc = CollectorService {
            received: self.received.clone(),
        };

        // To bridge Tower->Hyper we must wrap the tower service
        let svc = TowerToHyperService::new(svc);

        let timer = hyper_util::rt::TokioTimer::new();
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();

        let mut builder = Builder::new(TokioExecutor::new());
        builder.http1().timer(timer.clone());
        builder.http2().timer(timer);

        let listener = listener.into_async()?;
        info!(address = ?listener.local_addr()?, "Collector listening");

        loop {
            let (stream, peer) = tokio::select! {
                r = listener.accept() => {
                    match r {
                        Ok(accepted) => accepted,
                        Err(e) => return Err(e.into()),
                    }
                },
                _ = cancellation.cancelled() => break
            };
            debug!(peer = ?peer, "Accepted connection");

            let io = TokioIo::new(stream);

            let conn = builder.serve_connection(io, svc.clone());
            let fut = graceful.watch(conn.into_owned());

            tokio::spawn(async move {
                let _ = fut.await.map_err(|e| {
                    error!("error serving collector connection: {:?}", e);
                });
            });
        }

        // gracefully shutdown existing connections
        graceful.shutdown().await;

        Ok(())
    }
}

#[derive(Clone)]
struct CollectorService {
    received: Arc<AtomicU64>,
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp
}

impl<H> Service<Request<H>> for CollectorService
where
    H: Body + Send + 'static,
    <H as Body>::Data: Send,
    <H as Body>::Error: Display + Send,
{
    type Response = Response<Full<Bytes>>;
    type Error = hyper::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<H>) -> Self::Future {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/ping") => Box::pin(async { Ok(respond(StatusCode::OK, "pong")) }),
            (&Method::POST, "/logs") => {
                let received = self.received.clone();
                Box::pin(async move {
                    let body = match req.into_body().collect().await {
                        Ok(collected) => collected.to_bytes(),
                        Err(e) => {
                            warn!(error = %e, "Failed reading request body");
                            return Ok(respond(StatusCode::BAD_REQUEST, e.to_string()));
                        }
                    };

                    let text = String::from_utf8_lossy(&body);
                    let mut count = 0;
                    for line in text.lines() {
                        info!("[log] {}", line);
                        count += 1;
                    }
                    received.fetch_add(count, Ordering::Relaxed);

                    Ok(respond(StatusCode::NO_CONTENT, Bytes::new()))
                })
            }
            _ => Box::pin(async { Ok(respond(StatusCode::NOT_FOUND, "Not Found")) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper_util::client::legacy::Client;
    use hyper_util::client::legacy::connect::HttpConnector;
    use hyper_util::rt::TokioTimer;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::time::timeout;

    fn client() -> Client<HttpConnector, Full<Bytes>> {
        Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(2))
            .pool_max_idle_per_host(2)
            .timer(TokioTimer::new())
            .build::<_, Full<Bytes>>(HttpConnector::new())
    }

    #[tokio::test]
    async fn test_collector_endpoints() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = Listener::listen_async(addr).await.unwrap();
        let bound_addr = listener.bound_address().unwrap();

        let server = CollectorServer::new();
        let received = server.received_counter();
        let cancellation = CancellationToken::new();
        let cancel_handle = cancellation.clone();

        let server_handle = tokio::spawn(async move { server.serve(listener, cancellation).await });

        let client = client();

        let uri = format!("http://{}/ping", bound_addr);
        let response = timeout(Duration::from_secs(5), client.get(uri.parse().unwrap()))
            .await
            .expect("Request timed out")
            .expect("Request failed");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pong");

        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}/logs", bound_addr))
            .body(Full::new(Bytes::from_static(b"first\nsecond\n")))
            .unwrap();
        let response = timeout(Duration::from_secs(5), client.request(req))
            .await
            .expect("Request timed out")
            .expect("Request failed");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(received.load(Ordering::Relaxed), 2);

        let uri = format!("http://{}/logs", bound_addr);
        let response = timeout(Duration::from_secs(5), client.get(uri.parse().unwrap()))
            .await
            .expect("Request timed out")
            .expect("Request failed");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        cancel_handle.cancel();
        timeout(Duration::from_secs(5), server_handle)
            .await
            .expect("Server shutdown timed out")
            .expect("Server task failed")
            .expect("Server returned error");
    }
}
