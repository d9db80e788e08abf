// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tracing::debug;

use crate::sink::{Sink, encode_lines};
use crate::tail::{Error, LogLine, Result};

/// Posts batches of lines to a collector's `/logs` endpoint as a newline-delimited
/// `text/plain` body.
pub struct HttpSink {
    client: HyperClient<HttpConnector, Full<Bytes>>,
    uri: Uri,
    request_timeout: Duration,
}

impl HttpSink {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let uri = logs_uri(endpoint)?;

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .timer(TokioTimer::new())
            .build::<_, Full<Bytes>>(HttpConnector::new());

        Ok(Self {
            client,
            uri,
            request_timeout,
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

fn logs_uri(endpoint: &str) -> Result<Uri> {
    let endpoint = endpoint.trim_end_matches('/');
    let uri: Uri = format!("{}/logs", endpoint)
        .parse()
        .map_err(|e| Error::Config(format!("invalid sink endpoint '{}': {}", endpoint, e)))?;

    match uri.scheme_str() {
        Some("http") => Ok(uri),
        Some(scheme) => Err(Error::Config(format!(
            "unsupported sink endpoint scheme '{}', only http is supported",
            scheme
        ))),
        None => Err(Error::Config(format!(
            "sink endpoint '{}' must include the http:// scheme",
            endpoint
        ))),
    }
}

impl Sink for HttpSink {
    async fn send(&mut self, lines: &[LogLine]) -> Result<()> {
        let body = encode_lines(lines);

        let req = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| Error::SinkUnavailable(format!("failed to build request: {}", e)))?;

        let resp = match tokio::time::timeout(self.request_timeout, self.client.request(req)).await
        {
            Err(_) => {
                return Err(Error::SinkUnavailable(format!(
                    "request to {} timed out after {:?}",
                    self.uri, self.request_timeout
                )));
            }
            Ok(Err(e)) => {
                return Err(Error::SinkUnavailable(format!(
                    "request to {} failed: {}",
                    self.uri, e
                )));
            }
            Ok(Ok(resp)) => resp,
        };

        let (head, body) = resp.into_parts();

        // Read the body so the connection can be reused
        if let Err(e) = body.collect().await {
            debug!(error = %e, "Failed reading sink response body");
        }

        if !head.status.is_success() {
            return Err(Error::SinkUnavailable(format!(
                "{} responded with {}",
                self.uri, head.status
            )));
        }

        Ok(())
    }
}
