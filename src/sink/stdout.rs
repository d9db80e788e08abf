// SPDX-License-Identifier: Apache-2.0

use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};

use crate::sink::{Sink, encode_lines};
use crate::tail::{Error, LogLine, Result};

/// Writes each line to standard output.
pub struct StdoutSink<W = Stdout> {
    writer: W,
}

impl StdoutSink<Stdout> {
    pub fn new() -> Self {
        Self {
            writer: tokio::io::stdout(),
        }
    }
}

impl Default for StdoutSink<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> Sink for StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, lines: &[LogLine]) -> Result<()> {
        let body = encode_lines(lines);
        self.writer
            .write_all(body.as_bytes())
            .await
            .map_err(|e| Error::SinkUnavailable(format!("failed writing to stdout: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::SinkUnavailable(format!("failed flushing stdout: {}", e)))
    }
}
