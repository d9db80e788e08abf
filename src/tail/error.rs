// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("access denied: {0}")]
    AccessDenied(PathBuf),

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode offset store {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("output channel closed")]
    ChannelClosed,
}

impl Error {
    /// Classify an IO error raised while inspecting or reading `path`.
    pub fn from_io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path),
            io::ErrorKind::PermissionDenied => Error::AccessDenied(path),
            _ => Error::Io { path, source },
        }
    }

    /// Classify an IO error raised while opening `path`.
    pub fn open(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path),
            io::ErrorKind::PermissionDenied => Error::AccessDenied(path),
            _ => Error::Open { path, source },
        }
    }

    /// True when the file has disappeared; the tailer waits for it to come back.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
