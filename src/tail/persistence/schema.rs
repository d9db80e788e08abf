// SPDX-License-Identifier: Apache-2.0

//! On-disk schema for the offset store.
//!
//! ```json
//! {
//!   "version": 1,
//!   "files": {
//!     "/var/log/app.log": { "path": "/var/log/app.log", "dev": 2049, "ino": 1311, "offset": 9 }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::tail::identity::FileIdentity;
use crate::tail::tailer::Position;

/// Current schema version written by `save`
pub const OFFSET_STORE_VERSION: u32 = 1;

/// In-memory mapping from tailed path to its last recorded position.
pub type OffsetMap = HashMap<PathBuf, PersistedOffset>;

/// Recorded position for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedOffset {
    /// Path the file was tailed at
    pub path: String,
    /// Device ID (Unix) or volume serial (Windows)
    pub dev: u64,
    /// Inode number (Unix) or file index (Windows)
    pub ino: u64,
    /// Bytes consumed from the file with this identity
    pub offset: u64,
}

impl PersistedOffset {
    pub fn new(path: &Path, position: Position) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            dev: position.identity.dev(),
            ino: position.identity.ino(),
            offset: position.offset,
        }
    }

    pub fn identity(&self) -> FileIdentity {
        FileIdentity::new(self.dev, self.ino)
    }

    pub fn position(&self) -> Position {
        Position {
            identity: self.identity(),
            offset: self.offset,
        }
    }
}

/// The serialized document. Unknown fields are ignored so newer agents can add
/// fields without breaking older readers.
#[derive(Debug, Serialize, Deserialize)]
pub struct OffsetStoreFile {
    pub version: u32,
    #[serde(default)]
    pub files: HashMap<String, PersistedOffset>,
}

impl OffsetStoreFile {
    pub fn from_map(map: &OffsetMap) -> Self {
        let files = map
            .iter()
            .map(|(path, entry)| (path.to_string_lossy().into_owned(), entry.clone()))
            .collect();

        Self {
            version: OFFSET_STORE_VERSION,
            files,
        }
    }

    pub fn into_map(self) -> OffsetMap {
        self.files
            .into_iter()
            .map(|(key, entry)| (PathBuf::from(key), entry))
            .collect()
    }
}
