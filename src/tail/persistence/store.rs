// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::tail::error::{Error, Result};
use crate::tail::persistence::schema::{OFFSET_STORE_VERSION, OffsetMap, OffsetStoreFile};

/// JSON file holding the offsets of every tailed file.
///
/// Only the checkpoint task writes to it; nothing is cached between saves.
#[derive(Debug, Clone)]
pub struct OffsetStore {
    path: PathBuf,
}

impl OffsetStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved offsets.
    ///
    /// A missing (or zero-length) file yields an empty mapping. An existing file
    /// that cannot be read or decoded is an error: silently starting over would
    /// re-deliver every file from the beginning.
    pub fn load(&self) -> Result<OffsetMap> {
        debug!(path = ?self.path, "Checking for existing offsets");

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = ?self.path, "No existing offsets found, starting fresh");
                return Ok(OffsetMap::new());
            }
            Err(e) => return Err(Error::from_io(&self.path, e)),
        };

        if bytes.is_empty() {
            warn!(path = ?self.path, "Offset store is empty, starting fresh");
            return Ok(OffsetMap::new());
        }

        let doc: OffsetStoreFile = serde_json::from_slice(&bytes).map_err(|e| Error::Decode {
            path: self.path.clone(),
            message: format!(
                "{}. To start fresh, delete the offset store and restart",
                e
            ),
        })?;

        if doc.version != OFFSET_STORE_VERSION {
            warn!(
                path = ?self.path,
                version = doc.version,
                expected = OFFSET_STORE_VERSION,
                "Offset store has an unknown schema version, loading known fields"
            );
        }

        let map = doc.into_map();
        info!(path = ?self.path, files = map.len(), "Loaded saved offsets");
        for (path, entry) in &map {
            debug!(path = ?path, offset = entry.offset, identity = %entry.identity(), "Saved offset");
        }

        Ok(map)
    }

    /// Replace the stored offsets with `map`.
    pub fn save(&self, map: &OffsetMap) -> Result<()> {
        let temp_path = self.write_temp(map)?;
        self.commit(&temp_path)
    }

    /// Serialize `map` to a fresh temporary file next to the store and return its path.
    fn write_temp(&self, map: &OffsetMap) -> Result<PathBuf> {
        use portable_atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| Error::from_io(parent, e))?;
            }
        }

        let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut temp_name = self.path.clone().into_os_string();
        temp_name.push(format!(".tmp.{}.{}", std::process::id(), unique_id));
        let temp_path = PathBuf::from(temp_name);

        let result = (|| -> std::io::Result<()> {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &OffsetStoreFile::from_map(map))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(temp_path),
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(Error::from_io(&temp_path, e))
            }
        }
    }

    /// Atomically move a fully written temporary file over the store.
    fn commit(&self, temp_path: &Path) -> Result<()> {
        if let Err(e) = fs::rename(temp_path, &self.path) {
            let _ = fs::remove_file(temp_path);
            return Err(Error::from_io(&self.path, e));
        }

        #[cfg(unix)]
        if let Some(parent) = self.path.parent() {
            let dir = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
                debug!(path = ?dir, error = %e, "Failed to sync offset store directory");
            }
        }

        Ok(())
    }
}
