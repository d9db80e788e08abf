// SPDX-License-Identifier: Apache-2.0

//! Platform-independent file identity based on inode (Unix) or file index (Windows).
//!
//! Identity, not name or size, decides whether a path still refers to the file a
//! tailer has open: rename-and-recreate and unlink-and-recreate both produce a new
//! identity at the same path.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

use crate::tail::error::{Error, Result};

/// A platform-independent unique identifier for a file.
///
/// On Unix systems, this is the device ID + inode number.
/// On Windows, this is the volume serial number + file index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Device ID (Unix) or volume serial number (Windows)
    dev: u64,
    /// Inode number (Unix) or file index (Windows)
    ino: u64,
}

impl FileIdentity {
    /// Create a FileIdentity from raw device and inode values.
    /// Used for loading persisted state.
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    #[cfg(unix)]
    fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    /// Identity and current size of an open file handle.
    #[cfg(unix)]
    pub fn of_file(file: &File) -> std::io::Result<(Self, u64)> {
        let metadata = file.metadata()?;
        Ok((Self::from_metadata(&metadata), metadata.len()))
    }

    /// Identity and current size of an open file handle.
    #[cfg(windows)]
    pub fn of_file(file: &File) -> std::io::Result<(Self, u64)> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(std::io::Error::last_os_error());
        }

        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);
        let size = ((info.nFileSizeHigh as u64) << 32) | (info.nFileSizeLow as u64);

        Ok((
            Self {
                dev: info.dwVolumeSerialNumber as u64,
                ino: file_index,
            },
            size,
        ))
    }

    /// Identity and current size of whatever currently lives at `path`.
    #[cfg(unix)]
    pub fn of_path(path: &Path) -> std::io::Result<(Self, u64)> {
        let metadata = std::fs::metadata(path)?;
        Ok((Self::from_metadata(&metadata), metadata.len()))
    }

    /// Identity and current size of whatever currently lives at `path`.
    ///
    /// Windows only exposes the file index through a handle, so this opens the file.
    #[cfg(windows)]
    pub fn of_path(path: &Path) -> std::io::Result<(Self, u64)> {
        let file = File::open(path)?;
        Self::of_file(&file)
    }
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Resolves a path or handle to its identity and size.
///
/// The tailing core only ever talks to this trait; platform specifics live in the
/// resolver implementation.
pub trait IdentityResolver: Send + Sync {
    /// Identity and size of the file currently at `path`.
    ///
    /// Fails with `NotFound` when nothing exists at the path, `AccessDenied` on
    /// permission failure and `Io` otherwise.
    fn identify(&self, path: &Path) -> Result<(FileIdentity, u64)>;

    /// Identity and size of an already opened handle for `path`.
    fn identify_file(&self, path: &Path, file: &File) -> Result<(FileIdentity, u64)>;
}

/// Resolver backed by the operating system's file metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsIdentityResolver;

impl IdentityResolver for OsIdentityResolver {
    fn identify(&self, path: &Path) -> Result<(FileIdentity, u64)> {
        FileIdentity::of_path(path).map_err(|e| Error::from_io(path, e))
    }

    fn identify_file(&self, path: &Path, file: &File) -> Result<(FileIdentity, u64)> {
        FileIdentity::of_file(file).map_err(|e| Error::from_io(path, e))
    }
}
