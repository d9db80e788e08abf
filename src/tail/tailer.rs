// SPDX-License-Identifier: Apache-2.0

//! Single-file tailer.
//!
//! A `FileTailer` owns one open handle and the byte offset consumed from it. Each
//! poll re-resolves the identity of the path: a different identity means the file
//! was rotated (the old handle is drained and replaced), a size below the offset
//! with the same identity means it was truncated in place. Either way the offset
//! restarts at zero and never points past the end of the file.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::tail::config::{PartialLinePolicy, TailConfig};
use crate::tail::error::{Error, Result};
use crate::tail::identity::{FileIdentity, IdentityResolver, OsIdentityResolver};

/// Identity of the open handle plus the bytes consumed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub identity: FileIdentity,
    pub offset: u64,
}

/// Point-in-time view of a tailer's position, readable while the tailer polls.
///
/// The tailer is the only writer; identity and offset are always updated together.
#[derive(Debug, Clone)]
pub struct TailerPosition {
    inner: Arc<Mutex<Position>>,
}

impl TailerPosition {
    fn new(position: Position) -> Self {
        Self {
            inner: Arc::new(Mutex::new(position)),
        }
    }

    pub fn snapshot(&self) -> Position {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, position: Position) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = position;
    }
}

/// Read behaviour shared by all tailers.
#[derive(Debug, Clone, Copy)]
pub struct TailerOptions {
    pub partial_lines: PartialLinePolicy,
    pub max_line_size: usize,
}

impl Default for TailerOptions {
    fn default() -> Self {
        Self {
            partial_lines: PartialLinePolicy::Hold,
            max_line_size: 1024 * 1024,
        }
    }
}

impl From<&TailConfig> for TailerOptions {
    fn from(config: &TailConfig) -> Self {
        Self {
            partial_lines: config.partial_lines,
            max_line_size: config.max_line_size,
        }
    }
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Lines emitted, including any drained from a rotated handle
    pub lines: u64,
    /// Bytes committed to the offset
    pub bytes: u64,
    /// The identity at the path changed and the handle was replaced
    pub rotated: bool,
    /// The file shrank below the offset without an identity change
    pub truncated: bool,
    /// The poll stopped early because `emit` asked it to
    pub interrupted: bool,
}

/// Outcome of reading forward from the current offset.
enum ReadOutcome {
    Drained,
    Interrupted,
}

pub struct FileTailer<R: IdentityResolver = OsIdentityResolver> {
    path: PathBuf,
    resolver: R,
    reader: BufReader<File>,
    identity: FileIdentity,
    offset: u64,
    options: TailerOptions,
    position: TailerPosition,
    buf: Vec<u8>,
}

impl FileTailer<OsIdentityResolver> {
    /// Open `path` using the operating system resolver.
    pub fn open(
        path: impl AsRef<Path>,
        prior: Option<Position>,
        options: TailerOptions,
    ) -> Result<Self> {
        Self::open_with_resolver(path, prior, options, OsIdentityResolver)
    }
}

impl<R: IdentityResolver> FileTailer<R> {
    /// Open `path` and pick the starting offset.
    ///
    /// The prior offset is adopted only when the prior identity matches the file
    /// now at the path and the offset does not lie past its end. Otherwise the
    /// file is read from the beginning.
    pub fn open_with_resolver(
        path: impl AsRef<Path>,
        prior: Option<Position>,
        options: TailerOptions,
        resolver: R,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| Error::open(&path, e))?;
        let (identity, size) = resolver.identify_file(&path, &file)?;

        let offset = match prior {
            Some(prior) if prior.identity == identity && prior.offset <= size => {
                debug!(path = ?path, offset = prior.offset, identity = %identity, "Resuming from saved offset");
                prior.offset
            }
            Some(prior) if prior.identity == identity => {
                warn!(
                    path = ?path,
                    saved_offset = prior.offset,
                    size,
                    "Saved offset lies past the end of the file, reading from the beginning"
                );
                0
            }
            Some(prior) => {
                info!(
                    path = ?path,
                    saved_identity = %prior.identity,
                    identity = %identity,
                    "File was replaced since the last checkpoint, reading from the beginning"
                );
                0
            }
            None => 0,
        };

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Error::from_io(&path, e))?;
        }

        let position = TailerPosition::new(Position { identity, offset });

        Ok(Self {
            path,
            resolver,
            reader: BufReader::new(file),
            identity,
            offset,
            options,
            position,
            buf: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> FileIdentity {
        self.identity
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn position(&self) -> Position {
        Position {
            identity: self.identity,
            offset: self.offset,
        }
    }

    /// Shared view of this tailer's position for checkpointing.
    pub fn position_handle(&self) -> TailerPosition {
        self.position.clone()
    }

    /// Read everything newly appended and hand each line to `emit`.
    ///
    /// Lines keep their terminator. `emit` returns `false` to stop reading; lines
    /// already emitted stay committed. Errors apply to this poll only and leave
    /// the tailer usable for the next one.
    pub fn poll(&mut self, mut emit: impl FnMut(String) -> bool) -> Result<PollStats> {
        let mut stats = PollStats::default();

        let (identity, size) = self.resolver.identify(&self.path)?;

        if identity != self.identity {
            // Whatever the writer appended before rotating is still reachable
            // through the old handle.
            if let ReadOutcome::Interrupted = self.read_forward(&mut emit, &mut stats, true)? {
                stats.interrupted = true;
                return Ok(stats);
            }
            self.reattach(identity)?;
            stats.rotated = true;
        } else if size < self.offset {
            info!(
                path = ?self.path,
                offset = self.offset,
                size,
                "File truncated, reading from the beginning"
            );
            self.reset_offset();
            stats.truncated = true;
        }

        let size = if stats.rotated {
            // The new handle may have grown since the stat above.
            self.resolver
                .identify_file(&self.path, self.reader.get_ref())?
                .1
        } else {
            size
        };

        if size > self.offset {
            if let ReadOutcome::Interrupted = self.read_forward(&mut emit, &mut stats, false)? {
                stats.interrupted = true;
            }
        }

        Ok(stats)
    }

    /// Replace the handle with a fresh open of the path.
    fn reattach(&mut self, expected: FileIdentity) -> Result<()> {
        let file = File::open(&self.path).map_err(|e| Error::open(&self.path, e))?;
        let (identity, _) = self.resolver.identify_file(&self.path, &file)?;
        if identity != expected {
            debug!(
                path = ?self.path,
                expected = %expected,
                identity = %identity,
                "File rotated again while reopening"
            );
        }

        info!(
            path = ?self.path,
            old_identity = %self.identity,
            identity = %identity,
            "File rotated, reading new file from the beginning"
        );

        self.reader = BufReader::new(file);
        self.identity = identity;
        self.reset_offset();
        Ok(())
    }

    fn reset_offset(&mut self) {
        self.offset = 0;
        self.position.publish(self.position());
    }

    /// Read lines from `offset` until end of data.
    ///
    /// With `final_read` set the handle is about to be retired, so a trailing
    /// fragment is emitted whatever the partial line policy says.
    fn read_forward(
        &mut self,
        emit: &mut impl FnMut(String) -> bool,
        stats: &mut PollStats,
        final_read: bool,
    ) -> Result<ReadOutcome> {
        self.reader
            .seek(SeekFrom::Start(self.offset))
            .map_err(|e| Error::from_io(&self.path, e))?;

        let limit = self.options.max_line_size as u64;

        loop {
            self.buf.clear();
            let n = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| Error::from_io(&self.path, e))?;

            if n == 0 {
                return Ok(ReadOutcome::Drained);
            }

            let terminated = self.buf.last() == Some(&b'\n');
            let oversized = n as u64 >= limit;

            if !terminated
                && !oversized
                && !final_read
                && self.options.partial_lines == PartialLinePolicy::Hold
            {
                // Re-read together with its continuation next time.
                return Ok(ReadOutcome::Drained);
            }

            let line = String::from_utf8_lossy(&self.buf).into_owned();
            if !emit(line) {
                return Ok(ReadOutcome::Interrupted);
            }

            self.offset += n as u64;
            self.position.publish(self.position());
            stats.lines += 1;
            stats.bytes += n as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    fn collect(tailer: &mut FileTailer) -> (Vec<String>, PollStats) {
        let mut lines = Vec::new();
        let stats = tailer
            .poll(|line| {
                lines.push(line);
                true
            })
            .unwrap();
        (lines, stats)
    }

    #[test]
    fn test_new_file_reads_appended_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();
        assert_eq!(tailer.offset(), 0);

        append(&path, "x\ny\nz\n");

        let (lines, stats) = collect(&mut tailer);
        assert_eq!(lines, vec!["x\n", "y\n", "z\n"]);
        assert_eq!(tailer.offset(), 6);
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.bytes, 6);
        assert_eq!(tailer.position_handle().snapshot().offset, 6);
    }

    #[test]
    fn test_empty_poll_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\n").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();
        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["x\n"]);

        let (lines, stats) = collect(&mut tailer);
        assert!(lines.is_empty());
        assert_eq!(stats, PollStats::default());
        assert_eq!(tailer.offset(), 2);
    }

    #[test]
    fn test_resume_from_matching_prior_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\ny\nz\n").unwrap();

        let (identity, _) = OsIdentityResolver.identify(&path).unwrap();
        let prior = Position {
            identity,
            offset: 4,
        };

        let mut tailer = FileTailer::open(&path, Some(prior), TailerOptions::default()).unwrap();
        assert_eq!(tailer.offset(), 4);

        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["z\n"]);
        assert_eq!(tailer.offset(), 6);
    }

    #[test]
    fn test_prior_with_other_identity_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "w\n").unwrap();

        let (identity, _) = OsIdentityResolver.identify(&path).unwrap();
        let prior = Position {
            identity: FileIdentity::new(identity.dev(), identity.ino().wrapping_add(1)),
            offset: 9,
        };

        let mut tailer = FileTailer::open(&path, Some(prior), TailerOptions::default()).unwrap();
        assert_eq!(tailer.offset(), 0);

        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["w\n"]);
    }

    #[test]
    fn test_prior_offset_past_end_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "w\n").unwrap();

        let (identity, _) = OsIdentityResolver.identify(&path).unwrap();
        let prior = Position {
            identity,
            offset: 100,
        };

        let tailer = FileTailer::open(&path, Some(prior), TailerOptions::default()).unwrap();
        assert_eq!(tailer.offset(), 0);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = FileTailer::open(dir.path().join("nope.log"), None, TailerOptions::default());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_rotation_reads_new_file_from_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "old 1\n").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();
        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["old 1\n"]);
        let old_identity = tailer.identity();

        // Writer appends once more, then the file is rotated away.
        append(&path, "old 2\n");
        std::fs::rename(&path, dir.path().join("a.log.1")).unwrap();
        std::fs::write(&path, "new 1\n").unwrap();

        let (lines, stats) = collect(&mut tailer);
        assert!(stats.rotated);
        assert_eq!(lines, vec!["old 2\n", "new 1\n"]);
        assert_ne!(tailer.identity(), old_identity);
        assert_eq!(tailer.offset(), 6);
        assert_eq!(
            tailer.position_handle().snapshot(),
            Position {
                identity: tailer.identity(),
                offset: 6
            }
        );
    }

    #[test]
    fn test_unlink_and_recreate_resets_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\ny\nz\n").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();
        collect(&mut tailer);
        assert_eq!(tailer.offset(), 6);

        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, "w\n").unwrap();

        let (lines, stats) = collect(&mut tailer);
        assert!(stats.rotated);
        assert_eq!(lines, vec!["w\n"]);
        assert_eq!(tailer.offset(), 2);
    }

    #[test]
    fn test_truncation_without_identity_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "aaaa\nbbbb\n").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();
        collect(&mut tailer);
        let identity = tailer.identity();
        assert_eq!(tailer.offset(), 10);

        // Truncate in place, then write less than before.
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(0).unwrap();
        drop(f);
        append(&path, "c\n");

        let (lines, stats) = collect(&mut tailer);
        assert!(stats.truncated);
        assert!(!stats.rotated);
        assert_eq!(tailer.identity(), identity);
        assert_eq!(lines, vec!["c\n"]);
        assert_eq!(tailer.offset(), 2);
    }

    #[test]
    fn test_truncated_to_empty_resets_to_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "aaaa\n").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();
        collect(&mut tailer);

        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(0)
            .unwrap();

        let (lines, stats) = collect(&mut tailer);
        assert!(stats.truncated);
        assert!(lines.is_empty());
        assert_eq!(tailer.offset(), 0);
    }

    #[test]
    fn test_hold_policy_rereads_partial_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "first\nsec").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();
        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["first\n"]);
        assert_eq!(tailer.offset(), 6);

        append(&path, "ond\n");
        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["second\n"]);
        assert_eq!(tailer.offset(), 13);
    }

    #[test]
    fn test_emit_policy_commits_partial_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "first\nsec").unwrap();

        let options = TailerOptions {
            partial_lines: PartialLinePolicy::Emit,
            ..Default::default()
        };
        let mut tailer = FileTailer::open(&path, None, options).unwrap();
        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["first\n", "sec"]);
        assert_eq!(tailer.offset(), 9);

        append(&path, "ond\n");
        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["ond\n"]);
        assert_eq!(tailer.offset(), 13);
    }

    #[test]
    fn test_oversized_fragment_is_emitted_under_hold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "abcdefghij").unwrap();

        let options = TailerOptions {
            partial_lines: PartialLinePolicy::Hold,
            max_line_size: 4,
        };
        let mut tailer = FileTailer::open(&path, None, options).unwrap();
        let (lines, _) = collect(&mut tailer);
        // Two full chunks are emitted, the short remainder is held.
        assert_eq!(lines, vec!["abcd", "efgh"]);
        assert_eq!(tailer.offset(), 8);
    }

    #[test]
    fn test_emit_can_stop_the_poll() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "1\n2\n3\n").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();

        let mut seen = Vec::new();
        let stats = tailer
            .poll(|line| {
                if seen.len() == 2 {
                    return false;
                }
                seen.push(line);
                true
            })
            .unwrap();
        assert!(stats.interrupted);
        assert_eq!(seen, vec!["1\n", "2\n"]);
        assert_eq!(tailer.offset(), 4);

        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["3\n"]);
    }

    #[test]
    fn test_vanished_file_reports_not_found_and_recovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\n").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();
        collect(&mut tailer);

        std::fs::remove_file(&path).unwrap();
        let err = tailer.poll(|_| true).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(tailer.offset(), 2);

        std::fs::write(&path, "back\n").unwrap();
        let (lines, stats) = collect(&mut tailer);
        assert!(stats.rotated);
        assert_eq!(lines, vec!["back\n"]);
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"ok \xff\n").unwrap();

        let mut tailer = FileTailer::open(&path, None, TailerOptions::default()).unwrap();
        let (lines, _) = collect(&mut tailer);
        assert_eq!(lines, vec!["ok \u{fffd}\n"]);
        // The offset counts raw bytes, not decoded ones
        assert_eq!(tailer.offset(), 5);
    }
}
