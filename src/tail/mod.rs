// SPDX-License-Identifier: Apache-2.0

//! Rotation-aware file tailing with crash-safe offset checkpoints.
//!
//! Each discovered file gets a [`FileTailer`] that follows it across rotation and
//! truncation. The [`TailerSupervisor`] polls every tailer on its own timer, merges
//! the lines into one bounded channel and periodically saves all positions to the
//! [`OffsetStore`], so a restarted agent resumes where it left off.
//!
//! Delivery is at-least-once: lines read after the last checkpoint are read again
//! after a crash.

pub mod config;
pub mod error;
pub mod finder;
pub mod identity;
pub mod line;
pub mod persistence;
pub mod supervisor;
pub mod tailer;

pub use config::{OpenErrorPolicy, PartialLinePolicy, TailConfig};
pub use error::{Error, Result};
pub use finder::GlobFileFinder;
pub use identity::{FileIdentity, IdentityResolver, OsIdentityResolver};
pub use line::LogLine;
pub use persistence::{OffsetMap, OffsetStore, PersistedOffset};
pub use supervisor::{Snapshotter, SupervisorHandle, TailerSupervisor};
pub use tailer::{FileTailer, PollStats, Position, TailerOptions, TailerPosition};
