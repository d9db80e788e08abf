// SPDX-License-Identifier: Apache-2.0

//! Durable per-file offsets.
//!
//! The whole mapping is written as one JSON document using write-to-temp-then-rename,
//! so the store path always holds either the previous or the new complete state.

mod schema;
mod store;

pub use schema::{OFFSET_STORE_VERSION, OffsetMap, OffsetStoreFile, PersistedOffset};
pub use store::OffsetStore;
