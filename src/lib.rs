// SPDX-License-Identifier: Apache-2.0

pub mod bounded_channel;
pub mod collector;
pub mod init;
pub mod listener;
pub mod sink;
pub mod tail;
