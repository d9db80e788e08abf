// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// One line read from a tailed file, terminator included when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub path: Arc<Path>,
    pub text: String,
}

impl LogLine {
    pub fn new(path: Arc<Path>, text: impl Into<String>) -> Self {
        Self {
            path,
            text: text.into(),
        }
    }

    /// The text without its line terminator.
    pub fn trimmed(&self) -> &str {
        self.text
            .strip_suffix('\n')
            .map(|s| s.strip_suffix('\r').unwrap_or(s))
            .unwrap_or(&self.text)
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.trimmed())
    }
}
