// SPDX-License-Identifier: Apache-2.0

//! Discovery: resolves glob patterns to the set of files to tail.

use glob::{Pattern, glob};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::tail::error::{Error, Result};

/// Finds files matching include patterns, minus those matching exclude patterns.
#[derive(Debug, Clone)]
pub struct GlobFileFinder {
    include: Vec<String>,
    exclude: Vec<Pattern>,
}

impl GlobFileFinder {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self> {
        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { include, exclude })
    }

    /// Paths in pattern order, then match order within a pattern. A path matched by
    /// several patterns appears once, at its first position.
    pub fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches =
                glob(pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        let path = e.path().to_path_buf();
                        return Err(Error::from_io(path, e.into_error()));
                    }
                };

                if path.is_dir() {
                    continue;
                }

                if self.exclude.iter().any(|p| p.matches_path(&path)) {
                    continue;
                }

                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }
}
