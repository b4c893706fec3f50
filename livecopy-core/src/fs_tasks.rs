// SPDX-License-Identifier: GPL-3.0-only

//! Blocking filesystem work moved off the async runtime

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use livecopy_contracts::ProgressReporter;
use livecopy_sys::{CopyOptions, CopyStats, DigestCache, copy_tree, parse_progress};

use crate::error::{LiveCopyError, Result};

/// Run blocking filesystem code on the blocking pool.
pub async fn blocking<T, F>(context: impl Into<String>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let context = context.into();
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LiveCopyError::Task(format!("{context}: {e}")))?
        .map_err(|e| LiveCopyError::io(context, e))
}

/// Forward one line of tool output, plus the progress marker it carries.
pub fn report_output(reporter: &dyn ProgressReporter, line: &str) {
    reporter.line(line);
    if let Some(percent) = parse_progress(line) {
        reporter.progress(percent);
    }
}

/// Owned counterpart of [`CopyOptions`] that can cross into the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct TreeCopy {
    pub digests: Option<Arc<DigestCache>>,
    pub verify: bool,
    pub remove_stale: bool,
    pub exclude: Vec<String>,
}

impl TreeCopy {
    /// Fresh copy, every file re-read and compared afterwards.
    pub fn verified(digests: Arc<DigestCache>) -> Self {
        Self {
            digests: Some(digests),
            verify: true,
            ..Default::default()
        }
    }

    /// Bring an existing copy up to date: identical files are skipped,
    /// files missing from the source are removed.
    pub fn update(digests: Arc<DigestCache>) -> Self {
        Self {
            digests: Some(digests),
            remove_stale: true,
            ..Default::default()
        }
    }

    pub fn excluding(mut self, names: &[&str]) -> Self {
        self.exclude.extend(names.iter().map(|name| name.to_string()));
        self
    }
}

/// Copy a tree on the blocking pool, forwarding percentage progress.
pub async fn copy_tree_reporting(
    source: PathBuf,
    destination: PathBuf,
    copy: TreeCopy,
    reporter: &dyn ProgressReporter,
) -> Result<CopyStats> {
    let context = format!("copying {} to {}", source.display(), destination.display());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = tokio::task::spawn_blocking(move || {
        let exclude: Vec<&str> = copy.exclude.iter().map(String::as_str).collect();
        let options = CopyOptions {
            digests: copy.digests.as_deref(),
            verify: copy.verify,
            remove_stale: copy.remove_stale,
            exclude: &exclude,
        };
        copy_tree(&source, &destination, &options, &mut |percent| {
            let _ = tx.send(percent);
        })
    });

    while let Some(percent) = rx.recv().await {
        reporter.progress(percent);
    }

    let stats = task
        .await
        .map_err(|e| LiveCopyError::Task(format!("{context}: {e}")))?
        .map_err(|e| LiveCopyError::io(context, e))?;
    debug!(?stats, "tree copied");
    Ok(stats)
}
