// SPDX-License-Identifier: GPL-3.0-only

//! SHA-256 digests of files, cached per session
//!
//! Entries are keyed by path and invalidated when the file's length or
//! modification time changes.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

const BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedDigest {
    len: u64,
    modified: Option<SystemTime>,
    digest: String,
}

#[derive(Debug, Default)]
pub struct DigestCache {
    entries: RwLock<HashMap<PathBuf, CachedDigest>>,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex SHA-256 of `path`, computed at most once per file version.
    pub fn digest(&self, path: &Path) -> io::Result<String> {
        let metadata = std::fs::metadata(path)?;
        let len = metadata.len();
        let modified = metadata.modified().ok();

        if let Ok(entries) = self.entries.read() {
            if let Some(cached) = entries.get(path) {
                if cached.len == len && cached.modified == modified {
                    return Ok(cached.digest.clone());
                }
            }
        }

        let digest = file_digest(path)?;
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                path.to_path_buf(),
                CachedDigest {
                    len,
                    modified,
                    digest: digest.clone(),
                },
            );
        }
        Ok(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Uncached hex SHA-256 of a file.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
