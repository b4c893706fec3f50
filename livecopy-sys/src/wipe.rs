// SPDX-License-Identifier: GPL-3.0-only

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use rand::RngCore;

use crate::progress::compute_progress_percent;

const BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Overwrite the first `size` bytes of `target` with random data.
///
/// Blocking. `progress` receives each new percentage.
pub fn overwrite_random(target: &Path, size: u64, mut progress: impl FnMut(u8)) -> io::Result<u64> {
    let mut file = OpenOptions::new().write(true).open(target)?;
    let mut rng = rand::thread_rng();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut written = 0u64;
    let mut last_percent = None;

    while written < size {
        let chunk = (size - written).min(BUFFER_SIZE as u64) as usize;
        rng.fill_bytes(&mut buffer[..chunk]);
        file.write_all(&buffer[..chunk])?;
        written += chunk as u64;

        let percent = compute_progress_percent(written, size);
        if last_percent != Some(percent) {
            last_percent = Some(percent);
            progress(percent);
        }
    }

    file.sync_all()?;
    Ok(written)
}
