// SPDX-License-Identifier: GPL-3.0-only

//! Progress reporting seam
//!
//! One trait covers batch progress, device resolution notifications and the
//! few questions a workflow may ask (document selection). All methods have
//! no-op defaults so a reporter only implements what it displays.

use std::path::PathBuf;

use livecopy_types::{OperationMode, StorageDevice, StorageDeviceResult};

pub trait ProgressReporter: Send + Sync {
    fn batch_started(&self, _mode: OperationMode, _devices: usize) {}

    fn device_started(
        &self,
        _mode: OperationMode,
        _device: &StorageDevice,
        _index: usize,
        _total: usize,
    ) {
    }

    fn step(&self, _step: &str) {}

    fn progress(&self, _percent: u8) {}

    fn line(&self, _text: &str) {}

    fn show_error(&self, _message: &str) {}

    fn device_finished(&self, _mode: OperationMode, _result: &StorageDeviceResult) {}

    fn batch_finished(&self, _mode: OperationMode, _results: &[StorageDeviceResult]) {}

    fn resolution_started(&self, _path: &str) {}

    fn resolution_finished(&self, _path: &str) {}

    /// Pick the documents to print. The default prints all of them.
    fn select_documents(&self, documents: &[PathBuf]) -> Vec<PathBuf> {
        documents.to_vec()
    }
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {}
