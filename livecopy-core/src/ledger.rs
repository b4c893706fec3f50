// SPDX-License-Identifier: GPL-3.0-only

use std::sync::RwLock;

use livecopy_types::{StorageDevice, StorageDeviceResult};

/// Per-batch list of device results, readable while the batch runs.
#[derive(Debug, Default)]
pub struct ResultsLedger {
    results: RwLock<Vec<StorageDeviceResult>>,
}

impl ResultsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that work on `device` started and return its index.
    pub fn start(&self, device: StorageDevice) -> usize {
        let mut results = self.results.write().unwrap_or_else(|p| p.into_inner());
        results.push(StorageDeviceResult::start(device));
        results.len() - 1
    }

    /// Finish the result at `index` and return a copy of it.
    pub fn finish(&self, index: usize, error_message: Option<String>) -> Option<StorageDeviceResult> {
        let mut results = self.results.write().unwrap_or_else(|p| p.into_inner());
        let result = results.get_mut(index)?;
        result.finish(error_message);
        Some(result.clone())
    }

    pub fn snapshot(&self) -> Vec<StorageDeviceResult> {
        self.results.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.results.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
