// SPDX-License-Identifier: GPL-3.0-only

//! Sequential batch runner shared by the three orchestrators
//!
//! Validation happens before [`run_batch`] is called. The runner takes the
//! mode lock for the whole batch, works through the devices in selection
//! order and records one result per device. A failing device never stops
//! the batch; a stop request is honored between devices.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{error, info, warn};

use livecopy_contracts::ProgressReporter;
use livecopy_types::{OperationMode, StorageDevice, StorageDeviceResult};

use crate::coordinator::OperationCoordinator;
use crate::error::Result;
use crate::ledger::ResultsLedger;

#[derive(Debug, Default)]
pub struct BatchControl {
    stop: AtomicBool,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the batch to stop after the current device.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub mode: OperationMode,
    pub results: Vec<StorageDeviceResult>,
    /// Devices left untouched because a stop was requested
    pub stopped: bool,
    /// Counter value after the last device, when auto-numbering was used
    pub next_auto_number: Option<u32>,
}

impl BatchOutcome {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.succeeded()).count()
    }
}

/// Shared plumbing of one batch run.
#[derive(Clone)]
pub struct BatchContext {
    pub reporter: Arc<dyn ProgressReporter>,
    pub control: Arc<BatchControl>,
    pub ledger: Arc<ResultsLedger>,
}

impl BatchContext {
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            control: Arc::new(BatchControl::new()),
            ledger: Arc::new(ResultsLedger::new()),
        }
    }
}

/// The per-device part of an operation.
#[async_trait]
pub trait DeviceWorkflow: Send {
    async fn run_device(
        &mut self,
        device: &StorageDevice,
        reporter: &dyn ProgressReporter,
    ) -> Result<()>;
}

pub async fn run_batch(
    coordinator: &OperationCoordinator,
    mode: OperationMode,
    devices: &[StorageDevice],
    workflow: &mut dyn DeviceWorkflow,
    context: &BatchContext,
) -> BatchOutcome {
    let reporter = context.reporter.as_ref();
    let guard = coordinator.lock(mode).await;
    info!(%mode, devices = devices.len(), "batch started");
    reporter.batch_started(mode, devices.len());

    let total = devices.len();
    let mut stopped = false;
    for (position, device) in devices.iter().enumerate() {
        if context.control.stop_requested() {
            warn!(%mode, remaining = total - position, "batch stopped on request");
            stopped = true;
            break;
        }

        let index = context.ledger.start(device.clone());
        reporter.device_started(mode, device, position + 1, total);

        let error_message = match workflow.run_device(device, reporter).await {
            Ok(()) => {
                info!(%mode, device = %device.path(), "device finished");
                None
            }
            Err(err) => {
                error!(%mode, device = %device.path(), error = %err, "device failed");
                let message = err.to_string();
                reporter.show_error(&format!("{}: {message}", device.path()));
                Some(message)
            }
        };

        if let Some(result) = context.ledger.finish(index, error_message) {
            reporter.device_finished(mode, &result);
        }
    }

    drop(guard);
    let results = context.ledger.snapshot();
    let failed = results.iter().filter(|r| !r.succeeded()).count();
    info!(%mode, succeeded = results.len() - failed, failed, "batch finished");
    reporter.batch_finished(mode, &results);

    BatchOutcome {
        mode,
        results,
        stopped,
        next_auto_number: None,
    }
}
