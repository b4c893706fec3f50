// SPDX-License-Identifier: GPL-3.0-only

//! Running an orchestrator in the background
//!
//! A spawned operation publishes its progress as [`ProgressEvent`]s on an
//! unbounded channel and resolves to its [`BatchOutcome`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::info;

use livecopy_contracts::{OperationId, ProgressEvent, ProgressReporter};
use livecopy_types::{OperationMode, StorageDevice, StorageDeviceResult};

use crate::batch::{BatchContext, BatchControl, BatchOutcome};
use crate::error::{LiveCopyError, Result};
use crate::installer::Installer;
use crate::ledger::ResultsLedger;
use crate::resetter::Resetter;
use crate::upgrader::Upgrader;

/// Picks documents to print on behalf of a spawned reset.
pub type DocumentSelector = Arc<dyn Fn(&[PathBuf]) -> Vec<PathBuf> + Send + Sync>;

/// Reporter that forwards everything into a channel.
pub struct ChannelReporter {
    sender: UnboundedSender<ProgressEvent>,
    selector: Option<DocumentSelector>,
}

impl ChannelReporter {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            sender,
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: DocumentSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    fn send(&self, event: ProgressEvent) {
        // a dropped receiver only means nobody is watching anymore
        let _ = self.sender.send(event);
    }
}

impl ProgressReporter for ChannelReporter {
    fn batch_started(&self, mode: OperationMode, devices: usize) {
        self.send(ProgressEvent::BatchStarted { mode, devices });
    }

    fn device_started(&self, mode: OperationMode, device: &StorageDevice, index: usize, total: usize) {
        self.send(ProgressEvent::DeviceStarted {
            mode,
            device: device.path(),
            index,
            total,
        });
    }

    fn step(&self, step: &str) {
        self.send(ProgressEvent::Step {
            step: step.to_string(),
        });
    }

    fn progress(&self, percent: u8) {
        self.send(ProgressEvent::Progress { percent });
    }

    fn line(&self, text: &str) {
        self.send(ProgressEvent::Line {
            text: text.to_string(),
        });
    }

    fn show_error(&self, message: &str) {
        self.send(ProgressEvent::Error {
            message: message.to_string(),
        });
    }

    fn device_finished(&self, mode: OperationMode, result: &StorageDeviceResult) {
        self.send(ProgressEvent::DeviceFinished {
            mode,
            device: result.device.path(),
            error: result.error_message().map(str::to_string),
        });
    }

    fn batch_finished(&self, mode: OperationMode, results: &[StorageDeviceResult]) {
        let succeeded = results.iter().filter(|r| r.succeeded()).count();
        self.send(ProgressEvent::BatchFinished {
            mode,
            succeeded,
            failed: results.len() - succeeded,
        });
    }

    fn resolution_started(&self, path: &str) {
        self.send(ProgressEvent::ResolutionStarted {
            path: path.to_string(),
        });
    }

    fn resolution_finished(&self, path: &str) {
        self.send(ProgressEvent::ResolutionFinished {
            path: path.to_string(),
        });
    }

    fn select_documents(&self, documents: &[PathBuf]) -> Vec<PathBuf> {
        match &self.selector {
            Some(selector) => selector(documents),
            None => documents.to_vec(),
        }
    }
}

/// One of the three orchestrators, ready to run.
pub enum Operation {
    Install(Installer),
    Upgrade(Upgrader),
    Reset(Resetter),
}

impl Operation {
    pub fn mode(&self) -> OperationMode {
        match self {
            Operation::Install(_) => OperationMode::Install,
            Operation::Upgrade(_) => OperationMode::Upgrade,
            Operation::Reset(_) => OperationMode::Reset,
        }
    }

    pub async fn run(&self, devices: Vec<StorageDevice>, context: &BatchContext) -> Result<BatchOutcome> {
        match self {
            Operation::Install(installer) => installer.run(devices, context).await,
            Operation::Upgrade(upgrader) => upgrader.run(devices, context).await,
            Operation::Reset(resetter) => resetter.run(devices, context).await,
        }
    }
}

pub struct OperationHandle {
    pub id: OperationId,
    pub mode: OperationMode,
    pub events: UnboundedReceiver<ProgressEvent>,
    control: Arc<BatchControl>,
    ledger: Arc<ResultsLedger>,
    join: JoinHandle<Result<BatchOutcome>>,
}

impl OperationHandle {
    /// Stop after the device currently being processed.
    pub fn request_stop(&self) {
        self.control.request_stop();
    }

    /// Results recorded so far, including the device in progress.
    pub fn results(&self) -> Vec<StorageDeviceResult> {
        self.ledger.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> Result<BatchOutcome> {
        self.join
            .await
            .map_err(|e| LiveCopyError::Task(e.to_string()))?
    }
}

/// Run `operation` on `devices` in a background task.
pub fn spawn(
    operation: Operation,
    devices: Vec<StorageDevice>,
    selector: Option<DocumentSelector>,
) -> OperationHandle {
    let (sender, events) = mpsc::unbounded_channel();
    let mut reporter = ChannelReporter::new(sender);
    if let Some(selector) = selector {
        reporter = reporter.with_selector(selector);
    }
    let context = BatchContext::new(Arc::new(reporter));
    let id = OperationId::new();
    let mode = operation.mode();
    info!(%id, %mode, devices = devices.len(), "spawning operation");

    let control = context.control.clone();
    let ledger = context.ledger.clone();
    let join = tokio::spawn(async move { operation.run(devices, &context).await });

    OperationHandle {
        id,
        mode,
        events,
        control,
        ledger,
        join,
    }
}
