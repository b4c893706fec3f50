// SPDX-License-Identifier: GPL-3.0-only

//! Provisioning orchestration for live system media
//!
//! The core keeps one device list per operation mode up to date while
//! devices come and go, and runs install, upgrade and reset batches over the
//! selected devices:
//!
//! - [`hotplug`] classifies monitor events and hands them to the [`prober`]
//! - the [`prober`] resolves devices and lists them in the mode's
//!   [`registry`]
//! - the orchestrators ([`installer`], [`upgrader`], [`resetter`]) validate a
//!   selection and run it through [`batch::run_batch`]
//! - [`task`] runs an orchestrator in the background and publishes progress
//!
//! Registry mutation and whole batches are serialized per mode by the
//! [`coordinator`]. Everything touching the host goes through the
//! [`livecopy_contracts::SystemTools`] and
//! [`livecopy_contracts::DeviceResolver`] seams.

pub mod batch;
pub mod coordinator;
pub mod data_partition;
pub mod documents;
pub mod error;
pub mod fs_tasks;
pub mod hotplug;
pub mod installer;
pub mod ledger;
pub mod mount_stack;
pub mod prober;
pub mod registry;
pub mod resetter;
pub mod session;
pub mod source;
pub mod task;
pub mod transfer;
pub mod upgrader;
pub mod workflow;

pub use batch::{BatchContext, BatchControl, BatchOutcome, DeviceWorkflow, run_batch};
pub use coordinator::{ModeGuard, OperationCoordinator};
pub use error::{DocumentError, LiveCopyError, Result, ValidationError};
pub use hotplug::{EventGrammar, HotplugEvent, HotplugMonitor};
pub use installer::Installer;
pub use ledger::ResultsLedger;
pub use mount_stack::MountStack;
pub use prober::ProbeOutcome;
pub use registry::DeviceRegistry;
pub use resetter::Resetter;
pub use session::{Session, SessionConfig};
pub use source::SystemSource;
pub use task::{ChannelReporter, DocumentSelector, Operation, OperationHandle};
pub use upgrader::Upgrader;
