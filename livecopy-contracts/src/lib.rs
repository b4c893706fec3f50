// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

pub use protocol::{OperationId, ProgressEvent, ToolError};
pub use traits::{
    DeviceResolver, FsUsage, LineFn, MountAccess, NullReporter, ProgressFn, ProgressReporter,
    SystemTools,
};
