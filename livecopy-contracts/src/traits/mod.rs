// SPDX-License-Identifier: GPL-3.0-only

pub mod reporter;
pub mod resolver;
pub mod tools;

pub use reporter::{NullReporter, ProgressReporter};
pub use resolver::DeviceResolver;
pub use tools::{FsUsage, LineFn, MountAccess, ProgressFn, SystemTools};
