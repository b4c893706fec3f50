// SPDX-License-Identifier: GPL-3.0-only

pub mod errors;
pub mod events;
pub mod ids;

pub use errors::ToolError;
pub use events::ProgressEvent;
pub use ids::OperationId;
