// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

/// The three operation categories. Each one owns a registry and a mode lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Install,
    Upgrade,
    Reset,
}

impl OperationMode {
    pub const ALL: [OperationMode; 3] = [
        OperationMode::Install,
        OperationMode::Upgrade,
        OperationMode::Reset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationMode::Install => "install",
            OperationMode::Upgrade => "upgrade",
            OperationMode::Reset => "reset",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
