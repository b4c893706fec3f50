// SPDX-License-Identifier: GPL-3.0-only

//! Hotplug event source process

use std::process::Stdio;

use tokio::process::{Child, ChildStdout, Command};
use tracing::info;
use which::which;

use livecopy_contracts::ToolError;

/// Which udisks monitor is available on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorKind {
    /// `udisksctl monitor`
    Udisks2,
    /// `udisks --monitor`
    Legacy,
}

impl MonitorKind {
    pub fn detect() -> Result<Self, ToolError> {
        if which("udisksctl").is_ok() {
            Ok(MonitorKind::Udisks2)
        } else if which("udisks").is_ok() {
            Ok(MonitorKind::Legacy)
        } else {
            Err(ToolError::NotFound("udisksctl".to_string()))
        }
    }

    fn command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            MonitorKind::Udisks2 => ("udisksctl", &["monitor"]),
            MonitorKind::Legacy => ("udisks", &["--monitor"]),
        }
    }
}

/// Running monitor process. The process is killed when this is dropped.
pub struct MonitorProcess {
    pub kind: MonitorKind,
    child: Child,
}

impl MonitorProcess {
    pub fn spawn(kind: MonitorKind) -> Result<(Self, ChildStdout), ToolError> {
        let (program, args) = kind.command();
        info!(monitor = program, "starting hotplug monitor");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| ToolError::io(format!("failed to start {program}"), error))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::other("monitor stdout unavailable"))?;
        Ok((Self { kind, child }, stdout))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}
