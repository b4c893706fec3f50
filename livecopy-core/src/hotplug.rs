// SPDX-License-Identifier: GPL-3.0-only

//! Hotplug event classification and dispatch
//!
//! The monitor reads the line-oriented output of a udisks monitor process.
//! Two output grammars exist; the one matching the installed monitor is
//! chosen once at startup.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use livecopy_contracts::ProgressReporter;
use livecopy_sys::MonitorKind;

use crate::error::{LiveCopyError, Result};
use crate::prober;
use crate::session::Session;

static UDISKS2_ADDED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^.*: Added (/org/freedesktop/UDisks2/block_devices/\S+)").ok()
});

static UDISKS2_REMOVED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^.*: Removed (/org/freedesktop/UDisks2/block_devices/\S+)").ok()
});

static PARTITION_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?:[shvx]+d[a-z]+\d+|(?:nvme\d+n\d+|mmcblk\d+|md\d+|loop\d+)p\d+)$").ok()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Added(String),
    Removed(String),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventGrammar {
    /// `added: <path>` / `removed: <path>`
    Legacy,
    /// `<timestamp>: Added <object path>` / `<timestamp>: Removed <object path>`
    Udisks2,
}

impl EventGrammar {
    pub fn for_monitor(kind: MonitorKind) -> Self {
        match kind {
            MonitorKind::Udisks2 => EventGrammar::Udisks2,
            MonitorKind::Legacy => EventGrammar::Legacy,
        }
    }

    /// Classify one monitor line. Events for partitions are ignored.
    pub fn classify(&self, line: &str) -> HotplugEvent {
        let event = match self {
            EventGrammar::Legacy => classify_legacy(line.trim()),
            EventGrammar::Udisks2 => classify_udisks2(line),
        };
        match &event {
            HotplugEvent::Added(path) | HotplugEvent::Removed(path)
                if is_partition_name(device_name(path)) =>
            {
                HotplugEvent::Ignored
            }
            _ => event,
        }
    }
}

fn classify_legacy(line: &str) -> HotplugEvent {
    let path = |rest: &str| rest.trim().to_string();
    if let Some(rest) = line.strip_prefix("added:") {
        HotplugEvent::Added(path(rest))
    } else if let Some(rest) = line.strip_prefix("removed:") {
        HotplugEvent::Removed(path(rest))
    } else {
        HotplugEvent::Ignored
    }
}

fn capture(regex: &LazyLock<Option<Regex>>, line: &str) -> Option<String> {
    regex
        .as_ref()?
        .captures(line)?
        .get(1)
        .map(|path| path.as_str().to_string())
}

fn classify_udisks2(line: &str) -> HotplugEvent {
    if let Some(path) = capture(&UDISKS2_ADDED, line) {
        HotplugEvent::Added(path)
    } else if let Some(path) = capture(&UDISKS2_REMOVED, line) {
        HotplugEvent::Removed(path)
    } else {
        HotplugEvent::Ignored
    }
}

/// Bare device name of an event path (last path component).
pub fn device_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Whether a kernel block device name names a partition (sdb1, nvme0n1p2).
pub fn is_partition_name(name: &str) -> bool {
    PARTITION_NAME
        .as_ref()
        .is_some_and(|regex| regex.is_match(name))
}

/// Dispatches hotplug events to probers and removal tasks of the active mode.
pub struct HotplugMonitor {
    session: Arc<Session>,
    grammar: EventGrammar,
    listener: Arc<dyn ProgressReporter>,
}

impl HotplugMonitor {
    pub fn new(
        session: Arc<Session>,
        grammar: EventGrammar,
        listener: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            session,
            grammar,
            listener,
        }
    }

    fn dispatch(&self, event: HotplugEvent, tasks: &mut JoinSet<()>) {
        let Some(mode) = self.session.coordinator.active_mode() else {
            debug!(?event, "no active mode, event ignored");
            return;
        };
        let session = self.session.clone();
        match event {
            HotplugEvent::Added(path) => {
                let listener = self.listener.clone();
                tasks.spawn(async move {
                    match prober::probe(&session, &path, mode, listener.as_ref()).await {
                        Ok(outcome) => debug!(%path, ?outcome, "probe finished"),
                        Err(error) => warn!(%path, %error, "probe failed"),
                    }
                });
            }
            HotplugEvent::Removed(path) => {
                tasks.spawn(async move {
                    if let Err(error) = prober::remove(&session, &path, mode).await {
                        warn!(%path, %error, "removal failed");
                    }
                });
            }
            HotplugEvent::Ignored => {}
        }
    }

    /// Read events until the stream ends, then wait for the probers and
    /// removals it started.
    pub async fn run<R>(&self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        info!(grammar = ?self.grammar, "hotplug monitor running");
        let mut lines = reader.lines();
        let mut tasks = JoinSet::new();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|error| LiveCopyError::io("reading hotplug events", error))?
        {
            let event = self.grammar.classify(&line);
            if event != HotplugEvent::Ignored {
                debug!(?event, "hotplug event");
                self.dispatch(event, &mut tasks);
            }
            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        info!("hotplug event stream ended");
        Ok(())
    }
}
