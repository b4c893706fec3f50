// SPDX-License-Identifier: GPL-3.0-only

//! Mode locks
//!
//! One lock per operation mode. A batch holds its mode's lock for the whole
//! run; a prober holds it only while inserting into the registry. The
//! [`ModeGuard`] is the proof registry mutations ask for.

use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use livecopy_types::OperationMode;

#[derive(Debug)]
pub struct ModeGuard {
    mode: OperationMode,
    _guard: OwnedMutexGuard<()>,
}

impl ModeGuard {
    pub fn mode(&self) -> OperationMode {
        self.mode
    }
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        debug!(mode = %self.mode, "mode lock released");
    }
}

#[derive(Debug, Default)]
pub struct OperationCoordinator {
    install: Arc<Mutex<()>>,
    upgrade: Arc<Mutex<()>>,
    reset: Arc<Mutex<()>>,
    active: RwLock<Option<OperationMode>>,
}

impl OperationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex(&self, mode: OperationMode) -> Arc<Mutex<()>> {
        match mode {
            OperationMode::Install => self.install.clone(),
            OperationMode::Upgrade => self.upgrade.clone(),
            OperationMode::Reset => self.reset.clone(),
        }
    }

    pub async fn lock(&self, mode: OperationMode) -> ModeGuard {
        let guard = self.mutex(mode).lock_owned().await;
        debug!(%mode, "mode lock acquired");
        ModeGuard {
            mode,
            _guard: guard,
        }
    }

    pub fn try_lock(&self, mode: OperationMode) -> Option<ModeGuard> {
        let guard = self.mutex(mode).try_lock_owned().ok()?;
        Some(ModeGuard {
            mode,
            _guard: guard,
        })
    }

    /// The mode hotplug events are dispatched to, if any.
    pub fn active_mode(&self) -> Option<OperationMode> {
        *self.active.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_active_mode(&self, mode: Option<OperationMode>) {
        *self.active.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = mode;
    }
}
