// SPDX-License-Identifier: GPL-3.0-only

//! Configuration file
//!
//! One TOML file holds the session settings, the system source and the
//! settings of each operation. Missing tables and keys take their defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use livecopy_core::SessionConfig;
use livecopy_core::source::LIVE_MEDIUM;
use livecopy_types::{InstallConfig, ResetConfig, UpgradeConfig};

pub const DEFAULT_PATH: &str = "/etc/livecopy/livecopy.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub source: SourceConfig,
    pub log: LogConfig,
    pub install: InstallConfig,
    pub upgrade: UpgradeConfig,
    pub reset: ResetConfig,
}

/// Where installations and upgrades take the system from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Mounted live medium, used unless `iso` is set
    pub medium: PathBuf,
    pub iso: Option<PathBuf>,
    /// Content for the exchange partition of new installations
    pub exchange_dir: Option<PathBuf>,
    /// Content for the data partition of new installations
    pub data_dir: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            medium: PathBuf::from(LIVE_MEDIUM),
            iso: None,
            exchange_dir: None,
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for daily rolling log files; stderr only when unset
    pub directory: Option<PathBuf>,
}

impl Config {
    /// Read `path`, or the default location if none was given. A missing
    /// default file yields the default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_PATH), false),
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !required && e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Self::parse(&text).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
