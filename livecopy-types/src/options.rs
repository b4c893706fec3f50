// SPDX-License-Identifier: GPL-3.0-only

//! Operation configuration
//!
//! These are the already-resolved settings an orchestrator runs with. They
//! deserialize from the `[install]`, `[upgrade]` and `[reset]` tables of the
//! configuration file; every field has a default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeFilesystem {
    #[default]
    Fat32,
    Exfat,
    Ntfs,
}

impl ExchangeFilesystem {
    /// Filesystem type name as understood by the format tool
    pub fn fs_type(self) -> &'static str {
        match self {
            ExchangeFilesystem::Fat32 => "vfat",
            ExchangeFilesystem::Exfat => "exfat",
            ExchangeFilesystem::Ntfs => "ntfs",
        }
    }

    /// Longest label the filesystem accepts
    pub fn max_label_len(self) -> usize {
        match self {
            ExchangeFilesystem::Fat32 => 11,
            ExchangeFilesystem::Exfat => 15,
            ExchangeFilesystem::Ntfs => 32,
        }
    }

    /// Longest prefix of `label` that fits [`Self::max_label_len`] bytes
    /// without splitting a character.
    pub fn fit_label(self, label: &str) -> &str {
        let max_len = self.max_label_len();
        if label.len() <= max_len {
            return label;
        }
        let end = (0..=max_len).rev().find(|&i| label.is_char_boundary(i)).unwrap_or(0);
        &label[..end]
    }

    pub fn from_fs_type(fs_type: &str) -> Option<Self> {
        match fs_type {
            "vfat" => Some(ExchangeFilesystem::Fat32),
            "exfat" => Some(ExchangeFilesystem::Exfat),
            "ntfs" => Some(ExchangeFilesystem::Ntfs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFilesystem {
    Ext2,
    Ext3,
    #[default]
    Ext4,
}

impl DataFilesystem {
    pub fn fs_type(self) -> &'static str {
        match self {
            DataFilesystem::Ext2 => "ext2",
            DataFilesystem::Ext3 => "ext3",
            DataFilesystem::Ext4 => "ext4",
        }
    }
}

/// LUKS passphrases for the data partition. The personal and the secondary
/// passphrase are independent key slots; either or both may be enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionOptions {
    pub personal: bool,
    pub personal_passphrase: String,
    pub secondary: bool,
    pub secondary_passphrase: String,
}

impl EncryptionOptions {
    pub fn enabled(&self) -> bool {
        self.personal || self.secondary
    }

    /// Enabled passphrases, personal first.
    pub fn passphrases(&self) -> Vec<String> {
        let mut passphrases = Vec::new();
        if self.personal {
            passphrases.push(self.personal_passphrase.clone());
        }
        if self.secondary {
            passphrases.push(self.secondary_passphrase.clone());
        }
        passphrases
    }

    /// Whether an enabled key slot lacks a passphrase.
    pub fn missing_passphrase(&self) -> bool {
        (self.personal && self.personal_passphrase.is_empty())
            || (self.secondary && self.secondary_passphrase.is_empty())
    }
}

/// Exchange label numbering across a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoNumbering {
    /// Token replaced in the exchange label (e.g. "NUM")
    pub pattern: String,
    pub start: u32,
    pub increment: u32,
    pub min_digits: usize,
}

impl Default for AutoNumbering {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            start: 1,
            increment: 1,
            min_digits: 1,
        }
    }
}

impl AutoNumbering {
    /// Substitute the pattern in `template` with `number`, zero-padded.
    pub fn apply(&self, template: &str, number: u32) -> String {
        if self.pattern.is_empty() {
            return template.to_string();
        }
        let formatted = format!("{number:0width$}", width = self.min_digits);
        template.replace(&self.pattern, &formatted)
    }

    pub fn next(&self, number: u32) -> u32 {
        number.saturating_add(self.increment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferCategory {
    Home,
    Network,
    Printer,
    Firewall,
}

impl TransferCategory {
    /// Subtree (relative to the live root) holding the category's data
    pub fn subtree(self) -> &'static str {
        match self {
            TransferCategory::Home => "home/user",
            TransferCategory::Network => "etc/NetworkManager/system-connections",
            TransferCategory::Printer => "etc/cups",
            TransferCategory::Firewall => "etc/lernstick-firewall",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    /// Device path of the transfer source (e.g. "/dev/sdc")
    pub source: Option<String>,
    pub home: bool,
    pub network: bool,
    pub printer: bool,
    pub firewall: bool,
}

impl TransferOptions {
    pub fn categories(&self) -> Vec<TransferCategory> {
        [
            (self.home, TransferCategory::Home),
            (self.network, TransferCategory::Network),
            (self.printer, TransferCategory::Printer),
            (self.firewall, TransferCategory::Firewall),
        ]
        .into_iter()
        .filter_map(|(selected, category)| selected.then_some(category))
        .collect()
    }

    pub fn is_active(&self) -> bool {
        self.source.is_some() && !self.categories().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Requested exchange partition size, 0 for none
    pub exchange_size_mib: u64,
    pub exchange_filesystem: ExchangeFilesystem,
    pub exchange_label: String,
    pub auto_numbering: Option<AutoNumbering>,
    /// Copy the source's exchange content, if it has any
    pub copy_exchange: bool,
    /// Copy the source's data partition content, if it has any
    pub copy_data: bool,
    pub data_filesystem: DataFilesystem,
    pub overwrite_data_with_random: bool,
    pub encryption: EncryptionOptions,
    pub transfer: TransferOptions,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            exchange_size_mib: 0,
            exchange_filesystem: ExchangeFilesystem::default(),
            exchange_label: "Exchange".to_string(),
            auto_numbering: None,
            copy_exchange: false,
            copy_data: false,
            data_filesystem: DataFilesystem::default(),
            overwrite_data_with_random: false,
            encryption: EncryptionOptions::default(),
            transfer: TransferOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum RepartitionStrategy {
    #[default]
    Keep,
    RemoveExchange,
    ResizeExchange {
        size_mib: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeBackup {
    pub destination: PathBuf,
    /// Add an increment to an existing backup instead of starting over
    #[serde(default = "default_true")]
    pub incremental: bool,
    #[serde(default)]
    pub delete_after_upgrade: bool,
}

/// (source, destination) pair restored onto the data partition. The
/// destination is a path inside the live system, e.g. "/home/user/.bashrc".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    pub backup: Option<UpgradeBackup>,
    pub repartition: RepartitionStrategy,
    pub reset_data: bool,
    pub keep_user_settings: bool,
    pub keep_printer_settings: bool,
    pub keep_network_settings: bool,
    pub keep_firewall_settings: bool,
    /// Live-root paths removed from the data partition even inside kept settings
    pub always_overwrite: Vec<PathBuf>,
    pub reactivate_welcome: bool,
    pub overwrite_entries: Vec<OverwriteEntry>,
    /// Staging area for exchange content while repartitioning
    pub work_dir: PathBuf,
    /// Unlocks encrypted data partitions
    pub encryption_passphrase: Option<String>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            backup: None,
            repartition: RepartitionStrategy::Keep,
            reset_data: false,
            keep_user_settings: true,
            keep_printer_settings: true,
            keep_network_settings: true,
            keep_firewall_settings: true,
            always_overwrite: Vec::new(),
            reactivate_welcome: false,
            overwrite_entries: Vec::new(),
            work_dir: PathBuf::from("/var/tmp/livecopy"),
            encryption_passphrase: None,
        }
    }
}

impl UpgradeConfig {
    /// Categories whose data survives an upgrade that keeps the data partition.
    pub fn kept_categories(&self) -> Vec<TransferCategory> {
        [
            (self.keep_user_settings, TransferCategory::Home),
            (self.keep_network_settings, TransferCategory::Network),
            (self.keep_printer_settings, TransferCategory::Printer),
            (self.keep_firewall_settings, TransferCategory::Firewall),
        ]
        .into_iter()
        .filter_map(|(keep, category)| keep.then_some(category))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintMode {
    #[default]
    None,
    Auto,
    Interactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentPrinting {
    pub mode: PrintMode,
    /// Directory relative to the exchange partition root
    pub directory: PathBuf,
    /// File extensions without dot, matched case-insensitively
    pub extensions: Vec<String>,
    pub recursive: bool,
}

impl Default for DocumentPrinting {
    fn default() -> Self {
        Self {
            mode: PrintMode::None,
            directory: PathBuf::new(),
            extensions: vec!["pdf".to_string(), "odt".to_string(), "docx".to_string()],
            recursive: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubdirectoryKind {
    ExchangePartitionLabel,
    StorageMediaSerialNumber,
    Timestamp,
}

/// One component of a backup subdirectory path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subdirectory {
    pub kind: SubdirectoryKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Subdirectory {
    pub fn new(kind: SubdirectoryKind, enabled: bool) -> Self {
        Self { kind, enabled }
    }
}

/// What happens to the data partition during a reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum DataPartitionReset {
    #[default]
    Keep,
    Format,
    Clear {
        #[serde(default)]
        system: bool,
        #[serde(default)]
        home: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    pub printing: DocumentPrinting,
    pub backup_exchange: bool,
    pub backup_destination: PathBuf,
    pub backup_subdirectories: Vec<Subdirectory>,
    pub format_exchange: bool,
    pub keep_exchange_label: bool,
    pub new_exchange_label: String,
    pub exchange_filesystem: ExchangeFilesystem,
    pub data: DataPartitionReset,
    pub restore: Vec<OverwriteEntry>,
    /// Skeleton the user's home is re-seeded from
    pub skeleton_dir: PathBuf,
    pub user_uid: u32,
    pub user_gid: u32,
    /// Unlocks encrypted data partitions
    pub encryption_passphrase: Option<String>,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            printing: DocumentPrinting::default(),
            backup_exchange: false,
            backup_destination: PathBuf::new(),
            backup_subdirectories: vec![
                Subdirectory::new(SubdirectoryKind::ExchangePartitionLabel, true),
                Subdirectory::new(SubdirectoryKind::StorageMediaSerialNumber, true),
                Subdirectory::new(SubdirectoryKind::Timestamp, true),
            ],
            format_exchange: false,
            keep_exchange_label: true,
            new_exchange_label: "Exchange".to_string(),
            exchange_filesystem: ExchangeFilesystem::default(),
            data: DataPartitionReset::Keep,
            restore: Vec::new(),
            skeleton_dir: PathBuf::from("/etc/skel"),
            user_uid: 1000,
            user_gid: 1000,
            encryption_passphrase: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_cut_by_bytes_at_char_boundaries() {
        assert_eq!(ExchangeFilesystem::Fat32.fit_label("Exchange 0001"), "Exchange 00");
        assert_eq!(ExchangeFilesystem::Fat32.fit_label("Stick"), "Stick");
        assert_eq!(ExchangeFilesystem::Fat32.fit_label("Données 001"), "Données 00");
        // the "ä" would straddle byte 11
        assert_eq!(ExchangeFilesystem::Fat32.fit_label("Klasse 10bä"), "Klasse 10b");
        assert_eq!(ExchangeFilesystem::Fat32.fit_label("Échange dossier").len(), 11);
        assert_eq!(ExchangeFilesystem::Exfat.fit_label("ÄÖÜäöüÄÖÜ"), "ÄÖÜäöüÄ");
    }

    #[test]
    fn auto_numbering_pads_and_steps() {
        let numbering = AutoNumbering {
            pattern: "NUM".to_string(),
            start: 1,
            increment: 2,
            min_digits: 3,
        };
        let mut number = numbering.start;
        let mut labels = Vec::new();
        for _ in 0..3 {
            labels.push(numbering.apply("Stick NUM", number));
            number = numbering.next(number);
        }
        assert_eq!(labels, vec!["Stick 001", "Stick 003", "Stick 005"]);
        assert_eq!(number, 7);
    }

    #[test]
    fn empty_pattern_leaves_label_alone() {
        assert_eq!(AutoNumbering::default().apply("NUM", 5), "NUM");
    }

    #[test]
    fn encryption_requires_passphrase_for_enabled_slots() {
        let mut options = EncryptionOptions {
            personal: true,
            ..Default::default()
        };
        assert!(options.missing_passphrase());
        options.personal_passphrase = "secret".to_string();
        assert!(!options.missing_passphrase());
        assert_eq!(options.passphrases(), vec!["secret".to_string()]);
    }

    #[test]
    fn transfer_categories_follow_flags() {
        let options = TransferOptions {
            source: Some("/dev/sdc".to_string()),
            home: true,
            firewall: true,
            ..Default::default()
        };
        assert_eq!(
            options.categories(),
            vec![TransferCategory::Home, TransferCategory::Firewall]
        );
        assert!(options.is_active());
    }

    #[test]
    fn configuration_tables_parse_from_toml() {
        let reset: ResetConfig = toml::from_str(
            r#"
            backup_exchange = true
            backup_destination = "/srv/backups"
            data = { action = "clear", home = true }

            [[backup_subdirectories]]
            kind = "timestamp"
            "#,
        )
        .unwrap();
        assert_eq!(reset.data, DataPartitionReset::Clear { system: false, home: true });
        assert_eq!(reset.backup_subdirectories.len(), 1);
        assert!(reset.backup_subdirectories[0].enabled);
        assert_eq!(reset.user_uid, 1000);

        let upgrade: UpgradeConfig = toml::from_str(
            r#"
            repartition = { strategy = "resize_exchange", size_mib = 512 }
            [backup]
            destination = "/srv/upgrade-backups"
            "#,
        )
        .unwrap();
        assert_eq!(
            upgrade.repartition,
            RepartitionStrategy::ResizeExchange { size_mib: 512 }
        );
        assert!(upgrade.backup.unwrap().incremental);
    }
}
