// SPDX-License-Identifier: GPL-3.0-only

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use livecopy_core::{BatchContext, LiveCopyError, Resetter, ValidationError};
use livecopy_types::{
    DataPartitionReset, DocumentPrinting, OverwriteEntry, PrintMode, ResetConfig, Subdirectory,
    SubdirectoryKind,
};
use tempfile::TempDir;

use common::{FakeResolver, FakeTools, RecordingReporter, entries, installed_stick, session, write};

struct Fixture {
    tools: Arc<FakeTools>,
    skeleton: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let tools = FakeTools::new();
        let data = tools.dir("/dev/sdb3");
        fs::create_dir_all(data.join("lost+found")).unwrap();
        write(&data.join("persistence.conf"), "/ union\n# site\n");
        write(&data.join("rw/etc/hostname"), "stick-17");
        write(&data.join("rw/home/user/notes.txt"), "homework");
        write(&data.join("work/work/index"), "");

        let exchange = tools.dir("/dev/sdb2");
        write(&exchange.join("essay.pdf"), "pdf");
        write(&exchange.join("letter.odt"), "odt");
        write(&exchange.join("photo.png"), "png");

        let skeleton = tempfile::tempdir().unwrap();
        write(&skeleton.path().join(".bashrc"), "PS1='$ '");
        Self { tools, skeleton }
    }

    fn config(&self, data: DataPartitionReset) -> ResetConfig {
        ResetConfig {
            data,
            skeleton_dir: self.skeleton.path().to_path_buf(),
            ..Default::default()
        }
    }

    async fn reset(&self, config: ResetConfig, reporter: Arc<RecordingReporter>) -> livecopy_core::Result<livecopy_core::BatchOutcome> {
        let session = session(self.tools.clone(), FakeResolver::new([]));
        Resetter::new(session, config)
            .run(vec![installed_stick("sdb", "ext4")], &BatchContext::new(reporter))
            .await
    }

    fn data(&self) -> PathBuf {
        self.tools.dir("/dev/sdb3")
    }
}

#[tokio::test]
async fn formatting_leaves_only_a_fresh_layout() {
    let fixture = Fixture::new();
    let outcome = fixture
        .reset(fixture.config(DataPartitionReset::Format), Arc::default())
        .await
        .unwrap();
    assert!(outcome.results[0].succeeded(), "{:?}", outcome.results[0].error_message());

    let data = fixture.data();
    assert_eq!(entries(&data), vec!["lost+found", "persistence.conf", "rw"]);
    assert_eq!(fs::read_to_string(data.join("persistence.conf")).unwrap(), "/ union\n");
    assert_eq!(entries(&data.join("rw")), vec!["home"]);
    assert_eq!(entries(&data.join("rw/home")), vec!["user"]);
    assert_eq!(entries(&data.join("rw/home/user")), vec![".bashrc"]);
    assert!(fixture.tools.calls_of("format").contains(&"/dev/sdb3 ext4 persistence".to_string()));
    assert_eq!(
        fixture.tools.calls_of("chown"),
        vec![format!("{} 1000:1000", data.join("rw/home/user").display())]
    );
    assert!(fixture.tools.mounted().is_empty());
}

#[tokio::test]
async fn clearing_preserves_lost_and_found_and_configuration() {
    let fixture = Fixture::new();
    fixture
        .reset(
            fixture.config(DataPartitionReset::Clear {
                system: true,
                home: false,
            }),
            Arc::default(),
        )
        .await
        .unwrap();

    let data = fixture.data();
    assert_eq!(entries(&data), vec!["lost+found", "persistence.conf", "rw", "work"]);
    assert_eq!(fs::read_to_string(data.join("persistence.conf")).unwrap(), "/ union\n# site\n");
    assert_eq!(entries(&data.join("rw")), vec!["home"]);
    assert!(entries(&data.join("work")).is_empty());
    assert_eq!(fs::read_to_string(data.join("rw/home/user/notes.txt")).unwrap(), "homework");
    assert!(fixture.tools.calls_of("format").is_empty());
}

#[tokio::test]
async fn clearing_the_home_reseeds_it() {
    let fixture = Fixture::new();
    fixture
        .reset(
            fixture.config(DataPartitionReset::Clear {
                system: false,
                home: true,
            }),
            Arc::default(),
        )
        .await
        .unwrap();

    let data = fixture.data();
    assert_eq!(entries(&data.join("rw/home/user")), vec![".bashrc"]);
    assert!(data.join("rw/etc/hostname").exists());
}

#[tokio::test]
async fn documents_are_printed_and_exchange_is_backed_up_and_reformatted() {
    let fixture = Fixture::new();
    let backups = tempfile::tempdir().unwrap();
    let config = ResetConfig {
        printing: DocumentPrinting {
            mode: PrintMode::Auto,
            ..Default::default()
        },
        backup_exchange: true,
        backup_destination: backups.path().to_path_buf(),
        backup_subdirectories: vec![
            Subdirectory::new(SubdirectoryKind::StorageMediaSerialNumber, true),
            Subdirectory::new(SubdirectoryKind::ExchangePartitionLabel, true),
            Subdirectory::new(SubdirectoryKind::Timestamp, false),
        ],
        format_exchange: true,
        ..fixture.config(DataPartitionReset::Keep)
    };

    fixture.reset(config, Arc::default()).await.unwrap();

    let exchange = fixture.tools.dir("/dev/sdb2");
    assert_eq!(
        fixture.tools.calls_of("print"),
        vec![
            exchange.join("essay.pdf").display().to_string(),
            exchange.join("letter.odt").display().to_string(),
        ]
    );
    let backup = backups.path().join("SN-sdb/Exchange");
    assert_eq!(entries(&backup), vec!["essay.pdf", "letter.odt", "photo.png"]);
    assert!(fixture.tools.calls_of("format").contains(&"/dev/sdb2 vfat Exchange".to_string()));
    assert!(entries(&exchange).is_empty());
}

#[tokio::test]
async fn interactive_printing_asks_for_a_selection() {
    let fixture = Fixture::new();
    let reporter = Arc::new(RecordingReporter::default());
    *reporter.selection.lock().unwrap() = Some(1);
    let config = ResetConfig {
        printing: DocumentPrinting {
            mode: PrintMode::Interactive,
            ..Default::default()
        },
        ..fixture.config(DataPartitionReset::Keep)
    };

    fixture.reset(config, reporter).await.unwrap();
    assert_eq!(fixture.tools.calls_of("print").len(), 1);
}

#[tokio::test]
async fn missing_document_directory_is_reported_and_the_reset_continues() {
    let fixture = Fixture::new();
    let reporter = Arc::new(RecordingReporter::default());
    let config = ResetConfig {
        printing: DocumentPrinting {
            mode: PrintMode::Auto,
            directory: PathBuf::from("to-print"),
            ..Default::default()
        },
        ..fixture.config(DataPartitionReset::Format)
    };

    let outcome = fixture.reset(config, reporter.clone()).await.unwrap();
    assert!(outcome.results[0].succeeded());
    assert_eq!(reporter.errors().len(), 1);
    assert!(reporter.errors()[0].contains("to-print"));
    assert!(fixture.tools.calls_of("print").is_empty());
    assert_eq!(entries(&fixture.data().join("rw/home/user")), vec![".bashrc"]);
}

#[tokio::test]
async fn restored_files_belong_to_the_user() {
    let fixture = Fixture::new();
    let host = tempfile::tempdir().unwrap();
    write(&host.path().join("bookmarks.html"), "<a>school</a>");
    let config = ResetConfig {
        restore: vec![OverwriteEntry {
            source: host.path().join("bookmarks.html"),
            destination: PathBuf::from("/home/user/bookmarks.html"),
        }],
        user_uid: 1001,
        user_gid: 1001,
        ..fixture.config(DataPartitionReset::Keep)
    };

    fixture.reset(config, Arc::default()).await.unwrap();
    let restored = fixture.data().join("rw/home/user/bookmarks.html");
    assert_eq!(fs::read_to_string(&restored).unwrap(), "<a>school</a>");
    assert_eq!(
        fixture.tools.calls_of("chown"),
        vec![format!("{} 1001:1001", restored.display())]
    );
}

#[tokio::test]
async fn the_running_boot_device_is_left_mounted() {
    let fixture = Fixture::new();
    fixture.tools.boot_from("/dev/sdb1");
    fixture
        .reset(fixture.config(DataPartitionReset::Format), Arc::default())
        .await
        .unwrap();

    assert!(!fixture
        .tools
        .calls_of("unmount")
        .iter()
        .any(|mount_point| mount_point == "/run/live/medium"));
}

#[tokio::test]
async fn partitions_of_the_running_system_are_not_formatted() {
    let fixture = Fixture::new();
    fixture.tools.boot_from("/dev/sdb1");
    let backups = tempfile::tempdir().unwrap();
    let reporter = Arc::new(RecordingReporter::default());
    let config = ResetConfig {
        format_exchange: true,
        backup_exchange: true,
        backup_destination: backups.path().to_path_buf(),
        ..fixture.config(DataPartitionReset::Format)
    };

    let outcome = fixture.reset(config, reporter.clone()).await.unwrap();
    assert!(outcome.results[0].succeeded(), "{:?}", outcome.results[0].error_message());
    assert!(fixture.tools.calls_of("format").is_empty());
    assert_eq!(reporter.errors().len(), 2, "{:?}", reporter.errors());
    assert!(reporter.errors().iter().all(|e| e.contains("/dev/sdb runs the current system")));

    assert_eq!(entries(&fixture.tools.dir("/dev/sdb2")), vec!["essay.pdf", "letter.odt", "photo.png"]);
    assert_eq!(fs::read_to_string(fixture.data().join("rw/home/user/notes.txt")).unwrap(), "homework");
    assert!(!entries(backups.path()).is_empty());
}

#[tokio::test]
async fn encrypted_data_needs_a_passphrase() {
    let tools = FakeTools::new();
    let session = session(tools.clone(), FakeResolver::new([]));
    let resetter = Resetter::new(
        session,
        ResetConfig {
            data: DataPartitionReset::Format,
            ..Default::default()
        },
    );

    let err = resetter
        .run(
            vec![installed_stick("sdb", "crypto_LUKS")],
            &BatchContext::new(Arc::new(RecordingReporter::default())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LiveCopyError::Validation(ValidationError::PassphraseRequired)));
    assert!(tools.calls().is_empty());
}
