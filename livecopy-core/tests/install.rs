// SPDX-License-Identifier: GPL-3.0-only

mod common;

use std::fs;
use std::sync::Arc;

use livecopy_contracts::{NullReporter, ProgressEvent};
use livecopy_core::task::{self, Operation};
use livecopy_core::{BatchContext, Installer, LiveCopyError, ValidationError};
use livecopy_types::{AutoNumbering, EncryptionOptions, InstallConfig, SizeError};

use common::{FakeResolver, FakeTools, GIB, Medium, RecordingReporter, blank_stick, entries, session};

fn config() -> InstallConfig {
    InstallConfig {
        exchange_size_mib: 500,
        ..Default::default()
    }
}

#[tokio::test]
async fn installs_layout_content_and_bootloader() {
    let medium = Medium::new();
    let tools = FakeTools::new();
    let session = session(tools.clone(), FakeResolver::new([]));
    let installer = Installer::new(session, medium.source().await, config());

    let outcome = installer
        .run(vec![blank_stick("sdb", 8 * GIB)], &BatchContext::new(Arc::new(NullReporter)))
        .await
        .unwrap();
    assert!(outcome.results[0].succeeded(), "{:?}", outcome.results[0].error_message());

    assert_eq!(entries(&tools.dir("/dev/sdb1")), vec!["EFI", "boot"]);
    assert_eq!(entries(&tools.dir("/dev/sdb4")), vec![".disk", "live"]);
    assert_eq!(
        entries(&tools.dir("/dev/sdb3")),
        vec!["lost+found", "persistence.conf", "rw", "work"]
    );
    assert_eq!(
        tools.calls_of("format"),
        vec![
            "/dev/sdb1 vfat EFI",
            "/dev/sdb2 vfat Exchange",
            "/dev/sdb3 ext4 persistence",
            "/dev/sdb4 vfat system",
        ]
    );

    let calls = tools.calls();
    let bootloader = calls.iter().position(|c| c == "bootloader /dev/sdb").unwrap();
    let last_data_unmount = calls
        .iter()
        .rposition(|c| c.starts_with("unmount") && c.contains("dev_sdb3"))
        .unwrap();
    assert!(last_data_unmount < bootloader);
    assert!(tools.mounted().is_empty());
}

#[tokio::test]
async fn auto_numbering_labels_devices_and_returns_the_counter() {
    let medium = Medium::new();
    let tools = FakeTools::new();
    let session = session(tools.clone(), FakeResolver::new([]));
    let installer = Installer::new(
        session,
        medium.source().await,
        InstallConfig {
            exchange_label: "NUM".to_string(),
            auto_numbering: Some(AutoNumbering {
                pattern: "NUM".to_string(),
                start: 1,
                increment: 2,
                min_digits: 3,
            }),
            ..config()
        },
    );

    let devices = ["sdb", "sdc", "sdd"].map(|name| blank_stick(name, 8 * GIB)).to_vec();
    let outcome = installer
        .run(devices, &BatchContext::new(Arc::new(NullReporter)))
        .await
        .unwrap();

    let labels: Vec<String> = tools
        .calls_of("format")
        .into_iter()
        .filter(|call| call.split(' ').next().is_some_and(|p| p.ends_with('2')))
        .map(|call| call.rsplit(' ').next().unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["001", "003", "005"]);
    assert_eq!(outcome.next_auto_number, Some(7));
}

#[tokio::test]
async fn a_failing_device_does_not_stop_the_batch() {
    let medium = Medium::new();
    let tools = FakeTools::new();
    tools.fail_when("format", "/dev/sdc");
    let session = session(tools.clone(), FakeResolver::new([]));
    let installer = Installer::new(session, medium.source().await, config());
    let reporter = Arc::new(RecordingReporter::default());

    let devices = ["sdb", "sdc", "sdd"].map(|name| blank_stick(name, 8 * GIB)).to_vec();
    let context = BatchContext::new(reporter.clone());
    let outcome = installer.run(devices, &context).await.unwrap();

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(context.ledger.len(), 3);
    assert!(outcome.results[1].error_message().is_some_and(|e| e.contains("injected")));
    for index in [0, 2] {
        assert!(outcome.results[index].error_message().is_none());
        assert!(outcome.results[index].duration().is_some());
    }
    assert!(outcome.results[1].duration().is_some());
    assert_eq!(outcome.failed(), 1);
    assert_eq!(reporter.errors().len(), 1);
    assert!(tools.mounted().is_empty(), "failed device left mounts behind");
    assert_eq!(tools.calls_of("bootloader"), vec!["/dev/sdb", "/dev/sdd"]);
}

#[tokio::test]
async fn validation_rejects_before_touching_devices() {
    let medium = Medium::new();
    let tools = FakeTools::new();
    let session = session(tools.clone(), FakeResolver::new([]));
    let installer = Installer::new(
        session.clone(),
        medium.source().await,
        InstallConfig {
            exchange_size_mib: 8 * 1024,
            ..Default::default()
        },
    );
    let context = BatchContext::new(Arc::new(NullReporter));

    let err = installer.run(Vec::new(), &context).await.unwrap_err();
    assert!(matches!(err, LiveCopyError::Validation(ValidationError::NoDevices)));

    let err = installer
        .run(vec![blank_stick("sdb", 8 * GIB)], &context)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LiveCopyError::Validation(ValidationError::Size {
            source: SizeError::ExchangeTooLarge { .. },
            ..
        })
    ));

    let encrypted = Installer::new(
        session,
        medium.source().await,
        InstallConfig {
            encryption: EncryptionOptions {
                personal: true,
                ..Default::default()
            },
            ..config()
        },
    );
    let err = encrypted
        .run(vec![blank_stick("sdb", 8 * GIB)], &context)
        .await
        .unwrap_err();
    assert!(matches!(err, LiveCopyError::Validation(ValidationError::PassphraseRequired)));

    assert!(tools.calls().is_empty());
    assert!(context.ledger.is_empty());
}

#[tokio::test]
async fn running_boot_device_is_never_a_target() {
    let medium = Medium::new();
    let tools = FakeTools::new();
    tools.boot_from("/dev/sdb1");
    let session = session(tools.clone(), FakeResolver::new([]));
    let installer = Installer::new(session, medium.source().await, config());

    let err = installer
        .run(vec![blank_stick("sdb", 8 * GIB)], &BatchContext::new(Arc::new(NullReporter)))
        .await
        .unwrap_err();
    assert!(matches!(err, LiveCopyError::Validation(ValidationError::Unsupported { .. })));
    assert!(tools.calls_of("partition").is_empty());
}

#[tokio::test]
async fn encrypted_install_formats_the_mapping_and_marks_boot_entries() {
    let medium = Medium::new();
    let tools = FakeTools::new();
    let session = session(tools.clone(), FakeResolver::new([]));
    let installer = Installer::new(
        session,
        medium.source().await,
        InstallConfig {
            overwrite_data_with_random: true,
            encryption: EncryptionOptions {
                personal: true,
                personal_passphrase: "correct horse".to_string(),
                secondary: true,
                secondary_passphrase: "staff key".to_string(),
            },
            ..config()
        },
    );

    let outcome = installer
        .run(vec![blank_stick("sdb", 8 * GIB)], &BatchContext::new(Arc::new(NullReporter)))
        .await
        .unwrap();
    assert!(outcome.results[0].succeeded(), "{:?}", outcome.results[0].error_message());

    let calls = tools.calls();
    let overwrite = calls.iter().position(|c| c == "overwrite /dev/sdb3").unwrap();
    let luks = calls.iter().position(|c| c == "luks_format /dev/sdb3 2").unwrap();
    assert!(overwrite < luks);
    assert!(tools
        .calls_of("format")
        .contains(&"/dev/mapper/livecopy-sdb3 ext4 persistence".to_string()));
    assert_eq!(tools.calls_of("luks_close"), vec!["livecopy-sdb3"]);
    assert!(entries(&tools.dir("/dev/mapper/livecopy-sdb3")).contains(&"persistence.conf".to_string()));

    let grub = fs::read_to_string(tools.dir("/dev/sdb1").join("boot/grub/grub.cfg")).unwrap();
    assert!(grub.contains("boot=live components persistence-encryption=luks"));
}

#[tokio::test]
async fn batches_of_one_mode_run_one_after_another() {
    let medium = Medium::new();
    let tools = FakeTools::new();
    let session = session(tools.clone(), FakeResolver::new([]));
    let installer = Installer::new(session, medium.source().await, config());
    let reporter = Arc::new(RecordingReporter::default());
    let first = BatchContext::new(reporter.clone());
    let second = BatchContext::new(reporter.clone());

    let (a, b) = tokio::join!(
        installer.run(vec![blank_stick("sdb", 8 * GIB)], &first),
        installer.run(vec![blank_stick("sdc", 8 * GIB)], &second),
    );
    a.unwrap();
    b.unwrap();

    let batch_events: Vec<String> = reporter
        .events()
        .into_iter()
        .filter(|e| e.starts_with("batch_"))
        .map(|e| e.split(' ').next().unwrap().to_string())
        .collect();
    assert_eq!(
        batch_events,
        vec!["batch_started", "batch_finished", "batch_started", "batch_finished"]
    );
}

#[tokio::test]
async fn spawned_install_publishes_events_and_resolves() {
    let medium = Medium::new();
    let tools = FakeTools::new();
    let session = session(tools, FakeResolver::new([]));
    let installer = Installer::new(session, medium.source().await, config());

    let mut handle = task::spawn(Operation::Install(installer), vec![blank_stick("sdb", 8 * GIB)], None);
    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert!(matches!(events.first(), Some(ProgressEvent::BatchStarted { devices: 1, .. })));
    assert!(events.iter().any(|e| matches!(e, ProgressEvent::Progress { percent: 100 })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::BatchFinished { succeeded: 1, failed: 0, .. })
    ));
}
