// SPDX-License-Identifier: GPL-3.0-only

//! Console output and prompts

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use livecopy_contracts::{ProgressEvent, ProgressReporter};
use livecopy_core::DocumentSelector;
use livecopy_types::{StorageDevice, StorageDeviceResult, bytes_to_pretty};

/// Listener for device resolution while lists are refreshed or hotplug
/// events are probed.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn resolution_started(&self, path: &str) {
        eprintln!("probing {path}...");
    }

    fn show_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

pub fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::BatchStarted { mode, devices } => {
            println!("{mode}: {devices} device(s)");
        }
        ProgressEvent::DeviceStarted {
            device,
            index,
            total,
            ..
        } => println!("[{index}/{total}] {device}"),
        ProgressEvent::Step { step } => println!("  {step}"),
        ProgressEvent::Progress { percent } => {
            print!("\r  {percent:>3}%");
            if *percent >= 100 {
                println!();
            }
            let _ = io::stdout().flush();
        }
        ProgressEvent::Line { text } => println!("    {text}"),
        ProgressEvent::Error { message } => eprintln!("  error: {message}"),
        ProgressEvent::DeviceFinished { device, error, .. } => match error {
            Some(error) => println!("  {device} failed: {error}"),
            None => println!("  {device} done"),
        },
        ProgressEvent::BatchFinished {
            mode,
            succeeded,
            failed,
        } => println!("{mode} finished: {succeeded} succeeded, {failed} failed"),
        ProgressEvent::ResolutionStarted { .. } | ProgressEvent::ResolutionFinished { .. } => {}
    }
}

pub fn print_devices(devices: &[StorageDevice]) {
    if devices.is_empty() {
        println!("no devices");
        return;
    }
    for device in devices {
        let system = if device.has_installed_system() {
            "live system"
        } else {
            ""
        };
        println!(
            "{:<14} {:>10}  {:<32} {}",
            device.path(),
            bytes_to_pretty(&device.size, false),
            device.display_name(),
            system
        );
    }
}

pub fn print_results(results: &[StorageDeviceResult]) {
    for result in results {
        let duration = result
            .duration()
            .map(|d| format!("{}s", d.num_seconds()))
            .unwrap_or_else(|| "-".to_string());
        let status = match result.error_message() {
            None if result.is_finished() => "ok".to_string(),
            None => "in progress".to_string(),
            Some(error) => format!("failed: {error}"),
        };
        println!(
            "{:<14} {:>10} {:>8}  {}",
            result.device.path(),
            bytes_to_pretty(&result.device.size, false),
            duration,
            status
        );
    }
}

/// Parse a selection like "1 3,4" against `count` choices. An empty answer
/// or "all" selects everything, "none" selects nothing. Out of range and
/// unparsable entries are skipped.
pub fn parse_selection(answer: &str, count: usize) -> Vec<usize> {
    let answer = answer.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case("all") {
        return (0..count).collect();
    }
    if answer.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    let mut selected: Vec<usize> = answer
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|part| part.parse::<usize>().ok())
        .filter(|&number| (1..=count).contains(&number))
        .map(|number| number - 1)
        .collect();
    selected.sort_unstable();
    selected.dedup();
    selected
}

fn prompt_documents(documents: &[PathBuf]) -> Vec<PathBuf> {
    println!("Documents found for printing:");
    for (number, document) in documents.iter().enumerate() {
        println!("  {:>2}) {}", number + 1, document.display());
    }
    print!("Print which documents? [all] ");
    let _ = io::stdout().flush();

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return Vec::new();
    }
    parse_selection(&answer, documents.len())
        .into_iter()
        .map(|index| documents[index].clone())
        .collect()
}

/// Asks on the terminal which documents to print. Runs on a worker thread
/// of the multi-threaded runtime.
pub fn document_prompt() -> DocumentSelector {
    Arc::new(|documents: &[PathBuf]| tokio::task::block_in_place(|| prompt_documents(documents)))
}
