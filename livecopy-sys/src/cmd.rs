// SPDX-License-Identifier: GPL-3.0-only

//! External command execution
//!
//! Commands are given as a program name plus arguments; the rendered form is
//! used in logs and in [`ToolError::CommandFailed`].

use std::io::ErrorKind;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use livecopy_contracts::{LineFn, ToolError};

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

pub fn render(command: &str, args: &[&str]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

fn spawn_error(command: &str, rendered: &str, error: std::io::Error) -> ToolError {
    if error.kind() == ErrorKind::NotFound {
        ToolError::NotFound(command.to_string())
    } else {
        ToolError::io(format!("failed to start `{rendered}`"), error)
    }
}

/// Run a command to completion and collect its output.
pub async fn run(command: &str, args: &[&str]) -> Result<CommandOutcome, ToolError> {
    run_with_input(command, args, None).await
}

/// Run a command, feeding `input` to its stdin. Used for passphrases so they
/// never appear on a command line.
pub async fn run_with_input(
    command: &str,
    args: &[&str],
    input: Option<&str>,
) -> Result<CommandOutcome, ToolError> {
    let rendered = render(command, args);
    debug!(command = %rendered, "running");

    let mut child = Command::new(command)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| spawn_error(command, &rendered, error))?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|error| ToolError::io(format!("writing stdin of `{rendered}`"), error))?;
        // dropping stdin closes the pipe
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|error| ToolError::io(format!("waiting for `{rendered}`"), error))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        return Err(ToolError::CommandFailed {
            command: rendered,
            code: output.status.code(),
            stderr,
        });
    }

    Ok(CommandOutcome {
        command: rendered,
        stdout,
        stderr,
    })
}

/// Run a command and hand every stdout line to `on_line` as it arrives.
pub async fn run_streaming(
    command: &str,
    args: &[&str],
    on_line: LineFn<'_>,
) -> Result<(), ToolError> {
    let rendered = render(command, args);
    debug!(command = %rendered, "running (streaming)");

    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| spawn_error(command, &rendered, error))?;

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buffer = String::new();
            let _ = stderr.read_to_string(&mut buffer).await;
            buffer
        })
    });

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|error| ToolError::io(format!("reading output of `{rendered}`"), error))?
        {
            on_line(&line);
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|error| ToolError::io(format!("waiting for `{rendered}`"), error))?;

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        return Err(ToolError::CommandFailed {
            command: rendered,
            code: status.code(),
            stderr,
        });
    }
    Ok(())
}
