// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Failure of a host tool invocation or host file operation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("`{command}` failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("required tool not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

impl ToolError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<std::io::Error> for ToolError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            context: "I/O error".to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failure_names_the_command() {
        let error = ToolError::CommandFailed {
            command: "mkfs.ext4 -L persistence /dev/sdb3".to_string(),
            code: Some(1),
            stderr: "device busy".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("mkfs.ext4 -L persistence /dev/sdb3"));
        assert!(message.contains("device busy"));
    }
}
