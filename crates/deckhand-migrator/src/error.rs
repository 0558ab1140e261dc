//! Migration failures. All of them are fatal for the apply that fired the
//! migration; none is retried.

use std::time::Duration;

use thiserror::Error;

pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration command is empty")]
    EmptyCommand,

    #[error("required environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for migration: {0}")]
    Wait(#[source] std::io::Error),

    /// The tool was killed at the deadline. Output holds whatever it wrote
    /// before that.
    #[error("migration timed out after {after:?}")]
    TimedOut {
        after: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("migration killed by signal {signal}")]
    Signaled {
        signal: i32,
        stdout: String,
        stderr: String,
    },

    #[error("migration exited with code {code}")]
    Exited {
        code: i32,
        stdout: String,
        stderr: String,
    },
}

impl MigrationError {
    /// Captured tool output, when the tool ran far enough to produce any.
    pub fn diagnostics(&self) -> Option<String> {
        self.output().map(|(stdout, stderr)| combine(stdout, stderr))
    }

    /// Raw `(stdout, stderr)` of a tool that was started.
    pub fn output(&self) -> Option<(&str, &str)> {
        match self {
            MigrationError::Exited { stdout, stderr, .. }
            | MigrationError::TimedOut { stdout, stderr, .. }
            | MigrationError::Signaled { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }

    /// Exit code to report for this failure. Signal deaths follow the shell
    /// convention of 128 plus the signal number.
    pub fn exit_code(&self) -> i32 {
        match self {
            MigrationError::Exited { code, .. } => *code,
            MigrationError::Signaled { signal, .. } => 128 + signal,
            _ => 1,
        }
    }
}

pub(crate) fn combine(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        stdout.to_string()
    } else {
        format!("{stdout}\nSTDERR:\n{stderr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let err = MigrationError::TimedOut {
            after: Duration::from_millis(250),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "migration timed out after 250ms");

        let err = MigrationError::TimedOut {
            after: Duration::from_secs(120),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "migration timed out after 120s");
    }

    #[test]
    fn only_started_tools_have_diagnostics() {
        assert!(MigrationError::EmptyCommand.diagnostics().is_none());
        let err = MigrationError::Signaled {
            signal: 9,
            stdout: "applying 0002_orders".into(),
            stderr: "out of memory".into(),
        };
        assert_eq!(
            err.diagnostics().as_deref(),
            Some("applying 0002_orders\nSTDERR:\nout of memory")
        );
    }
}
