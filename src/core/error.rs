/// Error taxonomy for database loading, compilation, and settings.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("compilation database not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot find compilation command for {}", .0.display())]
    NoCommand(PathBuf),

    #[error("malformed compilation database {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{program} failed ({status}){}", stderr_suffix(.stderr))]
    CompileFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("compilation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Superseded or user-cancelled runs are not reported to the user.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Timeouts count as compile failures.
    pub fn is_compile_failure(&self) -> bool {
        matches!(self, Error::CompileFailed { .. } | Error::Timeout(_))
    }

    /// Captured error-stream text, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::CompileFailed { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }

    pub(crate) fn compile_failed(program: &str, status: impl ToString, stderr: String) -> Self {
        Error::CompileFailed {
            program: program.to_string(),
            status: status.to_string(),
            stderr,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{}", trimmed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_compile_failure() {
        let err = Error::Timeout(Duration::from_millis(1500));
        assert!(err.is_compile_failure());
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "compilation timed out after 1.5s");
    }

    #[test]
    fn test_compile_failed_message_carries_stderr() {
        let err = Error::compile_failed("g++", "exit status: 1", "main.cpp:1:1: error: boom\n".into());
        assert_eq!(
            err.to_string(),
            "g++ failed (exit status: 1):\nmain.cpp:1:1: error: boom"
        );
        assert_eq!(err.stderr(), Some("main.cpp:1:1: error: boom\n"));
    }

    #[test]
    fn test_cancelled_is_silent() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.is_compile_failure());
    }
}
