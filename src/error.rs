//! Error taxonomy for the build graph.
//!
//! Fatal errors unwind to the top-level run. Recoverable conditions (name
//! conflicts, blocked archive entries) never surface as `Err`; they are
//! recorded as [`Warning`]s on the graph and the run continues.

use colored::*;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Malformed or missing descriptor fields.
    #[error("configuration error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    /// A dependency-only origin (repository, archive, package) used where no
    /// requesting context exists.
    #[error("'{origin}' origin cannot be used for the root project")]
    OriginConflict { origin: &'static str },

    #[error("failed to fetch {locator}: {message}")]
    FetchFailure { locator: String, message: String },

    #[error("command '{command}' failed in {} ({status})", directory.display())]
    CommandFailed {
        command: String,
        directory: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("no descriptor found for {} or any of its parents", directory.display())]
    MissingDescriptor { directory: PathBuf },

    #[error("dependency cycle: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        BuildError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn fetch(locator: impl Into<String>, message: impl fmt::Display) -> Self {
        BuildError::FetchFailure {
            locator: locator.into(),
            message: message.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }

    /// Diagnostics captured alongside the error (stderr of a failed step).
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            BuildError::CommandFailed { stderr, .. } if !stderr.trim().is_empty() => Some(stderr),
            _ => None,
        }
    }
}

/// Attach a path to a raw `std::io::Error`.
pub trait IoContext<T> {
    fn with_path(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|e| BuildError::io(path, e))
    }
}

/// A recoverable condition reported during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    NameConflict {
        name: String,
        kept: PathBuf,
        ignored: PathBuf,
    },
    ExtractionBlocked {
        archive: PathBuf,
        entry: String,
        reason: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::NameConflict {
                name,
                kept,
                ignored,
            } => write!(
                f,
                "project name '{}' already registered by {}, ignoring {}",
                name,
                kept.display(),
                ignored.display()
            ),
            Warning::ExtractionBlocked {
                archive,
                entry,
                reason,
            } => write!(
                f,
                "skipped '{}' from {}: {}",
                entry,
                archive.display(),
                reason
            ),
        }
    }
}

impl Warning {
    pub fn print(&self) {
        println!("{} Warning: {}", "!".yellow(), self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_carries_stderr() {
        let err = BuildError::CommandFailed {
            command: "make -j4".into(),
            directory: PathBuf::from("/tmp/x"),
            status: "exit status: 2".into(),
            stderr: "undefined reference to `foo'".into(),
        };
        assert!(err.to_string().contains("make -j4"));
        assert_eq!(err.diagnostics(), Some("undefined reference to `foo'"));
    }

    #[test]
    fn test_blank_stderr_is_not_a_diagnostic() {
        let err = BuildError::CommandFailed {
            command: "true".into(),
            directory: PathBuf::from("."),
            status: "exit status: 1".into(),
            stderr: "  \n".into(),
        };
        assert!(err.diagnostics().is_none());
    }

    #[test]
    fn test_cycle_message_lists_chain() {
        let err = BuildError::DependencyCycle {
            chain: vec!["a:app".into(), "b:lib".into(), "a:app".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a:app -> b:lib -> a:app");
    }
}
