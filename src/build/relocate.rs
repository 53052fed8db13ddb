//! Shared-library relocation next to a consuming executable.
//!
//! - **Linux**: libraries are copied into the destination; the executable
//!   finds them through an `$ORIGIN/<dest>` runtime search path set at link time.
//! - **macOS**: libraries are copied and both the original and the copy get the
//!   install name `@rpath/<dest>/<lib>`; the executable searches `@loader_path`.
//! - Anything else: no-op.

use super::steps::{BuildStep, Step, StepRunner};
use crate::error::{IoContext, Result};
use colored::*;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static SHARED_LIBRARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(so(\.\d+)*|dylib|dll)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "macos" | "ios" => Platform::MacOs,
            "linux" | "android" | "freebsd" | "netbsd" | "openbsd" | "dragonfly" => {
                Platform::Linux
            }
            _ => Platform::Other,
        }
    }

    /// Runtime search path an executable needs to find libraries in `destination`.
    pub fn rpath(&self, destination: &str) -> Option<String> {
        match self {
            Platform::Linux if Path::new(destination).is_absolute() => {
                Some(destination.to_string())
            }
            Platform::Linux => Some(join_token("$ORIGIN", destination)),
            Platform::MacOs => Some("@loader_path".to_string()),
            Platform::Other => None,
        }
    }
}

fn join_token(token: &str, rest: &str) -> String {
    let rest = rest.trim_matches('/');
    if rest.is_empty() || rest == "." {
        token.to_string()
    } else {
        format!("{}/{}", token, rest)
    }
}

/// `libz.so`, `libz.so.1.2.13`, `libz.dylib`, `z.dll`.
pub fn is_shared_library(path: &Path) -> bool {
    SHARED_LIBRARY.is_match(&path.to_string_lossy())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Install name for Apple platforms.
    pub install_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationPlan {
    pub platform: Platform,
    pub destination_dir: PathBuf,
    pub entries: Vec<Relocation>,
}

impl RelocationPlan {
    /// Plan the copy of every shared library among `binaries` into
    /// `destination` (relative to `output_dir` unless absolute).
    pub fn plan(
        platform: Platform,
        binaries: &[PathBuf],
        output_dir: &Path,
        destination: &str,
    ) -> RelocationPlan {
        let destination_dir = output_dir.join(destination);
        let mut entries: Vec<Relocation> = Vec::new();
        for binary in binaries.iter().filter(|b| is_shared_library(b)) {
            let Some(file_name) = binary.file_name() else {
                continue;
            };
            if entries.iter().any(|e| e.source == *binary) {
                continue;
            }
            let install_name = if Path::new(destination).is_absolute() {
                destination_dir.join(file_name).to_string_lossy().into_owned()
            } else {
                let lib = file_name.to_string_lossy();
                format!("{}/{}", join_token("@rpath", destination), lib)
            };
            entries.push(Relocation {
                source: binary.clone(),
                destination: destination_dir.join(file_name),
                install_name,
            });
        }
        RelocationPlan {
            platform,
            destination_dir,
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn apply(&self, runner: &StepRunner) -> Result<()> {
        if self.platform == Platform::Other || self.entries.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.destination_dir).with_path(&self.destination_dir)?;

        for entry in &self.entries {
            if self.platform == Platform::MacOs {
                self.set_install_name(runner, &entry.source, &entry.install_name)?;
            }
            fs::copy(&entry.source, &entry.destination).with_path(&entry.destination)?;
            if self.platform == Platform::MacOs {
                self.set_install_name(runner, &entry.destination, &entry.install_name)?;
            }
        }
        println!(
            "   {} Relocated {} shared librar{} to {}",
            "📦".blue(),
            self.entries.len(),
            if self.entries.len() == 1 { "y" } else { "ies" },
            self.destination_dir.display()
        );
        Ok(())
    }

    fn set_install_name(&self, runner: &StepRunner, library: &Path, name: &str) -> Result<()> {
        let directory = library
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.destination_dir.clone());
        runner.run(&Step::Command(BuildStep::new(
            "install_name_tool",
            vec![
                "-id".to_string(),
                name.to_string(),
                library.to_string_lossy().to_string(),
            ],
            directory,
        )))
    }
}
