//! Layered tool settings.
//!
//! Settings are read from TOML files, lowest priority first, and merged
//! table-by-table so a later file only overrides the keys it names:
//!
//! 1. `/etc/nest/config.toml`
//! 2. `~/.nest/config.toml`
//! 3. `<root>/.nest/config.toml`
//! 4. `<root>/.nest.toml`
//! 5. the file passed with `--config`
//!
//! Command-line switches are applied on top by the caller.

use crate::descriptor::{Descriptor, OutputType, SourceEntry, TargetSpec};
use crate::error::{BuildError, Result};
use colored::*;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Settings {
    pub compile_flags: String,
    pub link_flags: String,
    pub flags: String,
    /// Include directories added to every native target, relative to its project.
    pub includes: Vec<String>,
    /// Re-sync repository dependencies that are already cloned.
    pub update_dependencies: bool,
    pub jobs: Option<usize>,
    pub verbose: bool,
    /// Descriptor used for directories without a `nest.toml` / `nest.json`.
    pub default_build: Descriptor,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            compile_flags: "-Wall".to_string(),
            link_flags: String::new(),
            flags: String::new(),
            includes: vec![".".to_string()],
            update_dependencies: false,
            jobs: None,
            verbose: false,
            default_build: default_build(),
        }
    }
}

impl Settings {
    /// Parallel jobs handed to the native backend for a parallel target.
    pub fn jobs(&self) -> usize {
        self.jobs.filter(|j| *j > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

fn default_build() -> Descriptor {
    let glob = |pattern: &str| SourceEntry::Glob {
        glob: pattern.to_string(),
    };
    Descriptor {
        project_name: None,
        targets: vec![TargetSpec {
            name: Some("a.out".to_string()),
            output: Some(OutputType::Executable),
            sources: vec![glob("*.cpp"), glob("*.c"), glob("src/*.cpp"), glob("src/*.c")],
            ..Default::default()
        }],
        sources_lists: Default::default(),
    }
}

/// Candidate settings files for a project rooted at `root`, lowest priority first.
pub fn settings_locations(root: &Path) -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from("/etc/nest/config.toml")];
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".nest").join("config.toml"));
    }
    locations.push(root.join(".nest").join("config.toml"));
    locations.push(root.join(".nest.toml"));
    locations
}

pub fn load_settings(root: &Path, explicit: Option<&Path>) -> Result<Settings> {
    let mut merged = toml::Value::Table(Default::default());

    for path in settings_locations(root) {
        match fs::read_to_string(&path) {
            Ok(content) => merge_values(&mut merged, parse_layer(&path, &content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => println!(
                "{} Warning: could not read settings file {}: {}",
                "!".yellow(),
                path.display(),
                e
            ),
        }
    }

    if let Some(path) = explicit {
        let content = fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        merge_values(&mut merged, parse_layer(path, &content)?);
    }

    merged
        .try_into::<Settings>()
        .map_err(|e| BuildError::config(root, format!("invalid settings: {}", e)))
}

fn parse_layer(path: &Path, content: &str) -> Result<toml::Value> {
    toml::from_str(content).map_err(|e| BuildError::config(path, e.to_string()))
}

/// Merge `overlay` into `base`: tables merge key by key, anything else is replaced.
pub fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => {
                        if existing.type_str() != value.type_str() {
                            println!(
                                "{} Warning: setting '{}' changes type ({} -> {})",
                                "!".yellow(),
                                key,
                                existing.type_str(),
                                value.type_str()
                            );
                        }
                        merge_values(existing, value);
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
