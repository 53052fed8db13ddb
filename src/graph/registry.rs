//! Deduplication tables for build units.

use super::ContextId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Canonical directory -> context. At most one context per directory.
#[derive(Debug, Default)]
pub struct ContextCache {
    by_directory: HashMap<PathBuf, ContextId>,
}

impl ContextCache {
    pub fn get(&self, directory: &Path) -> Option<ContextId> {
        self.by_directory.get(directory).copied()
    }

    /// Insert unless present; returns the id that ends up bound.
    pub fn get_or_insert(&mut self, directory: PathBuf, id: ContextId) -> ContextId {
        *self.by_directory.entry(directory).or_insert(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    New,
    /// The name was already bound to this same directory.
    SameDirectory,
    /// The name belongs to another directory; the first binding is kept.
    Conflict { kept: PathBuf },
}

/// Project name -> canonical directory. First registration wins.
#[derive(Debug, Default)]
pub struct GlobalRegistry {
    projects: HashMap<String, PathBuf>,
}

impl GlobalRegistry {
    pub fn register(&mut self, name: &str, directory: &Path) -> Registration {
        match self.projects.get(name) {
            Some(existing) if existing == directory => Registration::SameDirectory,
            Some(existing) => Registration::Conflict {
                kept: existing.clone(),
            },
            None => {
                self.projects.insert(name.to_string(), directory.to_path_buf());
                Registration::New
            }
        }
    }

    pub fn directory_of(&self, name: &str) -> Option<&Path> {
        self.projects.get(name).map(PathBuf::as_path)
    }
}
