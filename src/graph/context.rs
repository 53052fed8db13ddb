use super::{ContextId, TargetId};
use crate::descriptor::Descriptor;
use std::path::PathBuf;

/// Outputs land in `<project>/build`.
pub const OUTPUT_DIR: &str = "build";

/// A build unit rooted at one canonical directory.
#[derive(Debug, Clone)]
pub struct Context {
    pub id: ContextId,
    pub directory: PathBuf,
    pub parent: Option<ContextId>,
    /// Nesting level; the root is 0.
    pub depth: usize,
    pub project_name: String,
    pub descriptor: Descriptor,
    /// The descriptor file, if the directory has one.
    pub descriptor_path: Option<PathBuf>,
    pub targets: Vec<TargetId>,
    pub children: Vec<ContextId>,
}

impl Context {
    pub fn output_dir(&self) -> PathBuf {
        self.directory.join(OUTPUT_DIR)
    }

    /// Per-context library cache for fetched dependencies.
    pub fn libs_dir(&self) -> PathBuf {
        self.output_dir().join(".deps")
    }

    pub fn build_root(&self) -> PathBuf {
        self.output_dir().join(".build")
    }

    pub fn target_build_dir(&self, target: &str) -> PathBuf {
        self.build_root().join(format!("__target_{}", target))
    }

    /// Descriptor file for error messages, real or where it would be.
    pub fn descriptor_hint(&self) -> PathBuf {
        self.descriptor_path
            .clone()
            .unwrap_or_else(|| self.directory.join(crate::descriptor::DESCRIPTOR_FILES[0]))
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
