//! Buildable units and their lifecycle.
//!
//! A target moves monotonically through
//! `Created -> Resolving -> DependenciesResolved -> Processed -> {Skipped | Built} -> PostBuilt`.
//! Its kind is fixed at construction and decides how it is processed and
//! when it is stale.

use crate::backend::ProjectDescription;
use crate::build::relocate::RelocationPlan;
use crate::build::steps::{BuildStep, Step, modified};
use crate::config::Settings;
use crate::descriptor::{BuildType, Descriptor, DependencySpec, OutputType, TargetSpec, expand_sources};
use crate::error::{BuildError, Result};
use crate::graph::{ContextId, TargetId};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetState {
    Created,
    /// Dependencies are being resolved and processed. Seeing this state on
    /// re-entry means the graph has a cycle.
    Resolving,
    DependenciesResolved,
    Processed,
    Skipped,
    Built,
    PostBuilt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeOptions {
    pub flags: String,
    pub compile_flags: String,
    pub link_flags: String,
    pub parallel: bool,
    pub dynamic_libs_destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Native(NativeOptions),
    InstalledPackage {
        package: String,
        search_path: Option<PathBuf>,
    },
    Autoconf,
    Custom,
}

impl TargetKind {
    pub fn label(&self) -> &'static str {
        match self {
            TargetKind::Native(_) => "native",
            TargetKind::InstalledPackage { .. } => "package",
            TargetKind::Autoconf => "autoconf",
            TargetKind::Custom => "custom",
        }
    }
}

/// Result of the staleness check for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Stale(&'static str),
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Staleness::Stale(_))
    }
}

#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub context: ContextId,
    pub name: String,
    pub output: OutputType,
    pub kind: TargetKind,
    /// Absolute include directories this target exports.
    pub includes: Vec<PathBuf>,
    pub sources: Vec<PathBuf>,
    /// Declared or backend-reported artifacts.
    pub target_files: Vec<PathBuf>,
    pub pre_build_steps: Vec<Step>,
    pub build_steps: Vec<Step>,
    pub post_build_steps: Vec<Step>,
    pub dependency_specs: Vec<DependencySpec>,
    pub build_dependency_specs: Vec<DependencySpec>,
    /// Link dependencies, resolved during processing.
    pub dependencies: Vec<TargetId>,
    pub build_dependencies: Vec<TargetId>,
    pub state: TargetState,
    pub built: bool,
    /// Last project description handed to the native backend.
    pub description: Option<ProjectDescription>,
    pub relocation: Option<RelocationPlan>,
}

impl Target {
    /// Build a target from its descriptor entry. `spec` must already have the
    /// platform overlay merged in.
    pub fn from_spec(
        id: TargetId,
        context: ContextId,
        spec: &TargetSpec,
        directory: &Path,
        descriptor: &Descriptor,
        descriptor_file: &Path,
        settings: &Settings,
    ) -> Result<Target> {
        let name = spec.name.clone().unwrap_or_else(|| {
            directory
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "target".to_string())
        });
        let build_type = spec.build_type.unwrap_or_default();

        let mut includes: Vec<PathBuf> = spec.includes.iter().map(|i| directory.join(i)).collect();

        let mut sources = expand_sources(&spec.sources, directory)?;
        for list in &spec.sources_lists {
            let Some(entries) = descriptor.sources_lists.get(list) else {
                return Err(BuildError::config(
                    descriptor_file,
                    format!("target '{}' uses unknown sources list '{}'", name, list),
                ));
            };
            sources.extend(expand_sources(entries, directory)?);
        }

        let mut build_steps = Step::from_specs(&spec.build_steps, directory, descriptor_file)?;

        let kind = match build_type {
            BuildType::Native => {
                includes.extend(settings.includes.iter().map(|i| directory.join(i)));
                TargetKind::Native(NativeOptions {
                    flags: or_default(&spec.flags, &settings.flags),
                    compile_flags: or_default(&spec.compile_flags, &settings.compile_flags),
                    link_flags: or_default(&spec.link_flags, &settings.link_flags),
                    parallel: spec.parallel_build.unwrap_or(true),
                    dynamic_libs_destination: spec
                        .dynamic_libs_destination
                        .clone()
                        .filter(|d| !d.is_empty()),
                })
            }
            BuildType::Package => TargetKind::InstalledPackage {
                package: spec.package.clone().unwrap_or_else(|| name.clone()),
                search_path: spec.search_path.as_ref().map(|p| directory.join(p)),
            },
            BuildType::Autoconf => {
                build_steps = autoconf_steps(spec, directory);
                TargetKind::Autoconf
            }
            BuildType::Custom => TargetKind::Custom,
        };

        Ok(Target {
            id,
            context,
            name,
            output: spec.output.unwrap_or_default(),
            kind,
            includes,
            sources,
            target_files: spec.target_files.iter().map(|f| directory.join(f)).collect(),
            pre_build_steps: Step::from_specs(&spec.pre_build_steps, directory, descriptor_file)?,
            build_steps,
            post_build_steps: Step::from_specs(&spec.post_build_steps, directory, descriptor_file)?,
            dependency_specs: spec.dependencies.clone(),
            build_dependency_specs: spec.build_dependencies.clone(),
            dependencies: Vec::new(),
            build_dependencies: Vec::new(),
            state: TargetState::Created,
            built: false,
            description: None,
            relocation: None,
        })
    }

    pub fn is_processed(&self) -> bool {
        self.state >= TargetState::Processed
    }

    /// `build()` already ran this session.
    pub fn is_finished(&self) -> bool {
        self.state >= TargetState::Skipped
    }

    /// Native targets without sources only export includes.
    pub fn is_header_only(&self) -> bool {
        matches!(self.kind, TargetKind::Native(_)) && self.sources.is_empty()
    }

    /// Staleness oracle.
    ///
    /// `dependency_built` tells whether any link or build dependency was
    /// rebuilt this run; `descriptor_mtime` is only consulted for declared
    /// target files that exist.
    pub fn staleness(
        &self,
        dependency_built: bool,
        descriptor_mtime: impl FnOnce() -> Result<SystemTime>,
    ) -> Result<Staleness> {
        match self.kind {
            TargetKind::Native(_) => Ok(Staleness::Stale("native targets always reach the backend")),
            TargetKind::InstalledPackage { .. } => Ok(Staleness::Fresh),
            TargetKind::Autoconf | TargetKind::Custom => {
                if dependency_built {
                    return Ok(Staleness::Stale("a dependency was rebuilt"));
                }
                let mut present = Vec::with_capacity(self.target_files.len());
                for file in &self.target_files {
                    match modified(file) {
                        Some(mtime) => present.push(mtime),
                        None => return Ok(Staleness::Stale("a target file is missing")),
                    }
                }
                if present.is_empty() {
                    return Ok(Staleness::Fresh);
                }
                let descriptor_mtime = descriptor_mtime()?;
                if present.iter().any(|mtime| *mtime < descriptor_mtime) {
                    Ok(Staleness::Stale("the descriptor is newer than a target file"))
                } else {
                    Ok(Staleness::Fresh)
                }
            }
        }
    }

    /// Custom and autoconf targets refresh their declared files after a build
    /// attempt.
    pub fn touches_outputs(&self) -> bool {
        matches!(self.kind, TargetKind::Autoconf | TargetKind::Custom)
    }
}

fn or_default(value: &Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.clone(),
        _ => default.to_string(),
    }
}

/// `./configure` then `make`, each in its own overridable directory.
fn autoconf_steps(spec: &TargetSpec, directory: &Path) -> Vec<Step> {
    let base = spec.autoconf_directory.as_deref().unwrap_or("");
    let configure_dir = spec.configure_directory.as_deref().unwrap_or(base);
    let make_dir = spec.make_directory.as_deref().unwrap_or(base);
    vec![
        Step::Command(BuildStep::new(
            "./configure",
            spec.configure_params.clone(),
            directory.join(configure_dir),
        )),
        Step::Command(BuildStep::new(
            "make",
            spec.make_params.clone(),
            directory.join(make_dir),
        )),
    ]
}
