//! Native build backend seam.
//!
//! The orchestrator never compiles anything itself. It describes each native
//! target as a [`ProjectDescription`] and hands it to a [`NativeBackend`],
//! which reports back where the artifacts will land.

mod cmake;

pub use cmake::{CMakeBackend, parse_markers, render_package, render_project};

use crate::build::steps::StepRunner;
use crate::descriptor::OutputType;
use crate::error::Result;
use serde::Serialize;
use std::path::PathBuf;

/// Everything the backend needs to generate and build one native target.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProjectDescription {
    pub name: String,
    pub output: OutputType,
    pub sources: Vec<PathBuf>,
    /// Own includes followed by transitive dependency includes.
    pub includes: Vec<PathBuf>,
    pub compile_flags: String,
    pub link_flags: String,
    /// Ordered link inputs, deepest dependency first.
    pub link_inputs: Vec<PathBuf>,
    pub build_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Runtime search path baked into an executable.
    pub rpath: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOutput {
    pub artifacts: Vec<PathBuf>,
    pub includes: Vec<PathBuf>,
}

/// Lookup of an externally installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    pub target: String,
    pub package: String,
    pub search_path: Option<PathBuf>,
    pub build_dir: PathBuf,
}

pub trait NativeBackend {
    /// Generate the backend's project files and report expected artifacts.
    fn configure(&self, project: &ProjectDescription, runner: &StepRunner)
    -> Result<BackendOutput>;

    /// Compile a configured project with `jobs` parallel jobs.
    fn compile(&self, project: &ProjectDescription, jobs: usize, runner: &StepRunner)
    -> Result<()>;

    /// Report include directories and libraries of an installed package.
    fn lookup_package(&self, request: &PackageRequest, runner: &StepRunner)
    -> Result<BackendOutput>;
}
