//! Shared fixtures: a scratch project tree and a fake native backend.
#![allow(dead_code)]

use nestbuild::backend::{BackendOutput, NativeBackend, PackageRequest, ProjectDescription};
use nestbuild::build::Session;
use nestbuild::build::steps::StepRunner;
use nestbuild::config::Settings;
use nestbuild::deps::Fetchers;
use nestbuild::descriptor::OutputType;
use nestbuild::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A scratch directory holding one or more projects.
pub struct Tree {
    _dir: tempfile::TempDir,
    pub root: PathBuf,
}

impl Tree {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        Self { _dir: dir, root }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub configured: Vec<ProjectDescription>,
    pub compiled: Vec<String>,
    pub packages: Vec<PackageRequest>,
    /// For each configure: target name and whether a `generated.h` was
    /// visible through its include directories.
    pub generated_visible: Vec<(String, bool)>,
}

/// Pretends to be a compiler: writes the artifact when it is missing or
/// older than any source or link input.
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn artifact(project: &ProjectDescription) -> PathBuf {
        let file = match project.output {
            OutputType::Executable => project.name.clone(),
            OutputType::Library => format!("lib{}.a", project.name),
            OutputType::SharedLibrary => format!("lib{}.so", project.name),
        };
        project.output_dir.join(file)
    }

    pub fn compiled(&self) -> Vec<String> {
        self.state.lock().unwrap().compiled.clone()
    }

    pub fn configured(&self) -> Vec<ProjectDescription> {
        self.state.lock().unwrap().configured.clone()
    }

    pub fn description(&self, name: &str) -> ProjectDescription {
        self.configured()
            .into_iter()
            .find(|d| d.name == name)
            .unwrap_or_else(|| panic!("{} was never configured", name))
    }
}

fn mtime(path: &Path) -> Option<std::time::SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl NativeBackend for FakeBackend {
    fn configure(&self, project: &ProjectDescription, _runner: &StepRunner) -> Result<BackendOutput> {
        let mut state = self.state.lock().unwrap();
        state.configured.push(project.clone());
        let visible = project
            .includes
            .iter()
            .any(|i| i.join("generated.h").exists());
        state.generated_visible.push((project.name.clone(), visible));
        Ok(BackendOutput {
            artifacts: vec![Self::artifact(project)],
            includes: Vec::new(),
        })
    }

    fn compile(&self, project: &ProjectDescription, _jobs: usize, _runner: &StepRunner) -> Result<()> {
        let artifact = Self::artifact(project);
        let stale = match mtime(&artifact) {
            None => true,
            Some(built) => project
                .sources
                .iter()
                .chain(&project.link_inputs)
                .filter_map(|p| mtime(p))
                .any(|t| t > built),
        };
        if stale {
            fs::create_dir_all(&project.output_dir).unwrap();
            fs::write(&artifact, format!("{:?}", project.sources)).unwrap();
            self.state.lock().unwrap().compiled.push(project.name.clone());
        }
        Ok(())
    }

    fn lookup_package(&self, request: &PackageRequest, _runner: &StepRunner) -> Result<BackendOutput> {
        self.state.lock().unwrap().packages.push(request.clone());
        Ok(BackendOutput {
            artifacts: vec![PathBuf::from(format!("/usr/lib/lib{}.so", request.package))],
            includes: vec![PathBuf::from(format!("/usr/include/{}", request.package))],
        })
    }
}

pub fn session(backend: &FakeBackend) -> Session {
    session_with(backend, Fetchers::default())
}

pub fn session_with(backend: &FakeBackend, fetchers: Fetchers) -> Session {
    Session::with_collaborators(Settings::default(), Box::new(backend.clone()), fetchers)
}

pub const STATIC_LIB: &str = r#"
[[targets]]
name = "{name}"
type = "library"
includes = ["include"]
sources = ["{name}.cpp"]
dependencies = [{deps}]
"#;

/// A native static library project at `dir` named after its directory.
pub fn static_lib(tree: &Tree, dir: &str, deps: &str) {
    let name = Path::new(dir).file_name().unwrap().to_string_lossy().to_string();
    tree.write(&format!("{}/{}.cpp", dir, name), "int f() { return 1; }\n");
    tree.write(
        &format!("{}/nest.toml", dir),
        &STATIC_LIB.replace("{name}", &name).replace("{deps}", deps),
    );
}
