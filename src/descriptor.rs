//! Project descriptor (`nest.toml` / `nest.json`) parsing.
//!
//! ```toml
//! project_name = "app"
//!
//! [[targets]]
//! name = "app"
//! type = "executable"
//! sources = ["main.cpp", { glob = "src/*.cpp" }]
//! dependencies = [{ path = "../mathlib", name = "mathlib" }]
//!
//! [targets.system_specific.linux]
//! link_flags = "-pthread"
//! ```

use crate::config::Settings;
use crate::deps::Origin;
use crate::error::{BuildError, IoContext, Result};
use globset::{GlobBuilder, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Descriptor file names, in lookup order.
pub const DESCRIPTOR_FILES: [&str; 2] = ["nest.toml", "nest.json"];

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Descriptor {
    pub project_name: Option<String>,
    pub targets: Vec<TargetSpec>,
    /// Named source lists targets can pull in with `sources_lists = ["name"]`.
    pub sources_lists: BTreeMap<String, Vec<SourceEntry>>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum SourceEntry {
    Path(String),
    Glob { glob: String },
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    #[default]
    Executable,
    Library,
    SharedLibrary,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    #[default]
    Native,
    Package,
    Autoconf,
    Custom,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TargetSpec {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub output: Option<OutputType>,
    pub build_type: Option<BuildType>,
    pub includes: Vec<String>,
    pub sources: Vec<SourceEntry>,
    pub sources_lists: Vec<String>,
    pub target_files: Vec<String>,
    pub pre_build_steps: Vec<StepSpec>,
    pub build_steps: Vec<StepSpec>,
    pub post_build_steps: Vec<StepSpec>,
    pub dependencies: Vec<DependencySpec>,
    pub build_dependencies: Vec<DependencySpec>,
    pub flags: Option<String>,
    pub compile_flags: Option<String>,
    pub link_flags: Option<String>,
    pub parallel_build: Option<bool>,
    /// Where an executable's shared-library dependencies are copied, relative
    /// to the project's output directory unless absolute.
    pub dynamic_libs_destination: Option<String>,
    pub package: Option<String>,
    pub search_path: Option<String>,
    pub autoconf_directory: Option<String>,
    pub configure_directory: Option<String>,
    pub configure_params: Vec<String>,
    pub make_directory: Option<String>,
    pub make_params: Vec<String>,
    pub system_specific: BTreeMap<String, TargetSpec>,
}

/// A build step: either a plain command, or a conditional group that only
/// runs its nested `steps` when `dependencies` are newer than `targets`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct StepSpec {
    pub command: Option<String>,
    pub params: Vec<String>,
    pub directory: Option<String>,
    pub dependencies: Vec<String>,
    pub targets: Vec<String>,
    pub steps: Vec<StepSpec>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DependencySpec {
    /// Target to select in the resolved project.
    pub name: Option<String>,
    pub path: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub archive: Option<String>,
    pub archive_path: Option<String>,
    pub archive_file_name: Option<String>,
    pub sha256: Option<String>,
    pub package: Option<String>,
    pub search_path: Option<String>,
}

impl Descriptor {
    pub fn project_name(&self, directory: &Path) -> String {
        self.project_name.clone().unwrap_or_else(|| {
            directory
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string())
        })
    }

    /// Synthetic descriptor for an installed-package dependency.
    pub fn for_package(target: &str, package: &str, search_path: Option<&Path>) -> Self {
        Descriptor {
            project_name: None,
            targets: vec![TargetSpec {
                name: Some(target.to_string()),
                build_type: Some(BuildType::Package),
                package: Some(package.to_string()),
                search_path: search_path.map(|p| p.to_string_lossy().to_string()),
                ..Default::default()
            }],
            sources_lists: BTreeMap::new(),
        }
    }
}

impl TargetSpec {
    /// Fold an overlay into this spec. Scalars keep the first value seen,
    /// lists concatenate, flag strings concatenate with a space.
    pub fn merge(&mut self, overlay: &TargetSpec) {
        fn first<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(other);
            }
        }
        fn join(slot: &mut Option<String>, other: &Option<String>) {
            *slot = match (slot.take(), other) {
                (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Some(format!("{} {}", a, b)),
                (Some(a), Some(b)) if a.is_empty() => Some(b.clone()),
                (Some(a), _) => Some(a),
                (None, b) => b.clone(),
            };
        }

        first(&mut self.name, &overlay.name);
        first(&mut self.output, &overlay.output);
        first(&mut self.build_type, &overlay.build_type);
        first(&mut self.parallel_build, &overlay.parallel_build);
        first(&mut self.dynamic_libs_destination, &overlay.dynamic_libs_destination);
        first(&mut self.package, &overlay.package);
        first(&mut self.search_path, &overlay.search_path);
        first(&mut self.autoconf_directory, &overlay.autoconf_directory);
        first(&mut self.configure_directory, &overlay.configure_directory);
        first(&mut self.make_directory, &overlay.make_directory);

        join(&mut self.flags, &overlay.flags);
        join(&mut self.compile_flags, &overlay.compile_flags);
        join(&mut self.link_flags, &overlay.link_flags);

        self.includes.extend(overlay.includes.iter().cloned());
        self.sources.extend(overlay.sources.iter().cloned());
        self.sources_lists.extend(overlay.sources_lists.iter().cloned());
        self.target_files.extend(overlay.target_files.iter().cloned());
        self.pre_build_steps.extend(overlay.pre_build_steps.iter().cloned());
        self.build_steps.extend(overlay.build_steps.iter().cloned());
        self.post_build_steps.extend(overlay.post_build_steps.iter().cloned());
        self.dependencies.extend(overlay.dependencies.iter().cloned());
        self.build_dependencies
            .extend(overlay.build_dependencies.iter().cloned());
        self.configure_params.extend(overlay.configure_params.iter().cloned());
        self.make_params.extend(overlay.make_params.iter().cloned());
    }

    /// This spec with every overlay matching `os` (a `std::env::consts::OS` value) merged in.
    pub fn for_platform(&self, os: &str) -> TargetSpec {
        let mut resolved = self.clone();
        resolved.system_specific.clear();
        for (platform, overlay) in &self.system_specific {
            if platform_matches(platform, os) {
                resolved.merge(overlay);
            }
        }
        resolved
    }
}

fn platform_matches(platform: &str, os: &str) -> bool {
    let canonical = match platform.to_lowercase().as_str() {
        "mac" | "osx" | "darwin" | "macos" => "macos",
        "win32" | "windows" => "windows",
        "linux" | "linux2" => "linux",
        other => return other == os,
    };
    canonical == os
}

impl DependencySpec {
    /// The single origin this spec declares.
    pub fn origin(&self, descriptor: &Path) -> Result<Origin> {
        let mut origins = Vec::new();
        if let Some(path) = &self.path {
            origins.push(Origin::Path(PathBuf::from(path)));
        }
        if let Some(url) = &self.repository {
            origins.push(Origin::Repository {
                url: url.clone(),
                branch: self.branch.clone(),
                commit: self.commit.clone(),
            });
        }
        if let Some(url) = &self.archive {
            origins.push(Origin::Archive {
                url: url.clone(),
                subpath: self.archive_path.clone().map(PathBuf::from),
                file_name: self.archive_file_name.clone(),
                sha256: self.sha256.clone(),
            });
        }
        if let Some(package) = &self.package {
            origins.push(Origin::Package {
                name: package.clone(),
                search_path: self.search_path.clone().map(PathBuf::from),
            });
        }

        match origins.len() {
            1 => Ok(origins.remove(0)),
            0 => Err(BuildError::config(
                descriptor,
                format!(
                    "dependency '{}' declares no origin (path, repository, archive or package)",
                    self.name.as_deref().unwrap_or("?")
                ),
            )),
            _ => Err(BuildError::config(
                descriptor,
                format!(
                    "dependency '{}' declares more than one origin",
                    self.name.as_deref().unwrap_or("?")
                ),
            )),
        }
    }
}

/// A descriptor together with the file it came from (`None` when defaulted).
#[derive(Debug, Clone)]
pub struct LoadedDescriptor {
    pub descriptor: Descriptor,
    pub path: Option<PathBuf>,
}

pub fn find_descriptor(directory: &Path) -> Option<PathBuf> {
    DESCRIPTOR_FILES
        .iter()
        .map(|name| directory.join(name))
        .find(|p| p.is_file())
}

pub fn load(directory: &Path, settings: &Settings) -> Result<LoadedDescriptor> {
    match find_descriptor(directory) {
        Some(path) => {
            let content = fs::read_to_string(&path).with_path(&path)?;
            Ok(LoadedDescriptor {
                descriptor: parse(&content, &path)?,
                path: Some(path),
            })
        }
        None => Ok(LoadedDescriptor {
            descriptor: settings.default_build.clone(),
            path: None,
        }),
    }
}

/// Parse by file extension: `.json` as JSON, anything else as TOML.
pub fn parse(content: &str, path: &Path) -> Result<Descriptor> {
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(content).map_err(|e| BuildError::config(path, e.to_string()))
    } else {
        toml::from_str(content).map_err(|e| BuildError::config(path, e.to_string()))
    }
}

/// Expand source entries against `directory`. Plain paths are joined as-is;
/// globs match relative paths under `directory`, skipping `build/` and hidden
/// folders. Glob results are sorted.
pub fn expand_sources(entries: &[SourceEntry], directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut globs = GlobSetBuilder::new();
    let mut has_globs = false;

    for entry in entries {
        match entry {
            SourceEntry::Path(p) => files.push(directory.join(p)),
            SourceEntry::Glob { glob } => {
                let compiled = GlobBuilder::new(glob)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| BuildError::config(directory, format!("bad glob '{}': {}", glob, e)))?;
                globs.add(compiled);
                has_globs = true;
            }
        }
    }

    if has_globs {
        let set = globs
            .build()
            .map_err(|e| BuildError::config(directory, e.to_string()))?;
        let mut matched: Vec<PathBuf> = WalkDir::new(directory)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && (name == "build" || name.starts_with('.')))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .strip_prefix(directory)
                    .is_ok_and(|rel| set.is_match(rel))
            })
            .map(|e| e.into_path())
            .collect();
        matched.sort();
        files.extend(matched);
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_TOML: &str = r#"
project_name = "app"

[sources_lists]
common = ["util.cpp"]

[[targets]]
name = "app"
type = "executable"
sources = ["main.cpp", { glob = "src/*.cpp" }]
sources_lists = ["common"]
compile_flags = "-O2"
dependencies = [{ path = "../lib", name = "lib" }]

[targets.system_specific.linux]
compile_flags = "-fPIC"
link_flags = "-pthread"
sources = ["linux.cpp"]
name = "ignored"
"#;

    #[test]
    fn test_parse_toml_descriptor() {
        let d = parse(APP_TOML, Path::new("nest.toml")).unwrap();
        assert_eq!(d.project_name.as_deref(), Some("app"));
        assert_eq!(d.targets.len(), 1);
        let t = &d.targets[0];
        assert_eq!(t.output, Some(OutputType::Executable));
        assert_eq!(t.sources.len(), 2);
        assert_eq!(
            t.sources[1],
            SourceEntry::Glob {
                glob: "src/*.cpp".into()
            }
        );
        assert_eq!(t.dependencies[0].path.as_deref(), Some("../lib"));
        assert!(t.system_specific.contains_key("linux"));
    }

    #[test]
    fn test_parse_json_descriptor() {
        let json = r#"{
            "project_name": "lib",
            "targets": [{ "name": "lib", "type": "library", "build_type": "custom",
                          "target_files": ["out/libx.a"],
                          "build_steps": [{ "command": "make", "params": ["-j2"] }] }]
        }"#;
        let d = parse(json, Path::new("nest.json")).unwrap();
        let t = &d.targets[0];
        assert_eq!(t.build_type, Some(BuildType::Custom));
        assert_eq!(t.output, Some(OutputType::Library));
        assert_eq!(t.build_steps[0].command.as_deref(), Some("make"));
    }

    #[test]
    fn test_platform_overlay_merge_combinators() {
        let d = parse(APP_TOML, Path::new("nest.toml")).unwrap();
        let linux = d.targets[0].for_platform("linux");
        assert_eq!(linux.name.as_deref(), Some("app"));
        assert_eq!(linux.compile_flags.as_deref(), Some("-O2 -fPIC"));
        assert_eq!(linux.link_flags.as_deref(), Some("-pthread"));
        assert_eq!(linux.sources.len(), 3);
        assert!(linux.system_specific.is_empty());

        let mac = d.targets[0].for_platform("macos");
        assert_eq!(mac.compile_flags.as_deref(), Some("-O2"));
        assert_eq!(mac.sources.len(), 2);
    }

    #[test]
    fn test_platform_aliases() {
        assert!(platform_matches("darwin", "macos"));
        assert!(platform_matches("osx", "macos"));
        assert!(platform_matches("win32", "windows"));
        assert!(platform_matches("linux2", "linux"));
        assert!(platform_matches("freebsd", "freebsd"));
        assert!(!platform_matches("linux", "macos"));
    }

    #[test]
    fn test_dependency_origin_must_be_unique() {
        let descriptor = Path::new("nest.toml");
        let none = DependencySpec {
            name: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(none.origin(descriptor), Err(BuildError::Config { .. })));

        let both = DependencySpec {
            path: Some("../x".into()),
            repository: Some("https://example.com/x.git".into()),
            ..Default::default()
        };
        assert!(matches!(both.origin(descriptor), Err(BuildError::Config { .. })));

        let repo = DependencySpec {
            repository: Some("https://example.com/x.git".into()),
            branch: Some("stable".into()),
            ..Default::default()
        };
        match repo.origin(descriptor).unwrap() {
            Origin::Repository { url, branch, commit } => {
                assert_eq!(url, "https://example.com/x.git");
                assert_eq!(branch.as_deref(), Some("stable"));
                assert!(commit.is_none());
            }
            other => panic!("unexpected origin {:?}", other),
        }
    }

    #[test]
    fn test_project_name_falls_back_to_directory() {
        let d = Descriptor::default();
        assert_eq!(d.project_name(Path::new("/work/mathlib")), "mathlib");
    }

    #[test]
    fn test_expand_sources_globs_skip_build() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("main.cpp"), "").unwrap();
        fs::write(root.join("src/b.cpp"), "").unwrap();
        fs::write(root.join("src/a.cpp"), "").unwrap();
        fs::write(root.join("build/gen.cpp"), "").unwrap();

        let entries = vec![
            SourceEntry::Glob {
                glob: "*.cpp".into(),
            },
            SourceEntry::Glob {
                glob: "src/*.cpp".into(),
            },
        ];
        let files = expand_sources(&entries, root).unwrap();
        assert_eq!(
            files,
            vec![root.join("main.cpp"), root.join("src/a.cpp"), root.join("src/b.cpp")]
        );
    }

    #[test]
    fn test_missing_descriptor_uses_default_build() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(dir.path(), &Settings::default()).unwrap();
        assert!(loaded.path.is_none());
        assert_eq!(loaded.descriptor.targets[0].name.as_deref(), Some("a.out"));
    }
}
