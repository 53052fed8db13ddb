//! CMake backend.
//!
//! Each native target gets its own `CMakeLists.txt` in its build folder. The
//! generated project prints `__nest_<key>=<value>` marker lines at configure
//! time; those are how artifact locations and package variables come back.

use super::{BackendOutput, NativeBackend, PackageRequest, ProjectDescription};
use crate::build::steps::{BuildStep, Step, StepRunner};
use crate::descriptor::OutputType;
use crate::error::{IoContext, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const MARKER_PREFIX: &str = "__nest_";

#[derive(Debug, Clone)]
pub struct CMakeBackend {
    pub program: String,
}

impl Default for CMakeBackend {
    fn default() -> Self {
        Self {
            program: "cmake".to_string(),
        }
    }
}

impl CMakeBackend {
    fn run_configure(&self, build_dir: &Path, runner: &StepRunner) -> Result<BackendOutput> {
        let stdout = runner.capture(&BuildStep::new(
            self.program.clone(),
            vec![
                "-S".to_string(),
                ".".to_string(),
                "-B".to_string(),
                ".".to_string(),
            ],
            build_dir.to_path_buf(),
        ))?;
        let markers = parse_markers(&stdout);
        Ok(BackendOutput {
            artifacts: split_list(markers.get("location")),
            includes: split_list(markers.get("includes")),
        })
    }
}

impl NativeBackend for CMakeBackend {
    fn configure(
        &self,
        project: &ProjectDescription,
        runner: &StepRunner,
    ) -> Result<BackendOutput> {
        write_if_changed(&project.build_dir, &render_project(project))?;
        self.run_configure(&project.build_dir, runner)
    }

    fn compile(
        &self,
        project: &ProjectDescription,
        jobs: usize,
        runner: &StepRunner,
    ) -> Result<()> {
        runner.run(&Step::Command(BuildStep::new(
            self.program.clone(),
            vec![
                "--build".to_string(),
                ".".to_string(),
                "--parallel".to_string(),
                jobs.max(1).to_string(),
            ],
            project.build_dir.clone(),
        )))
    }

    fn lookup_package(
        &self,
        request: &PackageRequest,
        runner: &StepRunner,
    ) -> Result<BackendOutput> {
        write_if_changed(&request.build_dir, &render_package(request))?;
        self.run_configure(&request.build_dir, runner)
    }
}

/// Write `CMakeLists.txt` into `dir` unless it already holds `content`, so an
/// unchanged project never looks modified to CMake.
fn write_if_changed(dir: &Path, content: &str) -> Result<()> {
    let path = dir.join("CMakeLists.txt");
    if fs::read_to_string(&path).is_ok_and(|existing| existing == content) {
        return Ok(());
    }
    fs::create_dir_all(dir).with_path(dir)?;
    fs::write(&path, content).with_path(&path)
}

/// `__nest_<key>=<value>` lines, wherever they appear in CMake's output.
pub fn parse_markers(stdout: &str) -> BTreeMap<String, String> {
    let mut markers = BTreeMap::new();
    for line in stdout.lines() {
        let Some(start) = line.find(MARKER_PREFIX) else {
            continue;
        };
        let Some((key, value)) = line[start + MARKER_PREFIX.len()..].split_once('=') else {
            continue;
        };
        markers.insert(key.trim().to_string(), value.trim().to_string());
    }
    markers
}

fn split_list(value: Option<&String>) -> Vec<PathBuf> {
    value
        .map(|v| {
            v.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

fn quote(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    format!("\"{}\"", text.replace('"', "\\\""))
}

fn quote_str(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn cmake_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub fn render_project(project: &ProjectDescription) -> String {
    let name = cmake_identifier(&project.name);
    let mut out = String::new();
    let _ = writeln!(out, "cmake_minimum_required(VERSION 3.16)");
    let _ = writeln!(out, "project({} C CXX)", name);
    let _ = writeln!(out);

    let _ = writeln!(out, "set({}_SOURCES", name);
    for source in &project.sources {
        let _ = writeln!(out, "    {}", quote(source));
    }
    let _ = writeln!(out, ")");

    let (command, kind, prefix, suffix) = match project.output {
        OutputType::Executable => ("add_executable", "", "", "CMAKE_EXECUTABLE_SUFFIX"),
        OutputType::Library => (
            "add_library",
            " STATIC",
            "CMAKE_STATIC_LIBRARY_PREFIX",
            "CMAKE_STATIC_LIBRARY_SUFFIX",
        ),
        OutputType::SharedLibrary => (
            "add_library",
            " SHARED",
            "CMAKE_SHARED_LIBRARY_PREFIX",
            "CMAKE_SHARED_LIBRARY_SUFFIX",
        ),
    };
    let _ = writeln!(out, "{}({}{} ${{{}_SOURCES}})", command, name, kind, name);

    if !project.includes.is_empty() {
        let _ = writeln!(out, "target_include_directories({} PRIVATE", name);
        for include in &project.includes {
            let _ = writeln!(out, "    {}", quote(include));
        }
        let _ = writeln!(out, ")");
    }

    let output_dir = quote(&project.output_dir);
    let _ = writeln!(out, "set_target_properties({} PROPERTIES", name);
    let _ = writeln!(out, "    OUTPUT_NAME {}", quote_str(&project.name));
    let _ = writeln!(out, "    RUNTIME_OUTPUT_DIRECTORY {}", output_dir);
    let _ = writeln!(out, "    LIBRARY_OUTPUT_DIRECTORY {}", output_dir);
    let _ = writeln!(out, "    ARCHIVE_OUTPUT_DIRECTORY {}", output_dir);
    let _ = writeln!(out, "    COMPILE_FLAGS {}", quote_str(&project.compile_flags));
    let _ = writeln!(out, "    LINK_FLAGS {}", quote_str(&project.link_flags));
    if let Some(rpath) = &project.rpath {
        let _ = writeln!(out, "    INSTALL_RPATH {}", quote_str(rpath));
        let _ = writeln!(out, "    BUILD_WITH_INSTALL_RPATH TRUE");
    }
    let _ = writeln!(out, ")");

    if !project.link_inputs.is_empty() {
        let inputs: Vec<String> = project.link_inputs.iter().map(|p| quote(p)).collect();
        let _ = writeln!(
            out,
            "if(CMAKE_CXX_COMPILER_ID MATCHES \"GNU|Clang\" AND NOT APPLE)"
        );
        let _ = writeln!(
            out,
            "    target_link_libraries({} PRIVATE -Wl,--start-group {} -Wl,--end-group)",
            name,
            inputs.join(" ")
        );
        let _ = writeln!(out, "else()");
        let _ = writeln!(out, "    target_link_libraries({} PRIVATE {})", name, inputs.join(" "));
        let _ = writeln!(out, "endif()");
    }

    let prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("${{{}}}", prefix)
    };
    let _ = writeln!(
        out,
        "message(STATUS \"{}location={}/{}{}${{{}}}\")",
        MARKER_PREFIX,
        project.output_dir.to_string_lossy().replace('\\', "/"),
        prefix,
        project.name,
        suffix
    );
    out
}

pub fn render_package(request: &PackageRequest) -> String {
    let package = &request.package;
    let upper = package.to_uppercase();
    let mut out = String::new();
    let _ = writeln!(out, "cmake_minimum_required(VERSION 3.16)");
    let _ = writeln!(out, "project({} C CXX)", cmake_identifier(&request.target));
    if let Some(search_path) = &request.search_path {
        let _ = writeln!(
            out,
            "list(APPEND CMAKE_MODULE_PATH {})",
            quote(search_path)
        );
    }
    let _ = writeln!(out, "find_package({} REQUIRED)", package);
    let _ = writeln!(
        out,
        "set(__nest_includes ${{{p}_INCLUDE_DIRS}} ${{{p}_INCLUDE_DIR}} ${{{u}_INCLUDE_DIRS}} ${{{u}_INCLUDE_DIR}})",
        p = package,
        u = upper
    );
    let _ = writeln!(
        out,
        "set(__nest_libraries ${{{p}_LIBRARIES}} ${{{u}_LIBRARIES}})",
        p = package,
        u = upper
    );
    let _ = writeln!(out, "list(REMOVE_DUPLICATES __nest_includes)");
    let _ = writeln!(out, "list(REMOVE_DUPLICATES __nest_libraries)");
    let _ = writeln!(
        out,
        "message(STATUS \"{}includes=${{__nest_includes}}\")",
        MARKER_PREFIX
    );
    let _ = writeln!(
        out,
        "message(STATUS \"{}location=${{__nest_libraries}}\")",
        MARKER_PREFIX
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> ProjectDescription {
        ProjectDescription {
            name: "app".into(),
            output: OutputType::Executable,
            sources: vec!["/p/main.cpp".into(), "/p/util.cpp".into()],
            includes: vec!["/p/include".into(), "/lib/include".into()],
            compile_flags: "-Wall -O2".into(),
            link_flags: String::new(),
            link_inputs: vec!["/c/build/libc.a".into(), "/b/build/libb.a".into()],
            build_dir: "/p/build/.build/__target_app".into(),
            output_dir: "/p/build".into(),
            rpath: Some("$ORIGIN/libs".into()),
        }
    }

    #[test]
    fn test_parse_markers() {
        let stdout = "-- The C compiler identification is GNU 13.2.0\n\
                      -- __nest_location=/p/build/libm.a\n\
                      -- __nest_includes=/usr/include;/opt/include\n\
                      -- Configuring done\n";
        let markers = parse_markers(stdout);
        assert_eq!(markers["location"], "/p/build/libm.a");
        assert_eq!(
            split_list(markers.get("includes")),
            vec![PathBuf::from("/usr/include"), PathBuf::from("/opt/include")]
        );
        assert!(split_list(markers.get("missing")).is_empty());
    }

    #[test]
    fn test_render_project_keeps_link_order() {
        let rendered = render_project(&project());
        assert!(rendered.contains("add_executable(app ${app_SOURCES})"));
        assert!(rendered.contains("\"/p/main.cpp\""));
        let c = rendered.find("/c/build/libc.a").unwrap();
        let b = rendered.find("/b/build/libb.a").unwrap();
        assert!(c < b);
        assert!(rendered.contains("-Wl,--start-group"));
        assert!(rendered.contains("INSTALL_RPATH \"$ORIGIN/libs\""));
        assert!(rendered.contains("__nest_location=/p/build/app${CMAKE_EXECUTABLE_SUFFIX}"));
    }

    #[test]
    fn test_render_static_library() {
        let mut lib = project();
        lib.name = "math-lib".into();
        lib.output = OutputType::Library;
        lib.link_inputs.clear();
        lib.rpath = None;
        let rendered = render_project(&lib);
        assert!(rendered.contains("add_library(math_lib STATIC"));
        assert!(rendered.contains("OUTPUT_NAME \"math-lib\""));
        assert!(!rendered.contains("target_link_libraries"));
        assert!(rendered.contains(
            "__nest_location=/p/build/${CMAKE_STATIC_LIBRARY_PREFIX}math-lib${CMAKE_STATIC_LIBRARY_SUFFIX}"
        ));
    }

    #[test]
    fn test_render_package_lookup() {
        let rendered = render_package(&PackageRequest {
            target: "zlib".into(),
            package: "ZLIB".into(),
            search_path: Some("/p/cmake".into()),
            build_dir: "/p/build/.build/__target_zlib".into(),
        });
        assert!(rendered.contains("list(APPEND CMAKE_MODULE_PATH \"/p/cmake\")"));
        assert!(rendered.contains("find_package(ZLIB REQUIRED)"));
        assert!(rendered.contains("${ZLIB_LIBRARIES}"));
    }

    #[test]
    fn test_write_if_changed_keeps_mtime() {
        let dir = tempfile::tempdir().unwrap();
        write_if_changed(dir.path(), "project(x)\n").unwrap();
        let path = dir.path().join("CMakeLists.txt");
        let old = filetime::FileTime::from_unix_time(1_000_000, 0);
        filetime::set_file_mtime(&path, old).unwrap();

        write_if_changed(dir.path(), "project(x)\n").unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);

        write_if_changed(dir.path(), "project(y)\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "project(y)\n");
    }
}
