//! Integration tests for build ordering and incremental rebuilds.
//!
//! A fake backend stands in for CMake: it writes each artifact only when it
//! is missing or older than its inputs, like a real compiler would.

mod common;

use common::{FakeBackend, Tree, session, static_lib};
use filetime::FileTime;
use nestbuild::build::relocate::Platform;
use nestbuild::build::{Outcome, Session};
use nestbuild::config::Settings;
use nestbuild::deps::Fetchers;
use nestbuild::descriptor::{BuildType, Descriptor, TargetSpec};
use nestbuild::error::BuildError;
use std::fs;
use std::time::{Duration, SystemTime};

fn app_with_mathlib(tree: &Tree) {
    static_lib(tree, "mathlib", "");
    tree.write("app/main.cpp", "int main() { return 0; }\n");
    tree.write("app/util.cpp", "int util() { return 2; }\n");
    tree.write(
        "app/nest.toml",
        r#"
project_name = "app"

[[targets]]
name = "app"
type = "executable"
sources = ["main.cpp", "util.cpp"]
dependencies = [{ path = "../mathlib" }]
"#,
    );
}

fn run(tree: &Tree, backend: &FakeBackend, project: &str) -> Session {
    let mut session = session(backend);
    let root = session.open_root(&tree.path(project)).unwrap();
    session.build_all(root).unwrap();
    session
}

#[test]
fn test_first_build_then_everything_up_to_date() {
    let tree = Tree::new();
    app_with_mathlib(&tree);
    let backend = FakeBackend::default();

    let first = run(&tree, &backend, "app");
    assert_eq!(first.report.built(), vec!["mathlib", "app"]);
    assert!(tree.path("app/build/app").is_file());
    assert!(tree.path("mathlib/build/libmathlib.a").is_file());

    let app = backend.description("app");
    assert_eq!(app.sources, vec![tree.path("app/main.cpp"), tree.path("app/util.cpp")]);
    assert_eq!(app.link_inputs, vec![tree.path("mathlib/build/libmathlib.a")]);
    assert!(app.includes.contains(&tree.path("mathlib/include")));
    assert_eq!(app.build_dir, tree.path("app/build/.build/__target_app"));

    let second = run(&tree, &backend, "app");
    assert!(second.report.built().is_empty());
    assert_eq!(second.report.outcome_of("app"), Some(Outcome::Skipped));
    assert_eq!(backend.compiled(), vec!["mathlib", "app"]);
}

#[test]
fn test_descriptions_are_identical_across_runs() {
    let tree = Tree::new();
    app_with_mathlib(&tree);
    let backend = FakeBackend::default();

    run(&tree, &backend, "app");
    run(&tree, &backend, "app");

    let configured = backend.configured();
    assert_eq!(configured.len(), 4);
    assert_eq!(configured[0], configured[2]);
    assert_eq!(configured[1], configured[3]);
}

#[test]
fn test_deleted_artifact_rebuilds_only_its_target() {
    let tree = Tree::new();
    app_with_mathlib(&tree);
    let backend = FakeBackend::default();
    run(&tree, &backend, "app");

    fs::remove_file(tree.path("app/build/app")).unwrap();
    let rerun = run(&tree, &backend, "app");
    assert_eq!(rerun.report.built(), vec!["app"]);
    assert_eq!(rerun.report.outcome_of("mathlib"), Some(Outcome::Skipped));
}

fn custom_project(tree: &Tree, dir: &str, deps: &str) {
    tree.write(
        &format!("{}/nest.toml", dir),
        &format!(
            r#"
[[targets]]
name = "{dir}"
build_type = "custom"
target_files = ["out.stamp"]
dependencies = [{deps}]
"#
        ),
    );
}

#[test]
fn test_rebuilt_dependency_propagates_staleness() {
    let tree = Tree::new();
    custom_project(&tree, "leaf", "");
    custom_project(&tree, "mid", r#"{ path = "../leaf" }"#);
    custom_project(&tree, "top", r#"{ path = "../mid" }"#);
    let backend = FakeBackend::default();

    let first = run(&tree, &backend, "top");
    assert_eq!(first.report.built(), vec!["leaf", "mid", "top"]);
    assert!(tree.path("leaf/out.stamp").is_file());

    let second = run(&tree, &backend, "top");
    assert!(second.report.built().is_empty());

    let future = SystemTime::now() + Duration::from_secs(120);
    filetime::set_file_mtime(tree.path("leaf/nest.toml"), FileTime::from_system_time(future))
        .unwrap();
    let third = run(&tree, &backend, "top");
    assert_eq!(third.report.built(), vec!["leaf", "mid", "top"]);
}

#[test]
fn test_custom_target_without_files_is_never_stale() {
    let tree = Tree::new();
    tree.write(
        "tool/nest.toml",
        r#"
[[targets]]
name = "tool"
build_type = "custom"
"#,
    );
    let backend = FakeBackend::default();
    let session = run(&tree, &backend, "tool");
    assert_eq!(session.report.outcome_of("tool"), Some(Outcome::Skipped));
}

#[test]
fn test_undescribed_directory_without_descriptor_fails_staleness_check() {
    let tree = Tree::new();
    tree.write("loose/out.txt", "previous output\n");

    let settings = Settings {
        default_build: Descriptor {
            targets: vec![TargetSpec {
                name: Some("gen".into()),
                build_type: Some(BuildType::Custom),
                target_files: vec!["out.txt".into()],
                ..Default::default()
            }],
            ..Default::default()
        },
        ..Default::default()
    };
    let backend = FakeBackend::default();
    let mut session = Session::with_collaborators(settings, Box::new(backend), Fetchers::default());
    let root = session.open_root(&tree.path("loose")).unwrap();
    let err = session.build_all(root).unwrap_err();
    match err {
        BuildError::MissingDescriptor { directory } => assert_eq!(directory, tree.path("loose")),
        other => panic!("expected a missing descriptor, got {}", other),
    }
}

#[test]
fn test_build_dependency_is_built_before_dependent_is_configured() {
    let tree = Tree::new();
    fs::create_dir_all(tree.path("codegen/include")).unwrap();
    tree.write(
        "codegen/nest.toml",
        r#"
[[targets]]
name = "codegen"
build_type = "custom"
target_files = ["include/generated.h"]
"#,
    );
    tree.write("app/main.cpp", "#include \"generated.h\"\nint main() { return 0; }\n");
    tree.write(
        "app/nest.toml",
        r#"
[[targets]]
name = "app"
sources = ["main.cpp"]
includes = ["../codegen/include"]
build_dependencies = [{ path = "../codegen" }]
"#,
    );

    let backend = FakeBackend::default();
    let session = run(&tree, &backend, "app");

    assert!(tree.path("codegen/include/generated.h").is_file());
    let visible = backend.state.lock().unwrap().generated_visible.clone();
    assert_eq!(visible, vec![("app".to_string(), true)]);
    assert_eq!(session.report.built(), vec!["codegen", "app"]);
    assert!(backend.description("app").link_inputs.is_empty());
}

#[test]
fn test_header_only_library_exports_includes_without_compiling() {
    let tree = Tree::new();
    tree.write(
        "headers/nest.toml",
        r#"
[[targets]]
name = "headers"
type = "library"
includes = ["include"]
"#,
    );
    tree.write("app/main.cpp", "int main() { return 0; }\n");
    tree.write(
        "app/nest.toml",
        r#"
[[targets]]
name = "app"
sources = ["main.cpp"]
dependencies = [{ path = "../headers" }]
"#,
    );

    let backend = FakeBackend::default();
    let session = run(&tree, &backend, "app");

    assert_eq!(backend.compiled(), vec!["app"]);
    assert_eq!(session.report.outcome_of("headers"), Some(Outcome::Skipped));
    let app = backend.description("app");
    assert!(app.includes.contains(&tree.path("headers/include")));
    assert!(app.link_inputs.is_empty());
}

#[test]
fn test_shared_libraries_are_relocated_next_to_the_executable() {
    let tree = Tree::new();
    tree.write("dyn/dyn.cpp", "int f() { return 1; }\n");
    tree.write(
        "dyn/nest.toml",
        r#"
[[targets]]
name = "dyn"
type = "shared_library"
sources = ["dyn.cpp"]
"#,
    );
    tree.write("app/main.cpp", "int main() { return 0; }\n");
    tree.write(
        "app/nest.toml",
        r#"
[[targets]]
name = "app"
sources = ["main.cpp"]
dynamic_libs_destination = "libs"
dependencies = [{ path = "../dyn" }]
"#,
    );

    let backend = FakeBackend::default();
    let mut session = session(&backend).with_platform(Platform::Linux);
    let root = session.open_root(&tree.path("app")).unwrap();
    session.build_all(root).unwrap();

    assert_eq!(backend.description("app").rpath.as_deref(), Some("$ORIGIN/libs"));
    assert!(backend.description("dyn").rpath.is_none());
    assert!(tree.path("app/build/libs/libdyn.so").is_file());
}

#[test]
fn test_package_dependency_contributes_includes_and_libraries() {
    let tree = Tree::new();
    tree.write("app/main.cpp", "int main() { return 0; }\n");
    tree.write(
        "app/nest.toml",
        r#"
[[targets]]
name = "app"
sources = ["main.cpp"]
dependencies = [{ package = "ZLIB", name = "zlib" }]
"#,
    );

    let backend = FakeBackend::default();
    let session = run(&tree, &backend, "app");

    let packages = backend.state.lock().unwrap().packages.clone();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].package, "ZLIB");
    assert_eq!(packages[0].target, "zlib");
    assert!(tree.path("app/build/.deps/__package_ZLIB").is_dir());

    let app = backend.description("app");
    assert!(app.includes.contains(&"/usr/include/ZLIB".into()));
    assert_eq!(app.link_inputs, vec![std::path::PathBuf::from("/usr/lib/libZLIB.so")]);
    assert_eq!(session.report.outcome_of("zlib"), Some(Outcome::Skipped));
}

#[cfg(unix)]
#[test]
fn test_pre_and_post_steps_run_even_when_fresh() {
    let tree = Tree::new();
    tree.write(
        "tool/nest.toml",
        r#"
[[targets]]
name = "tool"
build_type = "custom"
target_files = ["out.stamp"]
pre_build_steps = [{ command = "sh", params = ["-c", "echo pre >> log.txt"] }]
build_steps = [{ command = "sh", params = ["-c", "echo build >> log.txt"] }]
post_build_steps = [{ command = "sh", params = ["-c", "echo post >> log.txt"] }]
"#,
    );
    let backend = FakeBackend::default();
    run(&tree, &backend, "tool");
    run(&tree, &backend, "tool");

    let log = fs::read_to_string(tree.path("tool/log.txt")).unwrap();
    assert_eq!(log.lines().collect::<Vec<_>>(), vec!["pre", "build", "post", "pre", "post"]);
}

#[cfg(unix)]
#[test]
fn test_failing_step_aborts_with_its_stderr() {
    let tree = Tree::new();
    tree.write(
        "tool/nest.toml",
        r#"
[[targets]]
name = "tool"
build_type = "custom"
target_files = ["out.stamp"]
build_steps = [{ command = "sh", params = ["-c", "echo broken >&2; exit 3"] }]
"#,
    );
    let backend = FakeBackend::default();
    let mut session = session(&backend);
    let root = session.open_root(&tree.path("tool")).unwrap();
    let err = session.build_all(root).unwrap_err();
    assert!(matches!(err, BuildError::CommandFailed { .. }));
    assert_eq!(err.diagnostics().map(str::trim), Some("broken"));
    assert!(!tree.path("tool/out.stamp").exists());
}
