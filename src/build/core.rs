use super::aggregate::{dedup_preserving_order, transitive_includes_and_binaries};
use super::relocate::{Platform, RelocationPlan};
use super::report::{BuildReport, Outcome, TargetReport};
use super::steps::{StepRunner, modified, touch};
use crate::backend::{CMakeBackend, NativeBackend, PackageRequest, ProjectDescription};
use crate::config::Settings;
use crate::deps::{Fetchers, Origin, Requester, Resolver};
use crate::descriptor::{DependencySpec, OutputType};
use crate::error::{BuildError, IoContext, Result};
use crate::graph::{BuildGraph, ContextId, TargetId};
use crate::target::{Staleness, TargetKind, TargetState};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

/// One orchestrator run: the graph plus every collaborator needed to walk it.
pub struct Session {
    pub graph: BuildGraph,
    pub settings: Settings,
    pub report: BuildReport,
    backend: Box<dyn NativeBackend>,
    fetchers: Fetchers,
    runner: StepRunner,
    platform: Platform,
    /// Targets currently between `Resolving` and `Processed`, outermost first.
    in_progress: Vec<TargetId>,
}

impl Session {
    pub fn new(settings: Settings) -> Self {
        Self::with_collaborators(settings, Box::new(CMakeBackend::default()), Fetchers::default())
    }

    pub fn with_collaborators(
        settings: Settings,
        backend: Box<dyn NativeBackend>,
        fetchers: Fetchers,
    ) -> Self {
        let runner = StepRunner::new(settings.verbose);
        Self {
            graph: BuildGraph::new(),
            settings,
            report: BuildReport::default(),
            backend,
            fetchers,
            runner,
            platform: Platform::current(),
            in_progress: Vec::new(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Root context for a project directory. The root can only be a path.
    pub fn open_root(&mut self, path: &Path) -> Result<ContextId> {
        let resolver = Resolver {
            fetchers: &self.fetchers,
            update_dependencies: self.settings.update_dependencies,
        };
        let resolved = resolver.resolve(
            &Origin::Path(path.to_path_buf()),
            None,
            None,
            &mut self.graph.warnings,
        )?;
        self.graph
            .get_or_create_context(resolved.directory, None, None, &self.settings)
    }

    /// Resolve one dependency of `requester` to the target it selects.
    pub fn resolve_dependency(
        &mut self,
        requester: ContextId,
        spec: &DependencySpec,
    ) -> Result<TargetId> {
        let ctx = self.graph.context(requester);
        let origin = spec.origin(&ctx.descriptor_hint())?;
        let directory = ctx.directory.clone();
        let libs_dir = ctx.libs_dir();

        let resolver = Resolver {
            fetchers: &self.fetchers,
            update_dependencies: self.settings.update_dependencies,
        };
        let resolved = resolver.resolve(
            &origin,
            Some(Requester {
                directory: &directory,
                libs_dir: &libs_dir,
            }),
            spec.name.as_deref(),
            &mut self.graph.warnings,
        )?;

        let child = self.graph.get_or_create_context(
            resolved.directory,
            resolved.synthetic,
            Some(requester),
            &self.settings,
        )?;
        self.graph.find_target(child, spec.name.as_deref())
    }

    /// Fill in a target's link and build dependencies.
    pub fn resolve_dependencies(&mut self, target: TargetId) -> Result<()> {
        let owner = self.graph.target(target).context;
        let link_specs = self.graph.target(target).dependency_specs.clone();
        let build_specs = self.graph.target(target).build_dependency_specs.clone();

        let mut dependencies = Vec::with_capacity(link_specs.len());
        for spec in &link_specs {
            dependencies.push(self.resolve_dependency(owner, spec)?);
        }
        let mut build_dependencies = Vec::with_capacity(build_specs.len());
        for spec in &build_specs {
            build_dependencies.push(self.resolve_dependency(owner, spec)?);
        }

        let t = self.graph.target_mut(target);
        t.dependencies = dependencies;
        t.build_dependencies = build_dependencies;
        Ok(())
    }

    /// Resolve the whole graph below `root` without processing anything.
    pub fn resolve_tree(&mut self, root: ContextId) -> Result<()> {
        let mut pending: Vec<TargetId> = self.graph.context(root).targets.clone();
        let mut seen = std::collections::HashSet::new();
        while let Some(target) = pending.pop() {
            if !seen.insert(target) {
                continue;
            }
            self.resolve_dependencies(target)?;
            let t = self.graph.target(target);
            pending.extend(t.dependencies.iter().chain(&t.build_dependencies).copied());
        }
        Ok(())
    }

    fn indent(&self, target: TargetId) -> String {
        "| ".repeat(self.graph.owner(target).depth)
    }

    /// Resolve and process dependencies, then describe this target to the
    /// backend. Link dependencies are processed; build dependencies are also
    /// built, since they provide tools this target's build runs.
    pub fn process(&mut self, target: TargetId) -> Result<()> {
        let state = self.graph.target(target).state;
        if state >= TargetState::Processed {
            return Ok(());
        }
        if state == TargetState::Resolving {
            return Err(self.cycle_error(target));
        }

        let start = Instant::now();
        let indent = self.indent(target);
        println!(
            "{}{} Processing # {} #",
            indent,
            "->".blue(),
            self.graph.target(target).name.bold()
        );

        self.graph.target_mut(target).state = TargetState::Resolving;
        self.in_progress.push(target);

        self.resolve_dependencies(target)?;
        let dependencies = self.graph.target(target).dependencies.clone();
        let build_dependencies = self.graph.target(target).build_dependencies.clone();
        for dependency in dependencies {
            self.process(dependency)?;
        }
        for dependency in build_dependencies {
            self.process(dependency)?;
            self.build(dependency)?;
        }
        self.graph.target_mut(target).state = TargetState::DependenciesResolved;

        let (native, package) = {
            let kind = &self.graph.target(target).kind;
            (
                matches!(kind, TargetKind::Native(_)),
                matches!(kind, TargetKind::InstalledPackage { .. }),
            )
        };
        if native {
            self.process_native(target)?;
        } else if package {
            self.process_package(target)?;
        }

        self.graph.target_mut(target).state = TargetState::Processed;
        self.in_progress.pop();
        println!(
            "{}{} Done - {:.2?}",
            indent,
            "->".blue(),
            start.elapsed()
        );
        Ok(())
    }

    fn cycle_error(&self, target: TargetId) -> BuildError {
        let start = self
            .in_progress
            .iter()
            .position(|t| *t == target)
            .unwrap_or(0);
        let mut chain: Vec<String> = self.in_progress[start..]
            .iter()
            .map(|t| self.graph.label(*t))
            .collect();
        chain.push(self.graph.label(target));
        BuildError::DependencyCycle { chain }
    }

    fn process_native(&mut self, target: TargetId) -> Result<()> {
        let t = self.graph.target(target);
        if t.is_header_only() {
            return Ok(());
        }
        let TargetKind::Native(options) = &t.kind else {
            return Ok(());
        };
        let ctx = self.graph.owner(target);
        let artifacts = transitive_includes_and_binaries(&self.graph, target);
        let output_dir = ctx.output_dir();

        let destination = options
            .dynamic_libs_destination
            .as_deref()
            .filter(|_| t.output == OutputType::Executable);
        let relocation = destination
            .map(|dest| RelocationPlan::plan(self.platform, &artifacts.binaries, &output_dir, dest))
            .filter(|plan| !plan.is_empty());

        let mut includes = t.includes.clone();
        includes.extend(artifacts.includes);

        let description = ProjectDescription {
            name: t.name.clone(),
            output: t.output,
            sources: t.sources.clone(),
            includes: dedup_preserving_order(&includes),
            compile_flags: join_flags(&options.compile_flags, &options.flags),
            link_flags: join_flags(&options.link_flags, &options.flags),
            link_inputs: dedup_preserving_order(&artifacts.binaries),
            build_dir: ctx.target_build_dir(&t.name),
            output_dir,
            rpath: destination.and_then(|dest| self.platform.rpath(dest)),
        };

        let output = self.backend.configure(&description, &self.runner)?;
        let directory = ctx.directory.clone();

        let t = self.graph.target_mut(target);
        t.target_files
            .extend(output.artifacts.into_iter().map(|p| directory.join(p)));
        t.includes
            .extend(output.includes.into_iter().map(|p| directory.join(p)));
        t.description = Some(description);
        t.relocation = relocation;
        Ok(())
    }

    fn process_package(&mut self, target: TargetId) -> Result<()> {
        let t = self.graph.target(target);
        let TargetKind::InstalledPackage {
            package,
            search_path,
        } = &t.kind
        else {
            return Ok(());
        };
        let ctx = self.graph.owner(target);
        let request = PackageRequest {
            target: t.name.clone(),
            package: package.clone(),
            search_path: search_path.clone(),
            build_dir: ctx.target_build_dir(&t.name),
        };
        let directory = ctx.directory.clone();

        let output = self.backend.lookup_package(&request, &self.runner)?;
        let t = self.graph.target_mut(target);
        t.includes
            .extend(output.includes.into_iter().map(|p| directory.join(p)));
        t.target_files
            .extend(output.artifacts.into_iter().map(|p| directory.join(p)));
        Ok(())
    }

    /// Staleness oracle for a processed target.
    pub fn should_build(&self, target: TargetId) -> Result<Staleness> {
        let t = self.graph.target(target);
        let dependency_built = t
            .dependencies
            .iter()
            .chain(&t.build_dependencies)
            .any(|d| self.graph.target(*d).built);

        t.staleness(dependency_built, || {
            let Some(path) = self.graph.descriptor_path_for(t.context) else {
                return Err(BuildError::MissingDescriptor {
                    directory: self.graph.owner(target).directory.clone(),
                });
            };
            fs::metadata(path)
                .and_then(|m| m.modified())
                .with_path(path)
        })
    }

    /// Build link dependencies, then this target if it is stale. Pre- and
    /// post-steps run on every visit; build steps only when stale.
    pub fn build(&mut self, target: TargetId) -> Result<()> {
        if !self.graph.target(target).is_processed() {
            self.process(target)?;
        }
        if self.graph.target(target).is_finished() {
            return Ok(());
        }

        let start = Instant::now();
        let indent = self.indent(target);
        println!(
            "{}{} Building # {} #",
            indent,
            "->".blue(),
            self.graph.target(target).name.bold()
        );

        let dependencies = self.graph.target(target).dependencies.clone();
        for dependency in dependencies {
            self.build(dependency)?;
        }

        let staleness = self.should_build(target)?;
        if self.settings.verbose {
            match &staleness {
                Staleness::Stale(reason) => println!("{}   {} stale: {}", indent, "~".yellow(), reason),
                Staleness::Fresh => println!("{}   {} up to date", indent, "⚡".green()),
            }
        }

        let t = self.graph.target(target);
        self.runner.run_all(&t.pre_build_steps)?;

        let mut built = false;
        if staleness.is_stale() {
            match (&t.kind, &t.description) {
                (TargetKind::Native(options), Some(description)) => {
                    let before = snapshot(&t.target_files);
                    self.runner.run_all(&t.build_steps)?;
                    let jobs = if options.parallel {
                        self.settings.jobs()
                    } else {
                        1
                    };
                    self.backend.compile(description, jobs, &self.runner)?;
                    built = snapshot(&t.target_files) != before;
                }
                (TargetKind::Native(_), None) => {
                    self.runner.run_all(&t.build_steps)?;
                }
                _ => {
                    self.runner.run_all(&t.build_steps)?;
                    built = true;
                }
            }
        }

        self.runner.run_all(&t.post_build_steps)?;

        let t = self.graph.target_mut(target);
        t.built = built;
        t.state = if built {
            TargetState::Built
        } else {
            TargetState::Skipped
        };
        self.post_build(target)?;

        let t = self.graph.target(target);
        self.report.record(TargetReport {
            project: self.graph.owner(target).project_name.clone(),
            target: t.name.clone(),
            kind: t.kind.label(),
            outcome: if built { Outcome::Built } else { Outcome::Skipped },
            elapsed: start.elapsed(),
        });
        let status = if built {
            "✓ built".green()
        } else {
            "⚡ up to date".dimmed()
        };
        println!(
            "{}{} Done - {:.2?} ({})",
            indent,
            "->".blue(),
            start.elapsed(),
            status
        );
        Ok(())
    }

    fn post_build(&mut self, target: TargetId) -> Result<()> {
        let t = self.graph.target(target);
        if t.touches_outputs() {
            for file in &t.target_files {
                touch(file)?;
            }
        }
        if let Some(plan) = &t.relocation {
            plan.apply(&self.runner)?;
        }
        self.graph.target_mut(target).state = TargetState::PostBuilt;
        Ok(())
    }

    /// Process and build every target of `root`.
    pub fn build_all(&mut self, root: ContextId) -> Result<()> {
        let targets = self.graph.context(root).targets.clone();
        for &target in &targets {
            self.process(target)?;
        }
        for target in targets {
            self.build(target)?;
        }
        Ok(())
    }
}

fn join_flags(primary: &str, shared: &str) -> String {
    match (primary.trim(), shared.trim()) {
        ("", s) => s.to_string(),
        (p, "") => p.to_string(),
        (p, s) => format!("{} {}", p, s),
    }
}

fn snapshot(files: &[PathBuf]) -> Vec<Option<SystemTime>> {
    files.iter().map(|f| modified(f)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_flags() {
        assert_eq!(join_flags("-Wall", ""), "-Wall");
        assert_eq!(join_flags("", "-m64"), "-m64");
        assert_eq!(join_flags("-Wall ", " -m64"), "-Wall -m64");
        assert_eq!(join_flags(" ", " "), "");
    }
}
